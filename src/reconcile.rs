// src/reconcile.rs
//! Keeps a displayed connection state in line with what the OS reports.
//!
//! The tunnel can be changed behind the front-end's back (e.g. `mozvpn down` from
//! another terminal), so the displayed state is only ever a copy of the last
//! `wg show interfaces` answer and is refreshed on a fixed interval.

use crate::command::CommandRunner;
use crate::error::{Result, VpnError};
use crate::geo::GeoLookup;
use crate::wireguard::WireGuard;
use std::fmt;
use std::sync::{Arc, Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected(String),
}

impl SessionState {
    fn from_interface(iface: Option<String>) -> Self {
        match iface {
            Some(iface) => SessionState::Connected(iface),
            None => SessionState::Disconnected,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Not connected"),
            SessionState::Connected(iface) => write!(f, "Connected to: {}", iface),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The tunnel changed without going through `toggle`.
    Changed {
        from: SessionState,
        to: SessionState,
    },
    Error(String),
}

pub trait SessionObserver: Send + Sync {
    fn notify(&self, event: SessionEvent);
}

impl SessionObserver for mpsc::Sender<SessionEvent> {
    fn notify(&self, event: SessionEvent) {
        if let Err(e) = self.send(event) {
            log::debug!("Session observer went away: {}", e);
        }
    }
}

pub struct SessionReconciler<R, G> {
    controller: Arc<WireGuard<R, G>>,
    displayed: Mutex<SessionState>,
    // Held for the whole connect/disconnect so polls and other toggles back off.
    toggle_lock: tokio::sync::Mutex<()>,
}

impl<R, G> SessionReconciler<R, G>
where
    R: CommandRunner + Send + Sync + 'static,
    G: GeoLookup + Send + Sync + 'static,
{
    pub fn new(controller: Arc<WireGuard<R, G>>) -> Self {
        Self {
            controller,
            displayed: Mutex::new(SessionState::Disconnected),
            toggle_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn displayed(&self) -> SessionState {
        self.lock_displayed().clone()
    }

    fn lock_displayed(&self) -> std::sync::MutexGuard<'_, SessionState> {
        // The guarded value is a plain enum; a poisoned lock still holds a valid one.
        self.displayed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, observed: SessionState) -> Option<SessionEvent> {
        let mut displayed = self.lock_displayed();
        if *displayed == observed {
            return None;
        }
        let from = std::mem::replace(&mut *displayed, observed.clone());
        Some(SessionEvent::Changed { from, to: observed })
    }

    /// Adopts the current OS state without reporting it as a change, e.g. at startup.
    pub async fn sync(&self) -> Result<SessionState> {
        let observed = SessionState::from_interface(self.controller.current_interface().await?);
        *self.lock_displayed() = observed.clone();
        Ok(observed)
    }

    /// One reconciliation step. Skipped (`Ok(None)`) while a toggle is in flight;
    /// the toggle re-reads the state itself when it finishes.
    pub async fn poll_once(&self) -> Result<Option<SessionEvent>> {
        let Ok(_guard) = self.toggle_lock.try_lock() else {
            log::debug!("Toggle in flight, skipping connectivity check");
            return Ok(None);
        };
        log::debug!("Updating connectivity status");
        let observed = SessionState::from_interface(self.controller.current_interface().await?);
        let event = self.transition(observed);
        if let Some(SessionEvent::Changed { from, to }) = &event {
            log::warn!("VPN connection got changed: {} -> {}", from, to);
        }
        Ok(event)
    }

    /// Connects `selection` when no tunnel is up, otherwise shuts down whatever
    /// tunnel the OS reports. Returns the state re-read after the action.
    pub async fn toggle(&self, selection: Option<&str>) -> Result<SessionState> {
        let _guard = self.toggle_lock.lock().await;

        let result = match self.controller.current_interface().await? {
            Some(active) => {
                if let SessionState::Connected(shown) = self.displayed()
                    && shown != active
                {
                    log::warn!(
                        "Interface shown ({}) does not match interface reported by wg ({})",
                        shown,
                        active
                    );
                }
                self.controller.disconnect(&active).await
            }
            None => match selection {
                Some(target) => self.controller.connect(target).await,
                None => Err(VpnError::NoServerSelected),
            },
        };

        // Whatever happened, show what is actually there now.
        let now = SessionState::from_interface(self.controller.current_interface().await?);
        *self.lock_displayed() = now.clone();
        result.map(|()| now)
    }

    /// Polls every `period` on the tokio runtime until the handle is aborted.
    pub fn spawn<O>(self: Arc<Self>, period: Duration, observer: O) -> JoinHandle<()>
    where
        O: SessionObserver + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match self.poll_once().await {
                    Ok(Some(event)) => observer.notify(event),
                    Ok(None) => {}
                    Err(e) => observer.notify(SessionEvent::Error(e.to_string())),
                }
            }
        })
    }
}
