// src/app.rs
use crate::command::{CommandRunner, RunOptions, SystemRunner};
use crate::config::AppConfig;
use crate::error::VpnError;
use crate::geo::{GeoLookup, IpInfoClient};
use crate::locate::{self, FirstColumn, LocationFilter};
use crate::reconcile::{SessionEvent, SessionObserver, SessionReconciler, SessionState};
use crate::wireguard::WireGuard;
use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::task::JoinHandle;

pub struct App<R, G> {
    config: AppConfig,
    controller: Arc<WireGuard<R, G>>,
}

struct TerminalObserver;

impl SessionObserver for TerminalObserver {
    fn notify(&self, event: SessionEvent) {
        let message = match event {
            SessionEvent::Changed { to, .. } => format!("VPN connection got changed! {}", to),
            SessionEvent::Error(e) => format!("Status check failed: {}", e),
        };
        if let Err(e) = log_line(&mut std::io::stdout(), &message) {
            log::debug!("Cannot write to terminal: {}", e);
        }
    }
}

// Stops the background poller however `watch` returns.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn log_line<W: Write>(out: &mut W, message: &str) -> std::io::Result<()> {
    let timestamp = chrono::Local::now().format("%H:%M:%S");
    writeln!(out, "[{}] {}", timestamp, message)
}

impl App<SystemRunner, IpInfoClient> {
    pub fn new(config: AppConfig, options: RunOptions) -> anyhow::Result<Self> {
        let geo = IpInfoClient::new(&config.ipinfo_url, config.http_timeout())
            .context("Failed to create HTTP client")?;
        let controller = WireGuard::new(&config, options, SystemRunner, geo);
        Ok(Self::with_controller(config, controller))
    }
}

impl<R, G> App<R, G>
where
    R: CommandRunner + Send + Sync + 'static,
    G: GeoLookup + Send + Sync + 'static,
{
    pub fn with_controller(config: AppConfig, controller: WireGuard<R, G>) -> Self {
        Self {
            config,
            controller: Arc::new(controller),
        }
    }

    pub async fn up<W: Write>(
        &self,
        target: Option<String>,
        filter: LocationFilter,
        out: &mut W,
    ) -> anyhow::Result<()> {
        let target = match target {
            Some(target) => target,
            None => {
                let entries = locate::load_locations(&self.config.locations_file)?;
                let entry = locate::find_location(&entries, &filter)?;
                log::info!("Selected {}", entry.display_label());
                entry.connect_target().to_string()
            }
        };
        self.controller.connect(&target).await?;
        writeln!(
            out,
            "Connected to: {}",
            locate::interface_name(Path::new(&target))
        )?;
        Ok(())
    }

    pub async fn down<W: Write>(&self, target: Option<String>, out: &mut W) -> anyhow::Result<()> {
        let target = match target {
            Some(target) => target,
            None => self
                .controller
                .current_interface()
                .await?
                .ok_or(VpnError::NotConnected)?,
        };
        self.controller.disconnect(&target).await?;
        writeln!(out, "Disconnected from: {}", target)?;
        Ok(())
    }

    pub async fn status<W: Write>(&self, include_ip: bool, out: &mut W) -> anyhow::Result<()> {
        writeln!(out, "{}", self.controller.status_text(include_ip).await?)?;
        Ok(())
    }

    pub async fn ip<W: Write>(&self, details: bool, out: &mut W) -> anyhow::Result<()> {
        let info = self.controller.external_ip_info().await?;
        if !details {
            writeln!(out, "{}", info.ip)?;
            return Ok(());
        }
        writeln!(out, "ip: {}", info.ip)?;
        let fields = [
            ("city", &info.city),
            ("region", &info.region),
            ("country", &info.country),
            ("loc", &info.loc),
            ("org", &info.org),
            ("timezone", &info.timezone),
        ];
        for (name, value) in fields {
            if let Some(value) = value {
                writeln!(out, "{}: {}", name, value)?;
            }
        }
        Ok(())
    }

    pub async fn geolocate<W: Write>(
        &self,
        paths: &[PathBuf],
        output: Option<PathBuf>,
        first_column: FirstColumn,
        out: &mut W,
    ) -> anyhow::Result<()> {
        let servers = locate::resolve(paths, self.controller.geo()).await?;
        let incomplete = servers.iter().filter(|s| s.error.is_some()).count();

        match output.as_deref() {
            None => write_table(&servers, first_column, &mut *out)?,
            Some(path) if path == Path::new("-") => {
                write_table(&servers, first_column, &mut *out)?
            }
            Some(path) => {
                let file = std::fs::File::create(path)
                    .with_context(|| format!("creating {}", path.display()))?;
                write_table(&servers, first_column, file)?
            }
        }

        if incomplete > 0 {
            log::warn!(
                "{} of {} server configurations could not be fully resolved",
                incomplete,
                servers.len()
            );
        }
        Ok(())
    }

    pub fn servers<W: Write>(&self, out: &mut W) -> anyhow::Result<()> {
        let entries = locate::load_locations(&self.config.locations_file)?;
        for entry in &entries {
            writeln!(out, "{}\t{}", entry.display_label(), entry.interface_name())?;
        }
        Ok(())
    }

    pub async fn toggle<W: Write>(&self, server: Option<String>, out: &mut W) -> anyhow::Result<()> {
        let reconciler = SessionReconciler::new(Arc::clone(&self.controller));
        reconciler.sync().await?;
        let state = reconciler.toggle(server.as_deref()).await?;
        writeln!(out, "{}", state)?;
        Ok(())
    }

    pub async fn watch<W: Write>(
        &self,
        server: Option<String>,
        disconnect_on_exit: bool,
        out: &mut W,
    ) -> anyhow::Result<()> {
        let reconciler = Arc::new(SessionReconciler::new(Arc::clone(&self.controller)));
        let initial = reconciler.sync().await?;
        log_line(out, &initial.to_string())?;
        if matches!(initial, SessionState::Connected(_)) {
            log_line(out, "VPN is already running")?;
        }

        let poller = AbortOnDrop(
            Arc::clone(&reconciler).spawn(self.config.poll_interval(), TerminalObserver),
        );
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line() => match line? {
                    Some(_) => match reconciler.toggle(server.as_deref()).await {
                        Ok(state) => log_line(out, &state.to_string())?,
                        Err(e) => log_line(out, &format!("Error: {}", e))?,
                    },
                    // stdin closed: keep watching until interrupted
                    None => {
                        tokio::signal::ctrl_c().await?;
                        break;
                    }
                },
            }
        }
        drop(poller);

        let SessionState::Connected(iface) = reconciler.sync().await? else {
            return Ok(());
        };
        let disconnect = disconnect_on_exit
            || tokio::select! {
                answer = confirm_disconnect(&mut lines, out, &iface) => answer?,
                _ = tokio::signal::ctrl_c() => false,
            };
        close_session(&reconciler, &iface, disconnect, out).await
    }
}

async fn confirm_disconnect<B, W>(
    answers: &mut Lines<B>,
    out: &mut W,
    iface: &str,
) -> anyhow::Result<bool>
where
    B: AsyncBufRead + Unpin,
    W: Write,
{
    write!(out, "Disconnect from {} before quitting? [y/N] ", iface)?;
    out.flush()?;
    let answer = answers.next_line().await?.unwrap_or_default();
    let answer = answer.trim();
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}

async fn close_session<R, G, W>(
    reconciler: &SessionReconciler<R, G>,
    iface: &str,
    disconnect: bool,
    out: &mut W,
) -> anyhow::Result<()>
where
    R: CommandRunner + Send + Sync + 'static,
    G: GeoLookup + Send + Sync + 'static,
    W: Write,
{
    if disconnect {
        let state = reconciler.toggle(None).await?;
        log_line(out, &state.to_string())?;
    } else {
        log::warn!("Leaving VPN connection to {} up", iface);
        log_line(out, &format!("VPN connection to {} is still up", iface))?;
    }
    Ok(())
}

fn write_table<W: Write>(
    servers: &[locate::ServerConfig],
    first_column: FirstColumn,
    out: W,
) -> anyhow::Result<()> {
    locate::write_locations(servers, first_column, out).context("writing locations table")
}
