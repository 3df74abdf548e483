// src/testing.rs
//! Scripted stand-ins for the OS command layer and the geo-IP service.

use crate::command::{CommandLine, CommandRunner, RunOptions};
use crate::error::{Result, VpnError};
use crate::geo::{GeoLookup, IpInfo};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;

/// Answers `wg show interfaces` from a mutable "kernel" state and records every
/// other command; `wg-quick up/down` flip that state like the real tool would.
#[derive(Default)]
pub struct FakeRunner {
    pub active: Mutex<Option<String>>,
    pub calls: Mutex<Vec<String>>,
    pub failures: Mutex<Vec<(String, VpnError)>>,
}

impl FakeRunner {
    pub fn with_active(iface: Option<&str>) -> Self {
        Self {
            active: Mutex::new(iface.map(str::to_string)),
            ..Self::default()
        }
    }

    pub fn set_active(&self, iface: Option<&str>) {
        *self.active.lock().unwrap() = iface.map(str::to_string);
    }

    /// The next command whose line contains `pattern` fails with `err`.
    pub fn fail_on(&self, pattern: &str, err: VpnError) {
        self.failures.lock().unwrap().push((pattern.to_string(), err));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(&self, command: &CommandLine, options: &RunOptions) -> Result<String> {
        let line = command.to_string();
        self.calls.lock().unwrap().push(line.clone());
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(pos) = failures.iter().position(|(p, _)| line.contains(p.as_str())) {
                return Err(failures.remove(pos).1);
            }
        }
        if options.dry_run {
            return Ok(String::new());
        }

        if line.contains("show interfaces") {
            return Ok(self
                .active
                .lock()
                .unwrap()
                .as_ref()
                .map(|iface| format!("{}\n", iface))
                .unwrap_or_default());
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [.., "up", target] => *self.active.lock().unwrap() = Some(stem(target)),
            [.., "down", _] => *self.active.lock().unwrap() = None,
            _ => {}
        }
        Ok(String::new())
    }
}

fn stem(target: &str) -> String {
    std::path::Path::new(target)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| target.to_string())
}

impl CommandRunner for FakeRunner {
    async fn run(&self, command: &CommandLine, options: &RunOptions) -> Result<String> {
        self.answer(command, options)
    }
}

#[derive(Default)]
pub struct FakeGeo {
    pub own: Option<IpInfo>,
    pub known: HashMap<Ipv4Addr, IpInfo>,
    pub lookups: Mutex<Vec<Option<Ipv4Addr>>>,
}

impl FakeGeo {
    pub fn with(mut self, ip: Ipv4Addr, country: &str, region: &str, city: &str) -> Self {
        self.known.insert(ip, info(&ip.to_string(), country, region, city));
        self
    }

    pub fn with_own(mut self, ip: &str) -> Self {
        self.own = Some(info(ip, "DE", "Hesse", "Frankfurt am Main"));
        self
    }
}

pub fn info(ip: &str, country: &str, region: &str, city: &str) -> IpInfo {
    IpInfo {
        ip: ip.to_string(),
        country: Some(country.to_string()),
        region: Some(region.to_string()),
        city: Some(city.to_string()),
        ..IpInfo::default()
    }
}

impl GeoLookup for FakeGeo {
    async fn lookup(&self, ip: Option<Ipv4Addr>) -> Result<IpInfo> {
        self.lookups.lock().unwrap().push(ip);
        let found = match ip {
            Some(ip) => self.known.get(&ip).cloned(),
            None => self.own.clone(),
        };
        found.ok_or_else(|| VpnError::Network("lookup refused".to_string()))
    }
}
