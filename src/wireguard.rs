// src/wireguard.rs
//! Thin controller over the `wg` / `wg-quick` command line tools.

use crate::command::{CommandLine, CommandRunner, RunOptions};
use crate::config::AppConfig;
use crate::error::{Result, VpnError};
use crate::geo::{GeoLookup, IpInfo};

pub struct WireGuard<R, G> {
    runner: R,
    geo: G,
    privilege_prefix: Vec<String>,
    wg_quick_program: String,
    wg_program: String,
    elevate_show: bool,
    interfaces_query: Option<String>,
    options: RunOptions,
}

impl<R: CommandRunner, G: GeoLookup> WireGuard<R, G> {
    pub fn new(config: &AppConfig, options: RunOptions, runner: R, geo: G) -> Self {
        Self {
            runner,
            geo,
            privilege_prefix: config.privilege_prefix.clone(),
            wg_quick_program: config.wg_quick_program.clone(),
            wg_program: config.wg_program.clone(),
            elevate_show: config.elevate_show,
            interfaces_query: config.interfaces_query.clone(),
            options,
        }
    }

    pub fn geo(&self) -> &G {
        &self.geo
    }

    #[cfg(test)]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn privileged(&self, program: &str, args: &[&str]) -> CommandLine {
        CommandLine::args(
            self.privilege_prefix
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(program))
                .chain(args.iter().copied()),
        )
    }

    fn show_interfaces_command(&self) -> CommandLine {
        if let Some(query) = &self.interfaces_query {
            return CommandLine::Shell(query.clone());
        }
        let args = ["show", "interfaces"];
        if self.elevate_show {
            self.privileged(&self.wg_program, &args)
        } else {
            CommandLine::args(std::iter::once(self.wg_program.as_str()).chain(args))
        }
    }

    /// Name of the active tunnel interface, re-read from the OS on every call.
    pub async fn current_interface(&self) -> Result<Option<String>> {
        // Read-only: runs even in dry-run mode so decisions see the real state.
        let options = RunOptions {
            dry_run: false,
            ..self.options
        };
        let output = self
            .runner
            .run(&self.show_interfaces_command(), &options)
            .await?;
        Ok(parse_interfaces(&output))
    }

    /// Brings up the tunnel for a config file path or an interface name known to
    /// `wg-quick` (i.e. `/etc/wireguard/<name>.conf`).
    pub async fn connect(&self, conf_or_interface: &str) -> Result<()> {
        if let Some(active) = self.current_interface().await? {
            return Err(VpnError::AlreadyConnected(active));
        }
        log::info!("Bringing up {}", conf_or_interface);
        let cmd = self.privileged(&self.wg_quick_program, &["up", conf_or_interface]);
        self.runner.run(&cmd, &self.options).await?;
        Ok(())
    }

    pub async fn disconnect(&self, conf_or_interface: &str) -> Result<()> {
        if self.current_interface().await?.is_none() {
            return Err(VpnError::NotConnected);
        }
        log::info!("Shutting down {}", conf_or_interface);
        let cmd = self.privileged(&self.wg_quick_program, &["down", conf_or_interface]);
        self.runner.run(&cmd, &self.options).await?;
        Ok(())
    }

    pub async fn external_ip_info(&self) -> Result<IpInfo> {
        self.geo.lookup(None).await
    }

    pub async fn status_text(&self, include_external_ip: bool) -> Result<String> {
        let Some(iface) = self.current_interface().await? else {
            return Ok("Not connected".to_string());
        };
        if include_external_ip {
            let info = self.external_ip_info().await?;
            Ok(format!("Connected to: {}, ip: {}", iface, info.ip))
        } else {
            Ok(format!("Connected to: {}", iface))
        }
    }
}

fn parse_interfaces(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
