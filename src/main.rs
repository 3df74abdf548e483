// src/main.rs
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod app;
mod command;
mod config;
mod error;
mod geo;
mod locate;
mod reconcile;
mod wireguard;

#[cfg(test)]
mod testing;

use app::App;
use command::RunOptions;
use config::AppConfig;
use locate::{FirstColumn, LocationFilter};

/// Tools for WireGuard based VPN connections (MozillaVPN style configs).
#[derive(Parser, Debug)]
#[command(name = "mozvpn", version, about)]
struct Cli {
    /// Alternative configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Echo every command before running it.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print state-changing commands without executing them.
    #[arg(short = 'm', long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct LocationArgs {
    #[arg(short = 'c', long)]
    city: Option<String>,
    #[arg(short = 'C', long)]
    country: Option<String>,
    #[arg(short = 'r', long)]
    region: Option<String>,
}

impl From<LocationArgs> for LocationFilter {
    fn from(args: LocationArgs) -> Self {
        LocationFilter {
            city: args.city,
            country: args.country,
            region: args.region,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to a VPN server by config file, interface name or location.
    Up {
        #[arg(conflicts_with_all = ["city", "country", "region"])]
        conf_or_interface: Option<String>,
        #[command(flatten)]
        location: LocationArgs,
    },
    /// Shut down the active VPN connection.
    Down { conf_or_interface: Option<String> },
    /// Show status of the current VPN connection.
    Status {
        /// Also show the externally visible IP address.
        #[arg(long)]
        ip: bool,
    },
    /// Show the externally visible IP address.
    Ip {
        /// Show everything the geo-IP service knows about it.
        #[arg(long)]
        details: bool,
    },
    /// Determine the geographic location of server configurations (CSV output).
    Geolocate {
        #[arg(required = true)]
        config_paths: Vec<PathBuf>,
        /// Output file, `-` for stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write the config file path (`conf` column) instead of the interface name.
        #[arg(long)]
        by_path: bool,
    },
    /// List servers from the locations table.
    Servers,
    /// Follow the connection state; press Enter to toggle the connection.
    Watch {
        /// Server to connect to when toggling while disconnected.
        #[arg(long)]
        server: Option<String>,
        /// Shut down an active connection on Ctrl-C instead of asking.
        #[arg(long)]
        disconnect_on_exit: bool,
    },
    /// Connect to SERVER if disconnected, otherwise disconnect.
    Toggle { server: Option<String> },
    /// Print the effective configuration.
    Config {
        /// Write it to the configuration file.
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_path()?,
    };
    let config = AppConfig::load_from(&config_path)?;
    let options = RunOptions {
        verbose: cli.verbose,
        dry_run: cli.dry_run,
        timeout: config.command_timeout(),
    };

    if let Commands::Config { write } = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        if write {
            config.save_to(&config_path)?;
            eprintln!("Written to {}", config_path.display());
        }
        return Ok(());
    }

    let app = App::new(config, options)?;
    let out = &mut std::io::stdout();
    match cli.command {
        Commands::Up {
            conf_or_interface,
            location,
        } => app.up(conf_or_interface, location.into(), out).await,
        Commands::Down { conf_or_interface } => app.down(conf_or_interface, out).await,
        Commands::Status { ip } => app.status(ip, out).await,
        Commands::Ip { details } => app.ip(details, out).await,
        Commands::Geolocate {
            config_paths,
            output,
            by_path,
        } => {
            let first_column = if by_path {
                FirstColumn::Path
            } else {
                FirstColumn::Interface
            };
            app.geolocate(&config_paths, output, first_column, out).await
        }
        Commands::Servers => app.servers(out),
        Commands::Watch {
            server,
            disconnect_on_exit,
        } => app.watch(server, disconnect_on_exit, out).await,
        Commands::Toggle { server } => app.toggle(server, out).await,
        Commands::Config { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_up_with_location_filters() {
        let cli = Cli::try_parse_from(["mozvpn", "up", "-C", "DE", "-c", "Berlin"]).unwrap();
        match cli.command {
            Commands::Up {
                conf_or_interface,
                location,
            } => {
                assert_eq!(conf_or_interface, None);
                assert_eq!(location.country.as_deref(), Some("DE"));
                assert_eq!(location.city.as_deref(), Some("Berlin"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn up_rejects_target_together_with_filters() {
        assert!(Cli::try_parse_from(["mozvpn", "up", "de1-wireguard", "-C", "DE"]).is_err());
        assert!(Cli::try_parse_from(["mozvpn", "up", "de1-wireguard", "--city", "Berlin"]).is_err());
        assert!(Cli::try_parse_from(["mozvpn", "up", "de1-wireguard"]).is_ok());
    }

    #[test]
    fn watch_can_disconnect_on_exit() {
        let cli = Cli::try_parse_from(["mozvpn", "watch", "--disconnect-on-exit"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Watch {
                server: None,
                disconnect_on_exit: true
            }
        ));
    }

    #[test]
    fn geolocate_requires_paths() {
        assert!(Cli::try_parse_from(["mozvpn", "geolocate"]).is_err());
        let cli =
            Cli::try_parse_from(["mozvpn", "-m", "geolocate", "/etc/wireguard", "-o", "-"])
                .unwrap();
        assert!(cli.dry_run);
        assert!(matches!(
            cli.command,
            Commands::Geolocate { ref output, by_path: false, .. } if output.as_deref() == Some(std::path::Path::new("-"))
        ));
    }
}
