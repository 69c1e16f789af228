//! `butler`: operator CLI for timing-distribution boards.
//!
//! ```text
//! USAGE:
//!   butler ept <device> <ids> [enable|monitor|readback]   Endpoint commands
//!   butler ovld [setup|synctime|status|scan-fanout|measure-delay <addr>]
//!   butler vst  [...]                                      Same, secondary group
//!
//! OPTIONS:
//!   --connections <FILE>   Connections file (env TIMING_CONNECTIONS)
//!   --timeout <MS>         Register access timeout
//! ```
//!
//! `sim://` URIs in the connections file give a fully simulated fleet; see
//! `connections.sim.toml`.

mod ept;
mod system;
mod tables;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use timing_driver::ConnectionManager;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::ept::EptArgs;
use crate::system::SystemArgs;

#[derive(Parser, Debug)]
#[command(name = "butler", about = "Timing system operator CLI", version)]
struct Cli {
    /// Connections file mapping device ids to transports
    #[arg(
        long,
        env = "TIMING_CONNECTIONS",
        default_value = "connections.toml",
        global = true
    )]
    connections: PathBuf,

    /// Register access timeout in milliseconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Endpoint commands.
    Ept(EptArgs),
    /// Overlord group (OVLD_TUN, FO0_TUN by default).
    Ovld(SystemArgs),
    /// Secondary group (SECONDARY_TUN, TERTIARY_FO_TUN by default).
    Vst(SystemArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut mgr = ConnectionManager::load(&cli.connections)
        .with_context(|| format!("loading {}", cli.connections.display()))?;
    debug!("Devices: {}", mgr.device_ids().join(", "));
    if let Some(ms) = cli.timeout {
        mgr.set_timeout(Duration::from_millis(ms));
    }

    match cli.command {
        Cmd::Ept(args) => ept::run(&mgr, args)?,
        Cmd::Ovld(args) => system::run(&mgr, "ovld", args)?,
        Cmd::Vst(args) => system::run(&mgr, "vst", args)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    use crate::ept::EptCmd;
    use crate::system::SystemCmd;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("butler").chain(args.iter().copied()))
    }

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ept_enable_with_partition() {
        let cli = parse(&["ept", "EPT", "0-2", "enable", "-p", "1"]).unwrap();
        let Cmd::Ept(args) = cli.command else {
            panic!("expected ept");
        };
        assert_eq!(args.device, "EPT");
        assert_eq!(args.ids.as_slice(), &[0, 1, 2]);
        assert!(matches!(
            args.action,
            Some(EptCmd::Enable {
                off: false,
                partition: 1,
                ..
            })
        ));
    }

    #[test]
    fn ept_without_subcommand() {
        let cli = parse(&["ept", "EPT", "3"]).unwrap();
        assert!(matches!(cli.command, Cmd::Ept(EptArgs { action: None, .. })));
    }

    #[test]
    fn partition_above_four_is_rejected() {
        assert!(parse(&["ept", "EPT", "0", "enable", "-p", "5"]).is_err());
    }

    #[test]
    fn on_and_off_conflict() {
        assert!(parse(&["ept", "EPT", "0", "enable", "--on", "--off"]).is_err());
    }

    #[test]
    fn malformed_ids_fail_parsing() {
        assert!(parse(&["ept", "EPT", "1-2-3"]).is_err());
        assert!(parse(&["ept", "EPT", "4-1"]).is_err());
    }

    #[test]
    fn monitor_period_bounds() {
        assert!(parse(&["ept", "EPT", "0", "monitor", "-w", "-p", "240"]).is_ok());
        assert!(parse(&["ept", "EPT", "0", "monitor", "-p", "241"]).is_err());
    }

    #[test]
    fn measure_delay_arguments() {
        let cli = parse(&["ovld", "measure-delay", "0x21", "--slot", "3"]).unwrap();
        assert!(matches!(
            cli.command,
            Cmd::Ovld(SystemArgs {
                action: Some(SystemCmd::MeasureDelay {
                    addr: 0x21,
                    slot: Some(3)
                })
            })
        ));
        assert!(parse(&["ovld", "measure-delay", "0x101"]).is_err());
        assert!(parse(&["vst", "measure-delay", "0x10", "-s", "8"]).is_err());
    }

    #[test]
    fn global_options_after_subcommand() {
        let cli = parse(&["vst", "status", "--timeout", "500", "--connections", "x.toml"]).unwrap();
        assert_eq!(cli.timeout, Some(500));
        assert_eq!(cli.connections, PathBuf::from("x.toml"));
    }
}
