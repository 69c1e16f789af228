// SPDX-License-Identifier: AGPL-3.0-only

//! `butler ovld ...` / `butler vst ...`

use anyhow::{Context, Result};
use clap::{value_parser, Args, Subcommand};
use timing_driver::{ConnectionManager, Delays, Fleet, RegisterSession};
use timing_regs::master::{MAX_ENDPOINT_ADDRESS, MIN_ENDPOINT_ADDRESS};

use crate::tables;

/// Overlord group commands
#[derive(Args, Debug)]
pub struct SystemArgs {
    #[command(subcommand)]
    pub action: Option<SystemCmd>,
}

#[derive(Subcommand, Debug)]
pub enum SystemCmd {
    /// Reset overlord and fanouts, then synchronise time.
    Setup,
    /// Load the current time into the overlord timestamp.
    Synctime,
    /// Show IO and PLL status of overlord and fanout 0.
    Status,
    /// Scan every fanout input.
    ScanFanout,
    /// Measure the round trip to one endpoint.
    MeasureDelay {
        /// Endpoint address (0x1-0x100)
        #[arg(value_parser = parse_address)]
        addr: u32,
        /// Mux slot on fanout 0; looked up from the address map when omitted
        #[arg(short, long, value_parser = value_parser!(u32).range(0..=7))]
        slot: Option<u32>,
    },
}

/// Parse an endpoint address, decimal or `0x` hex
pub fn parse_address(text: &str) -> std::result::Result<u32, String> {
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    }
    .map_err(|e| format!("'{text}': {e}"))?;

    if (MIN_ENDPOINT_ADDRESS..=MAX_ENDPOINT_ADDRESS).contains(&value) {
        Ok(value)
    } else {
        Err(format!(
            "{value:#x} is not in the range {MIN_ENDPOINT_ADDRESS:#x}-{MAX_ENDPOINT_ADDRESS:#x}"
        ))
    }
}

pub fn run(mgr: &ConnectionManager, group: &str, args: SystemArgs) -> Result<()> {
    let mut fleet = mgr
        .open_fleet(group, Delays::default())
        .with_context(|| format!("opening group '{group}'"))?;
    identify(&mut fleet)?;

    match args.action {
        None => Ok(()),
        Some(SystemCmd::Setup) => {
            let sync = fleet.setup()?;
            println!("{}", tables::time_sync(&sync));
            Ok(())
        }
        Some(SystemCmd::Synctime) => {
            println!("{}", fleet.overlord().id());
            let sync = fleet.synctime()?;
            println!("{}", tables::time_sync(&sync));
            Ok(())
        }
        Some(SystemCmd::Status) => status(&mut fleet),
        Some(SystemCmd::ScanFanout) => {
            for (n, ports) in fleet.scan_fanouts()? {
                println!("{}", tables::banner(&format!("Fanout {n}")));
                println!("{}", tables::port_scan(&ports));
            }
            Ok(())
        }
        Some(SystemCmd::MeasureDelay { addr, slot }) => {
            let m = fleet.measure_delay(addr, slot)?;
            if slot.is_none() {
                println!(
                    "Address {addr:#x} mapped to fanout {}, slot {}",
                    m.fanout, m.slot
                );
            }
            println!("{}", tables::delay(&m));
            Ok(())
        }
    }
}

fn identify<S: RegisterSession>(fleet: &mut Fleet<S>) -> Result<()> {
    let fanouts = fleet.fanout_ids();
    let boards = fleet.identify_all()?;
    let labels = std::iter::once("Overlord".to_string())
        .chain(fanouts.iter().map(|n| format!("Fanout {n}")));
    for (label, (id, identity)) in labels.zip(&boards) {
        println!("{}", tables::banner(&format!("{label} {id}")));
        println!("{}", tables::identity(identity));
    }
    Ok(())
}

fn status<S: RegisterSession>(fleet: &mut Fleet<S>) -> Result<()> {
    let status = fleet.status()?;

    println!("{}", tables::banner("Overlord IO status"));
    println!("{}", tables::registers(&status.overlord, false));
    if let Some(fanout) = &status.fanout {
        println!("{}", tables::banner("Fanout[0] IO status"));
        println!("{}", tables::registers(fanout, false));
    }

    let plls: Vec<_> = std::iter::once(&status.overlord_pll)
        .chain(status.fanout_pll.as_ref())
        .collect();
    println!("{}", tables::banner("PLL status"));
    println!(
        "{}",
        tables::collate(&plls.iter().map(|p| p.design_id.clone()).collect::<Vec<_>>())
    );
    println!(
        "{}",
        tables::collate(
            &plls
                .iter()
                .map(|p| tables::registers(&p.stat, false))
                .collect::<Vec<_>>()
        )
    );
    println!(
        "{}",
        tables::collate(
            &plls
                .iter()
                .map(|p| tables::registers(&p.sticky, false))
                .collect::<Vec<_>>()
        )
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_accepts_hex_and_decimal() {
        assert_eq!(parse_address("0x21"), Ok(0x21));
        assert_eq!(parse_address("256"), Ok(0x100));
        assert_eq!(parse_address("0X1"), Ok(1));
    }

    #[test]
    fn address_out_of_range() {
        assert!(parse_address("0x0").is_err());
        assert!(parse_address("0x101").is_err());
        assert!(parse_address("zz").is_err());
    }
}
