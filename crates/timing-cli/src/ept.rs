// SPDX-License-Identifier: AGPL-3.0-only

//! `butler ept <device> <ids> ...`

use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::{value_parser, Args, Subcommand};
use colored::Colorize;
use timing_driver::{ConnectionManager, EndpointGroup, EndpointIds, RegisterSession};
use timing_regs::endpoint::MAX_PARTITION;

use crate::tables;

/// Endpoint commands
#[derive(Args, Debug)]
pub struct EptArgs {
    /// Device identifier in the connections file
    pub device: String,
    /// Target endpoint ids, e.g. `0-3,7`
    pub ids: EndpointIds,
    #[command(subcommand)]
    pub action: Option<EptCmd>,
}

#[derive(Subcommand, Debug)]
pub enum EptCmd {
    /// Activate (or deactivate) the endpoint wrapper blocks.
    Enable {
        /// Enable the endpoints (default)
        #[arg(long, conflicts_with = "off")]
        on: bool,
        /// Disable the endpoints
        #[arg(long)]
        off: bool,
        /// Target partition
        #[arg(
            short,
            long,
            default_value_t = 0,
            value_parser = value_parser!(u32).range(0..=i64::from(MAX_PARTITION))
        )]
        partition: u32,
    },
    /// Display endpoint state and command counters.
    Monitor {
        /// Refresh until interrupted
        #[arg(short, long)]
        watch: bool,
        /// Refresh period in seconds
        #[arg(short, long, default_value_t = 2, value_parser = value_parser!(u64).range(0..=240))]
        period: u64,
    },
    /// Read the content of the readout buffers.
    Readback {
        /// Only read complete events (default)
        #[arg(long, conflicts_with = "all")]
        events: bool,
        /// Read the whole buffer
        #[arg(short, long)]
        all: bool,
    },
}

pub fn run(mgr: &ConnectionManager, args: EptArgs) -> Result<()> {
    let mut device = mgr.get_device(&args.device)?;
    println!("Created endpoint device {}", device.id().blue());

    let mut group = EndpointGroup::resolve(&mut device, args.ids.as_slice())?;
    let versions = group.read_versions()?;
    if !versions.is_consistent() {
        println!("{}", "WARNING: multiple endpoint versions detected".yellow());
        println!();
    }
    println!("{}", tables::versions(&versions));

    match args.action {
        None => Ok(()),
        Some(EptCmd::Enable { off, partition, .. }) => enable(&mut group, !off, partition),
        Some(EptCmd::Monitor { watch, period }) => monitor(&mut group, watch, period),
        Some(EptCmd::Readback { all, .. }) => readback(&mut group, all),
    }
}

fn enable<S: RegisterSession + ?Sized>(
    group: &mut EndpointGroup<'_, S>,
    on: bool,
    partition: u32,
) -> Result<()> {
    let report = group.enable(on, partition)?;
    println!("> {report}");
    Ok(())
}

fn monitor<S: RegisterSession + ?Sized>(
    group: &mut EndpointGroup<'_, S>,
    watch: bool,
    period: u64,
) -> Result<()> {
    loop {
        if watch {
            print!("\x1B[2J\x1B[1;1H");
        }
        let snapshot = group.snapshot()?;

        println!("{}", tables::monitor_summary(&snapshot));
        println!();
        println!("-- {} ---", "Endpoint state".green());
        println!("{}", tables::monitor_status(&snapshot));
        println!();
        println!("-- {} ---", "Command counters".green());
        println!("{}", tables::monitor_counters(&snapshot));

        if !watch {
            return Ok(());
        }
        thread::sleep(Duration::from_secs(period));
    }
}

fn readback<S: RegisterSession + ?Sized>(
    group: &mut EndpointGroup<'_, S>,
    all: bool,
) -> Result<()> {
    let readbacks = group.readback(all)?;
    let several = readbacks.len() > 1;
    for rb in &readbacks {
        if several {
            println!("{}", tables::banner(&format!("Endpoint {}", rb.id)));
        }
        println!("{}", tables::readback(rb));
    }
    Ok(())
}
