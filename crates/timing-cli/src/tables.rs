// SPDX-License-Identifier: AGPL-3.0-only

//! Operator-facing tables

use std::collections::BTreeMap;

use colored::Colorize;
use tabled::builder::Builder;
use tabled::settings::Style;
use timing_driver::{
    format_timestamp, BoardIdentity, DelayMeasurement, EndpointSnapshot, MonitorSnapshot,
    PortScan, Readback, TimeSync, VersionReport,
};
use timing_regs::commands;
use timing_regs::endpoint::EndpointState;

fn render(builder: Builder) -> String {
    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

/// Section banner, `--- title ---`
pub fn banner(title: &str) -> String {
    format!("--- {} ---", title.cyan())
}

/// One column per endpoint, hex version words
pub fn versions(report: &VersionReport) -> String {
    let mut b = Builder::default();
    b.push_record(report.versions.keys().map(u32::to_string));
    b.push_record(report.versions.values().map(|v| format!("{v:#x}")));
    render(b)
}

fn header(ids: &[u32]) -> Vec<String> {
    std::iter::once("Endpoint".to_string())
        .chain(ids.iter().map(u32::to_string))
        .collect()
}

fn row<'a>(
    label: &str,
    snapshot: &'a MonitorSnapshot,
    cell: impl Fn(&'a EndpointSnapshot) -> String,
) -> Vec<String> {
    std::iter::once(label.to_string())
        .chain(snapshot.endpoints.values().map(cell))
        .collect()
}

/// State label with its raw code; undefined codes stay visible
pub fn state_cell(code: u32) -> String {
    match EndpointState::from_code(code) {
        Some(EndpointState::Ready) => format!("{} ({code:#x})", "Ready".green()),
        Some(state) => format!("{state} ({code:#x})"),
        None => format!("{} ({code:#x})", "undefined".red()),
    }
}

/// Per-endpoint summary: state, partition, timestamp, counters, buffer
pub fn monitor_summary(snapshot: &MonitorSnapshot) -> String {
    let ids: Vec<u32> = snapshot.endpoints.keys().copied().collect();
    let mut b = Builder::default();
    b.push_record(header(&ids));
    b.push_record(row("State", snapshot, |e| {
        e.state_code().map_or_else(|| "-".to_string(), state_cell)
    }));
    b.push_record(row("Partition", snapshot, |e| e.partition().to_string()));
    b.push_record(row("Timestamp", snapshot, |e| {
        e.timestamp.to_string().blue().to_string()
    }));
    b.push_record(row("Timestamp (hex)", snapshot, |e| format!("{:#x}", e.timestamp)));
    b.push_record(row("EventCounter", snapshot, |e| e.event_counter.to_string()));
    b.push_record(row("Buffer status", snapshot, |e| {
        if e.buffer_ok() {
            "OK".green().to_string()
        } else {
            "Error".red().to_string()
        }
    }));
    b.push_record(row("Buffer occupancy", snapshot, |e| e.buffer_count.to_string()));
    render(b)
}

/// Status register dump, one row per flag
pub fn monitor_status(snapshot: &MonitorSnapshot) -> String {
    let ids: Vec<u32> = snapshot.endpoints.keys().copied().collect();
    let mut b = Builder::default();
    b.push_record(header(&ids));
    let names: Vec<&String> = snapshot
        .endpoints
        .values()
        .next()
        .map(|e| e.stat.keys().collect())
        .unwrap_or_default();
    for name in names {
        b.push_record(row(name, snapshot, |e| {
            e.stat
                .get(name)
                .map_or_else(|| "-".to_string(), |v| format!("{v:#x}"))
        }));
    }
    render(b)
}

/// Command counters, one row per command code
pub fn monitor_counters(snapshot: &MonitorSnapshot) -> String {
    let ids: Vec<u32> = snapshot.endpoints.keys().copied().collect();
    let rows = snapshot
        .endpoints
        .values()
        .map(|e| e.counters.len())
        .max()
        .unwrap_or_default();
    let mut b = Builder::default();
    b.push_record(header(&ids));
    for code in 0..rows {
        let label = commands::command_name(code)
            .map_or_else(|| format!("{code:#x}"), str::to_string);
        b.push_record(row(&label, snapshot, |e| {
            e.counters
                .get(code)
                .map_or_else(|| "-".to_string(), u32::to_string)
        }));
    }
    render(b)
}

/// Buffer readback as printed for one endpoint
pub fn readback(rb: &Readback) -> String {
    let mut out = vec![
        format!("Words available in readout buffer: {:#x}", rb.available),
        rb.to_read.to_string(),
    ];
    if rb.is_empty() {
        out.push("Nothing to read".to_string());
    }
    out.extend(
        rb.words
            .iter()
            .enumerate()
            .map(|(i, word)| format!("{i:04} {word:#x}")),
    );
    out.join("\n")
}

/// Register dump as a name/value table
pub fn registers(regs: &BTreeMap<String, u32>, with_header: bool) -> String {
    let mut b = Builder::default();
    if with_header {
        b.push_record(["name".to_string(), "value".to_string()]);
    }
    for (name, value) in regs {
        b.push_record([name.clone(), format!("{value:#x}")]);
    }
    render(b)
}

/// Board identification block
pub fn identity(id: &BoardIdentity) -> String {
    let mut b = Builder::default();
    b.push_record(["Board".to_string(), id.board_name()]);
    b.push_record(["Carrier".to_string(), id.carrier_name()]);
    b.push_record(["Design".to_string(), id.design_name()]);
    b.push_record(["Firmware".to_string(), format!("{:#x}", id.version)]);
    render(b)
}

/// Timestamp values before and after a sync
pub fn time_sync(sync: &TimeSync) -> String {
    format!(
        "Old timestamp {:#x}, {}\nNew timestamp {:#x}, {}",
        sync.old,
        format_timestamp(sync.old),
        sync.new,
        format_timestamp(sync.new).blue()
    )
}

/// One row per fanout mux slot
pub fn port_scan(ports: &[PortScan]) -> String {
    let mut b = Builder::default();
    b.push_record(["Slot", "CDR lol", "SFP los", "Upstream state"].map(str::to_string));
    for port in ports {
        let state = if port.is_locked() {
            state_cell(port.state_code)
        } else {
            state_cell(port.state_code).red().to_string()
        };
        b.push_record([
            port.slot.to_string(),
            format!("{:#x}", port.cdr_lol),
            format!("{:#x}", port.sfp_los),
            state,
        ]);
    }
    render(b)
}

/// Round-trip measurement line
pub fn delay(m: &DelayMeasurement) -> String {
    format!(
        "Measured RTT delay {} (transmission {:#x}, reception {:#x}) via fanout {}, slot {}",
        m.delay().to_string().green(),
        m.echo.tx,
        m.echo.rx,
        m.fanout,
        m.slot
    )
}

/// Print rendered blocks side by side, top aligned
pub fn collate(blocks: &[String]) -> String {
    let columns: Vec<Vec<&str>> = blocks.iter().map(|b| b.lines().collect()).collect();
    let widths: Vec<usize> = columns
        .iter()
        .map(|lines| lines.iter().map(|l| l.chars().count()).max().unwrap_or_default())
        .collect();
    let height = columns.iter().map(Vec::len).max().unwrap_or_default();

    (0..height)
        .map(|i| {
            columns
                .iter()
                .zip(&widths)
                .map(|(lines, &width)| {
                    let line = lines.get(i).copied().unwrap_or_default();
                    let pad = width - line.chars().count();
                    format!("{line}{}", " ".repeat(pad))
                })
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use timing_driver::backends::SimBoard;
    use timing_driver::EndpointGroup;

    fn plain() {
        colored::control::set_override(false);
    }

    fn snapshot(device: &mut SimBoard, ids: &[u32]) -> MonitorSnapshot {
        EndpointGroup::resolve(device, ids)
            .unwrap()
            .snapshot()
            .unwrap()
    }

    #[test]
    fn version_table_has_ids_and_hex() {
        let report = VersionReport {
            versions: BTreeMap::from([(0, 0x50400), (4, 0x50500)]),
        };
        let table = versions(&report);
        assert!(table.contains("0x50400"));
        assert!(table.contains("0x50500"));
        assert!(table.contains('4'));
    }

    #[test]
    fn undefined_state_is_rendered() {
        plain();
        assert_eq!(state_cell(0x7), "undefined (0x7)");
        assert_eq!(state_cell(0x8), "Ready (0x8)");
        assert_eq!(state_cell(0x2), "Waiting CDR lock (0x2)");
    }

    #[test]
    fn summary_shows_every_endpoint() {
        plain();
        let mut dev = SimBoard::endpoint("EPT", &[0, 1])
            .with_state(1, 0xc)
            .with_word("endpoint1.csr.stat.buf_err", 1);
        let table = monitor_summary(&snapshot(&mut dev, &[0, 1]));
        assert!(table.contains("Standing by (0x0)"));
        assert!(table.contains("Error in Rx (0xc)"));
        assert!(table.contains("OK"));
        assert!(table.contains("Error"));
    }

    #[test]
    fn summary_marks_missing_state() {
        plain();
        let mut dev = SimBoard::endpoint("EPT", &[0, 1]);
        let mut snap = snapshot(&mut dev, &[0, 1]);
        if let Some(ep1) = snap.endpoints.get_mut(&1) {
            ep1.stat.remove(timing_regs::endpoint::STAT_EP_STAT);
        }
        let table = monitor_summary(&snap);
        let state_row = table.lines().find(|l| l.contains("State")).unwrap();
        assert!(state_row.contains("Standing by (0x0)"));
        assert_eq!(state_row.matches("(0x0)").count(), 1);
        assert!(state_row.contains(" - "));
    }

    #[test]
    fn counters_label_named_and_unnamed_codes() {
        plain();
        let mut dev = SimBoard::endpoint("EPT", &[0]).with_counters(0, &[3]);
        let table = monitor_counters(&snapshot(&mut dev, &[0]));
        assert!(table.contains("TimeSync"));
        assert!(table.contains("0xf"));
        assert_eq!(table.lines().filter(|l| l.contains("0xf")).count(), 1);
    }

    #[test]
    fn status_rows_follow_flag_names() {
        let mut dev = SimBoard::endpoint("EPT", &[2]);
        let table = monitor_status(&snapshot(&mut dev, &[2]));
        for flag in ["buf_err", "ep_rdy", "ep_stat", "in_run"] {
            assert!(table.contains(flag), "missing {flag}");
        }
    }

    #[test]
    fn readback_dump_format() {
        let rb = Readback {
            id: 0,
            available: 7,
            to_read: 6,
            words: vec![0xa, 0xb, 0xc, 0xd, 0xe, 0xf],
        };
        let text = readback(&rb);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Words available in readout buffer: 0x7");
        assert_eq!(lines[1], "6");
        assert_eq!(lines[2], "0000 0xa");
        assert_eq!(lines[7], "0005 0xf");
    }

    #[test]
    fn empty_readback_says_so() {
        let rb = Readback {
            id: 0,
            available: 0,
            to_read: 0,
            words: Vec::new(),
        };
        assert!(readback(&rb).ends_with("Nothing to read"));
    }

    #[test]
    fn collate_pads_shorter_blocks() {
        let out = collate(&["ab\ncd\nef".to_string(), "xyz".to_string()]);
        assert_eq!(out, "ab  xyz\ncd\nef");
    }

    #[test]
    fn collate_aligns_columns() {
        let left = registers(&BTreeMap::from([("lol".to_string(), 0)]), false);
        let right = registers(&BTreeMap::from([("hold".to_string(), 1)]), false);
        let out = collate(&[left.clone(), right]);
        let width = left.lines().next().map(|l| l.chars().count()).unwrap();
        for line in out.lines() {
            assert!(line.chars().count() > width);
        }
    }
}
