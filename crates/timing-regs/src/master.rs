// SPDX-License-Identifier: AGPL-3.0-only

//! Overlord master block.
//!
//! ```text
//! master
//! ├── tstamp.ctr          running timestamp, 2 words (read)
//! ├── tstamp.set          timestamp load port, 2 words (write)
//! ├── global.csr.ctrl.*   ts_en, ep_en (upstream endpoint enable)
//! ├── global.csr.stat.*   ep_stat (upstream endpoint state)
//! ├── acmd_buf.txbuf      async command packet buffer
//! └── echo_mon
//!     ├── csr.ctrl.go
//!     ├── csr.stat.rx_done
//!     ├── tx_tstamp       2 words
//!     └── rx_tstamp       2 words
//! ```

/// Running timestamp counter.
pub const TSTAMP: &str = "master.tstamp.ctr";
/// Timestamp load port.
pub const TSTAMP_SET: &str = "master.tstamp.set";
/// Timestamp broadcast enable.
pub const TS_EN: &str = "master.global.csr.ctrl.ts_en";
/// Upstream endpoint node (loop-back receiver of the overlord).
pub const UPSTREAM_EPT: &str = "master.global";
/// Async command packet buffer.
pub const ACMD_TXBUF: &str = "master.acmd_buf.txbuf";

/// Echo monitor registers.
pub mod echo {
    /// Trigger an echo command.
    pub const GO: &str = "master.echo_mon.csr.ctrl.go";
    /// Set once the echo has returned.
    pub const RX_DONE: &str = "master.echo_mon.csr.stat.rx_done";
    /// Timestamp at transmission.
    pub const TX_TSTAMP: &str = "master.echo_mon.tx_tstamp";
    /// Timestamp at reception.
    pub const RX_TSTAMP: &str = "master.echo_mon.rx_tstamp";
}

/// Timestamp clock frequency in Hz.
pub const CLOCK_FREQUENCY_HZ: u64 = 50_000_000;

/// Sequence number stamped on async command packets.
pub const ACMD_SEQUENCE: u32 = 0xab;
/// Endpoint register controlling the SFP transmitter.
pub const SFP_CONTROL_REG: u32 = 0x70;
/// Broadcast address: every endpoint on the link.
pub const BROADCAST_ADDRESS: u32 = 0x0;
/// Lowest addressable endpoint.
pub const MIN_ENDPOINT_ADDRESS: u32 = 0x1;
/// Highest addressable endpoint.
pub const MAX_ENDPOINT_ADDRESS: u32 = 0x100;

/// Build the async command packet switching an endpoint SFP transmitter.
///
/// Layout: address low byte, address high byte, sequence, write-transaction
/// header, length header, payload. Bit 8 of the last word marks the end of
/// the packet.
#[must_use]
pub fn sfp_switch_packet(address: u32, on: bool) -> Vec<u32> {
    const WRITE: u32 = 1 << 7;
    const ADDRESS_MODE: u32 = 1 << 7;
    const LAST: u32 = 1 << 8;

    vec![
        address & 0xff,
        address >> 8,
        ACMD_SEQUENCE,
        WRITE | SFP_CONTROL_REG,
        ADDRESS_MODE | 0x1,
        u32::from(on) | LAST,
    ]
}

/// Decode a packet built by [`sfp_switch_packet`] back into `(address, on)`.
#[must_use]
pub fn parse_sfp_switch_packet(packet: &[u32]) -> Option<(u32, bool)> {
    match packet {
        [lo, hi, ACMD_SEQUENCE, hdr, _, payload]
            if *hdr & 0x7f == SFP_CONTROL_REG && *payload & (1 << 8) != 0 =>
        {
            Some(((hi << 8) | lo, payload & 0x1 == 1))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sfp_packet_layout() {
        assert_eq!(
            sfp_switch_packet(0x1_05, true),
            vec![0x05, 0x01, 0xab, 0xf0, 0x81, 0x101]
        );
        assert_eq!(sfp_switch_packet(0x3, false)[5], 0x100);
    }

    #[test]
    fn sfp_packet_parses_back() {
        assert_eq!(parse_sfp_switch_packet(&sfp_switch_packet(0x42, true)), Some((0x42, true)));
        assert_eq!(parse_sfp_switch_packet(&sfp_switch_packet(0, false)), Some((0, false)));
        assert_eq!(parse_sfp_switch_packet(&[1, 2, 3]), None);
    }
}
