// SPDX-License-Identifier: AGPL-3.0-only

//! IO block shared by overlord and fanout boards.
//!
//! ```text
//! io
//! ├── config.*          board_type, carrier_type, design_type (read-only)
//! ├── csr.ctrl.*        soft_rst, pll_rst, rst_i2c, rst_i2cmux, rst_lock_mon, mux
//! ├── csr.stat.*        mmcm_ok, mmcm_sticky, pll_ok, pll_sticky, cdr_lol, cdr_los, sfp_los
//! └── pll
//!     ├── design_id     8 words, 4 ASCII characters per word (big-endian)
//!     ├── stat.*        live PLL flags
//!     └── sticky.*      sticky PLL flags
//! version               top-level firmware version word
//! ```

/// Firmware version word.
pub const VERSION: &str = "version";

/// Board identification fields.
pub mod config {
    /// Board type code.
    pub const BOARD_TYPE: &str = "io.config.board_type";
    /// Carrier type code.
    pub const CARRIER_TYPE: &str = "io.config.carrier_type";
    /// Design type code.
    pub const DESIGN_TYPE: &str = "io.config.design_type";
}

/// IO control bits.
pub mod ctrl {
    /// Soft reset of the whole design.
    pub const SOFT_RST: &str = "io.csr.ctrl.soft_rst";
    /// PLL reset.
    pub const PLL_RST: &str = "io.csr.ctrl.pll_rst";
    /// I2C master reset.
    pub const RST_I2C: &str = "io.csr.ctrl.rst_i2c";
    /// I2C mux reset.
    pub const RST_I2CMUX: &str = "io.csr.ctrl.rst_i2cmux";
    /// Lock monitor reset.
    pub const RST_LOCK_MON: &str = "io.csr.ctrl.rst_lock_mon";
}

/// IO status group.
pub const CSR_STAT: &str = "io.csr.stat";

/// PLL registers.
pub mod pll {
    /// Configuration design id, 8 words.
    pub const DESIGN_ID: &str = "io.pll.design_id";
    /// Words in the design id block.
    pub const DESIGN_ID_WORDS: usize = 8;
    /// Live status flags group.
    pub const STAT: &str = "io.pll.stat";
    /// Sticky status flags group.
    pub const STICKY: &str = "io.pll.sticky";
}

/// Board type names by code.
pub const BOARD_NAMES: &[(u32, &str)] = &[
    (0x0, "pc059"),
    (0x1, "microzed"),
    (0x2, "tlu"),
    (0x3, "pc069"),
    (0x4, "fib"),
];

/// Carrier type names by code.
pub const CARRIER_NAMES: &[(u32, &str)] = &[
    (0x0, "enclustra-a35"),
    (0x1, "kc705"),
    (0x2, "microzed"),
    (0x3, "atfc"),
    (0x4, "afc"),
];

/// Design type names by code.
pub const DESIGN_NAMES: &[(u32, &str)] = &[
    (0x0, "master"),
    (0x1, "ouroboros"),
    (0x2, "ouroboros-sim"),
    (0x3, "test-stand"),
    (0x4, "endpoint"),
    (0x5, "fanout"),
    (0x6, "overlord"),
];

/// Look `code` up in one of the name tables.
#[must_use]
pub fn lookup(table: &[(u32, &'static str)], code: u32) -> Option<&'static str> {
    table.iter().find(|(c, _)| *c == code).map(|(_, name)| *name)
}

/// Decode the PLL design id block (4 big-endian ASCII characters per word).
///
/// NUL padding and non-printable bytes are dropped.
#[must_use]
pub fn decode_design_id(words: &[u32]) -> String {
    words
        .iter()
        .flat_map(|w| w.to_be_bytes())
        .filter(|b| b.is_ascii_graphic() || *b == b' ')
        .map(char::from)
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_and_unknown_codes() {
        assert_eq!(lookup(BOARD_NAMES, 0x0), Some("pc059"));
        assert_eq!(lookup(DESIGN_NAMES, 0x6), Some("overlord"));
        assert_eq!(lookup(CARRIER_NAMES, 0x42), None);
    }

    #[test]
    fn design_id_decodes_ascii_words() {
        let words = [
            u32::from_be_bytes(*b"Si53"),
            u32::from_be_bytes(*b"45-f"),
            u32::from_be_bytes(*b"o\0\0\0"),
            0,
        ];
        assert_eq!(decode_design_id(&words), "Si5345-fo");
    }
}
