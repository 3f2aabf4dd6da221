use lazy_static::lazy_static;

pub type PinTable = [(u32, &'static str)];

// Header positions wired through the sunxi gpio_sw tree, keyed by the
// physical connector numbering. The missing positions are power, ground or
// bus pins.
pub const PINS_V1: &PinTable = &[
    (12, "PD14"),
    (16, "PC4"),
    (18, "PC7"),
    (26, "PA21"),
    (29, "PA7"),
    (31, "PA8"),
    (33, "PA9"),
    (35, "PA10"),
    (37, "PA20"),
];

lazy_static! {
    static ref REVISION_PATTERN: regex::Regex =
        regex::Regex::new(r"Revision\s*:\s*[0-9a-f]*([0-9a-f]{4})").unwrap(); // constant valid regex
}

// Matches the last four hex digits of the number following "Revision:".
pub fn parse_revision(board_info: &str) -> Option<u16> {
    REVISION_PATTERN
        .captures(board_info)
        .and_then(|caps| caps.get(1))
        .and_then(|m| u16::from_str_radix(m.as_str(), 16).ok())
}

// Every revision seen so far ships the same header layout.
pub fn table_for_revision(_revision: u16) -> &'static PinTable {
    PINS_V1
}

pub fn lookup(table: &'static PinTable, channel: u32) -> Option<&'static str> {
    table
        .iter()
        .find(|(mapped, _)| *mapped == channel)
        .map(|(_, pin)| *pin)
}
