/// Formats a signed offset as a lowercase `0x`-prefixed hex string.
///
/// Negative values keep their sign in front of the prefix (`-0x1`), so the
/// sentinel module offset of -1 survives a round trip through the response.
pub fn format_hex(value: i64) -> String {
    if value < 0 {
        format!("-0x{:x}", value.unsigned_abs())
    } else {
        format!("0x{:x}", value)
    }
}
