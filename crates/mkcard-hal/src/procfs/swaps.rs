//! Parsing helpers for `/proc/swaps`.
//!
//! A swap partition in use never shows up in mountinfo, so busy detection
//! has to consult the swap table separately.

/// Device paths of all active swap areas. The first line of `/proc/swaps`
/// is a column header.
pub fn parse_swaps(content: &str) -> Vec<String> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Whether `device` is an active swap area.
pub fn is_swap_active(content: &str, device: &str) -> bool {
    parse_swaps(content).iter().any(|s| s == device)
}
