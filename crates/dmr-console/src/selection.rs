use std::time::Duration;

use dmr_core::domain::Destination;

/// Parse a comma-separated list of 1-based indices into `count` items.
///
/// Out-of-range and non-numeric entries are dropped; repeats keep their first
/// position.
pub fn parse_selection(input: &str, count: usize) -> Vec<usize> {
    let mut out = Vec::new();
    for part in input.split(',') {
        let Ok(n) = part.trim().parse::<usize>() else {
            continue;
        };
        if n == 0 || n > count {
            continue;
        }
        let idx = n - 1;
        if !out.contains(&idx) {
            out.push(idx);
        }
    }
    out
}

/// Destinations picked by a selection string, in selection order.
pub fn select_destinations(inbox: &[Destination], input: &str) -> Vec<Destination> {
    parse_selection(input, inbox.len())
        .into_iter()
        .map(|i| inbox[i].clone())
        .collect()
}

/// Inter-send delay in whole seconds; blank input takes `default`.
pub fn parse_delay(input: &str, default: Duration) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Some(default);
    }
    input.parse::<u64>().ok().map(Duration::from_secs)
}
