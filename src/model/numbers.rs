// src/model/numbers.rs

//! Compact number-list syntax used for `waitfor` lines and sequence
//! selectors on the control channel.
//!
//! `1-2,6-9,11` expands to `{1, 2, 6, 7, 8, 9, 11}`. Commas and colons
//! separate items, `-` forms an inclusive range. A range end shorter than
//! its start borrows the start's leading digits, so `94567-8` means
//! `94567-94568`.

use std::collections::BTreeSet;

/// Parse a compact number list.
///
/// Returns `None` if any item is not a number.
pub fn parse_number_set(text: &str) -> Option<BTreeSet<u32>> {
    let mut out = BTreeSet::new();

    for item in text.split([',', ':']) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        match item.split_once('-') {
            None => {
                out.insert(item.parse::<u32>().ok()?);
            }
            Some((start, end)) => {
                let start: u32 = start.trim().parse().ok()?;
                let end: u32 = end.trim().parse().ok()?;
                let end = expand_abbreviated_end(start, end);
                // An inverted range still contributes its start.
                out.extend(start..=end.max(start));
            }
        }
    }

    Some(out)
}

fn expand_abbreviated_end(start: u32, end: u32) -> u32 {
    if end >= start {
        return end;
    }
    let mut dec: u64 = 10;
    let start = u64::from(start);
    let end = u64::from(end);
    while start / dec != 0 {
        if end / dec == 0 {
            let expanded = end + (start / dec) * dec;
            return u32::try_from(expanded).unwrap_or(u32::MAX);
        }
        dec *= 10;
    }
    end as u32
}

/// Render a set of numbers in compact form (`1-2,6-9,11`).
pub fn format_number_set(numbers: &BTreeSet<u32>) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut iter = numbers.iter().copied();

    let Some(first) = iter.next() else {
        return String::new();
    };

    let mut range_start = first;
    let mut range_end = first;

    for n in iter {
        if n == range_end + 1 {
            range_end = n;
            continue;
        }
        parts.push(render_range(range_start, range_end));
        range_start = n;
        range_end = n;
    }
    parts.push(render_range(range_start, range_end));

    parts.join(",")
}

fn render_range(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}
