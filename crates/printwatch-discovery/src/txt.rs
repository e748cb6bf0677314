// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DNS-SD TXT record parsing.
//
// Keys read from IPP printer / IPP system announcements:
//   - `rp`              resource path (e.g. "ipp/print")
//   - `note`            human-readable location
//   - `UUID`            endpoint UUID
//   - `adminurl`        admin web page
//   - `printer-type`    CUPS printer-type bits, hexadecimal
//   - `printer-state`   IPP printer-state enum, decimal

use tracing::debug;

use printwatch_core::types::TxtFields;

/// Split a TXT entry on its first `=`.
pub fn split_entry(entry: &str) -> Option<(&str, &str)> {
    entry.split_once('=')
}

/// Parse raw TXT strings into the fields the engine cares about.
///
/// Entries without `=` are skipped; the rest of the record is still read.
/// Unknown keys are ignored.
pub fn parse_txt<T: AsRef<[u8]>>(entries: &[T]) -> TxtFields {
    let mut fields = TxtFields::default();

    for raw in entries {
        let raw = raw.as_ref();
        if raw.is_empty() {
            continue;
        }
        let entry = String::from_utf8_lossy(raw);
        let Some((key, value)) = split_entry(&entry) else {
            debug!(entry = %entry, "skipping TXT entry without '='");
            continue;
        };

        match key {
            "rp" => fields.resource_path = Some(value.to_owned()),
            "note" => fields.location = Some(value.to_owned()),
            "printer-type" => {
                if let Some(bits) = parse_tolerant(value, 16) {
                    fields.printer_type = Some(bits);
                }
            }
            "printer-state" => {
                if let Some(state) = parse_tolerant(value, 10) {
                    fields.printer_state = Some(state);
                }
            }
            "UUID" if !value.is_empty() => fields.uuid = Some(value.to_owned()),
            "adminurl" if !value.is_empty() => fields.admin_url = Some(value.to_owned()),
            _ => {}
        }
    }

    fields
}

/// Parse the leading number of `value` in `radix`, the way `strtoull` does.
///
/// Leading whitespace, a `+` or `-` sign and (for hex) a `0x` prefix are
/// accepted; parsing stops at the first non-digit.  A `-` negates the result
/// modulo 2^64 and overflow yields `u64::MAX`.  Returns `None` only when no
/// digit was consumed, so `"0"` and `"0abc"` are a present zero while `""`
/// and `"zz"` are absent.
pub fn parse_tolerant(value: &str, radix: u32) -> Option<u64> {
    let s = value.trim_start();
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let digits = if radix == 16 {
        match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(rest) if rest.starts_with(|c: char| c.is_ascii_hexdigit()) => rest,
            // "0x" with nothing after it: only the leading zero is a number.
            Some(_) => return Some(0),
            None => s,
        }
    } else {
        s
    };

    let mut number: Option<u64> = Some(0);
    let mut consumed = 0usize;
    for c in digits.chars() {
        let Some(d) = c.to_digit(radix) else { break };
        number = number
            .and_then(|n| n.checked_mul(u64::from(radix)))
            .and_then(|n| n.checked_add(u64::from(d)));
        consumed += 1;
    }

    if consumed == 0 {
        return None;
    }
    Some(match number {
        None => u64::MAX,
        Some(n) if negative => n.wrapping_neg(),
        Some(n) => n,
    })
}
