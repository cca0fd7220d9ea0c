//! Utility functions and helpers.

pub mod http;

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::Result;

/// Characters that cannot appear in a file name on common filesystems.
const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Longest sanitised title kept in a record key.
const MAX_KEY_TITLE_LEN: usize = 120;

/// Canonical form of a page title.
///
/// Underscores become spaces, runs of whitespace collapse to one space and the
/// result is trimmed. `Ab_Urbe_Condita/Liber_I` and `Ab Urbe  Condita/Liber I`
/// name the same page.
pub fn canonical_title(title: &str) -> String {
    title
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the raw-wikitext export URL for a title.
pub fn export_url(endpoint: &str, title: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint)?;
    url.query_pairs_mut()
        .append_pair("action", "raw")
        .append_pair("title", &canonical_title(title).replace(' ', "_"));
    Ok(url)
}

/// Extract the host from a URL string.
pub fn get_domain(url_str: &str) -> Option<String> {
    Url::parse(url_str)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_string()))
}

/// Hex SHA-256 of a text, used to recognise unchanged stored content.
pub fn content_digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Storage key for a work: sanitised title plus a short hash of the canonical title.
///
/// The hash keeps keys unique when two titles sanitise to the same string.
pub fn record_key(title: &str) -> String {
    let canonical = canonical_title(title);
    let digest = Sha256::digest(canonical.as_bytes());
    let short = &hex::encode(digest)[..8];

    let sanitized: String = canonical
        .chars()
        .map(|c| {
            if INVALID_FILENAME_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .take(MAX_KEY_TITLE_LEN)
        .collect();

    format!("{}_{}", sanitized.trim(), short)
}

/// Upper-case Roman numeral for `n` (1..=3999). Returns the decimal form otherwise.
pub fn roman(n: usize) -> String {
    if n == 0 || n > 3999 {
        return n.to_string();
    }

    const TABLE: &[(usize, &str)] = &[
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];

    let mut rest = n;
    let mut out = String::new();
    for &(value, numeral) in TABLE {
        while rest >= value {
            out.push_str(numeral);
            rest -= value;
        }
    }
    out
}

/// Value of an arabic or well-formed roman numeral (`12`, `XII`, `xii`).
pub fn parse_numeral(token: &str) -> Option<usize> {
    if let Ok(n) = token.parse::<usize>() {
        return Some(n);
    }

    let upper = token.to_ascii_uppercase();
    let mut total = 0usize;
    let mut previous = 0usize;
    for c in upper.chars().rev() {
        let value = match c {
            'I' => 1,
            'V' => 5,
            'X' => 10,
            'L' => 50,
            'C' => 100,
            'D' => 500,
            'M' => 1000,
            _ => return None,
        };
        if value < previous {
            total = total.checked_sub(value)?;
        } else {
            total += value;
            previous = value;
        }
    }
    // Reject sloppy forms such as `IIII` or `VX`.
    (total > 0 && roman(total) == upper).then_some(total)
}
