//! Title normalization
//!
//! Folds a free-text title into the key used for exact and fuzzy matching.
//! Both sides of a comparison must go through [`normalize`].

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Source-specific markers removed before punctuation folding
const NOISE_MARKERS: [&str; 4] = ["@comic", "the comic", "(comic)", "(manga)"];

/// Canonical comparison key for `title`
///
/// Total and idempotent. Empty or symbol-only input yields an empty key.
pub fn normalize(title: &str) -> String {
    let mut key = fold(title);
    // Folding can expose new noise ("the-comic" becomes "the comic"), so
    // repeat until stable. Every changing pass shortens the key.
    loop {
        let next = fold(&key);
        if next == key {
            return key;
        }
        key = next;
    }
}

/// One folding pass
fn fold(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    // Compatibility decomposition, then drop combining marks (é -> e, ō -> o)
    let mut folded: String = trimmed
        .to_lowercase()
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect();

    for marker in NOISE_MARKERS {
        folded = folded.replace(marker, "");
    }

    let ascii: String = folded
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let tokens: Vec<&str> = ascii.split_whitespace().collect();
    let mut out: Vec<&str> = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            // Particle を romanized as "wo"
            "wo" => out.push("o"),
            "node" => out.push("no"),
            "no" if tokens.get(i + 1) == Some(&"de") => {
                out.push("no");
                i += 1;
            }
            tok => out.push(tok),
        }
        i += 1;
    }

    out.join(" ")
}
