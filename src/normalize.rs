// Text canonicalization for answer and command matching.

use unicode_normalization::UnicodeNormalization;

/// Apostrophe-like code points folded to a plain ASCII `'`.
const APOSTROPHES: [char; 4] = ['\u{2019}', '\u{2018}', '\u{02BC}', '\u{FF07}'];

/// Canonicalize chat text: NFKC fold, apostrophe unification, lowercase, trim.
///
/// Every comparison between a player's message and an expected answer or
/// typing word goes through this function on both sides.
pub fn normalize(text: &str) -> String {
    text.nfkc()
        .map(|c| if APOSTROPHES.contains(&c) { '\'' } else { c })
        .collect::<String>()
        .to_lowercase()
        .trim()
        .to_string()
}
