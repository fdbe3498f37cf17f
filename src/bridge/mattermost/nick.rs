//! Nick validation for backend display names.

use regex::Regex;
use std::sync::LazyLock;

/// Longest nick accepted from a backend nickname (three times the RFC 2812
/// limit; modern clients cope).
const MAX_NICK_LEN: usize = 27;

/// Usernames that webhooks may impose on a post.
static OVERRIDE_USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[a-zA-Z0-9_]*$").expect("static regex"));

/// Whether `s` is an acceptable IRC nick.
///
/// RFC 2812: `( letter / special ) *( letter / digit / special / "-" )`.
/// The first character may also be `;`.
pub fn is_valid_nick(s: &str) -> bool {
    let bytes = s.as_bytes();
    let Some((&first, rest)) = bytes.split_first() else {
        return false;
    };
    if bytes.len() > MAX_NICK_LEN {
        return false;
    }

    let letter_or_special = |b: u8| (b'A'..=b'}').contains(&b);

    if first != b';' && !letter_or_special(first) {
        return false;
    }

    rest.iter()
        .all(|&b| b == b'-' || b == b';' || b.is_ascii_digit() || letter_or_special(b))
}

/// Whether a webhook `override_username` may be shown as a nick.
pub fn is_valid_override(s: &str) -> bool {
    OVERRIDE_USERNAME.is_match(s)
}
