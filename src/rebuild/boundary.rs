//! Fresh multipart boundary tokens.

use rand::distributions::Alphanumeric;
use rand::Rng;

const PREFIX: &str = "=_stripped_";
const RANDOM_LEN: usize = 28;

/// Generate a boundary that does not occur anywhere in `contents`.
///
/// The random part makes collisions practically impossible; the check makes
/// them impossible.
pub fn fresh_boundary<R: Rng + ?Sized>(rng: &mut R, contents: &[&[u8]]) -> String {
    loop {
        let random: String = (0..RANDOM_LEN)
            .map(|_| rng.sample(Alphanumeric) as char)
            .collect();
        let candidate = format!("{PREFIX}{random}");
        if !contents
            .iter()
            .any(|c| contains_subslice(c, candidate.as_bytes()))
        {
            return candidate;
        }
    }
}

/// Naive substring search over bytes.
pub fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}
