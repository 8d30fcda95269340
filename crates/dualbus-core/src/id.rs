//! Message id normalization.
//!
//! The legacy bus prefixes message ids with the publishing year
//! (`2024-<uuid>`) to avoid collisions across years. The broker path carries
//! ids with or without that prefix, so every id is compared after the prefix
//! has been stripped.

/// Length of a `YYYY-` prefix.
const YEAR_PREFIX_LEN: usize = 5;

/// Strip any leading four-digit-year prefix and its hyphen.
///
/// Prefixes are stripped until none remains, so applying the function to its
/// own output is a no-op.
///
/// # Examples
///
/// ```
/// use dualbus_core::normalize_message_id;
///
/// assert_eq!(normalize_message_id("2024-abc123"), "abc123");
/// assert_eq!(normalize_message_id("abc123"), "abc123");
/// ```
#[must_use]
pub fn normalize_message_id(id: &str) -> &str {
    let mut rest = id;
    while let Some(stripped) = strip_year_prefix(rest) {
        rest = stripped;
    }
    rest
}

fn strip_year_prefix(id: &str) -> Option<&str> {
    let bytes = id.as_bytes();
    if bytes.len() < YEAR_PREFIX_LEN {
        return None;
    }
    let (year, hyphen) = (&bytes[..4], bytes[4]);
    if hyphen == b'-' && year.iter().all(u8::is_ascii_digit) {
        // The first five bytes are ASCII, so index 5 is a char boundary.
        Some(&id[YEAR_PREFIX_LEN..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_year_prefix() {
        assert_eq!(
            normalize_message_id("2018-6d7a1b5c-0e3f-4b8e-9a33-5a2f0b1c9d11"),
            "6d7a1b5c-0e3f-4b8e-9a33-5a2f0b1c9d11"
        );
    }

    #[test]
    fn leaves_unprefixed_ids_alone() {
        assert_eq!(normalize_message_id("dummy-msgid"), "dummy-msgid");
        assert_eq!(normalize_message_id("abc"), "abc");
        assert_eq!(normalize_message_id(""), "");
    }

    #[test]
    fn requires_exactly_four_digits_and_hyphen() {
        assert_eq!(normalize_message_id("202-abc"), "202-abc");
        assert_eq!(normalize_message_id("20245-abc"), "20245-abc");
        assert_eq!(normalize_message_id("20x4-abc"), "20x4-abc");
        assert_eq!(normalize_message_id("2024_abc"), "2024_abc");
    }

    #[test]
    fn normalization_is_idempotent() {
        for id in ["2024-abc123", "abc123", "2023-2024-nested", "1999-", "x"] {
            let once = normalize_message_id(id);
            assert_eq!(normalize_message_id(once), once, "id {id}");
        }
    }

    #[test]
    fn non_ascii_ids_do_not_panic() {
        assert_eq!(normalize_message_id("20é4-abc"), "20é4-abc");
        assert_eq!(normalize_message_id("2024-é"), "é");
    }
}
