//! Reversible mapping between device record names and filesystem names.
//!
//! Device names may contain characters a POSIX path component cannot hold
//! (`/`, NUL) or collide with the special entries `.` and `..`. These are
//! percent-encoded on the way into the tree; `%` itself is encoded so the
//! mapping stays a bijection. [`unescape`] only accepts strings that
//! [`escape`] can produce, so a filesystem name maps to at most one device name.

use crate::error::TreeError;

/// Longest record name the calculator accepts, in bytes.
pub const MAX_NAME_LEN: usize = 219;

/// Longest filesystem name an escaped device name can produce: every byte of
/// a [`MAX_NAME_LEN`] name may become a three-byte `%XX` sequence.
pub const MAX_ESCAPED_NAME_LEN: usize = MAX_NAME_LEN * 3;

const ESCAPED_DOT: &str = "%2E";

/// Converts a device name into a filesystem name.
pub fn escape(name: &str) -> String {
    if name == "." || name == ".." {
        return ESCAPED_DOT.repeat(name.len());
    }

    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\0' => out.push_str("%00"),
            c => out.push(c),
        }
    }
    out
}

/// Converts a filesystem name back into the device name it was escaped from.
pub fn unescape(fs_name: &str) -> Result<String, TreeError> {
    let invalid = || TreeError::InvalidName(fs_name.to_string());

    if fs_name.is_empty() || fs_name == "." || fs_name == ".." {
        return Err(invalid());
    }
    if fs_name == ESCAPED_DOT || fs_name == "%2E%2E" {
        return Ok(".".repeat(fs_name.len() / ESCAPED_DOT.len()));
    }
    if fs_name.contains(['/', '\0']) {
        return Err(invalid());
    }

    let mut out = String::with_capacity(fs_name.len());
    let mut rest = fs_name;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let decoded = match rest.get(pos + 1..pos + 3) {
            Some("25") => '%',
            Some("2F") => '/',
            Some("00") => '\0',
            _ => return Err(invalid()),
        };
        out.push(decoded);
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Checks that a device name can be stored on the calculator.
pub fn validate(name: &str) -> Result<(), TreeError> {
    if name.is_empty() {
        return Err(TreeError::InvalidName(String::new()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(TreeError::NameTooLong(name.len()));
    }
    Ok(())
}


#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Escaping is lossless for every device name.
        #[test]
        fn escape_roundtrip(name in any::<String>().prop_filter("non-empty", |s| !s.is_empty())) {
            prop_assert_eq!(unescape(&escape(&name)).unwrap(), name);
        }

        /// Escaped names are always valid single path components.
        #[test]
        fn escaped_is_path_component(name in any::<String>().prop_filter("non-empty", |s| !s.is_empty())) {
            let escaped = escape(&name);
            prop_assert!(!escaped.contains('/'));
            prop_assert!(!escaped.contains('\0'));
            prop_assert!(escaped != "." && escaped != "..");
        }

        /// Any accepted filesystem name is the escape of its decoding.
        #[test]
        fn unescape_is_injective(fs_name in "[a-z%2F50E./]{1,12}") {
            if let Ok(name) = unescape(&fs_name) {
                prop_assert_eq!(escape(&name), fs_name);
            }
        }
    }
}
