//! IRCv3 message tag escaping.

use std::fmt::{Result as FmtResult, Write};

/// Escape a tag value for serialization.
///
/// Escapes special characters according to the IRCv3 message-tags spec.
pub fn escape_tag_value(f: &mut dyn Write, value: &str) -> FmtResult {
    for c in value.chars() {
        match c {
            ';' => f.write_str("\\:")?,
            ' ' => f.write_str("\\s")?,
            '\\' => f.write_str("\\\\")?,
            '\r' => f.write_str("\\r")?,
            '\n' => f.write_str("\\n")?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

/// Unescape a tag value from wire format.
///
/// Reverses [`escape_tag_value`]. An unknown escape keeps the escaped
/// character; a dangling trailing backslash is dropped.
pub fn unescape_tag_value(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut iter = value.chars();
    while let Some(c) = iter.next() {
        let r = if c == '\\' {
            match iter.next() {
                Some(':') => ';',
                Some('s') => ' ',
                Some('\\') => '\\',
                Some('r') => '\r',
                Some('n') => '\n',
                Some(c) => c,
                None => break,
            }
        } else {
            c
        };
        unescaped.push(r);
    }
    unescaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escape(value: &str) -> String {
        let mut out = String::new();
        escape_tag_value(&mut out, value).unwrap();
        out
    }

    #[test]
    fn escape_special_chars() {
        assert_eq!(escape("a;b c\\d"), "a\\:b\\sc\\\\d");
        assert_eq!(escape("line\r\n"), "line\\r\\n");
    }

    #[test]
    fn unescape_special_chars() {
        assert_eq!(unescape_tag_value("a\\:b\\sc\\\\d"), "a;b c\\d");
        assert_eq!(unescape_tag_value("line\\r\\n"), "line\r\n");
    }

    #[test]
    fn unknown_escape_keeps_char() {
        assert_eq!(unescape_tag_value("\\x"), "x");
    }

    #[test]
    fn dangling_backslash_dropped() {
        assert_eq!(unescape_tag_value("abc\\"), "abc");
    }

    #[test]
    fn round_trip() {
        for value in ["", "plain", "semi;colon", "sp ace", "back\\slash", "\r\n"] {
            assert_eq!(unescape_tag_value(&escape(value)), value);
        }
    }
}
