//! Nickname/channel validation and wildcard hostmask matching.

use crate::casemap::irc_to_lower;

/// Characters allowed to begin a nickname besides ASCII letters.
const NICK_SPECIAL: &[char] = &['[', ']', '\\', '^', '_', '`', '{', '|', '}'];

/// Validate a nickname against the grammar: first char a letter or special,
/// remaining chars letters, digits, specials, or `-`.
///
/// Length limits are enforced by the caller (they are configuration).
pub fn is_valid_nickname(nick: &str) -> bool {
    let mut chars = nick.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !first.is_ascii_alphabetic() && !NICK_SPECIAL.contains(&first) {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || NICK_SPECIAL.contains(&c))
}

/// Validate a channel name: starts with `#`, no comma, colon, BEL, or space.
pub fn is_valid_channel_name(name: &str) -> bool {
    let mut chars = name.chars();
    if chars.next() != Some('#') {
        return false;
    }
    let mut rest = chars.peekable();
    if rest.peek().is_none() {
        return false;
    }
    rest.all(|c| !matches!(c, ',' | ':' | '\u{7}' | ' ' | '\r' | '\n'))
}

/// Wildcard match: `*` matches any run, `?` matches one char.
///
/// Matching is case-insensitive under the RFC1459 casemapping, so a ban on
/// `Bad[guy]!*@*` also catches `bad{guy}`.
pub fn mask_match(pattern: &str, subject: &str) -> bool {
    let p: Vec<char> = irc_to_lower(pattern).chars().collect();
    let s: Vec<char> = irc_to_lower(subject).chars().collect();

    // Iterative glob with single-star backtracking.
    let (mut pi, mut si) = (0usize, 0usize);
    let (mut star, mut mark) = (None::<usize>, 0usize);

    while si < s.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == s[si]) {
            pi += 1;
            si += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = si;
            pi += 1;
        } else if let Some(sp) = star {
            pi = sp + 1;
            mark += 1;
            si = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_nicknames() {
        for nick in ["alice", "Alice42", "[away]", "x^_`{|}", "a-b"] {
            assert!(is_valid_nickname(nick), "{nick}");
        }
    }

    #[test]
    fn invalid_nicknames() {
        for nick in ["", "1abc", "-abc", "a b", "a!b", "a@b", "a#b", "a:b", "a,b", "a*b"] {
            assert!(!is_valid_nickname(nick), "{nick}");
        }
    }

    #[test]
    fn valid_channel_names() {
        for name in ["#a", "#rust", "#with-dash", "#множество"] {
            assert!(is_valid_channel_name(name), "{name}");
        }
    }

    #[test]
    fn invalid_channel_names() {
        for name in ["", "#", "rust", "&rust", "#a,b", "#a:b", "#a b", "#a\u{7}b"] {
            assert!(!is_valid_channel_name(name), "{name}");
        }
    }

    #[test]
    fn mask_matching() {
        assert!(mask_match("*!*@*", "nick!user@host"));
        assert!(mask_match("nick!*@*", "nick!user@host"));
        assert!(mask_match("*!*@*.example.org", "nick!user@gw.example.org"));
        assert!(mask_match("n?ck!*@*", "nick!user@host"));
        assert!(!mask_match("other!*@*", "nick!user@host"));
        assert!(!mask_match("*!*@*.example.org", "nick!user@example.com"));
    }

    #[test]
    fn mask_matching_is_casemapped() {
        assert!(mask_match("NICK!*@*", "nick!user@host"));
        assert!(mask_match("bad[guy]!*@*", "BAD{GUY}!user@host"));
    }

    #[test]
    fn star_backtracking() {
        assert!(mask_match("*abc*abc", "abcabcabc"));
        assert!(!mask_match("*abc*abd", "abcabcabc"));
        assert!(mask_match("a**b", "ab"));
    }
}
