//! ANSI-C Quote Expansion
//!
//! `$'...'` bodies are decoded to raw bytes first, then turned back into a
//! plain single-quoted literal. A decoded zero byte ends the literal, the
//! way a C string would.

use crate::parser::scan::{ansi_escape, chars_of, is_hex_digit, is_octal_digit, slice};

/// Decode the escapes of an ANSI-C body (without the surrounding quotes).
pub(crate) fn ansi_c_to_bytes(inner: &str) -> Vec<u8> {
    let s = chars_of(inner);
    let n = s.len();
    let mut out = Vec::with_capacity(inner.len());
    let mut i = 0;

    while i < n {
        if s[i] != '\\' || i + 1 >= n {
            push_char(&mut out, s[i]);
            i += 1;
            continue;
        }
        let c = s[i + 1];
        if let Some(b) = ansi_escape(c) {
            out.push(b);
            i += 2;
            continue;
        }
        match c {
            '\'' => {
                out.push(b'\'');
                i += 2;
            }
            'x' if s.get(i + 2) == Some(&'{') => {
                let mut j = run_end(&s, i + 3, n, is_hex_digit);
                let hex = slice(&s, i + 3, j);
                if s.get(j) == Some(&'}') {
                    j += 1;
                }
                if hex.is_empty() {
                    return out;
                }
                let byte = (parse_radix(&hex, 16) & 0xff) as u8;
                if byte == 0 {
                    return out;
                }
                out.push(byte);
                i = j;
            }
            'x' => {
                let j = run_end(&s, i + 2, (i + 4).min(n), is_hex_digit);
                if j == i + 2 {
                    out.push(b'\\');
                    i += 1;
                    continue;
                }
                let byte = parse_radix(&slice(&s, i + 2, j), 16) as u8;
                if byte == 0 {
                    return out;
                }
                out.push(byte);
                i = j;
            }
            'u' | 'U' => {
                let width = if c == 'u' { 4 } else { 8 };
                let j = run_end(&s, i + 2, (i + 2 + width).min(n), is_hex_digit);
                if j == i + 2 {
                    out.push(b'\\');
                    i += 1;
                    continue;
                }
                let codepoint = parse_radix(&slice(&s, i + 2, j), 16);
                if codepoint == 0 {
                    return out;
                }
                let ch = u32::try_from(codepoint)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or('\u{FFFD}');
                push_char(&mut out, ch);
                i = j;
            }
            'c' => {
                let Some(&ctrl) = s.get(i + 2) else {
                    out.push(b'\\');
                    i += 1;
                    continue;
                };
                // `\c\\` consumes both backslashes
                let skip = usize::from(ctrl == '\\' && s.get(i + 3) == Some(&'\\'));
                let value = first_utf8_byte(ctrl) & 0x1f;
                if value == 0 {
                    return out;
                }
                out.push(value);
                i += 3 + skip;
            }
            '0' => {
                let j = run_end(&s, i + 2, (i + 4).min(n), is_octal_digit);
                if j == i + 2 {
                    return out;
                }
                let byte = (parse_radix(&slice(&s, i + 1, j), 8) & 0xff) as u8;
                if byte == 0 {
                    return out;
                }
                out.push(byte);
                i = j;
            }
            '1'..='7' => {
                let j = run_end(&s, i + 1, (i + 4).min(n), is_octal_digit);
                let byte = (parse_radix(&slice(&s, i + 1, j), 8) & 0xff) as u8;
                if byte == 0 {
                    return out;
                }
                out.push(byte);
                i = j;
            }
            _ => {
                out.push(b'\\');
                out.push(first_utf8_byte(c));
                i += 2;
            }
        }
    }
    out
}

/// Expand a `'...'` literal (the `$` already removed) into its plain
/// single-quoted equivalent. Anything not wrapped in quotes is returned as is.
pub(crate) fn expand_ansi_c_escapes(value: &str) -> String {
    if !(value.starts_with('\'') && value.ends_with('\'')) {
        return value.to_string();
    }
    let inner = if value.len() >= 2 {
        &value[1..value.len() - 1]
    } else {
        ""
    };
    sh_single_quote(&decode_bytes(&ansi_c_to_bytes(inner)))
}

/// Quote `s` for the shell using single quotes.
pub(crate) fn sh_single_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s == "'" {
        return "\\'".to_string();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Decode bytes as UTF-8, replacing every byte that does not start a valid
/// sequence with U+FFFD.
pub(crate) fn decode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                out.push_str(valid);
                return out;
            }
            Err(e) => {
                let (valid, invalid) = rest.split_at(e.valid_up_to());
                out.push_str(&String::from_utf8_lossy(valid));
                out.push('\u{FFFD}');
                rest = &invalid[1..];
            }
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

fn first_utf8_byte(c: char) -> u8 {
    let mut buf = [0u8; 4];
    c.encode_utf8(&mut buf).as_bytes()[0]
}

/// Advance from `start` while `pred` holds, stopping at `limit`.
fn run_end(s: &[char], start: usize, limit: usize, pred: fn(char) -> bool) -> usize {
    let mut j = start;
    while j < limit && pred(s[j]) {
        j += 1;
    }
    j
}

/// Out-of-range values read as zero.
fn parse_radix(digits: &str, radix: u32) -> i64 {
    i64::from_str_radix(digits, radix).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_escapes() {
        assert_eq!(ansi_c_to_bytes(r"a\nb\tc"), b"a\nb\tc");
        assert_eq!(ansi_c_to_bytes(r"\'"), b"'");
        assert_eq!(ansi_c_to_bytes(r"\e["), b"\x1b[");
    }

    #[test]
    fn test_hex_and_octal() {
        assert_eq!(ansi_c_to_bytes(r"\x41\x4a"), b"AJ");
        assert_eq!(ansi_c_to_bytes(r"\x{263}"), vec![0x63]);
        assert_eq!(ansi_c_to_bytes(r"\101"), b"A");
        assert_eq!(ansi_c_to_bytes(r"\041"), b"!");
        // `\0` takes at most two more digits
        assert_eq!(ansi_c_to_bytes(r"\0101"), vec![8, b'1']);
        // no digits: the backslash is kept literally
        assert_eq!(ansi_c_to_bytes(r"\xg"), b"\\xg");
    }

    #[test]
    fn test_unicode_escapes() {
        assert_eq!(ansi_c_to_bytes(r"é"), "é".as_bytes());
        assert_eq!(ansi_c_to_bytes(r"\U0001F600"), "😀".as_bytes());
        assert_eq!(ansi_c_to_bytes(r"\ud800"), "\u{FFFD}".as_bytes());
    }

    #[test]
    fn test_control_chars() {
        assert_eq!(ansi_c_to_bytes(r"\cA"), vec![1]);
        assert_eq!(ansi_c_to_bytes(r"\c\\x"), vec![0x1c, b'x']);
    }

    #[test]
    fn test_nul_truncates() {
        assert_eq!(ansi_c_to_bytes(r"ab\x00cd"), b"ab");
        assert_eq!(ansi_c_to_bytes(r"ab\0cd"), b"ab");
        assert_eq!(ansi_c_to_bytes(r"ab\c@cd"), b"ab");
    }

    #[test]
    fn test_unknown_escape_keeps_backslash() {
        assert_eq!(ansi_c_to_bytes(r"\q"), b"\\q");
    }

    #[test]
    fn test_expand_to_single_quoted() {
        assert_eq!(expand_ansi_c_escapes(r"'a\nb'"), "'a\nb'");
        assert_eq!(expand_ansi_c_escapes(r"'it\'s'"), "'it'\\''s'");
        assert_eq!(expand_ansi_c_escapes("''"), "''");
        assert_eq!(expand_ansi_c_escapes(r"'\''"), "\\'");
        assert_eq!(expand_ansi_c_escapes("'open"), "'open");
    }

    #[test]
    fn test_invalid_bytes_become_replacement_chars() {
        assert_eq!(decode_bytes(&[b'a', 0xff, 0xfe, b'b']), "a\u{FFFD}\u{FFFD}b");
        assert_eq!(decode_bytes(&[0xe2, 0x82, b'x']), "\u{FFFD}\u{FFFD}x");
        assert_eq!(decode_bytes("ok".as_bytes()), "ok");
    }
}
