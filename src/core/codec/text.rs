//! Escape sequences for frame prefixes, suffixes and cooked payloads
//!
//! Recognized sequences: `\r`, `\n`, `\t`, `\0`, `\\` and `\xHH`. Anything
//! else, including an incomplete `\x`, is kept literally.

use super::{encode, TextFormat};
use bytes::Bytes;

/// Replace escape sequences in `text` and return the raw bytes
pub fn cook_escapes(text: &str) -> Vec<u8> {
    let mut buf = [0u8; 4];
    cook_with(text, |c, out| out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes()))
}

/// Cook escapes, mapping plain characters through `push_char`
fn cook_with(text: &str, mut push_char: impl FnMut(char, &mut Vec<u8>)) -> Vec<u8> {
    let mut output = Vec::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            push_char(c, &mut output);
            continue;
        }

        match chars.peek().copied() {
            Some('r') => {
                chars.next();
                output.push(b'\r');
            }
            Some('n') => {
                chars.next();
                output.push(b'\n');
            }
            Some('t') => {
                chars.next();
                output.push(b'\t');
            }
            Some('0') => {
                chars.next();
                output.push(0);
            }
            Some('\\') => {
                chars.next();
                output.push(b'\\');
            }
            Some('x') => {
                let mut lookahead = chars.clone();
                lookahead.next();
                let hi = lookahead.next().and_then(|c| c.to_digit(16));
                let lo = lookahead.next().and_then(|c| c.to_digit(16));
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    chars = lookahead;
                    // both digits are < 16
                    output.push(((hi << 4) | lo) as u8);
                } else {
                    output.push(b'\\');
                }
            }
            _ => output.push(b'\\'),
        }
    }

    output
}

/// Bytes of a prefix or suffix written in the escape language
pub fn cooked_affixes(text: &str) -> Bytes {
    Bytes::from(cook_escapes(text))
}

/// Encode `text` in `format`, cooking escapes first for text formats
pub fn encode_cooked(text: &str, format: TextFormat) -> Bytes {
    match format {
        TextFormat::Utf8 => Bytes::from(cook_escapes(text)),
        TextFormat::Ascii | TextFormat::Latin1 => {
            let mut buf = [0u8; 4];
            Bytes::from(cook_with(text, |c, out| {
                out.extend_from_slice(&encode(c.encode_utf8(&mut buf), format));
            }))
        }
        _ => encode(text, format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_sequences() {
        assert_eq!(cook_escapes(r"a\r\n"), b"a\r\n");
        assert_eq!(cook_escapes(r"\t\0\\"), vec![b'\t', 0, b'\\']);
        assert_eq!(cook_escapes(r"\xAA\x0d"), vec![0xAA, 0x0D]);
    }

    #[test]
    fn test_unknown_sequences_pass_through() {
        assert_eq!(cook_escapes(r"\q"), b"\\q");
        assert_eq!(cook_escapes(r"\x"), b"\\x");
        assert_eq!(cook_escapes(r"\xG1"), b"\\xG1");
        assert_eq!(cook_escapes("end\\"), b"end\\");
    }

    #[test]
    fn test_affixes() {
        assert_eq!(&cooked_affixes(r"\xAA")[..], &[0xAA]);
        assert!(cooked_affixes("").is_empty());
    }

    #[test]
    fn test_encode_cooked() {
        assert_eq!(&encode_cooked(r"hi\r\n", TextFormat::Utf8)[..], b"hi\r\n");
        assert_eq!(&encode_cooked(r"01 02", TextFormat::Hex)[..], &[1, 2]);
        assert_eq!(&encode_cooked(r"é\xFF", TextFormat::Latin1)[..], &[0xE9, 0xFF]);
        assert_eq!(&encode_cooked(r"é\xFF", TextFormat::Ascii)[..], &[b'?', 0xFF]);
    }
}
