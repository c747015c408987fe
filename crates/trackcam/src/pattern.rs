//! Wildcard byte patterns (AOB signatures).
//!
//! A pattern is written as space-separated tokens, each either a two-digit
//! hex byte (`6D`) or a wildcard (`??` / `?`). Compilation never fails:
//! tokens that do not parse are treated as wildcards and logged.
//!
//! Matching uses a single anchor byte as a pre-filter. The anchor is a fixed
//! (non-wildcard) byte at a known offset in the pattern; `memchr` finds every
//! position where it occurs, and the full comparison only runs there.

use std::fmt;

use memchr::memchr_iter;
use tracing::{debug, warn};

/// A compiled wildcard pattern with parallel value/mask buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytePattern {
    bytes: Vec<u8>,
    mask: Vec<bool>,
    anchor: Option<usize>,
}

impl BytePattern {
    /// Compile a textual pattern. Unparseable tokens become wildcards.
    pub fn compile(text: &str) -> Self {
        let mut bytes = Vec::new();
        let mut mask = Vec::new();

        for token in text.split_whitespace() {
            if token == "??" || token == "?" {
                bytes.push(0);
                mask.push(false);
                continue;
            }

            match u8::from_str_radix(token, 16) {
                Ok(value) if token.len() <= 2 => {
                    bytes.push(value);
                    mask.push(true);
                }
                _ => {
                    warn!("Invalid pattern token '{}', treating as wildcard", token);
                    bytes.push(0);
                    mask.push(false);
                }
            }
        }

        let anchor = choose_anchor(&bytes, &mask);
        debug!(
            "Compiled pattern: {} bytes ({} fixed), anchor {:?}",
            bytes.len(),
            mask.iter().filter(|m| **m).count(),
            anchor
        );

        Self {
            bytes,
            mask,
            anchor,
        }
    }

    /// Build a pattern from `Some(byte)` / `None` (wildcard) entries.
    pub fn from_entries(entries: &[Option<u8>]) -> Self {
        let bytes: Vec<u8> = entries.iter().map(|b| b.unwrap_or(0)).collect();
        let mask: Vec<bool> = entries.iter().map(Option::is_some).collect();
        let anchor = choose_anchor(&bytes, &mask);
        Self {
            bytes,
            mask,
            anchor,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn fixed_count(&self) -> usize {
        self.mask.iter().filter(|m| **m).count()
    }

    pub fn wildcard_count(&self) -> usize {
        self.len() - self.fixed_count()
    }

    /// Anchor position and value used by the pre-filter.
    pub fn anchor(&self) -> Option<(usize, u8)> {
        self.anchor.map(|pos| (pos, self.bytes[pos]))
    }

    /// Check whether the pattern matches `buffer` starting at `offset`.
    pub fn matches_at(&self, buffer: &[u8], offset: usize) -> bool {
        if self.is_empty() || offset + self.len() > buffer.len() {
            return false;
        }
        let window = &buffer[offset..offset + self.len()];
        self.bytes
            .iter()
            .zip(&self.mask)
            .zip(window)
            .all(|((value, checked), actual)| !checked || value == actual)
    }

    /// Find every offset in `buffer` where the pattern matches.
    pub fn find_all(&self, buffer: &[u8]) -> Vec<usize> {
        if self.is_empty() || buffer.len() < self.len() {
            return Vec::new();
        }

        let last = buffer.len() - self.len();

        let Some((anchor_pos, anchor_byte)) = self.anchor() else {
            // Wildcard-only: every offset matches.
            return (0..=last).collect();
        };

        // Candidate starts are anchor hits shifted back by the anchor offset,
        // restricted to starts in 0..=last.
        let window = &buffer[anchor_pos..anchor_pos + last + 1];
        memchr_iter(anchor_byte, window)
            .filter(|&start| self.matches_at(buffer, start))
            .collect()
    }
}

impl fmt::Display for BytePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .bytes
            .iter()
            .zip(&self.mask)
            .map(|(value, checked)| {
                if *checked {
                    format!("{:02X}", value)
                } else {
                    "??".to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        f.write_str(&text)
    }
}

/// First fixed byte that is neither 0x00 nor 0xFF, else the first fixed byte.
fn choose_anchor(bytes: &[u8], mask: &[bool]) -> Option<usize> {
    let fixed = || (0..bytes.len()).filter(|&i| mask[i]);
    fixed()
        .find(|&i| bytes[i] != 0x00 && bytes[i] != 0xFF)
        .or_else(|| fixed().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_with_wildcards() {
        let pattern = BytePattern::compile("48 8D 0D ?? ?? ? FF");
        assert_eq!(pattern.len(), 7);
        assert_eq!(pattern.fixed_count(), 4);
        assert_eq!(pattern.wildcard_count(), 3);
        assert_eq!(pattern.to_string(), "48 8D 0D ?? ?? ?? FF");
    }

    #[test]
    fn test_invalid_tokens_degrade_to_wildcards() {
        let pattern = BytePattern::compile("6D ZZ 40 123");
        assert_eq!(pattern.len(), 4);
        assert_eq!(pattern.fixed_count(), 2);
        assert_eq!(pattern.to_string(), "6D ?? 40 ??");
    }

    #[test]
    fn test_empty_pattern_never_matches() {
        let pattern = BytePattern::compile("   ");
        assert!(pattern.is_empty());
        assert!(pattern.find_all(&[1, 2, 3]).is_empty());
    }

    #[test]
    fn test_anchor_skips_zero_and_ff() {
        let pattern = BytePattern::compile("00 ?? FF 40 00");
        assert_eq!(pattern.anchor(), Some((3, 0x40)));

        let zeros = BytePattern::compile("?? 00 00");
        assert_eq!(zeros.anchor(), Some((1, 0x00)));

        let wild = BytePattern::compile("?? ??");
        assert_eq!(wild.anchor(), None);
    }

    #[test]
    fn test_wildcard_only_matches_every_offset() {
        for n in 1..6 {
            let text = vec!["??"; n].join(" ");
            let pattern = BytePattern::compile(&text);
            for len in n..(n + 8) {
                let buffer: Vec<u8> = (0..len as u8).collect();
                let expected: Vec<usize> = (0..=len - n).collect();
                assert_eq!(pattern.find_all(&buffer), expected);
            }
        }
    }

    #[test]
    fn test_fully_specified_pattern_matches_exact_subsequence() {
        let pattern = BytePattern::compile("DE AD BE EF");
        let buffer = [0x00, 0xDE, 0xAD, 0xBE, 0xEF, 0xDE, 0xAD, 0xBE, 0x00];
        assert_eq!(pattern.find_all(&buffer), vec![1]);

        let absent = [0xDE, 0xAD, 0xBE, 0x00, 0xEF];
        assert!(pattern.find_all(&absent).is_empty());
    }

    #[test]
    fn test_matches_near_buffer_edges() {
        let pattern = BytePattern::compile("?? 40 ??");
        let buffer = [0x40, 0x40, 0x00, 0x00, 0x40, 0x00];
        // The anchor at 0 has no room before it; start 3 ends on the last byte.
        assert_eq!(pattern.find_all(&buffer), vec![0, 3]);

        let short = [0x00, 0x00, 0x40];
        assert!(pattern.find_all(&short).is_empty());
    }

    #[test]
    fn test_anchor_filter_agrees_with_brute_force() {
        let pattern = BytePattern::compile("?? 40 ?? 00 00 80 3F");
        let mut buffer = vec![0u8; 256];
        for (i, b) in buffer.iter_mut().enumerate() {
            *b = (i * 37 % 251) as u8;
        }
        buffer[100..107].copy_from_slice(&[0x11, 0x40, 0x22, 0x00, 0x00, 0x80, 0x3F]);
        buffer[200..207].copy_from_slice(&[0x99, 0x40, 0x98, 0x00, 0x00, 0x80, 0x3F]);

        let brute: Vec<usize> = (0..=buffer.len() - pattern.len())
            .filter(|&i| pattern.matches_at(&buffer, i))
            .collect();
        assert_eq!(pattern.find_all(&buffer), brute);
        assert_eq!(brute, vec![100, 200]);
    }

    #[test]
    fn test_from_entries_roundtrip() {
        let pattern = BytePattern::from_entries(&[Some(0x6D), None, Some(0x40)]);
        assert_eq!(pattern.to_string(), "6D ?? 40");
        assert_eq!(BytePattern::compile(&pattern.to_string()), pattern);
    }
}
