// ABOUTME: Byte-capped accumulation of a sandbox output stream
// ABOUTME: Keeps at most `cap` bytes and remembers whether anything was dropped

/// Appended to stderr when a run is forcibly terminated
pub const TERMINATION_MARKER: &str = "\n[Execution timeout or buffer exceeded]";

#[derive(Debug)]
pub struct CappedBuffer {
    data: Vec<u8>,
    cap: usize,
    overflowed: bool,
}

impl CappedBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            data: Vec::new(),
            cap,
            overflowed: false,
        }
    }

    /// Append a chunk. Returns `true` once the accumulated size has exceeded
    /// the cap; bytes beyond the cap are discarded.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        let remaining = self.cap - self.data.len();
        if bytes.len() > remaining {
            self.data.extend_from_slice(&bytes[..remaining]);
            self.overflowed = true;
        } else {
            self.data.extend_from_slice(bytes);
        }
        self.overflowed
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the kept bytes. A truncated buffer never decodes to more than
    /// `cap` bytes and never ends in a split character.
    pub fn into_string(mut self) -> String {
        if !self.overflowed {
            return String::from_utf8_lossy(&self.data).into_owned();
        }

        let complete = without_partial_char(&self.data);
        self.data.truncate(complete);

        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        // Replacement characters for invalid bytes are wider than the bytes
        if text.len() > self.cap {
            let mut end = self.cap;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
        }
        text
    }
}

/// Length of `bytes` once a trailing, incomplete UTF-8 sequence is dropped
fn without_partial_char(bytes: &[u8]) -> usize {
    let len = bytes.len();

    for back in 1..=len.min(4) {
        let byte = bytes[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match byte {
            0xF0..=0xFF => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if width > back { len - back } else { len };
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_cap() {
        let mut buffer = CappedBuffer::new(8);
        assert!(!buffer.push(b"abcd"));
        assert!(!buffer.push(b"efgh"));
        assert_eq!(buffer.len(), 8);
        assert!(!buffer.overflowed());
        assert_eq!(buffer.into_string(), "abcdefgh");
    }

    #[test]
    fn test_exceeding_cap_truncates_exactly() {
        let mut buffer = CappedBuffer::new(5);
        assert!(!buffer.push(b"abc"));
        assert!(buffer.push(b"defg"));
        assert_eq!(buffer.len(), 5);
        // Further pushes keep reporting overflow and add nothing
        assert!(buffer.push(b"x"));
        assert_eq!(buffer.into_string(), "abcde");
    }

    #[test]
    fn test_truncation_never_splits_a_character() {
        let cap = 16 * 1024;
        let mut buffer = CappedBuffer::new(cap);
        assert!(buffer.push("€".repeat(10_000).as_bytes()));

        let text = buffer.into_string();
        assert!(text.len() <= cap, "{} bytes kept with a cap of {}", text.len(), cap);
        assert_eq!(text.len(), 16_383);
        assert!(text.chars().all(|c| c == '€'));
    }

    #[test]
    fn test_truncation_keeps_complete_trailing_character() {
        let mut buffer = CappedBuffer::new(5);
        assert!(buffer.push("ab€cd".as_bytes()));
        assert_eq!(buffer.into_string(), "ab€");

        let mut buffer = CappedBuffer::new(4);
        assert!(buffer.push("ab€".as_bytes()));
        assert_eq!(buffer.into_string(), "ab");
    }

    #[test]
    fn test_truncated_invalid_bytes_stay_within_cap() {
        let mut buffer = CappedBuffer::new(4);
        assert!(buffer.push(&[b'a', 0xFF, 0xFE, b'b', b'c']));

        let text = buffer.into_string();
        assert!(text.len() <= 4);
        assert!(text.starts_with('a'));
    }

    #[test]
    fn test_untruncated_output_is_decoded_as_is() {
        let mut buffer = CappedBuffer::new(8);
        assert!(!buffer.push("€€".as_bytes()));
        assert_eq!(buffer.into_string(), "€€");
    }
}
