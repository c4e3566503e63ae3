/// Frame decoder: turns the encoder's unframed byte stream into caption lines.
///
/// TCP gives no message boundaries, so every strategy keeps whatever it
/// could not resolve yet and resumes from it on the next chunk.
///
/// ```text
///   chunk ──► Framer::Sanitize  filter bytes → collapse spaces → carry → split on "%-p"
///         └─► Framer::Carry     split on "%-p" → first fragment continues the last line
/// ```
use serde::{Deserialize, Serialize};

use crate::encoder::{ERROR_SENTINEL, LINE_MARKER};
use crate::window::{CaptionWindow, RenderStyle};

/// Which framing the session decodes with.  Selected once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FramingStrategy {
    /// Strip to a safe character set, collapse spaces, keep a carry buffer.
    #[default]
    Sanitize,
    /// Split raw text and continue the window's last line with the first fragment.
    Carry,
}

impl FramingStrategy {
    pub fn render_style(self) -> RenderStyle {
        match self {
            FramingStrategy::Sanitize => RenderStyle::Joined,
            FramingStrategy::Carry => RenderStyle::Terminated,
        }
    }
}

/// What one chunk did to the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeReport {
    /// New lines pushed into the window.
    pub emitted: usize,
    /// True when the window content changed and should be republished.
    pub changed: bool,
    /// The device sent its error sentinel.  The sentinel never reaches the window.
    pub device_error: bool,
}

#[derive(Debug, Clone)]
enum Framer {
    Sanitize { carry: String },
    /// `held` is a chunk tail that may still become part of a marker or a
    /// multi-byte character once the next chunk arrives.  `sentinel_open` is
    /// set when the unterminated last line was the sentinel and got pulled
    /// out of the window; text continuing that line brings it back.
    Carry { held: Vec<u8>, sentinel_open: bool },
}

#[derive(Debug, Clone)]
pub struct FrameDecoder {
    framer: Framer,
}

impl FrameDecoder {
    pub fn new(strategy: FramingStrategy) -> Self {
        let framer = match strategy {
            FramingStrategy::Sanitize => Framer::Sanitize {
                carry: String::new(),
            },
            FramingStrategy::Carry => Framer::Carry {
                held: Vec::new(),
                sentinel_open: false,
            },
        };
        Self { framer }
    }

    pub fn strategy(&self) -> FramingStrategy {
        match self.framer {
            Framer::Sanitize { .. } => FramingStrategy::Sanitize,
            Framer::Carry { .. } => FramingStrategy::Carry,
        }
    }

    /// Unresolved text waiting for its terminator.
    pub fn carry(&self) -> String {
        match &self.framer {
            Framer::Sanitize { carry } => carry.clone(),
            Framer::Carry { held, .. } => String::from_utf8_lossy(held).into_owned(),
        }
    }

    /// Drop any partial line.  Called on every fresh connection.
    pub fn reset(&mut self) {
        match &mut self.framer {
            Framer::Sanitize { carry } => carry.clear(),
            Framer::Carry {
                held,
                sentinel_open,
            } => {
                held.clear();
                *sentinel_open = false;
            }
        }
    }

    pub fn decode(&mut self, chunk: &[u8], window: &mut CaptionWindow) -> DecodeReport {
        if chunk.is_empty() {
            return DecodeReport::default();
        }
        match &mut self.framer {
            Framer::Sanitize { carry } => decode_sanitized(carry, chunk, window),
            Framer::Carry {
                held,
                sentinel_open,
            } => decode_split(held, sentinel_open, chunk, window),
        }
    }
}

fn is_allowed(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'-' | b'_' | b'.' | b',' | b'"' | b'\'' | b'>' | b'%' | b'?' | b' '
        )
}

fn collapse_spaces(buf: &mut String) {
    if !buf.contains("  ") {
        return;
    }
    let mut out = String::with_capacity(buf.len());
    let mut prev_space = false;
    for c in buf.chars() {
        let space = c == ' ';
        if !(space && prev_space) {
            out.push(c);
        }
        prev_space = space;
    }
    *buf = out;
}

fn decode_sanitized(carry: &mut String, chunk: &[u8], window: &mut CaptionWindow) -> DecodeReport {
    // Every kept byte is ASCII, so the carry stays valid UTF-8.
    carry.extend(chunk.iter().copied().filter(|b| is_allowed(*b)).map(char::from));
    collapse_spaces(carry);

    let mut report = DecodeReport::default();
    let mut offset = 0;
    while let Some(pos) = carry[offset..].find(LINE_MARKER) {
        let end = offset + pos;
        let line = &carry[offset..end];
        if line == ERROR_SENTINEL {
            report.device_error = true;
        } else {
            window.push(line);
            report.emitted += 1;
        }
        offset = end + LINE_MARKER.len();
    }
    carry.drain(..offset);
    report.changed = report.emitted > 0;

    // The carry stays: if more text follows, it was never the sentinel.
    if carry.as_str() == ERROR_SENTINEL {
        report.device_error = true;
    }
    report
}

fn decode_split(
    held: &mut Vec<u8>,
    sentinel_open: &mut bool,
    chunk: &[u8],
    window: &mut CaptionWindow,
) -> DecodeReport {
    let mut bytes = std::mem::take(held);
    bytes.extend_from_slice(chunk);

    let text_len = bytes.len() - incomplete_utf8_tail(&bytes);
    let decoded = String::from_utf8_lossy(&bytes[..text_len]);
    let keep = marker_prefix_tail(&decoded);
    let text = &decoded[..decoded.len() - keep];

    held.extend_from_slice(&decoded.as_bytes()[decoded.len() - keep..]);
    held.extend_from_slice(&bytes[text_len..]);

    let mut report = DecodeReport::default();
    if text.is_empty() {
        return report;
    }
    let fragments: Vec<&str> = text.split(LINE_MARKER).collect();
    let open = fragments.len() - 1;
    for (i, fragment) in fragments.into_iter().enumerate() {
        // The first fragment continues whatever line was left open.
        let mut line = String::new();
        let mut continues = false;
        if i == 0 {
            if std::mem::take(sentinel_open) {
                line.push_str(ERROR_SENTINEL);
            } else if let Some(last) = window.last() {
                line.push_str(last);
                continues = true;
            }
        }
        line.push_str(fragment);

        if line == ERROR_SENTINEL {
            report.device_error = true;
            if continues {
                window.pop_last();
                report.changed = true;
            }
            *sentinel_open = i == open;
            continue;
        }
        if continues {
            window.extend_last(fragment);
            report.changed |= !fragment.is_empty();
        } else {
            window.push(line);
            report.emitted += 1;
            report.changed = true;
        }
    }
    report
}

/// Length of an unfinished multi-byte UTF-8 sequence at the end of `bytes`.
fn incomplete_utf8_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let b = bytes[bytes.len() - back];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let need = match b {
            0xF0..=0xFF => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if need > back { back } else { 0 };
    }
    0
}

/// Length of the longest proper prefix of the line marker that ends `text`.
fn marker_prefix_tail(text: &str) -> usize {
    (1..LINE_MARKER.len())
        .rev()
        .find(|&k| text.ends_with(&LINE_MARKER[..k]))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_for(strategy: FramingStrategy, capacity: usize) -> CaptionWindow {
        CaptionWindow::new(capacity, strategy.render_style())
    }

    fn lines(window: &CaptionWindow) -> Vec<String> {
        window.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_sanitize_splits_on_marker() {
        let mut decoder = FrameDecoder::new(FramingStrategy::Sanitize);
        let mut window = window_for(FramingStrategy::Sanitize, 10);

        let report = decoder.decode(b"HEL%-pLO%-p", &mut window);
        assert_eq!(report.emitted, 2);
        assert!(report.changed);
        assert_eq!(lines(&window), vec!["HEL", "LO"]);
        assert_eq!(decoder.carry(), "");
    }

    #[test]
    fn test_sanitize_strips_disallowed_and_collapses_spaces() {
        let mut decoder = FrameDecoder::new(FramingStrategy::Sanitize);
        let mut window = window_for(FramingStrategy::Sanitize, 10);

        decoder.decode(b"\x02HI   there!\r\n%-p", &mut window);
        assert_eq!(lines(&window), vec!["HI there"]);
    }

    #[test]
    fn test_sanitize_keeps_partial_line_in_carry() {
        let mut decoder = FrameDecoder::new(FramingStrategy::Sanitize);
        let mut window = window_for(FramingStrategy::Sanitize, 10);

        let report = decoder.decode(b"GOOD MOR", &mut window);
        assert_eq!(report, DecodeReport::default());
        assert_eq!(decoder.carry(), "GOOD MOR");

        decoder.decode(b"NING%-p", &mut window);
        assert_eq!(lines(&window), vec!["GOOD MORNING"]);
    }

    #[test]
    fn test_sanitize_error_sentinel() {
        let mut decoder = FrameDecoder::new(FramingStrategy::Sanitize);
        let mut window = window_for(FramingStrategy::Sanitize, 10);

        let report = decoder.decode(b"E1", &mut window);
        assert!(report.device_error);
        assert!(window.is_empty());
        assert_eq!(decoder.carry(), "E1");

        // A terminated sentinel line is dropped; the trailing one is reported.
        let report = decoder.decode(b"%-pOK%-pE1", &mut window);
        assert!(report.device_error);
        assert_eq!(lines(&window), vec!["OK"]);
    }

    #[test]
    fn test_sanitize_sentinel_followed_by_text_is_a_line() {
        let mut decoder = FrameDecoder::new(FramingStrategy::Sanitize);
        let mut window = window_for(FramingStrategy::Sanitize, 10);

        assert!(decoder.decode(b"E1", &mut window).device_error);
        let report = decoder.decode(b"HELLO%-p", &mut window);
        assert!(!report.device_error);
        assert_eq!(lines(&window), vec!["E1HELLO"]);
    }

    #[test]
    fn test_carry_continues_last_line() {
        let mut decoder = FrameDecoder::new(FramingStrategy::Carry);
        let mut window = window_for(FramingStrategy::Carry, 10);
        window.push("foo");

        let report = decoder.decode(b"bar%-pbaz%-p", &mut window);
        assert!(report.changed);
        assert_eq!(lines(&window), vec!["foobar", "baz", ""]);
        assert_eq!(window.render(), "foobar\nbaz\n\n");
    }

    #[test]
    fn test_carry_error_sentinel_not_appended() {
        let mut decoder = FrameDecoder::new(FramingStrategy::Carry);
        let mut window = window_for(FramingStrategy::Carry, 10);

        let report = decoder.decode(b"E1", &mut window);
        assert!(report.device_error);
        assert!(window.is_empty());

        let report = decoder.decode(b"%-pfoo%-pE1%-pnext", &mut window);
        assert!(report.device_error);
        assert_eq!(lines(&window), vec!["foo", "next"]);
    }

    #[test]
    fn test_carry_sentinel_split_across_chunks() {
        let mut decoder = FrameDecoder::new(FramingStrategy::Carry);
        let mut window = window_for(FramingStrategy::Carry, 10);

        decoder.decode(b"x%-pE", &mut window);
        assert_eq!(lines(&window), vec!["x", "E"]);

        let report = decoder.decode(b"1%-py", &mut window);
        assert!(report.device_error);
        assert!(report.changed);
        assert_eq!(lines(&window), vec!["x", "y"]);
    }

    #[test]
    fn test_carry_open_sentinel_continued_by_text() {
        let mut decoder = FrameDecoder::new(FramingStrategy::Carry);
        let mut window = window_for(FramingStrategy::Carry, 10);
        window.push("x");

        assert!(decoder.decode(b"%-pE1", &mut window).device_error);
        assert_eq!(lines(&window), vec!["x"]);

        let report = decoder.decode(b"23%-p", &mut window);
        assert!(!report.device_error);
        assert_eq!(lines(&window), vec!["x", "E123", ""]);
    }

    #[test]
    fn test_carry_does_not_sanitize() {
        let mut decoder = FrameDecoder::new(FramingStrategy::Carry);
        let mut window = window_for(FramingStrategy::Carry, 10);

        decoder.decode("Ça  va!%-p".as_bytes(), &mut window);
        assert_eq!(lines(&window), vec!["Ça  va!", ""]);
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        for strategy in [FramingStrategy::Sanitize, FramingStrategy::Carry] {
            let mut decoder = FrameDecoder::new(strategy);
            let mut window = window_for(strategy, 2);
            assert_eq!(decoder.decode(b"", &mut window), DecodeReport::default());
            assert!(window.is_empty());
        }
    }

    #[test]
    fn test_reset_drops_carry() {
        let mut decoder = FrameDecoder::new(FramingStrategy::Sanitize);
        let mut window = window_for(FramingStrategy::Sanitize, 2);
        decoder.decode(b"half a li", &mut window);
        decoder.reset();
        decoder.decode(b"ne%-p", &mut window);
        assert_eq!(lines(&window), vec!["ne"]);
    }

    /// Feeding a stream at every possible split point must give the same
    /// window as feeding it whole.
    fn assert_chunking_independent(strategy: FramingStrategy, stream: &[u8]) {
        let mut whole_window = window_for(strategy, 10);
        FrameDecoder::new(strategy).decode(stream, &mut whole_window);
        let expected = lines(&whole_window);

        for a in 0..=stream.len() {
            for b in a..=stream.len() {
                let mut decoder = FrameDecoder::new(strategy);
                let mut window = window_for(strategy, 10);
                for part in [&stream[..a], &stream[a..b], &stream[b..]] {
                    decoder.decode(part, &mut window);
                }
                assert_eq!(lines(&window), expected, "split at {a}/{b}");
            }
        }
    }

    #[test]
    fn test_sanitize_chunking_independence() {
        assert_chunking_independent(
            FramingStrategy::Sanitize,
            b"ONE  TWO%-p\r\nTHREE,  four?%-p%-pfive",
        );
        assert_chunking_independent(FramingStrategy::Sanitize, b"E1HELLO%-pE1%-p  A%-pE1");
    }

    #[test]
    fn test_carry_chunking_independence() {
        assert_chunking_independent(FramingStrategy::Carry, "über%-p%-pdrei é%-pvier".as_bytes());
        assert_chunking_independent(FramingStrategy::Carry, b"x%-pE1%-py");
        assert_chunking_independent(FramingStrategy::Carry, b"E1%-pE12%-pE1");
    }

    #[test]
    fn test_marker_never_inside_line() {
        for strategy in [FramingStrategy::Sanitize, FramingStrategy::Carry] {
            let mut decoder = FrameDecoder::new(strategy);
            let mut window = window_for(strategy, 10);
            for part in [&b"abc%"[..], b"-", b"pdef%-", b"p"] {
                decoder.decode(part, &mut window);
            }
            assert!(window.lines().all(|l| !l.contains(LINE_MARKER)));
            assert_eq!(window.lines().next(), Some("abc"));
        }
    }

    #[test]
    fn test_strategy_serde_names() {
        #[derive(Deserialize)]
        struct Wrap {
            framing: FramingStrategy,
        }
        let w: Wrap = toml::from_str("framing = \"carry\"").unwrap();
        assert_eq!(w.framing, FramingStrategy::Carry);
    }
}
