//! Response framing and per-segment text access.
//!
//! A streamed response is cut into newline-terminated lines; each line is
//! one segment. SSE lines carry a `data:` prefix. Completion text sits at
//! one of a few well-known JSON locations depending on the backend flavour.

use axum::body::Bytes;
use axum::http::{header, HeaderMap};
use serde_json::Value;

/// JSON locations of generated text, probed in order.
const TEXT_POINTERS: [&str; 6] = [
    "/choices/0/delta/content",
    "/choices/0/message/content",
    "/choices/0/text",
    "/message/content",
    "/response",
    "/content",
];

/// How a response body is divided into segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `text/event-stream`
    EventStream,
    /// `application/x-ndjson`
    Ndjson,
    /// Anything else: the whole body is one segment.
    Single,
}

impl Framing {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if content_type.starts_with("text/event-stream") {
            Framing::EventStream
        } else if content_type.starts_with("application/x-ndjson") {
            Framing::Ndjson
        } else {
            Framing::Single
        }
    }

    pub fn is_streaming(&self) -> bool {
        !matches!(self, Framing::Single)
    }

    /// Wire form of a terminal record for this framing.
    pub fn terminal_record(&self, json: &str) -> Bytes {
        match self {
            Framing::EventStream => Bytes::from(format!("data: {}\n\n", json)),
            Framing::Ndjson | Framing::Single => Bytes::from(format!("{}\n", json)),
        }
    }
}

/// Splits a byte stream into lines of at most `max` bytes.
///
/// Lines keep their terminating `\n`. A longer line is cut at the last
/// UTF-8 boundary before the limit.
#[derive(Debug)]
pub struct LineSplitter {
    buf: Vec<u8>,
    max: usize,
}

impl LineSplitter {
    pub fn new(max: usize) -> Self {
        Self {
            buf: Vec::new(),
            max: max.max(4),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        loop {
            match self.buf.iter().position(|b| *b == b'\n') {
                Some(pos) if pos < self.max => {
                    let rest = self.buf.split_off(pos + 1);
                    out.push(Bytes::from(std::mem::replace(&mut self.buf, rest)));
                }
                _ if self.buf.len() >= self.max => {
                    let cut = utf8_floor(&self.buf, self.max);
                    let rest = self.buf.split_off(cut);
                    out.push(Bytes::from(std::mem::replace(&mut self.buf, rest)));
                }
                _ => break,
            }
        }
        out
    }

    /// Trailing bytes without a newline, if any.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(Bytes::from(std::mem::take(&mut self.buf)))
        }
    }
}

/// Largest index `<= max` that does not split a UTF-8 sequence.
fn utf8_floor(buf: &[u8], max: usize) -> usize {
    let mut cut = max.min(buf.len());
    while cut > 0 && cut < buf.len() && (buf[cut] & 0xC0) == 0x80 {
        cut -= 1;
    }
    if cut == 0 {
        max.min(buf.len())
    } else {
        cut
    }
}

#[derive(Debug, Clone)]
enum Payload {
    Json { value: Value, pointer: &'static str },
    Raw,
}

/// One unit of backend output awaiting output scanning.
#[derive(Debug, Clone)]
pub struct StreamSegment {
    pub index: u64,
    raw: Bytes,
    sse: bool,
    text: Option<String>,
    payload: Payload,
}

impl StreamSegment {
    pub fn parse(index: u64, raw: Bytes, framing: Framing) -> Self {
        let line = String::from_utf8_lossy(&raw).into_owned();
        let trimmed = line.trim_end_matches(&['\r', '\n'][..]);

        let (sse, content) = match framing {
            Framing::EventStream => match trimmed.strip_prefix("data:") {
                Some(data) => (true, data.trim_start()),
                // comments, `event:` and blank separator lines
                None => return Self::opaque(index, raw),
            },
            _ => (false, trimmed),
        };

        if content.is_empty() || content == "[DONE]" {
            return Self::opaque(index, raw);
        }

        match serde_json::from_str::<Value>(content) {
            Ok(value) => {
                let found = TEXT_POINTERS
                    .iter()
                    .find_map(|p| value.pointer(p).and_then(Value::as_str).map(|t| (*p, t.to_string())));
                match found {
                    Some((pointer, text)) => Self {
                        index,
                        raw,
                        sse,
                        text: Some(text),
                        payload: Payload::Json { value, pointer },
                    },
                    None => Self::opaque(index, raw),
                }
            }
            Err(_) => Self {
                index,
                raw,
                sse,
                text: Some(content.to_string()),
                payload: Payload::Raw,
            },
        }
    }

    fn opaque(index: u64, raw: Bytes) -> Self {
        Self {
            index,
            raw,
            sse: false,
            text: None,
            payload: Payload::Raw,
        }
    }

    /// Generated text carried by this segment.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn into_bytes(self) -> Bytes {
        self.raw
    }

    /// Re-encode the segment with its text replaced.
    pub fn with_text(self, replacement: &str) -> Bytes {
        let line_end = if self.raw.ends_with(b"\r\n") {
            "\r\n"
        } else if self.raw.ends_with(b"\n") {
            "\n"
        } else {
            ""
        };

        let body = match self.payload {
            Payload::Json { mut value, pointer } => {
                if let Some(slot) = value.pointer_mut(pointer) {
                    *slot = Value::String(replacement.to_string());
                }
                value.to_string()
            }
            Payload::Raw => replacement.to_string(),
        };
        let prefix = if self.sse { "data: " } else { "" };
        Bytes::from(format!("{}{}{}", prefix, body, line_end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_framing_from_content_type() {
        let mut headers = HeaderMap::new();
        assert_eq!(Framing::from_headers(&headers), Framing::Single);
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream; charset=utf-8"));
        assert_eq!(Framing::from_headers(&headers), Framing::EventStream);
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
        assert_eq!(Framing::from_headers(&headers), Framing::Ndjson);
    }

    #[test]
    fn test_splitter_lines_and_remainder() {
        let mut s = LineSplitter::new(1024);
        assert!(s.push(b"{\"a\":").is_empty());
        let lines = s.push(b"1}\n{\"b\":2}\n{\"c\"");
        assert_eq!(lines, vec![Bytes::from("{\"a\":1}\n"), Bytes::from("{\"b\":2}\n")]);
        assert_eq!(s.finish(), Some(Bytes::from("{\"c\"")));
        assert_eq!(s.finish(), None);
    }

    #[test]
    fn test_splitter_cuts_long_lines_on_char_boundary() {
        let mut s = LineSplitter::new(5);
        // "ééé" is six bytes
        let parts = s.push("ééé\n".as_bytes());
        assert_eq!(parts[0], Bytes::from("éé"));
        assert_eq!(s.push(b"").len(), 0);
        let rest: Vec<u8> = parts[1..].iter().flat_map(|b| b.to_vec()).collect();
        assert_eq!(rest, "é\n".as_bytes());
    }

    #[test]
    fn test_text_extraction() {
        let ollama = StreamSegment::parse(0, Bytes::from("{\"response\":\"Hel\",\"done\":false}\n"), Framing::Ndjson);
        assert_eq!(ollama.text(), Some("Hel"));

        let chat = StreamSegment::parse(
            1,
            Bytes::from("data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n"),
            Framing::EventStream,
        );
        assert_eq!(chat.text(), Some("lo"));

        let done = StreamSegment::parse(2, Bytes::from("data: [DONE]\n"), Framing::EventStream);
        assert_eq!(done.text(), None);

        let blank = StreamSegment::parse(3, Bytes::from("\n"), Framing::EventStream);
        assert_eq!(blank.text(), None);

        let no_text = StreamSegment::parse(4, Bytes::from("{\"done\":true}\n"), Framing::Ndjson);
        assert_eq!(no_text.text(), None);

        let raw = StreamSegment::parse(5, Bytes::from("plain words"), Framing::Single);
        assert_eq!(raw.text(), Some("plain words"));
    }

    #[test]
    fn test_with_text_reencodes() {
        let seg = StreamSegment::parse(
            0,
            Bytes::from("data: {\"choices\":[{\"delta\":{\"content\":\"secret\"}}]}\n"),
            Framing::EventStream,
        );
        let out = seg.with_text("[REDACTED]");
        let out = std::str::from_utf8(&out).unwrap();
        assert!(out.starts_with("data: "));
        assert!(out.ends_with('\n'));
        let value: Value = serde_json::from_str(out.trim_start_matches("data: ").trim_end()).unwrap();
        assert_eq!(value["choices"][0]["delta"]["content"], "[REDACTED]");

        let raw = StreamSegment::parse(1, Bytes::from("secret\n"), Framing::Ndjson);
        assert_eq!(raw.with_text("xxx"), Bytes::from("xxx\n"));
    }

    #[test]
    fn test_terminal_record() {
        assert_eq!(Framing::EventStream.terminal_record("{}"), Bytes::from("data: {}\n\n"));
        assert_eq!(Framing::Ndjson.terminal_record("{}"), Bytes::from("{}\n"));
    }
}
