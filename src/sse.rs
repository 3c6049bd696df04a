//! Incremental server-sent-events decoder.
//!
//! The ask stream is standard SSE: `event:` names the frame kind, one or
//! more `data:` lines carry a JSON body, a blank line terminates the frame.
//! Lines starting with `:` are comments; `id:`/`retry:` fields are ignored.

use crate::model::{FinalFrame, StageEvent, StreamEvent};
use bytes::Bytes;

/// One complete SSE frame, before JSON decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Stateful line-oriented SSE parser. Feed it raw chunks as they arrive;
/// it buffers partial lines across chunk boundaries.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one transport chunk and return every frame completed by it.
    pub fn feed(&mut self, chunk: Bytes) -> Vec<SseFrame> {
        self.buf.extend_from_slice(&chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let mut line = String::from_utf8_lossy(&line).into_owned();
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            if let Some(frame) = self.push_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Process one complete line; a blank line flushes the pending frame.
    fn push_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            if self.data.is_empty() {
                self.event = None;
                return None;
            }
            let frame = SseFrame {
                event: self.event.take(),
                data: self.data.join("\n"),
            };
            self.data.clear();
            return Some(frame);
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            // A line without a colon is a field with an empty value.
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id / retry are not used by this client.
            _ => {}
        }
        None
    }
}

/// Decode a frame into a stream event.
///
/// Unknown event names yield `None` (ignored, same forward-compatibility
/// policy as unknown stages). A corrupt `agent` body becomes `Malformed`
/// so the controller can drop and count it; a corrupt `final` body becomes
/// `TransportFailed` because the run can no longer complete meaningfully.
pub fn decode_frame(frame: &SseFrame) -> Option<StreamEvent> {
    match frame.event.as_deref() {
        Some("agent") => match serde_json::from_str::<serde_json::Value>(&frame.data) {
            Ok(raw) => match serde_json::from_value::<StageEvent>(raw.clone()) {
                Ok(mut ev) => {
                    ev.raw = raw;
                    Some(StreamEvent::Stage(ev))
                }
                Err(e) => Some(StreamEvent::Malformed {
                    reason: format!("bad agent frame: {e}"),
                }),
            },
            Err(e) => Some(StreamEvent::Malformed {
                reason: format!("unparseable agent frame: {e}"),
            }),
        },
        Some("final") => match serde_json::from_str::<FinalFrame>(&frame.data) {
            Ok(frame) => Some(StreamEvent::Final(Box::new(frame))),
            Err(e) => Some(StreamEvent::TransportFailed {
                reason: format!("unparseable final frame: {e}"),
            }),
        },
        _ => None,
    }
}
