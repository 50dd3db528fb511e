//! Newline-delimited JSON framing between the relay and its clients.
//!
//! The relay speaks a deliberately small protocol: one JSON object per line,
//! either `{"chunk": "<text>"}` for an incremental fragment or
//! `{"done": true}` as the terminal marker. This module also translates the
//! upstream server's line objects (`{"message": {"content": ...}, "done": ...}`)
//! into that protocol.

use serde::Deserialize;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// One event of the relay's response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    Chunk(String),
    Done,
}

impl WireEvent {
    /// Encode as a single newline-terminated JSON line.
    pub fn to_line(&self) -> String {
        let mut line = match self {
            WireEvent::Chunk(text) => serde_json::json!({ "chunk": text }).to_string(),
            WireEvent::Done => serde_json::json!({ "done": true }).to_string(),
        };
        line.push('\n');
        line
    }
}

#[derive(Debug, Deserialize)]
struct WireLine {
    #[serde(default)]
    chunk: Option<String>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct UpstreamLine {
    #[serde(default)]
    message: Option<UpstreamMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct UpstreamMessage {
    #[serde(default)]
    content: String,
}

/// Decode one relay line.
///
/// A line may carry both a fragment and the terminal flag; the fragment is
/// reported first. Valid JSON that carries neither yields no events.
pub fn decode_line(line: &str) -> Result<Vec<WireEvent>, serde_json::Error> {
    let parsed: WireLine = serde_json::from_str(line)?;
    Ok(events(parsed.chunk, parsed.done))
}

/// Translate one upstream chat line into relay events.
///
/// Upstream lines without content and without the done flag (status lines,
/// errors) are dropped.
pub fn translate_upstream_line(line: &str) -> Result<Vec<WireEvent>, serde_json::Error> {
    let parsed: UpstreamLine = serde_json::from_str(line)?;
    Ok(events(parsed.message.map(|m| m.content), parsed.done))
}

fn events(chunk: Option<String>, done: bool) -> Vec<WireEvent> {
    let mut events = Vec::with_capacity(2);
    if let Some(chunk) = chunk.filter(|c| !c.is_empty()) {
        events.push(WireEvent::Chunk(chunk));
    }
    if done {
        events.push(WireEvent::Done);
    }
    events
}

/// Reassembles lines from arbitrarily split byte chunks.
///
/// Bytes after the last newline are held until the next push (or
/// [`LineDecoder::finish`]), so a JSON object split across network reads is
/// still decoded whole. Blank lines are discarded.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let Some(last_newline) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        complete
            .split(|b| *b == b'\n')
            .filter_map(Self::decode)
            .collect()
    }

    /// Flush whatever trails the last newline once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        Self::decode(&rest)
    }

    fn decode(raw: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}
