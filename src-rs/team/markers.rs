use serde::{Deserialize, Serialize};

use super::types::{BEGIN_PREFIX, END_MARKER, MARKER_CLOSE};

const MARKER_OPEN: char = '⟦';

/// What a team stream contains, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarkerEvent {
    Begin { speaker: String, role: String },
    Text(String),
    End,
}

/// A speaker's complete output, or text outside any speaker block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub speaker: Option<String>,
    pub role: Option<String>,
    pub text: String,
}

/// Incremental scanner for the BEGIN/END framing. Markers may be split across
/// any number of `push` calls; a partial marker is held back until it can be
/// decided.
#[derive(Debug, Default)]
pub struct Demuxer {
    pending: String,
}

impl Demuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<MarkerEvent> {
        self.pending.push_str(chunk);
        let mut events = Vec::new();
        let mut text = String::new();

        loop {
            let open = match self.pending.find(MARKER_OPEN) {
                Some(open) => open,
                None => {
                    text.push_str(&self.pending);
                    self.pending.clear();
                    break;
                }
            };
            text.push_str(&self.pending[..open]);
            let rest = &self.pending[open..];

            if rest.starts_with(END_MARKER) {
                flush_text(&mut text, &mut events);
                events.push(MarkerEvent::End);
                self.pending.drain(..open + END_MARKER.len());
                continue;
            }
            if let Some(header) = rest.strip_prefix(BEGIN_PREFIX) {
                match header.find(MARKER_CLOSE) {
                    Some(close) => {
                        let (speaker, role) = match header[..close].split_once('|') {
                            Some((speaker, role)) => (speaker.to_string(), role.to_string()),
                            None => (header[..close].to_string(), String::new()),
                        };
                        flush_text(&mut text, &mut events);
                        events.push(MarkerEvent::Begin { speaker, role });
                        let consumed = open + BEGIN_PREFIX.len() + close + MARKER_CLOSE.len();
                        self.pending.drain(..consumed);
                        continue;
                    }
                    None => {
                        self.pending.drain(..open);
                        break;
                    }
                }
            }
            if END_MARKER.starts_with(rest) || BEGIN_PREFIX.starts_with(rest) {
                // Could still become a marker once more text arrives.
                self.pending.drain(..open);
                break;
            }
            text.push(MARKER_OPEN);
            self.pending.drain(..open + MARKER_OPEN.len_utf8());
        }

        flush_text(&mut text, &mut events);
        events
    }

    /// Releases whatever is still held back as plain text.
    pub fn finish(&mut self) -> Vec<MarkerEvent> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        vec![MarkerEvent::Text(std::mem::take(&mut self.pending))]
    }
}

fn flush_text(text: &mut String, events: &mut Vec<MarkerEvent>) {
    if !text.is_empty() {
        events.push(MarkerEvent::Text(std::mem::take(text)));
    }
}

/// Splits a complete team stream into segments. An unterminated speaker block
/// runs to the end of the input.
pub fn demux(stream: &str) -> Vec<Segment> {
    let mut demuxer = Demuxer::new();
    let mut events = demuxer.push(stream);
    events.extend(demuxer.finish());

    let mut segments: Vec<Segment> = Vec::new();
    let mut current: Option<Segment> = None;
    for event in events {
        match event {
            MarkerEvent::Begin { speaker, role } => {
                if let Some(open) = current.take() {
                    segments.push(open);
                }
                current = Some(Segment {
                    speaker: Some(speaker),
                    role: Some(role),
                    text: String::new(),
                });
            }
            MarkerEvent::Text(text) => match current.as_mut() {
                Some(segment) => segment.text.push_str(&text),
                None => match segments.last_mut() {
                    Some(last) if last.speaker.is_none() => last.text.push_str(&text),
                    _ => segments.push(Segment {
                        text,
                        ..Segment::default()
                    }),
                },
            },
            MarkerEvent::End => {
                if let Some(closed) = current.take() {
                    segments.push(closed);
                }
            }
        }
    }
    if let Some(open) = current {
        segments.push(open);
    }
    segments
}
