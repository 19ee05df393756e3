//! Incremental SSE parsing for upstream provider streams
//!
//! Providers stream responses as Server-Sent Events. Chunk boundaries do not
//! align with frame boundaries, so drivers feed raw bytes into a buffer and
//! drain complete frames from it.

/// Buffers raw bytes and yields complete SSE frames.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    buffer: String,
}

/// One parsed SSE frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
    }

    /// Drain the next complete frame, if one is buffered.
    ///
    /// Frames are separated by a blank line. Comment lines (leading `:`) are
    /// skipped; multiple `data:` lines are joined with `\n` per the SSE spec.
    pub fn next_frame(&mut self) -> Option<SseFrame> {
        loop {
            let (frame, rest) = split_frame(&self.buffer)?;
            self.buffer = rest;

            let mut event = None;
            let mut data_lines: Vec<&str> = Vec::new();
            for line in frame.lines() {
                if line.starts_with(':') {
                    continue;
                }
                if let Some(rest) = line.strip_prefix("event:") {
                    event = Some(rest.trim_start().to_string());
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
                }
            }

            if data_lines.is_empty() && event.is_none() {
                continue;
            }
            return Some(SseFrame {
                event,
                data: data_lines.join("\n"),
            });
        }
    }
}

/// Split the buffer into the first complete frame and the remainder.
fn split_frame(buffer: &str) -> Option<(String, String)> {
    let idx = buffer.find("\n\n")?;
    let (frame, rest) = buffer.split_at(idx + 2);
    Some((frame.to_string(), rest.to_string()))
}
