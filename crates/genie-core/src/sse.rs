//! Event-stream decoding for the graph endpoint
//!
//! The endpoint pushes newline-terminated lines. Only lines starting with
//! `data: ` matter, and of those only JSON objects carrying a `chatbot`
//! payload contribute reply text.

use serde::Deserialize;

const DATA_PREFIX: &str = "data: ";

/// Splits raw chunks into complete lines, carrying partial lines over.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    /// Upper bound on a carried-over partial line (1MB)
    const MAX_BUFFER_SIZE: usize = 1024 * 1024;

    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes and return the reply fragments of every
    /// complete line it finishes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut fragments = Vec::new();
        // Split on raw bytes so a multi-byte character cut by a chunk
        // boundary is decoded only once the whole line is here
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(fragment) = reply_fragment(&String::from_utf8_lossy(&line)) {
                fragments.push(fragment);
            }
        }

        if self.buffer.len() > Self::MAX_BUFFER_SIZE {
            tracing::warn!(
                "event line exceeded {}KB without a newline, dropping it",
                Self::MAX_BUFFER_SIZE / 1024
            );
            self.buffer.clear();
        }
        fragments
    }

    /// Push a string directly (for tests or pre-decoded content)
    pub fn push_str(&mut self, s: &str) -> Vec<String> {
        self.push(s.as_bytes())
    }

    /// Handle whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        reply_fragment(&String::from_utf8_lossy(&rest))
    }
}

#[derive(Deserialize)]
struct GraphEvent {
    chatbot: Option<Chatbot>,
}

#[derive(Deserialize)]
struct Chatbot {
    #[serde(default)]
    messages: Vec<ChatbotMessage>,
}

#[derive(Deserialize)]
struct ChatbotMessage {
    #[serde(default)]
    content: String,
}

/// Extract the reply text carried by one event line, if any.
///
/// Lines that are not events, fail to parse, or carry no `chatbot`
/// messages yield `None`; none of these abort the stream.
pub fn reply_fragment(line: &str) -> Option<String> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);
    let data = line.strip_prefix(DATA_PREFIX)?;

    let event: GraphEvent = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!("skipping malformed event line: {}", e);
            return None;
        }
    };

    event
        .chatbot?
        .messages
        .into_iter()
        .next()
        .map(|message| message.content)
}
