pub mod client;
pub mod config;
pub mod error;
pub mod format;
pub mod session;
pub mod sse;
pub mod state;
pub mod stream;
pub mod voice;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use client::{ChatTransport, ChunkStream, GraphClient};
pub use config::Config;
pub use error::{ChatError, VoiceError, FETCH_FAILED};
pub use format::{format_reply, strip_markers, LINE_BREAK};
pub use session::{ChatSession, Request, SessionOptions};
pub use state::{ConversationState, Message, Role};
pub use stream::assemble_reply;
pub use voice::{
    capture_from_config, synthesis_from_config, RecognitionResult, SpeechCapture,
    SpeechSynthesis, Utterance, VoiceEvent, VoiceEvents,
};
