//! Fakes shared by the unit tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;

use crate::client::{ChatTransport, ChunkStream};
use crate::error::{ChatError, VoiceError};
use crate::voice::{SpeechCapture, SpeechSynthesis, Utterance};

/// One `data:` line carrying `content`
pub fn event(content: &str) -> String {
    format!(
        "data: {}\n",
        serde_json::json!({ "chatbot": { "messages": [{ "content": content }] } })
    )
}

enum Script {
    Chunks(Vec<String>),
    Status(u16),
    FailingAfter(Vec<String>),
    Stalled(Vec<String>),
}

pub struct ScriptedTransport {
    script: Script,
    sent: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(script: Script) -> Self {
        Self {
            script,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn chunks(chunks: Vec<String>) -> Self {
        Self::new(Script::Chunks(chunks))
    }

    pub fn status(code: u16) -> Self {
        Self::new(Script::Status(code))
    }

    pub fn failing_after(chunks: Vec<String>) -> Self {
        Self::new(Script::FailingAfter(chunks))
    }

    pub fn stalled(chunks: Vec<String>) -> Self {
        Self::new(Script::Stalled(chunks))
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

fn ok_chunks(chunks: &[String]) -> impl futures_util::Stream<Item = Result<Vec<u8>, ChatError>> {
    stream::iter(chunks.iter().map(|c| Ok(c.clone().into_bytes())).collect::<Vec<_>>())
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open_stream(&self, text: &str) -> Result<ChunkStream, ChatError> {
        self.sent.lock().unwrap().push(text.to_string());
        match &self.script {
            Script::Chunks(chunks) => Ok(ok_chunks(chunks).boxed()),
            Script::Status(code) => Err(ChatError::Status(*code)),
            Script::FailingAfter(chunks) => Ok(ok_chunks(chunks)
                .chain(stream::once(async {
                    Err(ChatError::Transport("connection reset".to_string()))
                }))
                .boxed()),
            Script::Stalled(chunks) => Ok(ok_chunks(chunks).chain(stream::pending()).boxed()),
        }
    }
}

/// What a fake capability was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceCall {
    Start,
    Stop,
    Speak(Utterance),
    Cancel,
}

pub type CallLog = Arc<Mutex<Vec<VoiceCall>>>;

pub struct FakeCapture {
    pub available: bool,
    pub calls: CallLog,
}

impl SpeechCapture for FakeCapture {
    fn is_available(&self) -> bool {
        self.available
    }

    fn start(&mut self, _run: u64) -> Result<(), VoiceError> {
        if !self.available {
            return Err(VoiceError::Unsupported("speech recognition"));
        }
        self.calls.lock().unwrap().push(VoiceCall::Start);
        Ok(())
    }

    fn stop(&mut self) {
        self.calls.lock().unwrap().push(VoiceCall::Stop);
    }
}

pub struct FakeSynthesis {
    pub voices: Vec<String>,
    pub calls: CallLog,
}

impl SpeechSynthesis for FakeSynthesis {
    fn voices(&self) -> Vec<String> {
        self.voices.clone()
    }

    fn speak(&mut self, utterance: Utterance) -> Result<(), VoiceError> {
        self.calls.lock().unwrap().push(VoiceCall::Speak(utterance));
        Ok(())
    }

    fn cancel(&mut self) {
        self.calls.lock().unwrap().push(VoiceCall::Cancel);
    }
}
