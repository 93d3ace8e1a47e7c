//! Speech capabilities
//!
//! Capture and synthesis are platform features the session consumes through
//! two narrow traits. Both report back asynchronously by sending
//! [`VoiceEvent`]s into the channel the front end drains, which then hands
//! them to [`crate::ChatSession`].

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::VoiceError;

/// Where capabilities deliver their events
pub type VoiceEvents = mpsc::UnboundedSender<VoiceEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// Recognizer update from capture run `.0`: every result so far, oldest first
    Recognition(u64, Vec<RecognitionResult>),
    /// Capture run `.0` stopped on its own
    CaptureEnded(u64),
    /// The utterance with this id played to the end
    PlaybackFinished(u64),
}

/// One recognized segment with its transcript alternatives, best first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub alternatives: Vec<String>,
}

impl RecognitionResult {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            alternatives: vec![transcript.into()],
        }
    }
}

/// Join the best alternative of every result into one transcript
pub fn transcript(results: &[RecognitionResult]) -> String {
    results
        .iter()
        .filter_map(|r| r.alternatives.first())
        .map(String::as_str)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub id: u64,
    pub text: String,
    /// `None` means the synthesizer's own default
    pub voice: Option<String>,
}

/// Continuous speech capture with interim results
pub trait SpeechCapture: Send {
    fn is_available(&self) -> bool;
    /// Start capture run `run`; its events carry that id.
    fn start(&mut self, run: u64) -> Result<(), VoiceError>;
    /// Stop the current run. No end event follows.
    fn stop(&mut self);
}

/// Enqueue-and-play text to speech
pub trait SpeechSynthesis: Send {
    /// Voice names on offer; the first one is the default
    fn voices(&self) -> Vec<String>;
    fn speak(&mut self, utterance: Utterance) -> Result<(), VoiceError>;
    /// Stop whatever is playing. No completion event follows.
    fn cancel(&mut self);
}

/// Capture on a platform without a recognizer
pub struct UnavailableCapture;

impl SpeechCapture for UnavailableCapture {
    fn is_available(&self) -> bool {
        false
    }

    fn start(&mut self, _run: u64) -> Result<(), VoiceError> {
        Err(VoiceError::Unsupported("speech recognition"))
    }

    fn stop(&mut self) {}
}

/// Synthesis on a platform without a speech engine
pub struct UnavailableSynthesis;

impl SpeechSynthesis for UnavailableSynthesis {
    fn voices(&self) -> Vec<String> {
        Vec::new()
    }

    fn speak(&mut self, _utterance: Utterance) -> Result<(), VoiceError> {
        Err(VoiceError::Unsupported("speech synthesis"))
    }

    fn cancel(&mut self) {}
}

fn split_command(command: &str) -> Option<(String, Vec<String>)> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}

/// Recognizer backed by an external command.
///
/// The command runs for the whole capture and prints the cumulative
/// transcript on each stdout line.
pub struct CommandCapture {
    program: String,
    args: Vec<String>,
    events: VoiceEvents,
    running: Option<CancellationToken>,
}

impl CommandCapture {
    pub fn new(command: &str, events: VoiceEvents) -> Result<Self, VoiceError> {
        let (program, args) =
            split_command(command).ok_or(VoiceError::NotConfigured("speech recognition"))?;
        Ok(Self {
            program,
            args,
            events,
            running: None,
        })
    }
}

impl SpeechCapture for CommandCapture {
    fn is_available(&self) -> bool {
        true
    }

    fn start(&mut self, run: u64) -> Result<(), VoiceError> {
        self.stop();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| VoiceError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let Some(stdout) = child.stdout.take() else {
            return Err(VoiceError::Unsupported("recognizer output"));
        };

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let events = self.events.clone();
        let program = self.program.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => {
                        let _ = child.kill().await;
                        return;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            let results = vec![RecognitionResult::new(line)];
                            if events.send(VoiceEvent::Recognition(run, results)).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(%program, "recognizer output unreadable: {}", e);
                            break;
                        }
                    },
                }
            }
            let _ = child.kill().await;
            let _ = events.send(VoiceEvent::CaptureEnded(run));
        });

        tracing::info!(program = %self.program, run, "speech capture started");
        self.running = Some(token);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(token) = self.running.take() {
            token.cancel();
            tracing::info!(program = %self.program, "speech capture stopped");
        }
    }
}

impl Drop for CommandCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Text to speech backed by an external program such as `espeak-ng`.
///
/// The program is called as `<program> [args] [<voice_flag> <voice>] <text>`.
pub struct CommandSynthesis {
    program: String,
    args: Vec<String>,
    voice_flag: Option<String>,
    voices: Vec<String>,
    events: VoiceEvents,
    playing: Option<CancellationToken>,
}

impl CommandSynthesis {
    pub fn new(
        command: &str,
        voice_flag: Option<String>,
        voices: Vec<String>,
        events: VoiceEvents,
    ) -> Result<Self, VoiceError> {
        let (program, args) =
            split_command(command).ok_or(VoiceError::NotConfigured("speech synthesis"))?;
        Ok(Self {
            program,
            args,
            voice_flag,
            voices,
            events,
            playing: None,
        })
    }

    fn command_for(&self, utterance: &Utterance) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let (Some(flag), Some(voice)) = (&self.voice_flag, &utterance.voice) {
            command.arg(flag).arg(voice);
        }
        command.arg(&utterance.text);
        command
    }
}

impl SpeechSynthesis for CommandSynthesis {
    fn voices(&self) -> Vec<String> {
        self.voices.clone()
    }

    fn speak(&mut self, utterance: Utterance) -> Result<(), VoiceError> {
        self.cancel();

        let mut child = self
            .command_for(&utterance)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| VoiceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let events = self.events.clone();
        let id = utterance.id;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    let _ = child.kill().await;
                }
                status = child.wait() => {
                    if let Err(e) = status {
                        tracing::warn!(id, "speech playback failed: {}", e);
                    }
                    let _ = events.send(VoiceEvent::PlaybackFinished(id));
                }
            }
        });

        tracing::debug!(id, voice = ?utterance.voice, "speaking reply");
        self.playing = Some(token);
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(token) = self.playing.take() {
            token.cancel();
        }
    }
}

impl Drop for CommandSynthesis {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Build the capture capability the configuration asks for
pub fn capture_from_config(config: &Config, events: VoiceEvents) -> Box<dyn SpeechCapture> {
    match config.stt_command.as_deref().map(|c| CommandCapture::new(c, events)) {
        Some(Ok(capture)) => Box::new(capture),
        Some(Err(e)) => {
            tracing::warn!("speech capture disabled: {}", e);
            Box::new(UnavailableCapture)
        }
        None => {
            tracing::info!("no recognizer configured, speech capture unavailable");
            Box::new(UnavailableCapture)
        }
    }
}

/// Build the synthesis capability the configuration asks for
pub fn synthesis_from_config(config: &Config, events: VoiceEvents) -> Box<dyn SpeechSynthesis> {
    let Some(command) = config.tts_command.as_deref() else {
        tracing::info!("no speech engine configured, replies will not be spoken");
        return Box::new(UnavailableSynthesis);
    };
    match CommandSynthesis::new(
        command,
        config.tts_voice_flag.clone(),
        config.voices.clone().unwrap_or_default(),
        events,
    ) {
        Ok(synthesis) => Box::new(synthesis),
        Err(e) => {
            tracing::warn!("speech synthesis disabled: {}", e);
            Box::new(UnavailableSynthesis)
        }
    }
}
