//! The chat session: one conversation, one request at a time
//!
//! A session is created when a chat view mounts and dropped when it
//! unmounts. Submitting is split into [`ChatSession::begin_submit`],
//! [`crate::assemble_reply`] and [`ChatSession::finish_reply`] so a front end
//! can run the network part on a task and keep drawing; [`ChatSession::submit`]
//! chains the three for callers that can simply wait.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::ChatTransport;
use crate::config::Config;
use crate::error::ChatError;
use crate::format::{format_reply, strip_markers};
use crate::state::{ConversationState, Message};
use crate::stream::assemble_reply;
use crate::voice::{transcript, RecognitionResult, SpeechCapture, SpeechSynthesis, Utterance, VoiceEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub preferred_voice: String,
    pub request_timeout: Duration,
    pub greeting: Option<String>,
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            preferred_voice: config.preferred_voice().to_string(),
            request_timeout: config.request_timeout(),
            greeting: config.greeting.clone(),
        }
    }
}

/// Everything the network part of a submit needs
#[derive(Debug, Clone)]
pub struct Request {
    pub text: String,
    pub idle_timeout: Duration,
    pub cancel: CancellationToken,
}

pub struct ChatSession {
    state: ConversationState,
    input: String,
    options: SessionOptions,
    capture: Box<dyn SpeechCapture>,
    synthesis: Box<dyn SpeechSynthesis>,
    capture_disabled: bool,
    next_capture: u64,
    capture_run: Option<u64>,
    in_flight: Option<CancellationToken>,
    next_utterance: u64,
    speaking: Option<u64>,
}

impl ChatSession {
    pub fn new(
        options: SessionOptions,
        capture: Box<dyn SpeechCapture>,
        synthesis: Box<dyn SpeechSynthesis>,
    ) -> Self {
        let state = match &options.greeting {
            Some(greeting) => ConversationState::with_greeting(greeting),
            None => ConversationState::new(),
        };

        Self {
            state,
            input: String::new(),
            options,
            capture,
            synthesis,
            capture_disabled: false,
            next_capture: 0,
            capture_run: None,
            in_flight: None,
            next_utterance: 0,
            speaking: None,
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn messages(&self) -> &[Message] {
        self.state.messages()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut String {
        &mut self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn is_listening(&self) -> bool {
        self.state.voice_active
    }

    /// Whether the input accepts a submit right now
    pub fn can_submit(&self) -> bool {
        !self.state.pending && !self.input.trim().is_empty()
    }

    /// The synchronous half of a submit.
    ///
    /// Returns `None` without touching anything when the input is blank or a
    /// request is already pending. Otherwise appends the user message, clears
    /// the input, marks the session pending, stops capture and clears the
    /// previous error.
    pub fn begin_submit(&mut self) -> Option<Request> {
        if !self.can_submit() {
            return None;
        }

        let text = std::mem::take(&mut self.input);
        self.state.push(Message::user(text.clone()));
        self.state.pending = true;
        if self.state.voice_active {
            self.stop_capture();
        }
        self.state.last_error = None;
        self.state.assembly = Some(String::new());

        // A new request silences the previous reply
        self.cancel_speech();
        self.state.animating = false;

        let cancel = CancellationToken::new();
        self.in_flight = Some(cancel.clone());
        tracing::info!(chars = text.chars().count(), "submitting message");

        Some(Request {
            text,
            idle_timeout: self.options.request_timeout,
            cancel,
        })
    }

    /// Record a reply fragment for live display
    pub fn push_fragment(&mut self, fragment: &str) {
        if let Some(assembly) = self.state.assembly.as_mut() {
            assembly.push_str(fragment);
        }
    }

    /// The terminal step of a submit; runs on every exit path.
    pub fn finish_reply(&mut self, outcome: Result<String, ChatError>) {
        if !self.state.pending {
            tracing::debug!("reply finished with no request pending");
            return;
        }

        self.state.pending = false;
        self.state.assembly = None;
        self.in_flight = None;

        match outcome {
            Ok(reply) => {
                self.state.push(Message::bot(format_reply(&reply)));
                self.speak(&strip_markers(&reply));
            }
            Err(e) => {
                tracing::warn!(error = %e, "request failed");
                self.state.last_error = Some(e.user_message().to_string());
                self.state.animating = self.state.voice_active;
            }
        }
    }

    /// Submit the current input and wait for the whole reply.
    ///
    /// Returns false when nothing was submitted.
    pub async fn submit<T: ChatTransport + ?Sized>(&mut self, transport: &T) -> bool {
        let Some(request) = self.begin_submit() else {
            return false;
        };

        let outcome = assemble_reply(
            transport,
            &request.text,
            request.idle_timeout,
            &request.cancel,
            |fragment| self.push_fragment(fragment),
        )
        .await;
        self.finish_reply(outcome);
        true
    }

    /// Abort the in-flight request, if any
    pub fn cancel_request(&mut self) -> bool {
        match &self.in_flight {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Flip between idle and listening
    pub fn toggle_voice_capture(&mut self) {
        if self.state.voice_active {
            self.stop_capture();
            return;
        }

        if self.capture_disabled {
            tracing::debug!("speech capture unavailable for this session");
            return;
        }
        if !self.capture.is_available() {
            tracing::warn!("speech recognition not supported");
            self.capture_disabled = true;
            return;
        }

        self.next_capture += 1;
        match self.capture.start(self.next_capture) {
            Ok(()) => {
                self.capture_run = Some(self.next_capture);
                self.state.voice_active = true;
                self.state.animating = true;
            }
            Err(e) => {
                tracing::warn!("speech capture failed to start: {}", e);
                self.capture_disabled = true;
            }
        }
    }

    fn stop_capture(&mut self) {
        self.capture.stop();
        self.capture_run = None;
        self.state.voice_active = false;
        self.state.animating = false;
    }

    /// Speak `text` with the preferred voice, or the default one.
    ///
    /// Whatever was playing is cancelled first.
    pub fn speak(&mut self, text: &str) {
        self.cancel_speech();
        if text.trim().is_empty() {
            self.state.animating = self.state.voice_active;
            return;
        }

        let voices = self.synthesis.voices();
        let voice = voices
            .iter()
            .find(|v| **v == self.options.preferred_voice)
            .or_else(|| voices.first())
            .cloned();

        self.next_utterance += 1;
        let utterance = Utterance {
            id: self.next_utterance,
            text: text.to_string(),
            voice,
        };
        let id = utterance.id;

        match self.synthesis.speak(utterance) {
            Ok(()) => {
                self.speaking = Some(id);
                self.state.animating = true;
            }
            Err(e) => {
                tracing::warn!("reply not spoken: {}", e);
                self.state.animating = self.state.voice_active;
            }
        }
    }

    fn cancel_speech(&mut self) {
        if self.speaking.take().is_some() {
            self.synthesis.cancel();
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.is_some()
    }

    /// Apply an event reported by a speech capability
    pub fn handle_voice_event(&mut self, event: VoiceEvent) {
        match event {
            VoiceEvent::Recognition(run, results) => {
                if self.capture_run == Some(run) {
                    self.handle_recognition(&results);
                } else {
                    tracing::debug!(run, "ignoring results of a stopped capture run");
                }
            }
            VoiceEvent::CaptureEnded(run) => {
                if self.capture_run == Some(run) {
                    tracing::info!(run, "recognizer stopped");
                    self.capture_run = None;
                    self.state.voice_active = false;
                    self.state.animating = self.speaking.is_some();
                } else {
                    tracing::debug!(run, "ignoring end of a stopped capture run");
                }
            }
            VoiceEvent::PlaybackFinished(id) => {
                if self.speaking == Some(id) {
                    self.speaking = None;
                    self.state.animating = self.state.voice_active;
                } else {
                    tracing::debug!(id, "ignoring completion of superseded utterance");
                }
            }
        }
    }

    /// Replace the input with the recognizer's current transcript
    pub fn handle_recognition(&mut self, results: &[RecognitionResult]) {
        if !self.state.voice_active {
            return;
        }
        self.input = transcript(results);
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.cancel_request();
        self.cancel_speech();
        if self.state.voice_active {
            self.capture.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Role;
    use crate::testing::{event, CallLog, FakeCapture, FakeSynthesis, ScriptedTransport, VoiceCall};
    use crate::FETCH_FAILED;

    struct Harness {
        session: ChatSession,
        calls: CallLog,
    }

    fn harness(capture_available: bool, voices: &[&str]) -> Harness {
        let calls = CallLog::default();
        let session = ChatSession::new(
            SessionOptions {
                preferred_voice: "Google US English".into(),
                request_timeout: Duration::from_secs(5),
                greeting: None,
            },
            Box::new(FakeCapture {
                available: capture_available,
                calls: calls.clone(),
            }),
            Box::new(FakeSynthesis {
                voices: voices.iter().map(|v| v.to_string()).collect(),
                calls: calls.clone(),
            }),
        );
        Harness { session, calls }
    }

    fn default_harness() -> Harness {
        harness(true, &["Alex", "Google US English"])
    }

    fn spoken(calls: &CallLog) -> Vec<Utterance> {
        calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                VoiceCall::Speak(utterance) => Some(utterance.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_hello_round_trip() {
        let Harness { mut session, calls } = default_harness();
        let transport = ScriptedTransport::chunks(vec![event("Hi "), event("there")]);

        session.set_input("Hello");
        assert!(session.submit(&transport).await);

        assert_eq!(
            session.messages(),
            &[Message::user("Hello"), Message::bot("Hi there")]
        );
        assert_eq!(transport.sent(), vec!["Hello".to_string()]);
        let utterances = spoken(&calls);
        assert_eq!(utterances.len(), 1);
        assert_eq!(utterances[0].text, "Hi there");
        assert_eq!(utterances[0].voice.as_deref(), Some("Google US English"));

        let state = session.state();
        assert!(!state.pending);
        assert!(state.last_error.is_none());
        assert!(state.assembly.is_none());
        assert!(state.animating);
    }

    #[tokio::test]
    async fn test_blank_input_is_noop() {
        let Harness { mut session, .. } = default_harness();
        let transport = ScriptedTransport::chunks(vec![event("unused")]);

        for input in ["", "   ", "\t\n"] {
            session.set_input(input);
            assert!(!session.submit(&transport).await);
        }
        assert!(session.messages().is_empty());
        assert!(transport.sent().is_empty());
        assert!(!session.state().pending);
    }

    #[test]
    fn test_begin_submit_effects() {
        let Harness { mut session, .. } = default_harness();
        session.state.last_error = Some("old".into());
        session.set_input("  keep my spaces ");

        let request = session.begin_submit().unwrap();
        assert_eq!(request.text, "  keep my spaces ");
        assert_eq!(session.messages(), &[Message::user("  keep my spaces ")]);
        assert_eq!(session.input(), "");
        assert!(session.state().pending);
        assert!(session.state().last_error.is_none());
        assert_eq!(session.state().assembly.as_deref(), Some(""));
    }

    #[test]
    fn test_second_submit_refused_while_pending() {
        let Harness { mut session, .. } = default_harness();
        session.set_input("first");
        assert!(session.begin_submit().is_some());

        session.set_input("second");
        assert!(session.begin_submit().is_none());
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.input(), "second");
    }

    #[tokio::test]
    async fn test_server_error_sets_last_error() {
        let Harness { mut session, calls } = default_harness();
        let transport = ScriptedTransport::status(500);

        session.set_input("Hello");
        assert!(session.submit(&transport).await);

        assert_eq!(session.messages(), &[Message::user("Hello")]);
        assert_eq!(session.state().last_error.as_deref(), Some(FETCH_FAILED));
        assert!(!session.state().pending);
        assert!(!session.state().animating);
        assert!(spoken(&calls).is_empty());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_appends_nothing() {
        let Harness { mut session, .. } = default_harness();
        let transport = ScriptedTransport::failing_after(vec![event("half")]);

        session.set_input("Hello");
        session.submit(&transport).await;

        assert_eq!(session.messages().len(), 1);
        assert!(session.state().last_error.is_some());
        assert!(!session.state().pending);
    }

    #[tokio::test]
    async fn test_malformed_line_still_yields_reply() {
        let Harness { mut session, .. } = default_harness();
        let transport = ScriptedTransport::chunks(vec![format!("data: {{bad json\n{}", event("hi"))]);

        session.set_input("x");
        session.submit(&transport).await;
        assert_eq!(session.messages()[1], Message::bot("hi"));
    }

    #[tokio::test]
    async fn test_reply_is_formatted_but_spoken_plain() {
        let Harness { mut session, calls } = default_harness();
        let transport = ScriptedTransport::chunks(vec![event("****Wow**** it's **bold**\nok")]);

        session.set_input("x");
        session.submit(&transport).await;

        assert_eq!(
            session.messages()[1].content,
            "<b><i>Wow</i></b> it's <b>bold</b><br>ok"
        );
        assert_eq!(spoken(&calls)[0].text, "Wow it's bold\nok");
    }

    #[test]
    fn test_fragments_accumulate_while_pending() {
        let Harness { mut session, .. } = default_harness();
        session.push_fragment("ignored");
        assert!(session.state().assembly.is_none());

        session.set_input("x");
        session.begin_submit();
        session.push_fragment("Hi ");
        session.push_fragment("there");
        assert_eq!(session.state().assembly.as_deref(), Some("Hi there"));

        session.finish_reply(Ok("Hi there".into()));
        assert!(session.state().assembly.is_none());
    }

    #[test]
    fn test_cancel_reports_cancelled() {
        let Harness { mut session, .. } = default_harness();
        assert!(!session.cancel_request());

        session.set_input("x");
        let request = session.begin_submit().unwrap();
        assert!(session.cancel_request());
        assert!(request.cancel.is_cancelled());

        session.finish_reply(Err(ChatError::Cancelled));
        assert_eq!(session.state().last_error.as_deref(), Some("Request cancelled."));
        assert!(!session.state().pending);
    }

    #[test]
    fn test_drop_cancels_in_flight_request() {
        let Harness { mut session, .. } = default_harness();
        session.set_input("x");
        let request = session.begin_submit().unwrap();
        drop(session);
        assert!(request.cancel.is_cancelled());
    }

    #[test]
    fn test_voice_toggle_and_transcript() {
        let Harness { mut session, calls } = default_harness();

        session.toggle_voice_capture();
        assert!(session.is_listening());
        assert!(session.state().animating);

        session.handle_voice_event(VoiceEvent::Recognition(1, vec![RecognitionResult::new("te")]));
        assert_eq!(session.input(), "te");
        session.handle_voice_event(VoiceEvent::Recognition(1, vec![RecognitionResult::new("test")]));
        assert_eq!(session.input(), "test");

        session.toggle_voice_capture();
        assert!(!session.is_listening());
        assert!(!session.state().animating);
        assert_eq!(*calls.lock().unwrap(), vec![VoiceCall::Start, VoiceCall::Stop]);

        // Late results after stopping don't touch the input
        session.set_input("typed");
        session.handle_recognition(&[RecognitionResult::new("late")]);
        assert_eq!(session.input(), "typed");
    }

    #[test]
    fn test_submit_stops_capture() {
        let Harness { mut session, calls } = default_harness();
        session.toggle_voice_capture();
        session.handle_recognition(&[RecognitionResult::new("spoken question")]);

        let request = session.begin_submit().unwrap();
        assert_eq!(request.text, "spoken question");
        assert!(!session.is_listening());
        assert!(calls.lock().unwrap().contains(&VoiceCall::Stop));
    }

    #[test]
    fn test_unavailable_capture_is_silent() {
        let Harness { mut session, calls } = harness(false, &[]);
        session.toggle_voice_capture();
        session.toggle_voice_capture();
        assert!(!session.is_listening());
        assert!(!session.state().animating);
        assert!(session.state().last_error.is_none());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_capture_ended_by_recognizer() {
        let Harness { mut session, .. } = default_harness();
        session.toggle_voice_capture();
        session.handle_voice_event(VoiceEvent::CaptureEnded(1));
        assert!(!session.is_listening());
        assert!(!session.state().animating);
    }

    #[test]
    fn test_stale_capture_events_ignored() {
        let Harness { mut session, .. } = default_harness();
        session.toggle_voice_capture(); // run 1
        session.toggle_voice_capture();
        session.toggle_voice_capture(); // run 2

        // Run 1 ending late must not switch off run 2
        session.handle_voice_event(VoiceEvent::CaptureEnded(1));
        assert!(session.is_listening());
        assert!(session.state().animating);

        session.handle_voice_event(VoiceEvent::Recognition(1, vec![RecognitionResult::new("old")]));
        assert_eq!(session.input(), "");
        session.handle_voice_event(VoiceEvent::Recognition(2, vec![RecognitionResult::new("new")]));
        assert_eq!(session.input(), "new");

        session.handle_voice_event(VoiceEvent::CaptureEnded(2));
        assert!(!session.is_listening());
    }

    #[test]
    fn test_voice_falls_back_to_default() {
        let Harness { mut session, calls } = harness(true, &["Alex", "Samantha"]);
        session.speak("hello");
        assert_eq!(spoken(&calls)[0].voice.as_deref(), Some("Alex"));

        let Harness { mut session, calls } = harness(true, &[]);
        session.speak("hello");
        assert_eq!(spoken(&calls)[0].voice, None);
    }

    #[test]
    fn test_playback_end_clears_animation() {
        let Harness { mut session, calls } = default_harness();
        session.speak("first");
        assert!(session.state().animating);
        let id = spoken(&calls)[0].id;

        session.handle_voice_event(VoiceEvent::PlaybackFinished(id));
        assert!(!session.state().animating);
        assert!(!session.is_speaking());
    }

    #[test]
    fn test_new_utterance_replaces_old() {
        let Harness { mut session, calls } = default_harness();
        session.speak("first");
        session.speak("second");
        let utterances = spoken(&calls);
        assert!(calls.lock().unwrap().contains(&VoiceCall::Cancel));

        // The superseded utterance finishing does not stop the animation
        session.handle_voice_event(VoiceEvent::PlaybackFinished(utterances[0].id));
        assert!(session.state().animating);
        session.handle_voice_event(VoiceEvent::PlaybackFinished(utterances[1].id));
        assert!(!session.state().animating);
    }

    #[test]
    fn test_empty_reply_is_not_spoken() {
        let Harness { mut session, calls } = default_harness();
        session.set_input("x");
        session.begin_submit();
        session.finish_reply(Ok(String::new()));

        assert_eq!(session.messages()[1].role, Role::Bot);
        assert!(spoken(&calls).is_empty());
        assert!(!session.state().animating);
    }

    #[test]
    fn test_greeting_seeds_conversation() {
        let session = ChatSession::new(
            SessionOptions {
                preferred_voice: String::new(),
                request_timeout: Duration::from_secs(1),
                greeting: Some("How can I help?".into()),
            },
            Box::new(crate::voice::UnavailableCapture),
            Box::new(crate::voice::UnavailableSynthesis),
        );
        assert_eq!(session.messages(), &[Message::bot("How can I help?")]);
    }

    #[test]
    fn test_unavailable_synthesis_stops_animation() {
        let mut session = ChatSession::new(
            SessionOptions::from(&Config::default()),
            Box::new(crate::voice::UnavailableCapture),
            Box::new(crate::voice::UnavailableSynthesis),
        );
        session.set_input("x");
        session.begin_submit();
        session.finish_reply(Ok("reply".into()));
        assert!(!session.state().animating);
        assert!(!session.is_speaking());
    }
}
