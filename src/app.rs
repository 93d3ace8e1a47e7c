use std::sync::Arc;

use genie_core::{
    assemble_reply, capture_from_config, synthesis_from_config, ChatError, ChatSession,
    ChatTransport, Config, Role, SessionOptions, VoiceEvents, LINE_BREAK,
};
use ratatui::layout::Rect;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::tui::AppEvent;

/// State of the chat view. Owns the session for as long as the view lives.
pub struct App {
    pub should_quit: bool,
    pub session: ChatSession,
    pub endpoint: String,

    // Input editing
    pub cursor: usize, // cursor position in the session input, in chars

    // Chat scrolling
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub chat_area: Option<Rect>,

    pub animation_frame: u8,

    transport: Arc<dyn ChatTransport>,
    reply_task: Option<JoinHandle<Result<String, ChatError>>>,
    events: mpsc::UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(
        config: &Config,
        transport: Arc<dyn ChatTransport>,
        events: mpsc::UnboundedSender<AppEvent>,
        voice_events: VoiceEvents,
    ) -> Self {
        let session = ChatSession::new(
            SessionOptions::from(config),
            capture_from_config(config, voice_events.clone()),
            synthesis_from_config(config, voice_events),
        );

        Self::with_session(session, config.endpoint().to_string(), transport, events)
    }

    pub fn with_session(
        session: ChatSession,
        endpoint: String,
        transport: Arc<dyn ChatTransport>,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            should_quit: false,
            session,
            endpoint,
            cursor: 0,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            chat_area: None,
            animation_frame: 0,
            transport,
            reply_task: None,
            events,
        }
    }

    /// Send the current input; the reply streams in on a background task
    pub fn submit(&mut self) {
        let Some(request) = self.session.begin_submit() else {
            return;
        };
        self.cursor = 0;

        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();
        self.reply_task = Some(tokio::spawn(async move {
            assemble_reply(
                transport.as_ref(),
                &request.text,
                request.idle_timeout,
                &request.cancel,
                |fragment| {
                    let _ = events.send(AppEvent::Fragment(fragment.to_string()));
                },
            )
            .await
        }));

        // Scroll to bottom so "Thinking..." is visible
        self.scroll_chat_to_bottom();
    }

    /// Finish the session's request once its task has ended, however it ended
    pub async fn poll_reply(&mut self) {
        let finished = self
            .reply_task
            .as_ref()
            .is_some_and(|task| task.is_finished());
        if !finished {
            return;
        }

        let Some(task) = self.reply_task.take() else {
            return;
        };
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(ChatError::Aborted(e.to_string())),
        };
        self.session.finish_reply(outcome);
        self.scroll_chat_to_bottom();
    }

    pub fn is_waiting(&self) -> bool {
        self.reply_task.is_some()
    }

    /// Put the cursor after the last character of the input
    pub fn cursor_to_end(&mut self) {
        self.cursor = self.session.input().chars().count();
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        let state = self.session.state();
        if state.pending || state.animating {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let max = self.total_chat_lines().saturating_sub(self.visible_height());
        self.chat_scroll = (self.chat_scroll + lines).min(max);
    }

    fn visible_height(&self) -> u16 {
        if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        }
    }

    /// Rough count of rendered chat lines, including wrapping.
    ///
    /// Clamped to `u16::MAX`, the furthest a paragraph can scroll.
    fn total_chat_lines(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };
        let wrapped = |line: &str| -> usize {
            // Use character count, not byte length, for proper UTF-8 handling
            line.chars().count() / wrap_width + 1
        };

        let mut total_lines: usize = 0;
        for msg in self.session.messages() {
            total_lines += 1; // Role line ("You:" or "Jarvis:")
            total_lines += match msg.role {
                Role::User => msg.content.lines().map(wrapped).sum::<usize>(),
                Role::Bot => msg.content.split(LINE_BREAK).map(wrapped).sum(),
            };
            total_lines += 1; // Blank line after message
        }

        let state = self.session.state();
        if state.pending {
            total_lines += 1; // "Jarvis:"
            if let Some(assembly) = &state.assembly {
                total_lines += assembly.lines().map(wrapped).sum::<usize>();
            }
            total_lines += 1; // "Thinking..."
        }
        u16::try_from(total_lines).unwrap_or(u16::MAX)
    }

    /// Scroll chat to bottom so the newest message is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        let total_lines = self.total_chat_lines();
        let visible_height = self.visible_height();
        if total_lines > visible_height {
            self.chat_scroll = total_lines - visible_height;
        }
    }
}
