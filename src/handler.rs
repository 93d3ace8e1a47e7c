use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use crate::app::App;
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => {
            app.tick_animation();
        }
        AppEvent::Voice(event) => {
            app.session.handle_voice_event(event);
            app.cursor_to_end();
        }
        AppEvent::Fragment(fragment) => {
            app.session.push_fragment(&fragment);
            app.scroll_chat_to_bottom();
        }
    }

    app.poll_reply().await;
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any state
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        match key.code {
            KeyCode::Char('c') | KeyCode::Char('q') => {
                app.should_quit = true;
                return;
            }
            KeyCode::Char('l') => {
                toggle_voice(app);
                return;
            }
            KeyCode::Char(_) => return,
            _ => {}
        }
    }

    match key.code {
        KeyCode::F(2) => toggle_voice(app),
        KeyCode::Esc => {
            if !app.session.cancel_request() {
                app.session.input_mut().clear();
                app.cursor = 0;
            }
        }
        KeyCode::PageUp => app.scroll_up(app.chat_height.max(2) / 2),
        KeyCode::PageDown => app.scroll_down(app.chat_height.max(2) / 2),
        _ if app.session.state().pending => {
            // Input is disabled until the reply is in
        }
        _ => handle_input_key(app, key),
    }
}

/// Voice capture writes into the input, so it stays off while a reply is pending
fn toggle_voice(app: &mut App) {
    if app.session.state().pending {
        return;
    }
    app.session.toggle_voice_capture();
    app.cursor_to_end();
}

fn handle_input_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Enter => {
            app.submit();
        }
        KeyCode::Backspace => {
            if app.cursor > 0 {
                app.cursor -= 1;
                let input = app.session.input_mut();
                let byte_pos = char_to_byte_index(input, app.cursor);
                input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let input = app.session.input_mut();
            if app.cursor < input.chars().count() {
                let byte_pos = char_to_byte_index(input, app.cursor);
                input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.cursor = app.cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.session.input().chars().count();
            app.cursor = (app.cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.cursor = 0;
        }
        KeyCode::End => {
            app.cursor_to_end();
        }
        KeyCode::Char(c) => {
            let input = app.session.input_mut();
            let byte_pos = char_to_byte_index(input, app.cursor);
            input.insert(byte_pos, c);
            app.cursor += 1;
        }
        _ => {}
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let in_chat = app
        .chat_area
        .map(|r| point_in_rect(mouse.column, mouse.row, r))
        .unwrap_or(false);
    if !in_chat {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(3),
        MouseEventKind::ScrollUp => app.scroll_up(3),
        _ => {}
    }
}
