use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use genie_core::{Role, LINE_BREAK};
use crate::app::App;

const BLOB_FRAMES: [&str; 3] = ["◐", "◓", "◑"];

fn emphasis(bold: bool, italic: bool) -> Style {
    let mut style = Style::default();
    if bold {
        style = style.add_modifier(Modifier::BOLD);
    }
    if italic {
        style = style.add_modifier(Modifier::ITALIC);
    }
    style
}

/// Convert one line of reply markup (`<b>`, `<i>`) to styled spans.
/// Anything that isn't one of those tags is shown literally.
fn markup_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut current_text = String::new();
    let (mut bold, mut italic) = (false, false);
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if c == '<' {
            let tag = ["<b>", "</b>", "<i>", "</i>"]
                .into_iter()
                .find(|tag| rest.starts_with(tag));
            if let Some(tag) = tag {
                // Push any accumulated text in the style it was written in
                if !current_text.is_empty() {
                    spans.push(Span::styled(
                        std::mem::take(&mut current_text),
                        emphasis(bold, italic),
                    ));
                }
                match tag {
                    "<b>" => bold = true,
                    "</b>" => bold = false,
                    "<i>" => italic = true,
                    _ => italic = false,
                }
                rest = &rest[tag.len()..];
                continue;
            }
        }
        current_text.push(c);
        rest = &rest[c.len_utf8()..];
    }

    if !current_text.is_empty() {
        spans.push(Span::styled(current_text, emphasis(bold, italic)));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

/// Split reply markup on line break markers and style each line
fn markup_lines(text: &str) -> Vec<Line<'static>> {
    text.split(LINE_BREAK).map(markup_line).collect()
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();
    let error_height = if app.session.state().last_error.is_some() { 3 } else { 0 };

    // Main layout: header, chat, error banner, input, footer
    let [header_area, chat_area, error_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(error_height),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    if error_height > 0 {
        render_error(app, frame, error_area);
    }
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let state = app.session.state();
    let blob = if state.animating {
        Span::styled(
            BLOB_FRAMES[app.animation_frame as usize % BLOB_FRAMES.len()],
            Style::default().fg(Color::Magenta).bold(),
        )
    } else {
        Span::styled("●", Style::default().fg(Color::Blue))
    };

    let title = Line::from(vec![
        Span::raw(" "),
        blob,
        Span::styled(" Jarvis ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(app.endpoint.clone(), Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    frame.render_widget(Paragraph::new(title), area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_area = Some(area);
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let state = app.session.state();
    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Chat ");

    let you = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
    let jarvis = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);

    let chat_text = if app.session.messages().is_empty() && !state.pending {
        Text::from(Span::styled(
            "Type a message, or press F2 to talk...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for msg in app.session.messages() {
            match msg.role {
                Role::User => {
                    lines.push(Line::from(Span::styled("You:", you)));
                    for line in msg.content.lines() {
                        lines.push(Line::from(line.to_string()));
                    }
                }
                Role::Bot => {
                    lines.push(Line::from(Span::styled("Jarvis:", jarvis)));
                    lines.extend(markup_lines(&msg.content));
                }
            }
            lines.push(Line::default());
        }

        if state.pending {
            lines.push(Line::from(Span::styled("Jarvis:", jarvis)));
            // Reply so far, shown as it streams in
            if let Some(assembly) = state.assembly.as_deref().filter(|a| !a.is_empty()) {
                for line in assembly.lines() {
                    lines.push(Line::from(Span::styled(
                        line.to_string(),
                        Style::default().fg(Color::Gray),
                    )));
                }
            }
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            lines.push(Line::from(Span::styled(
                format!("Thinking{}", dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_error(app: &App, frame: &mut Frame, area: Rect) {
    let Some(error) = app.session.state().last_error.as_deref() else {
        return;
    };

    let banner = Paragraph::new(Line::from(vec![
        Span::styled("Error: ", Style::default().fg(Color::Red).bold()),
        Span::styled(error.to_string(), Style::default().fg(Color::Red)),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Red)),
    );

    frame.render_widget(banner, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let state = app.session.state();
    let (title, border_color) = if state.pending {
        (" Sending... ", Color::DarkGray)
    } else if state.voice_active {
        (" Listening... (F2 to stop) ", Color::Red)
    } else {
        (" Message ", Color::Yellow)
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Calculate visible portion of input with horizontal scrolling
    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.cursor;

    // Calculate scroll offset to keep cursor visible
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    // Get the visible slice of the input
    let visible_text: String = app
        .session
        .input()
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(if state.pending { Color::DarkGray } else { Color::Cyan }))
        .block(input_block);

    frame.render_widget(input, area);

    // Show cursor while the input accepts text
    if !state.pending {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let state = app.session.state();
    let (mode_text, mode_style) = if state.pending {
        (" WAITING ", Style::default().bg(Color::Magenta).fg(Color::White))
    } else if state.voice_active {
        (" LISTENING ", Style::default().bg(Color::Red).fg(Color::White))
    } else {
        (" CHAT ", Style::default().bg(Color::Blue).fg(Color::White))
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let mut hints = if state.pending {
        vec![
            Span::styled(" Esc ", key_style),
            Span::styled(" cancel ", label_style),
        ]
    } else {
        vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" send ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" clear ", label_style),
        ]
    };
    hints.extend(vec![
        Span::styled(" F2 ", key_style),
        Span::styled(if state.voice_active { " stop " } else { " talk " }, label_style),
        Span::styled(" PgUp/PgDn ", key_style),
        Span::styled(" scroll ", label_style),
        Span::styled(" ^C ", key_style),
        Span::styled(" quit ", label_style),
    ]);

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}
