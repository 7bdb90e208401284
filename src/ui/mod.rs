mod command_overlay;
mod header;
mod todo_list;

use crate::app::{App, Mode};
use crate::commands;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1), // Header
      Constraint::Min(1),    // Main content
      Constraint::Length(1), // Status bar
    ])
    .split(frame.area());

  let result = app.result();
  let items = result
    .data
    .as_ref()
    .map(|page| page.items.as_slice())
    .unwrap_or(&[]);

  header::draw_header(
    frame,
    chunks[0],
    result.data.as_ref(),
    app.entry().updated_at,
    result.is_refetching,
  );
  todo_list::draw_todo_list(
    frame,
    chunks[1],
    items,
    app.selected(),
    result.is_loading,
    result.error.as_deref(),
  );

  if app.show_help() {
    draw_help(frame, chunks[1]);
  }

  if *app.mode() == Mode::Command {
    command_overlay::draw_command_overlay(
      frame,
      chunks[1],
      app.command_input(),
      &app.autocomplete_suggestions(),
      app.selected_suggestion(),
    );
  }

  draw_status_bar(frame, chunks[2], app);
}

fn draw_status_bar(frame: &mut Frame, area: Rect, app: &App) {
  let result = app.result();
  let (content, style) = if let Some(notice) = app.notice() {
    let color = if notice.is_error { Color::Red } else { Color::Green };
    (format!(" {}", notice.message), Style::default().fg(color))
  } else if result.is_loading {
    (" Loading todos...".to_string(), Style::default().fg(Color::Yellow))
  } else if let Some(error) = &result.error {
    (format!(" Error: {}", error), Style::default().fg(Color::Red))
  } else {
    let hint = " :command  j/k:nav  space:toggle  d:delete  r:refresh  ?:help  q:quit";
    (hint.to_string(), Style::default().fg(Color::DarkGray))
  };

  let paragraph = Paragraph::new(content).style(style);
  frame.render_widget(paragraph, area);
}

fn draw_help(frame: &mut Frame, area: Rect) {
  let text = commands::help_text();
  let height = (text.lines().count() as u16 + 2).min(area.height);
  let width = (area.width * 80 / 100).max(40).min(area.width);
  let help_area = Rect::new(
    area.x + (area.width - width) / 2,
    area.y + (area.height - height) / 2,
    width,
    height,
  );

  frame.render_widget(Clear, help_area);
  let block = Block::default()
    .title(" Help ")
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Cyan));
  frame.render_widget(Paragraph::new(text).block(block), help_area);
}
