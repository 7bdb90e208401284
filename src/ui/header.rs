use crate::todos::TodoPage;
use chrono::{DateTime, Local, Utc};
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Counts shown in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
  pub total: u64,
  pub completed: usize,
  pub remaining: usize,
}

impl Stats {
  /// `total` is the server's count; the other two cover the loaded items.
  pub fn of(page: &TodoPage) -> Self {
    let completed = page.items.iter().filter(|t| t.completed).count();
    Self {
      total: page.total.max(page.items.len() as u64),
      completed,
      remaining: page.items.len() - completed,
    }
  }
}

/// Draw the header bar with the list counts and last update time
pub fn draw_header(
  frame: &mut Frame,
  area: Rect,
  page: Option<&TodoPage>,
  updated_at: Option<DateTime<Utc>>,
  refreshing: bool,
) {
  let stats = page.map(Stats::of).unwrap_or_default();

  let mut spans = vec![
    Span::styled(" todoq ", Style::default().fg(Color::Cyan).bold()),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::raw(format!(" Total: {} ", stats.total)),
    Span::styled(
      format!(" Completed: {} ", stats.completed),
      Style::default().fg(Color::Green),
    ),
    Span::styled(
      format!(" In progress: {} ", stats.remaining),
      Style::default().fg(Color::Yellow),
    ),
  ];

  if let Some(at) = updated_at {
    spans.push(Span::styled("│", Style::default().fg(Color::DarkGray)));
    spans.push(Span::styled(
      format!(" updated {} ", at.with_timezone(&Local).format("%H:%M:%S")),
      Style::default().fg(Color::DarkGray),
    ));
  }

  if refreshing {
    spans.push(Span::styled(
      " [refreshing]",
      Style::default().fg(Color::Yellow),
    ));
  }

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
  frame.render_widget(paragraph, area);
}
