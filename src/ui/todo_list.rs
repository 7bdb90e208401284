use crate::todos::Todo;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

pub fn draw_todo_list(
  frame: &mut Frame,
  area: Rect,
  todos: &[Todo],
  selected: usize,
  loading: bool,
  error: Option<&str>,
) {
  let title = if loading {
    " Todos (loading...) ".to_string()
  } else {
    format!(" Todos ({}) ", todos.len())
  };

  let block = Block::default()
    .title(title)
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  if todos.is_empty() {
    let (content, color) = match (loading, error) {
      (true, _) => ("Loading...".to_string(), Color::DarkGray),
      (false, Some(error)) => (format!("Could not load todos: {}", error), Color::Red),
      (false, None) => ("No todos. Press : and type 'add <title>'.".to_string(), Color::DarkGray),
    };
    let paragraph = Paragraph::new(content)
      .block(block)
      .style(Style::default().fg(color));
    frame.render_widget(paragraph, area);
    return;
  }

  let items: Vec<ListItem> = todos
    .iter()
    .map(|todo| {
      let (mark, title_style) = if todo.completed {
        (
          "[x]",
          Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::CROSSED_OUT),
        )
      } else {
        ("[ ]", Style::default())
      };

      let line = Line::from(vec![
        Span::styled(mark, Style::default().fg(Color::Green)),
        Span::raw(" "),
        Span::styled(format!("{:>5}", todo.id), Style::default().fg(Color::Cyan)),
        Span::raw("  "),
        Span::styled(truncate(&todo.title, 60), title_style),
      ]);
      ListItem::new(line)
    })
    .collect();

  let list = List::new(items)
    .block(block)
    .highlight_style(
      Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("> ");

  let mut state = ListState::default();
  state.select(Some(selected));

  frame.render_stateful_widget(list, area, &mut state);
}

fn truncate(s: &str, max_chars: usize) -> String {
  if s.chars().count() <= max_chars {
    s.to_string()
  } else {
    let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", head)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ratatui::backend::TestBackend;

  fn todo(id: i64, title: &str, completed: bool) -> Todo {
    Todo {
      id,
      title: title.to_string(),
      completed,
      owner_id: 1,
    }
  }

  fn render(todos: &[Todo], selected: usize, loading: bool, error: Option<&str>) -> Vec<String> {
    let mut terminal = Terminal::new(TestBackend::new(60, 6)).unwrap();
    terminal
      .draw(|frame| {
        let area = frame.area();
        draw_todo_list(frame, area, todos, selected, loading, error);
      })
      .unwrap();

    let buffer = terminal.backend().buffer();
    let width = buffer.area.width as usize;
    buffer
      .content()
      .chunks(width)
      .map(|row| row.iter().map(|cell| cell.symbol()).collect())
      .collect()
  }

  #[test]
  fn test_items_and_selection() {
    let todos = [todo(1, "Buy milk", false), todo(2, "Walk dog", true)];
    let rows = render(&todos, 1, false, None);

    assert!(rows[0].contains("Todos (2)"));
    assert!(rows[1].contains("[ ]"));
    assert!(rows[1].contains("Buy milk"));
    assert!(!rows[1].contains('>'));
    assert!(rows[2].contains("> [x]"));
    assert!(rows[2].contains("Walk dog"));
  }

  #[test]
  fn test_loading() {
    let rows = render(&[], 0, true, None);
    assert!(rows[0].contains("loading..."));
    assert!(rows[1].contains("Loading..."));
  }

  #[test]
  fn test_error_without_data() {
    let rows = render(&[], 0, false, Some("failed to load todos"));
    assert!(rows[1].contains("Could not load todos: failed to load todos"));
  }

  #[test]
  fn test_truncate_counts_chars() {
    assert_eq!(truncate("short", 10), "short");
    assert_eq!(truncate("ééééééééé", 6), "ééé...");
  }
}
