use crate::cache::{MutationHandle, QueryEntry, QueryError, QueryResult, Subscription};
use crate::commands::{self, Command, ShellCommand};
use crate::event::{Event, EventHandler};
use crate::todos::{Todo, TodoPage, TodoService};
use crate::ui;
use color_eyre::{eyre::eyre, Result};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::stdout;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Input mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
  Normal,
  Command,
}

/// Transient message in the status bar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
  pub message: String,
  pub is_error: bool,
}

/// Main application state
pub struct App {
  todos: TodoService,

  /// Last cache entry seen for the list
  entry: QueryEntry<TodoPage>,

  /// Index of the highlighted row
  selected: usize,

  /// Current input mode
  mode: Mode,

  /// Command input buffer (after pressing :)
  command_input: String,

  /// Selected autocomplete suggestion index
  selected_suggestion: usize,

  notice: Option<Notice>,

  show_help: bool,

  /// Event sender for async tasks
  event_tx: Option<mpsc::UnboundedSender<Event>>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(todos: TodoService) -> Self {
    Self {
      todos,
      entry: QueryEntry::default(),
      selected: 0,
      mode: Mode::Normal,
      command_input: String::new(),
      selected_suggestion: 0,
      notice: None,
      show_help: false,
      event_tx: None,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let events = EventHandler::with_terminal(Duration::from_millis(250));
    let result = self.run_with(&mut terminal, events).await;

    // Cleanup terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
  }

  /// Main loop: draw, then wait for the next event
  pub async fn run_with<B: Backend>(
    &mut self,
    terminal: &mut Terminal<B>,
    mut events: EventHandler,
  ) -> Result<()> {
    self.event_tx = Some(events.sender());
    self.watch_list(self.todos.observe(), events.sender());

    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      match events.next().await {
        Some(event) => self.handle_event(event),
        None => break,
      }
    }

    info!("app closed");
    Ok(())
  }

  /// Forward every change of the list into the event loop
  fn watch_list(&self, mut subscription: Subscription<TodoPage>, tx: mpsc::UnboundedSender<Event>) {
    tokio::spawn(async move {
      while let Some(entry) = subscription.recv().await {
        if tx.send(Event::Todos(entry)).is_err() {
          break;
        }
      }
    });
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => {} // UI refresh happens automatically
      Event::Todos(entry) => {
        self.entry = entry;
        self.clamp_selection();
      }
      Event::MutationSettled { label, result } => match result {
        Ok(()) => debug!(%label, "mutation confirmed"),
        Err(message) => self.error(format!("{} failed: {}", label, message)),
      },
      Event::Refreshed(result) => {
        if let Err(message) = result {
          self.error(format!("refresh failed: {}", message));
        }
      }
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    match self.mode {
      Mode::Normal => self.handle_normal_mode_key(key),
      Mode::Command => self.handle_command_mode_key(key),
    }
  }

  fn handle_normal_mode_key(&mut self, key: KeyEvent) {
    match key.code {
      KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.should_quit = true;
      }
      KeyCode::Char('q') => {
        if self.show_help {
          self.show_help = false;
        } else {
          self.should_quit = true;
        }
      }
      KeyCode::Esc => {
        self.show_help = false;
        self.notice = None;
      }

      // Navigation
      KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
      KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),

      // Actions on the highlighted todo
      KeyCode::Char(' ') | KeyCode::Char('x') => {
        if let Some(todo) = self.selected_todo() {
          self.execute(ShellCommand::SetCompleted {
            id: todo.id,
            completed: !todo.completed,
          });
        }
      }
      KeyCode::Char('d') => {
        if let Some(todo) = self.selected_todo() {
          self.execute(ShellCommand::Remove(todo.id));
        }
      }
      KeyCode::Char('r') => self.execute(ShellCommand::Refresh),
      KeyCode::Char('?') => self.show_help = !self.show_help,

      // Mode switches
      KeyCode::Char(':') => {
        self.mode = Mode::Command;
        self.command_input.clear();
        self.selected_suggestion = 0;
      }

      _ => {}
    }
  }

  fn handle_command_mode_key(&mut self, key: KeyEvent) {
    match key.code {
      KeyCode::Esc => {
        self.mode = Mode::Normal;
        self.command_input.clear();
        self.selected_suggestion = 0;
      }
      KeyCode::Enter => {
        self.execute_command();
        self.mode = Mode::Normal;
        self.selected_suggestion = 0;
      }
      KeyCode::Tab => {
        if let Some(completed) = commands::complete(&self.command_input, self.selected_suggestion) {
          self.command_input = completed;
          self.selected_suggestion = 0;
        }
      }
      KeyCode::Down => {
        let suggestions = commands::get_suggestions(&self.command_input);
        if !suggestions.is_empty() {
          self.selected_suggestion = (self.selected_suggestion + 1) % suggestions.len();
        }
      }
      KeyCode::BackTab | KeyCode::Up => {
        let suggestions = commands::get_suggestions(&self.command_input);
        if !suggestions.is_empty() {
          self.selected_suggestion = if self.selected_suggestion == 0 {
            suggestions.len() - 1
          } else {
            self.selected_suggestion - 1
          };
        }
      }
      KeyCode::Backspace => {
        self.command_input.pop();
        self.selected_suggestion = 0; // Reset selection on input change
      }
      KeyCode::Char(c) => {
        self.command_input.push(c);
        self.selected_suggestion = 0;
      }
      _ => {}
    }
  }

  fn execute_command(&mut self) {
    let input = std::mem::take(&mut self.command_input);
    match commands::parse(&input) {
      Ok(Some(command)) => self.execute(command),
      Ok(None) => {}
      Err(e) => self.error(e.to_string()),
    }
  }

  fn execute(&mut self, command: ShellCommand) {
    if let Err(e) = self.try_execute(command) {
      self.error(e.to_string());
    }
  }

  fn try_execute(&mut self, command: ShellCommand) -> Result<()> {
    match command {
      ShellCommand::List => {
        self.show_help = false;
        self.selected = 0;
      }
      ShellCommand::Add(title) => {
        let handle = self.todos.add(title.clone());
        self.info(format!("adding '{}'", title));
        self.track(format!("add '{}'", title), handle);
      }
      ShellCommand::SetCompleted { id, completed } => {
        self.require(id)?;
        let handle = self.todos.set_completed(id, completed);
        let verb = if completed { "done" } else { "undo" };
        self.track(format!("{} {}", verb, id), handle);
      }
      ShellCommand::Rename { id, title } => {
        self.require(id)?;
        let handle = self.todos.rename(id, title);
        self.track(format!("rename {}", id), handle);
      }
      ShellCommand::Remove(id) => {
        self.require(id)?;
        let handle = self.todos.delete(id);
        self.track(format!("rm {}", id), handle);
      }
      ShellCommand::Refresh => self.refresh(),
      ShellCommand::Help => self.show_help = true,
      ShellCommand::Quit => self.should_quit = true,
    }
    Ok(())
  }

  fn require(&self, id: i64) -> Result<Todo> {
    self
      .todos
      .current()
      .into_iter()
      .find(|t| t.id == id)
      .ok_or_else(|| eyre!("no todo with id {}", id))
  }

  /// Report the outcome of a mutation once the server answers
  fn track(&self, label: String, handle: MutationHandle<Todo>) {
    let Some(tx) = self.event_tx.clone() else {
      return;
    };
    tokio::spawn(async move {
      let result = handle.await.map(|_| ()).map_err(|e| e.message);
      let _ = tx.send(Event::MutationSettled { label, result });
    });
  }

  fn refresh(&self) {
    let todos = self.todos.clone();
    let tx = self.event_tx.clone();
    tokio::spawn(async move {
      let result = match todos.refresh().await {
        Ok(_) => Ok(()),
        // A later refresh or a mutation took over; its result is what lands
        Err(QueryError::Cancelled) => Ok(()),
        Err(e) => Err(e.to_string()),
      };
      if let Some(tx) = tx {
        let _ = tx.send(Event::Refreshed(result));
      }
    });
  }

  fn info(&mut self, message: String) {
    self.notice = Some(Notice {
      message,
      is_error: false,
    });
  }

  fn error(&mut self, message: String) {
    self.notice = Some(Notice {
      message,
      is_error: true,
    });
  }

  fn items(&self) -> &[Todo] {
    self
      .entry
      .data
      .as_ref()
      .map(|page| page.items.as_slice())
      .unwrap_or(&[])
  }

  fn selected_todo(&self) -> Option<Todo> {
    self.items().get(self.selected).cloned()
  }

  fn move_selection(&mut self, delta: i32) {
    let len = self.items().len();
    if len > 0 {
      self.selected = (self.selected as i32 + delta).rem_euclid(len as i32) as usize;
    }
  }

  fn clamp_selection(&mut self) {
    let len = self.items().len();
    if self.selected >= len {
      self.selected = len.saturating_sub(1);
    }
  }

  // Accessors for UI rendering
  pub fn entry(&self) -> &QueryEntry<TodoPage> {
    &self.entry
  }

  pub fn result(&self) -> QueryResult<TodoPage> {
    self.entry.result()
  }

  pub fn selected(&self) -> usize {
    self.selected
  }

  pub fn mode(&self) -> &Mode {
    &self.mode
  }

  pub fn command_input(&self) -> &str {
    &self.command_input
  }

  pub fn autocomplete_suggestions(&self) -> Vec<&'static Command> {
    commands::get_suggestions(&self.command_input)
  }

  pub fn selected_suggestion(&self) -> usize {
    self.selected_suggestion
  }

  pub fn notice(&self) -> Option<&Notice> {
    self.notice.as_ref()
  }

  pub fn show_help(&self) -> bool {
    self.show_help
  }
}
