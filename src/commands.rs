//! Command-mode commands, argument parsing and autocomplete logic
use color_eyre::{eyre::eyre, Result};

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "list",
    aliases: &["ls", "l"],
    usage: "list",
    description: "Show the cached todo list",
  },
  Command {
    name: "add",
    aliases: &["a", "new"],
    usage: "add <title>",
    description: "Create a todo",
  },
  Command {
    name: "done",
    aliases: &["d", "check"],
    usage: "done <id>",
    description: "Mark a todo as completed",
  },
  Command {
    name: "undo",
    aliases: &["u", "uncheck"],
    usage: "undo <id>",
    description: "Mark a todo as not completed",
  },
  Command {
    name: "rename",
    aliases: &["mv", "edit"],
    usage: "rename <id> <title>",
    description: "Change the title of a todo",
  },
  Command {
    name: "rm",
    aliases: &["delete", "del"],
    usage: "rm <id>",
    description: "Delete a todo",
  },
  Command {
    name: "refresh",
    aliases: &["r", "reload"],
    usage: "refresh",
    description: "Refetch the list from the server",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "Show available commands",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    usage: "quit",
    description: "Exit todoq",
  },
];

/// A parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
  List,
  Add(String),
  SetCompleted { id: i64, completed: bool },
  Rename { id: i64, title: String },
  Remove(i64),
  Refresh,
  Help,
  Quit,
}

/// Resolve a command word by exact name or alias
pub fn lookup(word: &str) -> Option<&'static Command> {
  let word = word.to_lowercase();
  COMMANDS
    .iter()
    .find(|cmd| cmd.name == word || cmd.aliases.contains(&word.as_str()))
}

/// Parse one input line. Empty lines yield `None`.
pub fn parse(line: &str) -> Result<Option<ShellCommand>> {
  let line = line.trim();
  if line.is_empty() {
    return Ok(None);
  }

  let (word, rest) = match line.split_once(char::is_whitespace) {
    Some((word, rest)) => (word, rest.trim()),
    None => (line, ""),
  };

  let cmd = match lookup(word) {
    Some(cmd) => cmd,
    None => {
      let hint = get_suggestions(word)
        .first()
        .map(|c| format!(" (did you mean '{}'?)", c.name))
        .unwrap_or_default();
      return Err(eyre!("unknown command '{}'{}", word, hint));
    }
  };

  let parsed = match cmd.name {
    "list" => ShellCommand::List,
    "add" => ShellCommand::Add(required_text(rest, cmd)?),
    "done" => ShellCommand::SetCompleted {
      id: parse_id(rest, cmd)?,
      completed: true,
    },
    "undo" => ShellCommand::SetCompleted {
      id: parse_id(rest, cmd)?,
      completed: false,
    },
    "rename" => {
      let (id, title) = rest
        .split_once(char::is_whitespace)
        .ok_or_else(|| usage_error(cmd))?;
      ShellCommand::Rename {
        id: parse_id(id, cmd)?,
        title: required_text(title.trim(), cmd)?,
      }
    }
    "rm" => ShellCommand::Remove(parse_id(rest, cmd)?),
    "refresh" => ShellCommand::Refresh,
    "help" => ShellCommand::Help,
    _ => ShellCommand::Quit,
  };

  Ok(Some(parsed))
}

fn usage_error(cmd: &Command) -> color_eyre::Report {
  eyre!("usage: {}", cmd.usage)
}

fn required_text(text: &str, cmd: &Command) -> Result<String> {
  if text.is_empty() {
    return Err(usage_error(cmd));
  }
  Ok(text.to_string())
}

fn parse_id(text: &str, cmd: &Command) -> Result<i64> {
  text
    .trim()
    .parse::<i64>()
    .map_err(|_| usage_error(cmd))
}

/// Render the help screen
pub fn help_text() -> String {
  let width = COMMANDS.iter().map(|c| c.usage.len()).max().unwrap_or(0);
  COMMANDS
    .iter()
    .map(|c| format!("  {:width$}  {}", c.usage, c.description, width = width))
    .collect::<Vec<_>>()
    .join("\n")
}

/// Autocomplete suggestions for the command word being typed.
///
/// Once the command word is followed by a space the user is typing
/// arguments, so nothing is suggested.
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input = input.trim_start();
  if input.contains(char::is_whitespace) {
    return Vec::new();
  }

  let input_lower = input.to_lowercase();
  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    // Exact match on name or alias
    if cmd.name == input_lower || cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 0));
      continue;
    }

    // Prefix match on name
    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 1));
      continue;
    }

    // Prefix match on alias
    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 2));
      continue;
    }

    if cmd.name.contains(&input_lower) {
      matches.push((cmd, 3));
    }
  }

  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// Replace the command word with the selected suggestion.
///
/// Returns `None` when there is nothing to complete.
pub fn complete(input: &str, selected: usize) -> Option<String> {
  let suggestions = get_suggestions(input);
  let cmd = suggestions.get(selected)?;
  let takes_args = cmd.usage.contains('<');
  Some(if takes_args {
    format!("{} ", cmd.name)
  } else {
    cmd.name.to_string()
  })
}
