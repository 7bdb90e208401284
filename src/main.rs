use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use todoq::app::App;
use todoq::cache::QueryClient;
use todoq::config::Config;
use todoq::logging;
use todoq::todos::{HttpTodoClient, TodoService};

#[derive(Parser, Debug)]
#[command(name = "todoq")]
#[command(about = "A terminal task list with optimistic updates")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/todoq/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Base URL of the todo API
  #[arg(short, long)]
  base_url: Option<String>,

  /// Log filter, e.g. `debug` or `todoq::cache=trace`
  #[arg(short, long)]
  log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Command line wins over the config file
  if let Some(base_url) = args.base_url {
    config.api.base_url = base_url;
  }
  if let Some(level) = args.log_level {
    config.log.level = level;
  }
  config.validate()?;

  let _log_guard = logging::init(&config.log)?;
  info!(base_url = %config.api.base_url, "starting todoq");

  let cache = QueryClient::new(config.cache.to_cache_config());
  let source = Arc::new(HttpTodoClient::new(&config.api)?);
  let todos = TodoService::new(source, cache, config.api.owner_id);

  let mut app = App::new(todos);
  app.run().await?;

  Ok(())
}
