use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use comms::cache::{MemoryStorage, NoopStorage, QueryClient, RetryPolicy, SqliteStorage};
use comms::communications::{
  Communication, CommunicationType, Communications, Direction, NewCommunication,
};
use comms::config::Config;
use comms::http::RestClient;

#[derive(Parser, Debug)]
#[command(name = "comms")]
#[command(about = "List and record profile communications")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/comms/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// API base URL, overrides the config file and COMMS_BASE_URL
  #[arg(long, global = true)]
  base_url: Option<String>,

  /// Bypass the cache for this run
  #[arg(long, global = true)]
  no_cache: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List communications
  List {
    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
  },
  /// Record a new communication
  Create {
    #[arg(long = "type", value_enum)]
    kind: CommunicationType,
    #[arg(long, value_enum)]
    direction: Option<Direction>,
    #[arg(long)]
    subject: Option<String>,
    #[arg(long)]
    content: Option<String>,
    /// Print the created record as JSON
    #[arg(long)]
    json: bool,
  },
  /// Mark the cached list stale
  Invalidate,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let mut config = Config::load(args.config.as_deref())?;
  if let Some(base_url) = args.base_url {
    config.api.base_url = base_url;
  }
  if args.no_cache {
    config.cache.enabled = false;
  }

  let _guard = init_logging()?;

  QueryClient::init_global(build_query_client(&config)?)
    .map_err(|_| eyre!("Query client already initialized"))?;

  let transport = Arc::new(RestClient::from_config(&config)?);
  let communications: Communications<RestClient> =
    Communications::new(transport, QueryClient::global());

  match args.command {
    Command::List { json } => {
      let records = communications.list().await?;
      if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
      } else {
        print_table(&records);
      }
    }
    Command::Create {
      kind,
      direction,
      subject,
      content,
      json,
    } => {
      let payload = NewCommunication {
        kind,
        direction,
        subject,
        content,
      };
      let record = communications.create(payload).await?;
      if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
      } else {
        println!("Created communication #{}", record.id);
      }
    }
    Command::Invalidate => {
      communications.invalidate();
      println!("Invalidated {}", communications.key());
    }
  }

  Ok(())
}

fn build_query_client(config: &Config) -> Result<QueryClient> {
  let client = if !config.cache.enabled {
    QueryClient::new(NoopStorage)
  } else if config.cache.persist {
    let path = Config::data_dir()?.join("cache.db");
    let storage = SqliteStorage::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;
    QueryClient::new(storage)
  } else {
    QueryClient::new(MemoryStorage::new())
  };

  Ok(
    client
      .with_stale_time(config.cache.stale_time())
      .with_retry(RetryPolicy::from(&config.retry)),
  )
}

/// Log to a file under the data dir so stdout stays clean for command output.
fn init_logging() -> Result<WorkerGuard> {
  let dir = Config::data_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, "comms.log"));

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "comms=info".into()),
    )
    .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
    .init();

  Ok(guard)
}

fn print_table(records: &[Communication]) {
  if records.is_empty() {
    println!("No communications");
    return;
  }

  println!(
    "{:<6} {:<20} {:<8} {:<9} SUBJECT",
    "ID", "CREATED", "TYPE", "DIRECTION"
  );
  for record in records {
    println!(
      "{:<6} {:<20} {:<8} {:<9} {}",
      record.id,
      record.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
      record.kind.to_string(),
      record
        .direction
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string()),
      record.subject.as_deref().unwrap_or(""),
    );
  }
}
