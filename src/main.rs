use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tierstore::cache::{CacheStore, NoopCacheBackend, SqliteCacheBackend};
use tierstore::config::{self, Config};
use tierstore::paging::{Cursor, PageSource, PageStyle, PagedLoader};
use tierstore::resource::{Resource, ResourceMapping, ResourceRecord};
use tierstore::store::SqliteRecordStore;
use tierstore::transport::{EnvToken, HttpTransport, TransportClient};
use tierstore::{DataRepository, RefreshCoordinator, ResultExt, WorkerPool};

#[derive(Parser, Debug)]
#[command(name = "tierstore")]
#[command(about = "Cached, offline-capable access to JSON REST collections")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tierstore/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also write logs to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Read one resource: cache, then local store, then the API
  Get { collection: String, id: String },
  /// Read one resource from the API and update local copies
  Refresh { collection: String, id: String },
  /// Create a resource from a JSON object
  Create { collection: String, json: String },
  /// Replace a resource with a JSON object
  Update {
    collection: String,
    id: String,
    json: String,
  },
  /// Delete a resource remotely and locally
  Delete { collection: String, id: String },
  /// List one page, or every page with --all
  List {
    collection: String,
    #[arg(long)]
    all: bool,
    /// Cursor returned by a previous listing
    #[arg(long)]
    cursor: Option<String>,
    #[arg(long)]
    page_size: Option<u32>,
  },
  /// Print the locally stored resource whenever it changes, until Ctrl-C
  Watch {
    collection: String,
    id: String,
    /// Refresh from the API every N seconds
    #[arg(long)]
    interval: Option<u64>,
  },
  /// Drop expired cache entries
  Purge,
}

fn init_logging(verbose: bool) -> Result<WorkerGuard> {
  let dir = config::log_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
    &dir,
    "tierstore.log",
  ));
  let filter =
    EnvFilter::try_from_env("TIERSTORE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(verbose.then(|| fmt::layer().with_writer(std::io::stderr)))
    .init();

  Ok(guard)
}

/// Shared pieces every collection's repository is built from.
struct Services {
  config: Config,
  cache: CacheStore,
  transport: Arc<dyn TransportClient>,
  pool: WorkerPool,
  coordinator: RefreshCoordinator,
}

impl Services {
  fn new(config: Config) -> Result<Self> {
    let cache = if config.cache.enabled {
      CacheStore::new(SqliteCacheBackend::open(&config.cache_path()?)?)
    } else {
      CacheStore::new(NoopCacheBackend)
    };
    let transport = HttpTransport::new(&config.api.url, config.api.timeout(), EnvToken)?;
    let pool = WorkerPool::new(config.workers);

    Ok(Self {
      config,
      cache,
      transport: Arc::new(transport),
      pool,
      coordinator: RefreshCoordinator::default(),
    })
  }

  fn mapping(&self, collection: &str) -> ResourceMapping {
    ResourceMapping::new(collection, self.config.paging.style)
  }

  fn repository(&self, collection: &str) -> Result<DataRepository<ResourceMapping>> {
    let mapping = self.mapping(collection);
    let store =
      SqliteRecordStore::<ResourceRecord>::open(&self.config.store_path()?, &mapping.table_name())?;

    Ok(
      DataRepository::new(mapping, self.cache.clone(), Arc::new(store), self.transport.clone())
        .with_pool(self.pool.clone())
        .with_default_ttl(self.config.cache.default_ttl())
        .with_coordinator(self.coordinator.clone()),
    )
  }

  fn page_source(&self, collection: &str) -> PageSource<ResourceMapping> {
    PageSource::new(Arc::new(self.mapping(collection)), self.transport.clone())
      .with_pool(self.pool.clone())
  }
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn parse_object(json: &str) -> Result<Value> {
  let value: Value = serde_json::from_str(json).map_err(|e| eyre!("Invalid JSON: {}", e))?;
  if !value.is_object() {
    return Err(eyre!("Expected a JSON object"));
  }
  Ok(value)
}

fn parse_cursor(raw: &str, style: PageStyle) -> Result<Cursor> {
  match style {
    PageStyle::Index => raw
      .parse()
      .map(Cursor::Index)
      .map_err(|_| eyre!("Cursor must be a page number, got '{}'", raw)),
    PageStyle::Token => Ok(Cursor::Token(raw.to_string())),
  }
}

fn cursor_json(cursor: Option<&Cursor>) -> Value {
  match cursor {
    Some(Cursor::Index(page)) => json!(page),
    Some(Cursor::Token(token)) => json!(token),
    None => Value::Null,
  }
}

async fn run(services: Services, command: Command) -> Result<()> {
  match command {
    Command::Get { collection, id } => {
      let resource = services.repository(&collection)?.get(&id).await?;
      print_json(&resource.body)
    }
    Command::Refresh { collection, id } => {
      let resource = services.repository(&collection)?.refresh(&id).await?;
      print_json(&resource.body)
    }
    Command::Create { collection, json } => {
      let resource = Resource::from_json(parse_object(&json)?, "id");
      let created = services.repository(&collection)?.create(&resource).await?;
      print_json(&created.body)
    }
    Command::Update {
      collection,
      id,
      json,
    } => {
      let resource = Resource {
        id,
        body: parse_object(&json)?,
      };
      let updated = services.repository(&collection)?.update(&resource).await?;
      print_json(&updated.body)
    }
    Command::Delete { collection, id } => {
      services.repository(&collection)?.delete(&id).await?;
      Ok(())
    }
    Command::List {
      collection,
      all,
      cursor,
      page_size,
    } => {
      let page_size = page_size.unwrap_or(services.config.paging.page_size);
      let source = services.page_source(&collection);

      if all {
        let mut loader = PagedLoader::new(source, page_size);
        while loader.load_next() {
          loader.wait().await;
          if let Some(e) = loader.error() {
            return Err(e.clone().into());
          }
        }
        let items: Vec<Value> = loader.items().map(|r| r.body.clone()).collect();
        return print_json(&json!({ "items": items, "next": Value::Null }));
      }

      let cursor = cursor
        .map(|c| parse_cursor(&c, services.config.paging.style))
        .transpose()?;
      let page = source.load(cursor.as_ref(), page_size).await?;
      let items: Vec<Value> = page.items.iter().map(|r| r.body.clone()).collect();
      print_json(&json!({
        "items": items,
        "prev": cursor_json(page.prev_cursor.as_ref()),
        "next": cursor_json(page.next_cursor.as_ref()),
      }))
    }
    Command::Watch {
      collection,
      id,
      interval,
    } => {
      let repo = services.repository(&collection)?;
      let mut observation = repo.observe(&id);
      let mut ticker = tokio::time::interval(Duration::from_secs(interval.unwrap_or(0).max(1)));

      loop {
        tokio::select! {
          next = observation.recv() => match next {
            Some(Some(resource)) => print_json(&resource.body)?,
            Some(None) => println!("null"),
            None => break,
          },
          _ = ticker.tick(), if interval.is_some() => {
            let _ = repo
              .refresh(&id)
              .await
              .on_error(|e| warn!(error = %e, id = %id, "watch refresh failed"));
          }
          _ = tokio::signal::ctrl_c() => break,
        }
      }
      observation.unsubscribe();
      Ok(())
    }
    Command::Purge => {
      let removed = services.cache.purge_expired()?;
      info!(removed, "purged expired cache entries");
      println!("{}", removed);
      Ok(())
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.verbose)?;

  let config = Config::load(args.config.as_deref())?;
  info!(url = %config.api.url, workers = config.workers, "configuration loaded");

  let services = Services::new(config)?;
  run(services, args.command).await
}
