mod logging;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::WrapErr, Result};
use std::path::PathBuf;

use jira_scraper::cache::DiskCache;
use jira_scraper::config::Config;
use jira_scraper::jira::{ClientConfig, JiraClient};
use jira_scraper::scraper::{self, ScrapeResult, Scraper};

#[derive(Parser, Debug)]
#[command(name = "jira-scraper")]
#[command(about = "Fetch Jira issues with their changelogs into a local disk cache")]
#[command(version)]
struct Args {
  /// Path to config file
  /// (default: ./jira-scraper.yaml or $XDG_CONFIG_HOME/jira-scraper/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Jira base URL, overrides jira.url
  #[arg(long, global = true)]
  url: Option<String>,

  /// Cache base directory, overrides cache.dir
  #[arg(long, global = true)]
  cache_dir: Option<PathBuf>,

  /// Log at debug level
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch every issue of a project into the cache
  Scrape {
    /// Project key, e.g. AAH
    project: String,

    /// Re-fetch issues that are already cached
    #[arg(long)]
    full: bool,

    /// Stop after this many issues
    #[arg(long)]
    limit: Option<usize>,

    /// Search page size (1-100)
    #[arg(long)]
    batch_size: Option<u32>,

    /// Reserved; issues are fetched sequentially
    #[arg(long)]
    workers: Option<usize>,
  },
  /// Fetch and cache a single issue
  Issue { key: String },
  /// Print a cached issue
  Show { key: String },
  /// List cached issue keys
  List {
    /// Only keys of this project
    #[arg(short, long)]
    project: Option<String>,
  },
  /// Check that every cached issue can be read back
  Validate,
  /// Check the Jira URL and token
  TestConnection,
  /// Fetch an issue without caching it and print a one-line summary
  Peek { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose, args.log_file.as_deref())?;

  let mut config = Config::load(args.config.as_deref())?;
  if let Some(url) = args.url {
    config.jira.url = url;
  }
  if let Some(dir) = args.cache_dir {
    config.cache.dir = dir;
  }

  match args.command {
    Command::Scrape {
      project,
      full,
      limit,
      batch_size,
      workers,
    } => {
      if full {
        config.scrape.full_sync = true;
      }
      if let Some(limit) = limit {
        config.scrape.limit = limit;
      }
      if let Some(batch_size) = batch_size {
        config.scrape.batch_size = batch_size;
      }
      if let Some(workers) = workers {
        config.scrape.workers = workers;
      }

      let scraper = Scraper::new(
        build_client(&config)?,
        open_cache(&config)?,
        config.scrape.to_scrape_config(),
      );
      let result = scraper.scrape_project(&project).await?;
      print_summary(&project, &result);
    }
    Command::Issue { key } => {
      let scraper = Scraper::new(
        build_client(&config)?,
        open_cache(&config)?,
        config.scrape.to_scrape_config(),
      );
      let path = scraper.scrape_issue(&key).await?;
      println!("{} -> {}", key, path.display());
    }
    Command::Show { key } => {
      let cache = cache_for(&config);
      let cached = cache
        .get_issue(&key)
        .wrap_err_with(|| format!("Cannot show {}", key))?;
      let fetched = cache.last_fetched(&key)?;
      eprintln!("Last fetched: {}", fetched.to_rfc3339());
      println!("{}", serde_json::to_string_pretty(&cached)?);
    }
    Command::List { project } => {
      let cache = cache_for(&config);
      let keys = match project {
        Some(project) => cache.list_issues_for_project(&project)?,
        None => cache.list_issues()?,
      };
      for key in keys {
        println!("{}", key);
      }
    }
    Command::Validate => {
      let report = scraper::validate_cache(&cache_for(&config))?;
      println!("Checked {} cached issues", report.checked);
      for (key, reason) in &report.failures {
        println!("  {}: {}", key, reason);
      }
      if report.is_ok() {
        println!("Cache validation passed");
      } else {
        println!("Cache validation found {} errors", report.failures.len());
      }
    }
    Command::TestConnection => {
      let client = build_client(&config)?;
      client
        .test_connection()
        .await
        .wrap_err("Connection test failed")?;
      println!("Connected to {}", client.base_url());
    }
    Command::Peek { key } => {
      let issue = build_client(&config)?.get_issue(&key).await?;
      let (summary, status) = issue
        .fields
        .as_ref()
        .map(|f| {
          (
            f.summary.as_str(),
            f.status.as_ref().map(|s| s.name.as_str()).unwrap_or("-"),
          )
        })
        .unwrap_or(("", "-"));
      println!("{} ({}) [{}] {}", issue.key, issue.id, status, summary);
    }
  }

  Ok(())
}

fn build_client(config: &Config) -> Result<JiraClient> {
  let url = config.jira_url()?;
  let token = Config::get_api_token()?;
  let mut client = JiraClient::new(ClientConfig::new(url, token))
    .wrap_err("Failed to create Jira client")?;
  client.set_batch_size(config.scrape.batch_size);
  Ok(client)
}

/// Cache for the configured instance; flat layout when no URL is known.
fn cache_for(config: &Config) -> DiskCache {
  match config.jira_url() {
    Ok(url) => DiskCache::with_host(&config.cache.dir, url),
    Err(_) => DiskCache::new(&config.cache.dir),
  }
}

fn open_cache(config: &Config) -> Result<DiskCache> {
  let cache = cache_for(config);
  cache
    .initialize()
    .wrap_err_with(|| format!("Failed to initialize cache at {}", cache.data_dir().display()))?;
  Ok(cache)
}

fn print_summary(project: &str, result: &ScrapeResult) {
  println!("Scrape of {} complete in {:.1?}", project, result.duration);
  println!("  Issues:      {}", result.issues_processed);
  println!("  API calls:   {}", result.api_calls);
  println!("  Cache hits:  {}", result.cache_hits);
  println!("  Errors:      {}", result.errors);
  for key in &result.failed_keys {
    println!("    failed: {}", key);
  }
}
