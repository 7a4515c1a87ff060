use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::jira::client::DEFAULT_BATCH_SIZE;
use crate::scraper::{ScrapeConfig, DEFAULT_WORKERS};

const CONFIG_FILE_NAME: &str = "jira-scraper.yaml";
const APP_DIR: &str = "jira-scraper";
const DEFAULT_CACHE_DIR: &str = ".data";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub jira: JiraConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub scrape: ScrapeSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JiraConfig {
  /// Base URL of the Jira instance, e.g. https://issues.example.com
  #[serde(default)]
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Base directory; issues land in `<dir>/jira/<hostname>/`
  #[serde(default = "default_cache_dir")]
  pub dir: PathBuf,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      dir: default_cache_dir(),
    }
  }
}

fn default_cache_dir() -> PathBuf {
  PathBuf::from(DEFAULT_CACHE_DIR)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeSettings {
  /// Reserved; fetching is sequential
  #[serde(default = "default_workers")]
  pub workers: usize,
  /// Search page size, 1-100
  #[serde(default = "default_batch_size")]
  pub batch_size: u32,
  #[serde(default)]
  pub full_sync: bool,
  /// Maximum issues per run, 0 for no limit
  #[serde(default)]
  pub limit: usize,
}

impl Default for ScrapeSettings {
  fn default() -> Self {
    Self {
      workers: default_workers(),
      batch_size: default_batch_size(),
      full_sync: false,
      limit: 0,
    }
  }
}

fn default_workers() -> usize {
  DEFAULT_WORKERS
}

fn default_batch_size() -> u32 {
  DEFAULT_BATCH_SIZE
}

impl ScrapeSettings {
  pub fn to_scrape_config(&self) -> ScrapeConfig {
    ScrapeConfig {
      workers: self.workers,
      full_sync: self.full_sync,
      limit: (self.limit > 0).then_some(self.limit),
      ..ScrapeConfig::default()
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./jira-scraper.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/jira-scraper/config.yaml
  ///
  /// Without any file the defaults are used, and the Jira URL has to come
  /// from the command line.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_DIR).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// The configured Jira URL, or an error telling the user how to set one.
  pub fn jira_url(&self) -> Result<&str> {
    let url = self.jira.url.trim();
    if url.is_empty() {
      return Err(eyre!(
        "No Jira URL configured. Set jira.url in {} or pass --url.",
        CONFIG_FILE_NAME
      ));
    }
    Ok(url)
  }

  /// Get the Jira API token from environment variables.
  ///
  /// Checks JIRA_SCRAPER_TOKEN first, then JIRA_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("JIRA_SCRAPER_TOKEN")
      .or_else(|_| std::env::var("JIRA_API_TOKEN"))
      .map_err(|_| {
        eyre!(
          "Jira API token not found. Set JIRA_SCRAPER_TOKEN or JIRA_API_TOKEN environment variable."
        )
      })
  }
}
