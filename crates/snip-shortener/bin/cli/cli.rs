use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use snip_deletion::config::{DEFAULT_CHUNK_SIZE, DEFAULT_QUEUE_DEPTH, DEFAULT_WORKERS};
use snip_deletion::DeletionConfig;
use snip_storage::StorageConfig;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const DATABASE_DSN_ENV: &str = "DATABASE_DSN";
pub const FILE_STORAGE_PATH_ENV: &str = "FILE_STORAGE_PATH";
pub const BASE_URL_ENV: &str = "BASE_URL";
pub const CONFIG_ENV: &str = "CONFIG";
pub const DELETE_WORKERS_ENV: &str = "SNIP_DELETE_WORKERS";
pub const DELETE_QUEUE_DEPTH_ENV: &str = "SNIP_DELETE_QUEUE_DEPTH";
pub const DELETE_CHUNK_SIZE_ENV: &str = "SNIP_DELETE_CHUNK_SIZE";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[value(name = "pretty")]
    Pretty,
    #[value(name = "json")]
    Json,
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "snip", about = "Operate a snip URL shortener store")]
pub struct CLI {
    /// PostgreSQL connection string; selects the relational backend.
    #[arg(short = 'd', long, env = DATABASE_DSN_ENV)]
    pub database_dsn: Option<String>,

    /// JSON-lines log path; selects the file backend when no DSN is given.
    #[arg(short = 'f', long, env = FILE_STORAGE_PATH_ENV)]
    pub file_storage_path: Option<PathBuf>,

    /// Public prefix of every short URL.
    #[arg(short = 'b', long, env = BASE_URL_ENV)]
    pub base_url: Option<String>,

    /// JSON config file filling in whatever flags and environment leave unset.
    #[arg(short = 'c', long = "config", env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    #[arg(long, env = DELETE_WORKERS_ENV, default_value_t = DEFAULT_WORKERS)]
    pub delete_workers: usize,

    #[arg(long, env = DELETE_QUEUE_DEPTH_ENV, default_value_t = DEFAULT_QUEUE_DEPTH)]
    pub delete_queue_depth: usize,

    #[arg(long, env = DELETE_CHUNK_SIZE_ENV, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub delete_chunk_size: usize,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Shorten one URL.
    Shorten {
        url: String,
        #[arg(short, long)]
        user: String,
        /// Ask for this short code instead of a generated one.
        #[arg(long)]
        code: Option<String>,
    },
    /// Shorten every item of a JSON array of `{correlation_id, original_url}`.
    Batch {
        file: PathBuf,
        #[arg(short, long)]
        user: String,
    },
    /// Print the original URL behind a short code.
    Resolve { code: String },
    /// List a user's live short URLs.
    List {
        #[arg(short, long)]
        user: String,
    },
    /// Soft-delete short codes owned by a user.
    Delete {
        #[arg(short, long)]
        user: String,
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// Print entry and user counts.
    Stats,
    /// Check that the backend is reachable.
    Ping,
    /// Rewrite the backend's storage compactly.
    Compact,
}

/// Keys accepted in the `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub database_dsn: Option<String>,
    pub file_storage_path: Option<PathBuf>,
    pub base_url: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// Everything the service needs, after merging flags, environment and file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub storage: StorageConfig,
    pub deletion: DeletionConfig,
    pub base_url: String,
}

impl CLI {
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(self.merge(file))
    }

    fn merge(&self, file: FileConfig) -> Settings {
        let storage = StorageConfig {
            database_dsn: self.database_dsn.clone().or(file.database_dsn),
            file_storage_path: self.file_storage_path.clone().or(file.file_storage_path),
        };
        let deletion = DeletionConfig::builder()
            .workers(self.delete_workers)
            .queue_depth(self.delete_queue_depth)
            .chunk_size(self.delete_chunk_size)
            .build();
        let base_url = self
            .base_url
            .clone()
            .or(file.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Settings {
            storage,
            deletion,
            base_url,
        }
    }
}
