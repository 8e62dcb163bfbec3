use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "muniverse", about = "Maintenance tool for a muniverse community store")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Storage backend, overriding the config file
    #[arg(long, global = true, value_enum)]
    pub backend: Option<Backend>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List all users
    Users,
    /// List conference submissions awaiting review
    Pending,
    /// Publish a pending conference
    Approve { id: u64 },
    /// Reject a pending conference and delete its banner
    Reject { id: u64 },
    /// Show the admin inbox
    Notifications,
    /// Grant the admin role to a user
    Promote { username: String },
    /// Report consistency problems across collections
    Check,
    /// Fix follow symmetry and counters
    Repair,
}

#[derive(Deserialize, ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// One JSON file per collection
    #[default]
    Json,
    /// One SQLite database holding every collection
    Sqlite,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub assets: AssetsConfig,
    pub auth: AuthConfig,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AssetsConfig {
    pub path: Option<PathBuf>,
    pub max_upload_mb: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub bcrypt_cost: u32,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_upload_mb: 25,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config: Config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(backend) = cli.backend {
            config.storage.backend = backend;
        }

        config.data_dir = data_dir;
        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".muniverse")
        })
    }

    /// Collection directory for `json`, database file for `sqlite`.
    pub fn storage_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| match self.storage.backend {
                Backend::Json => self.data_dir.join("data"),
                Backend::Sqlite => self.data_dir.join("muniverse.db"),
            })
    }

    pub fn assets_path(&self) -> PathBuf {
        self.assets
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("static"))
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.assets.max_upload_mb.saturating_mul(1024 * 1024)
    }
}
