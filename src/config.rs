//! Configuration loaded from `fragstore.toml`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable overriding the configured database path
pub const DATABASE_ENV: &str = "FRAGSTORE_DATABASE";

/// Which persistence model documents are stored with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Fragments,
    Graph,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Fragments => "fragments",
            Strategy::Graph => "graph",
        }
    }
}

impl FromStr for Strategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fragments" | "fragment" => Ok(Strategy::Fragments),
            "graph" => Ok(Strategy::Graph),
            other => Err(crate::Error::Config(format!("unknown strategy `{}`", other))),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning knobs shared by the stores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Statements per write flush
    pub batch_size: usize,
    /// Rows per cursor round-trip
    pub fetch_size: usize,
    /// Default document limit of `find`
    pub find_limit: usize,
    /// Page size of document listings
    pub list_limit: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            fetch_size: 10,
            find_limit: 100,
            list_limit: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragstoreConfig {
    /// SQLite file; in-memory when absent
    pub database: Option<PathBuf>,
    pub namespace: String,
    pub strategy: Strategy,
    pub batch_size: usize,
    pub fetch_size: usize,
    pub find_limit: usize,
    pub list_limit: usize,
}

impl Default for FragstoreConfig {
    fn default() -> Self {
        let options = StoreOptions::default();
        Self {
            database: None,
            namespace: "data".to_string(),
            strategy: Strategy::default(),
            batch_size: options.batch_size,
            fetch_size: options.fetch_size,
            find_limit: options.find_limit,
            list_limit: options.list_limit,
        }
    }
}

impl FragstoreConfig {
    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            batch_size: self.batch_size,
            fetch_size: self.fetch_size,
            find_limit: self.find_limit,
            list_limit: self.list_limit,
        }
    }

    /// Apply `FRAGSTORE_DATABASE` when set
    pub fn apply_env(&mut self) {
        self.apply_database_override(std::env::var_os(DATABASE_ENV).map(PathBuf::from));
    }

    fn apply_database_override(&mut self, database: Option<PathBuf>) {
        if let Some(database) = database.filter(|p| !p.as_os_str().is_empty()) {
            self.database = Some(database);
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("fetch_size", self.fetch_size),
            ("find_limit", self.find_limit),
            ("list_limit", self.list_limit),
        ] {
            if value == 0 {
                return Err(crate::Error::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.namespace.is_empty() || self.namespace.contains('/') {
            return Err(crate::Error::Config(format!("invalid namespace `{}`", self.namespace)));
        }
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("fragstore.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".fragstore").join("fragstore.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<FragstoreConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: FragstoreConfig = toml::from_str(&contents)?;
    config.validate()?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &FragstoreConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
