use std::path::PathBuf;

use clap::Parser;
use ritual_cache::CACHE_FILE_NAME;
use ritual_refresh::{parse_port, resolve_refresh_cadence, RefreshCadence, RefreshError};

pub const CARDS_REFRESH_ENV: &str = "RITUAL_CACHE_SERVER_CARDS_REFRESH";
pub const PRICES_REFRESH_ENV: &str = "RITUAL_CACHE_SERVER_PRICES_REFRESH";

/// Start a local cache server for card and pricing data.
#[derive(Parser, Debug, Clone)]
#[command(name = "cache-server", version)]
pub struct Config {
    /// Port for the cache server
    #[arg(short, long, default_value = "4000", value_parser = port_arg)]
    pub port: u16,

    /// Host interface for the cache server
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Run full cards cache refresh on an interval (daily, weekly, monthly)
    /// [env: RITUAL_CACHE_SERVER_CARDS_REFRESH]
    #[arg(long, value_parser = cadence_arg)]
    pub cards_refresh: Option<RefreshCadence>,

    /// Run prices cache refresh on an interval (daily, weekly, monthly)
    /// [env: RITUAL_CACHE_SERVER_PRICES_REFRESH]
    #[arg(long, value_parser = cadence_arg)]
    pub prices_refresh: Option<RefreshCadence>,

    /// Log every cache-server request
    #[arg(short, long)]
    pub verbose: bool,

    /// Directory holding the cache file
    #[arg(long, env = "RITUAL_CACHE_DIR", default_value = "./cache")]
    pub cache_dir: PathBuf,
}

impl Config {
    /// Parse the process arguments after loading any `.env` file.
    pub fn from_env() -> Result<Self, RefreshError> {
        dotenvy::dotenv().ok();
        Self::parse().with_env_cadences(|name| std::env::var(name).ok())
    }

    /// Fill unset cadences from the environment; blank values leave them unset.
    pub fn with_env_cadences(
        mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, RefreshError> {
        self.cards_refresh =
            resolve_refresh_cadence(self.cards_refresh, var(CARDS_REFRESH_ENV).as_deref())?;
        self.prices_refresh =
            resolve_refresh_cadence(self.prices_refresh, var(PRICES_REFRESH_ENV).as_deref())?;
        Ok(self)
    }

    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE_NAME)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn port_arg(value: &str) -> Result<u16, String> {
    parse_port(value).map_err(|e| e.to_string())
}

fn cadence_arg(value: &str) -> Result<RefreshCadence, String> {
    RefreshCadence::parse(value).map_err(|e| e.to_string())
}
