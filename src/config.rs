//! Process-level configuration, read straight from the environment the way
//! the teacher's CLI binary reads `DATABASE_URL`/`NUM_CONNECTIONS` in
//! `main.rs` — no config file format is introduced.

use errors::*;

use std::env;
use std::time::Duration;

const DEFAULT_POOL_SIZE: u32 = 10;
const DEFAULT_POOL_TIMEOUT_SECS: u64 = 10;

pub struct Config {
    pub database_url: String,

    /// Maps to spec's `database.nameSuffix`: appended to the schema root
    /// name, with hyphens substituted for underscores.
    pub name_suffix: String,

    pub pool_size: u32,
    pub pool_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        let database_url = env::var("DATABASE_URL").chain_err(|| "DATABASE_URL must be set")?;

        let name_suffix = env::var("CJCS_NAME_SUFFIX")
            .unwrap_or_else(|_| "dev".to_owned())
            .replace('-', "_");

        let pool_size = env::var("CJCS_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        let pool_timeout_secs = env::var("CJCS_POOL_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POOL_TIMEOUT_SECS);

        Ok(Config {
            database_url,
            name_suffix,
            pool_size,
            pool_timeout: Duration::from_secs(pool_timeout_secs),
        })
    }
}
