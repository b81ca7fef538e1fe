use failure::Error;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const NTFY_URL_VAR: &str = "KAMERAFYR_SERVER_NTFY_URL";
pub const DB_VAR: &str = "KAMERAFYR_SERVER_DB";
pub const PORT_VAR: &str = "KAMERAFYR_SERVER_PORT";
pub const NTFY_TIMEOUT_VAR: &str = "KAMERAFYR_SERVER_NTFY_TIMEOUT_SECS";
pub const STORE_AFTER_EXPIRY_VAR: &str = "KAMERAFYR_SERVER_STORE_AFTER_EXPIRY";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub ntfy_url: Url,
    pub db_path: PathBuf,
    pub port: u16,
    pub ntfy_timeout: Duration,
    pub store_after_expiry: bool,
}

impl Config {
    pub fn from_env() -> Result<Config, Error> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ntfy_url = lookup(NTFY_URL_VAR)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format_err!("{} environment variable unset", NTFY_URL_VAR))?;
        let ntfy_url = Url::parse(&ntfy_url)
            .map_err(|e| format_err!("{} is not a valid URL: {}", NTFY_URL_VAR, e))?;

        let port: u16 = match lookup(PORT_VAR) {
            Some(s) => s
                .parse()
                .map_err(|_| format_err!("{} must be a port number, got {:?}", PORT_VAR, s))?,
            None => 8080,
        };
        let ntfy_timeout = match lookup(NTFY_TIMEOUT_VAR) {
            Some(s) => Duration::from_secs(s.parse().map_err(|_| {
                format_err!("{} must be a number of seconds, got {:?}", NTFY_TIMEOUT_VAR, s)
            })?),
            None => Duration::from_secs(10),
        };
        let store_after_expiry = lookup(STORE_AFTER_EXPIRY_VAR)
            .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Config {
            ntfy_url,
            db_path: lookup(DB_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("kamerafyr-server.db")),
            port,
            ntfy_timeout,
            store_after_expiry,
        })
    }
}
