use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use civicfix_gateway::dispatcher::DEFAULT_OUTBOUND_BUFFER;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub ws_buffer: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = var("CIVICFIX_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("CIVICFIX_JWT_SECRET is unset or still a placeholder");
        }

        let port = match var("CIVICFIX_PORT") {
            Some(v) => v.parse().with_context(|| format!("CIVICFIX_PORT={}", v))?,
            None => 5000,
        };
        let ws_buffer = match var("CIVICFIX_WS_BUFFER") {
            Some(v) => v.parse().with_context(|| format!("CIVICFIX_WS_BUFFER={}", v))?,
            None => DEFAULT_OUTBOUND_BUFFER,
        };
        if ws_buffer == 0 {
            bail!("CIVICFIX_WS_BUFFER must be at least 1");
        }

        Ok(Self {
            jwt_secret,
            db_path: var("CIVICFIX_DB_PATH").unwrap_or_else(|| "civicfix.db".into()).into(),
            host: var("CIVICFIX_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            ws_buffer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("CIVICFIX_JWT_SECRET", "hunter22")]).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.db_path, PathBuf::from("civicfix.db"));
        assert_eq!(config.ws_buffer, DEFAULT_OUTBOUND_BUFFER);
    }

    #[test]
    fn placeholder_secret_is_rejected() {
        assert!(load(&[]).is_err());
        assert!(load(&[("CIVICFIX_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(load(&[("CIVICFIX_JWT_SECRET", "hunter22"), ("CIVICFIX_PORT", "http")]).is_err());
        assert!(load(&[("CIVICFIX_JWT_SECRET", "hunter22"), ("CIVICFIX_WS_BUFFER", "0")]).is_err());
    }
}
