use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{anyhow, Context};

use crate::notify::NotifierSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_addr: SocketAddr,
    pub push_gateway_url: Option<String>,
    pub push_timeout: Duration,
    pub push_workers: usize,
    pub push_queue_capacity: usize,
    pub outbound_buffer: usize,
    pub cors_allow_any: bool,
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|err| anyhow!("{key}={raw:?}: {err}")),
        None => Ok(default),
    }
}

impl Config {
    /// Reads `.env` (if present) and the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let config = Config {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://matchchat.db?mode=rwc".to_owned()),
            database_max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", 16)?,
            bind_addr: parse(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            push_gateway_url: lookup("PUSH_GATEWAY_URL").filter(|url| !url.trim().is_empty()),
            push_timeout: Duration::from_secs(parse(&lookup, "PUSH_TIMEOUT_SECS", 5)?),
            push_workers: parse(&lookup, "PUSH_WORKERS", 8)?,
            push_queue_capacity: parse(&lookup, "PUSH_QUEUE_CAPACITY", 1024)?,
            outbound_buffer: parse(&lookup, "OUTBOUND_BUFFER", 64)?,
            cors_allow_any: parse(&lookup, "CORS_ALLOW_ANY", false)?,
        };

        let counts = [
            ("DATABASE_MAX_CONNECTIONS", config.database_max_connections as usize),
            ("PUSH_WORKERS", config.push_workers),
            ("PUSH_QUEUE_CAPACITY", config.push_queue_capacity),
            ("OUTBOUND_BUFFER", config.outbound_buffer),
        ];
        if let Some((key, _)) = counts.iter().find(|(_, count)| *count == 0) {
            return Err(anyhow!("{key} must be positive"));
        }
        if config.push_timeout.is_zero() {
            return Err(anyhow!("PUSH_TIMEOUT_SECS must be positive"));
        }
        if let Some(url) = &config.push_gateway_url {
            reqwest::Url::parse(url).with_context(|| format!("PUSH_GATEWAY_URL={url:?}"))?;
        }

        Ok(config)
    }

    pub fn notifier(&self) -> NotifierSettings {
        NotifierSettings {
            workers: self.push_workers,
            queue_capacity: self.push_queue_capacity,
            timeout: self.push_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.push_timeout, Duration::from_secs(5));
        assert!(config.push_gateway_url.is_none());
        assert!(!config.cors_allow_any);
        assert_eq!(config.notifier().workers, 8);
    }

    #[test]
    fn overrides_and_rejections() {
        let config = load(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("PUSH_GATEWAY_URL", "https://push.example"),
            ("PUSH_WORKERS", "2"),
            ("CORS_ALLOW_ANY", "true"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.push_workers, 2);
        assert!(config.cors_allow_any);

        let err = load(&[("PUSH_WORKERS", "many")]).unwrap_err();
        assert!(err.to_string().contains("PUSH_WORKERS"));
        assert!(load(&[("OUTBOUND_BUFFER", "0")]).is_err());

        let err = load(&[("DATABASE_MAX_CONNECTIONS", "0")]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_MAX_CONNECTIONS"));
        assert!(load(&[("PUSH_GATEWAY_URL", "not a url")]).is_err());
    }
}
