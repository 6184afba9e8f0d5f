use std::net::SocketAddr;

use crmsync_common::env::{self, var_or};
use crmsync_common::{Error, Result};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Listener address and inbound shared secret.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Raw `SYNC_SECRET`; unset accepts every caller.
    pub secret: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env::process_env)
    }

    /// # Errors
    /// - `Error::Config` if `SYNC_BIND_ADDR` is not a socket address
    pub fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let raw = var_or(&lookup, "SYNC_BIND_ADDR", DEFAULT_BIND_ADDR);
        let bind_addr = raw
            .parse()
            .map_err(|_| Error::Config(format!("Invalid SYNC_BIND_ADDR: {}", raw)))?;
        Ok(Self {
            bind_addr,
            secret: lookup("SYNC_SECRET").filter(|s| !s.trim().is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.secret.is_none());
    }

    #[test]
    fn test_invalid_bind_addr() {
        let result = ServerConfig::from_lookup(|k| {
            (k == "SYNC_BIND_ADDR").then(|| "localhost".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
