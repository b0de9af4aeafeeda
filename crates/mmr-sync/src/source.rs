//! Sync source addressing and selection.

use async_trait::async_trait;
use mmr_db::OpTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Network address of a node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostAndPort {
    host: String,
    port: u16,
}

impl HostAndPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        HostAndPort {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid host and port '{0}'")]
pub struct ParseHostError(String);

impl FromStr for HostAndPort {
    type Err = ParseHostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| ParseHostError(s.to_string()))?;
        let port = port.parse().map_err(|_| ParseHostError(s.to_string()))?;
        if host.is_empty() {
            return Err(ParseHostError(s.to_string()));
        }
        Ok(HostAndPort::new(host, port))
    }
}

impl TryFrom<String> for HostAndPort {
    type Error = ParseHostError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<HostAndPort> for String {
    fn from(hp: HostAndPort) -> Self {
        hp.to_string()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no sync source available")]
    NoSource,

    #[error("sync source resolution cancelled")]
    Cancelled,
}

/// Chooses the node to replicate from.
#[async_trait]
pub trait SyncSourceResolver: Send + Sync {
    async fn resolve(
        &self,
        last_fetched: Option<OpTime>,
        cancel: &CancellationToken,
    ) -> Result<HostAndPort, ResolveError>;
}

/// Always the same source.
#[derive(Clone, Debug)]
pub struct StaticSource {
    source: HostAndPort,
}

impl StaticSource {
    pub fn new(source: HostAndPort) -> Self {
        StaticSource { source }
    }
}

#[async_trait]
impl SyncSourceResolver for StaticSource {
    async fn resolve(
        &self,
        _last_fetched: Option<OpTime>,
        cancel: &CancellationToken,
    ) -> Result<HostAndPort, ResolveError> {
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        Ok(self.source.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_and_port() {
        let hp: HostAndPort = "localhost:27017".parse().unwrap();
        assert_eq!(hp.host(), "localhost");
        assert_eq!(hp.port(), 27017);
        assert_eq!(hp.to_string(), "localhost:27017");

        assert!("localhost".parse::<HostAndPort>().is_err());
        assert!(":27017".parse::<HostAndPort>().is_err());
        assert!("localhost:port".parse::<HostAndPort>().is_err());
    }

    #[tokio::test]
    async fn test_static_source_honours_cancel() {
        let source = StaticSource::new(HostAndPort::new("a", 1));
        let cancel = CancellationToken::new();
        assert_eq!(
            source.resolve(None, &cancel).await.unwrap(),
            HostAndPort::new("a", 1)
        );
        cancel.cancel();
        assert_eq!(
            source.resolve(None, &cancel).await,
            Err(ResolveError::Cancelled)
        );
    }
}
