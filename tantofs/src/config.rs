use crate::cadapter::pool::DEFAULT_MAX_IDLE;
use crate::cadapter::resp::{DEFAULT_HOST, DEFAULT_PORT};
use crate::cadapter::{ConnectionPool, TcpConnector};
use std::fmt;

/// Where the key-value backend lives and how many idle connections to keep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub max_idle: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_idle: DEFAULT_MAX_IDLE,
        }
    }
}

impl BackendConfig {
    pub fn connector(&self) -> TcpConnector {
        TcpConnector::new(Some(self.host.clone()), Some(self.port))
    }

    pub fn pool(&self) -> ConnectionPool<TcpConnector> {
        ConnectionPool::with_max_idle(self.connector(), self.max_idle)
    }
}

impl fmt::Display for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
