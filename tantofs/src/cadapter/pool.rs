//! Connection checkout for filesystem callbacks.
//!
//! A callback takes one connection for its whole duration and gives it back
//! when the guard drops, so no two callbacks ever interleave commands on the
//! same socket. Connections are opened on demand; broken ones are dropped
//! instead of returned.

use super::{KvConnection, KvConnector, WireResult};
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

pub const DEFAULT_MAX_IDLE: usize = 16;

pub struct ConnectionPool<C: KvConnector> {
    connector: C,
    idle: Mutex<Vec<C::Connection>>,
    max_idle: usize,
}

impl<C: KvConnector> ConnectionPool<C> {
    pub fn new(connector: C) -> Self {
        Self::with_max_idle(connector, DEFAULT_MAX_IDLE)
    }

    pub fn with_max_idle(connector: C, max_idle: usize) -> Self {
        Self {
            connector,
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Idle connections currently parked in the pool.
    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    /// Take an idle connection or open a new one.
    pub async fn get(&self) -> WireResult<PooledConnection<'_, C>> {
        let reused = self.lock_idle().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                let conn = self.connector.connect().await?;
                debug!("opened backend connection");
                conn
            }
        };
        Ok(PooledConnection {
            pool: self,
            conn: Some(conn),
        })
    }

    fn put_back(&self, conn: C::Connection) {
        if conn.is_broken() {
            warn!("dropping backend connection after a failed command");
            return;
        }
        let mut idle = self.lock_idle();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<C::Connection>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exclusive use of one connection; returned to the pool on drop.
pub struct PooledConnection<'a, C: KvConnector> {
    pool: &'a ConnectionPool<C>,
    conn: Option<C::Connection>,
}

impl<C: KvConnector> Deref for PooledConnection<'_, C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<C: KvConnector> DerefMut for PooledConnection<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<C: KvConnector> Drop for PooledConnection<'_, C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn);
        }
    }
}
