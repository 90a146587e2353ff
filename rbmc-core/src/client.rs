//! The public façade (component G): a single `Client` type that hides which
//! routing policy is in play behind one API, plus the [`ClientBuilder`] that
//! assembles it from server addresses without performing any I/O -- every
//! underlying connection stays lazy until the first operation touches it.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;

use crate::{
    compression::Compressor,
    connection::{Connection, Credentials},
    engine::Engine,
    error::Error,
    router::{ConsistentHashRouter, ReplicatingRouter},
    transport::{Endpoint, Stream},
    value::Value,
};

/// How a multi-server [`Client`] spreads keys across its servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterPolicy {
    /// Every server gets a full copy of every key.
    Replicating,
    /// Each key lives on exactly one server, chosen by consistent hashing.
    ConsistentHash,
}

enum Inner<S: Stream, C: Compressor> {
    Replicating(ReplicatingRouter<S, C>),
    ConsistentHash(ConsistentHashRouter<S, C>),
}

/// A memcached client speaking the binary protocol over one or more
/// servers. Generic over the transport (`S`, one per async runtime) and the
/// compressor (`C`, defaulting to [`crate::compression::NoCompressor`] or,
/// with the `zlib` feature, [`crate::compression::DeflateCompressor`]).
pub struct Client<S: Stream, C: Compressor> {
    inner: Inner<S, C>,
}

impl<S: Stream, C: Compressor> Client<S, C> {
    pub async fn get(&self, key: &[u8]) -> Result<Option<(Value, u64)>, Error> {
        match &self.inner {
            Inner::Replicating(r) => r.get(key).await,
            Inner::ConsistentHash(r) => r.get(key).await,
        }
    }

    pub async fn get_multi(&self, keys: &[Vec<u8>]) -> Result<HashMap<Vec<u8>, (Value, u64)>, Error> {
        match &self.inner {
            Inner::Replicating(r) => r.get_multi(keys).await,
            Inner::ConsistentHash(r) => r.get_multi(keys).await,
        }
    }

    /// Store unconditionally. `compress_level` overrides the client's
    /// configured compression level for this call alone; `None` uses the
    /// level the client was built with.
    pub async fn set(
        &self,
        key: &[u8],
        value: impl Into<Value>,
        expire: u32,
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        let value = value.into();
        match &self.inner {
            Inner::Replicating(r) => r.set(key, value, expire, compress_level).await,
            Inner::ConsistentHash(r) => r.set(key, value, expire, compress_level).await,
        }
    }

    pub async fn add(
        &self,
        key: &[u8],
        value: impl Into<Value>,
        expire: u32,
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        let value = value.into();
        match &self.inner {
            Inner::Replicating(r) => r.add(key, value, expire, compress_level).await,
            Inner::ConsistentHash(r) => r.add(key, value, expire, compress_level).await,
        }
    }

    pub async fn replace(
        &self,
        key: &[u8],
        value: impl Into<Value>,
        expire: u32,
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        let value = value.into();
        match &self.inner {
            Inner::Replicating(r) => r.replace(key, value, expire, compress_level).await,
            Inner::ConsistentHash(r) => r.replace(key, value, expire, compress_level).await,
        }
    }

    /// Store only if the stored value's CAS token still matches `cas`. Most
    /// meaningful against [`RouterPolicy::ConsistentHash`], where a key has
    /// exactly one owner; against [`RouterPolicy::Replicating`] the check is
    /// only against the first server that answers.
    pub async fn cas(
        &self,
        key: &[u8],
        value: impl Into<Value>,
        expire: u32,
        cas: u64,
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        let value = value.into();
        match &self.inner {
            Inner::Replicating(r) => r.cas(key, value, expire, cas, compress_level).await,
            Inner::ConsistentHash(r) => r.cas(key, value, expire, cas, compress_level).await,
        }
    }

    pub async fn delete(&self, key: &[u8]) -> Result<bool, Error> {
        match &self.inner {
            Inner::Replicating(r) => r.delete(key, 0).await,
            Inner::ConsistentHash(r) => r.delete(key, 0).await,
        }
    }

    pub async fn set_multi(
        &self,
        items: &[(Vec<u8>, Value, u32)],
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        match &self.inner {
            Inner::Replicating(r) => r.set_multi(items, compress_level).await,
            Inner::ConsistentHash(r) => r.set_multi(items, compress_level).await,
        }
    }

    pub async fn delete_multi(&self, keys: &[Vec<u8>]) -> Result<bool, Error> {
        match &self.inner {
            Inner::Replicating(r) => r.delete_multi(keys).await,
            Inner::ConsistentHash(r) => r.delete_multi(keys).await,
        }
    }

    pub async fn incr(&self, key: &[u8], delta: u64, initial: u64, expire: u32) -> Result<u64, Error> {
        match &self.inner {
            Inner::Replicating(r) => r.incr(key, delta, initial, expire).await,
            Inner::ConsistentHash(r) => r.incr(key, delta, initial, expire).await,
        }
    }

    pub async fn decr(&self, key: &[u8], delta: u64, initial: u64, expire: u32) -> Result<u64, Error> {
        match &self.inner {
            Inner::Replicating(r) => r.decr(key, delta, initial, expire).await,
            Inner::ConsistentHash(r) => r.decr(key, delta, initial, expire).await,
        }
    }

    /// Flush every server. `true` if any server confirmed the flush -- a
    /// disconnected server's flush is itself reported as `true` (see
    /// [`crate::engine::Engine::flush_all`]), so this is `false` only if a
    /// server that *is* reachable rejected it.
    pub async fn flush_all(&self, delay: u32) -> Result<bool, Error> {
        let results = join_all(self.all_engines().iter().map(|e| e.flush_all(delay))).await;
        let mut any = false;
        for result in results {
            if result? {
                any = true;
            }
        }
        Ok(any)
    }

    /// Each server's version string, keyed by its position in the
    /// configuration order.
    pub async fn version(&self) -> Result<Vec<Option<String>>, Error> {
        join_all(self.all_engines().iter().map(|e| e.version()))
            .await
            .into_iter()
            .collect()
    }

    /// Each server's stats map, keyed by its position in the configuration
    /// order.
    pub async fn stats(&self) -> Result<Vec<HashMap<String, String>>, Error> {
        join_all(self.all_engines().iter().map(|e| e.stat(None)))
            .await
            .into_iter()
            .collect()
    }

    pub async fn disconnect_all(&self) {
        join_all(self.all_engines().iter().map(|e| e.disconnect())).await;
    }

    fn all_engines(&self) -> &[std::sync::Arc<Engine<S, C>>] {
        match &self.inner {
            Inner::Replicating(r) => r.engines(),
            Inner::ConsistentHash(r) => r.engines(),
        }
    }
}

/// Assembles a [`Client`] from server addresses. No I/O happens until the
/// first operation runs; every connection is opened lazily.
pub struct ClientBuilder {
    servers: Vec<String>,
    credentials: Option<Credentials>,
    socket_timeout: Option<Duration>,
    policy: RouterPolicy,
}

impl ClientBuilder {
    pub fn new(servers: Vec<String>) -> Self {
        ClientBuilder {
            servers,
            credentials: None,
            socket_timeout: None,
            policy: RouterPolicy::Replicating,
        }
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    pub fn policy(mut self, policy: RouterPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build<S: Stream, C: Compressor>(self, compressor: C, compress_level: i32) -> Client<S, C> {
        let engines: Vec<Engine<S, C>> = self
            .servers
            .iter()
            .map(|server| {
                let connection = Connection::new(
                    Endpoint::parse(server),
                    self.socket_timeout,
                    self.credentials.clone(),
                );
                Engine::new(connection, compressor.clone(), compress_level)
            })
            .collect();

        let inner = match self.policy {
            RouterPolicy::Replicating => Inner::Replicating(ReplicatingRouter::new(engines)),
            RouterPolicy::ConsistentHash => Inner::ConsistentHash(ConsistentHashRouter::new(&self.servers, engines)),
        };
        Client { inner }
    }
}
