//! Multi-server routing policies (component F), built on top of a fixed set
//! of [`Engine`]s.
//!
//! Two policies are provided, matching the two ways a pool of memcached
//! servers is commonly used:
//!
//! - [`ReplicatingRouter`] writes to every server and reads from the first
//!   one that has the key -- full redundancy, no single point of failure
//!   for any one key, at the cost of `N`x storage.
//! - [`ConsistentHashRouter`] assigns each key to exactly one server via
//!   [`HashRing`], so adding or losing a server only reshuffles the keys
//!   near its ring boundary.
//!
//! Neither policy re-routes around a failed server at request time: a
//! disconnected engine in the replicating set is simply absent from that
//! operation's outcome, and a disconnected engine in the hash ring produces
//! the hash ring's neutral "missing" result for the keys it owns, exactly
//! as a lone [`Engine`] would.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;

use crate::{compression::Compressor, engine::Engine, error::Error, ring::HashRing, transport::Stream, value::Value};

/// Write-to-all, read-first-hit. `set`/`add`/`replace`/`delete` succeed if
/// *any* engine accepts them; `set_multi`/`delete_multi` succeed only if
/// *every* engine accepts the whole batch, since a partial replica set
/// would otherwise silently diverge.
pub struct ReplicatingRouter<S: Stream, C: Compressor> {
    engines: Vec<Arc<Engine<S, C>>>,
}

impl<S: Stream, C: Compressor> ReplicatingRouter<S, C> {
    pub fn new(engines: Vec<Engine<S, C>>) -> Self {
        ReplicatingRouter {
            engines: engines.into_iter().map(Arc::new).collect(),
        }
    }

    pub async fn get(&self, key: &[u8]) -> Result<Option<(Value, u64)>, Error> {
        for engine in &self.engines {
            if let Some(found) = engine.get(key).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    pub async fn get_multi(&self, keys: &[Vec<u8>]) -> Result<HashMap<Vec<u8>, (Value, u64)>, Error> {
        let mut merged = HashMap::new();
        for engine in &self.engines {
            let found = engine.get_multi(keys).await?;
            for (key, value) in found {
                merged.entry(key).or_insert(value);
            }
        }
        Ok(merged)
    }

    pub async fn set(&self, key: &[u8], value: Value, expire: u32, compress_level: Option<i32>) -> Result<bool, Error> {
        let results = join_all(self.engines.iter().map(|e| e.set(key, value.clone(), expire, compress_level))).await;
        any_ok(results)
    }

    pub async fn add(&self, key: &[u8], value: Value, expire: u32, compress_level: Option<i32>) -> Result<bool, Error> {
        let results = join_all(self.engines.iter().map(|e| e.add(key, value.clone(), expire, compress_level))).await;
        any_ok(results)
    }

    pub async fn replace(
        &self,
        key: &[u8],
        value: Value,
        expire: u32,
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        let results = join_all(
            self.engines
                .iter()
                .map(|e| e.replace(key, value.clone(), expire, compress_level)),
        )
        .await;
        any_ok(results)
    }

    pub async fn delete(&self, key: &[u8], cas: u64) -> Result<bool, Error> {
        let results = join_all(self.engines.iter().map(|e| e.delete(key, cas))).await;
        any_ok(results)
    }

    /// CAS against a replicated key only checks the first engine's token;
    /// with `N` independent copies there is no single authoritative CAS
    /// value to compare against.
    pub async fn cas(
        &self,
        key: &[u8],
        value: Value,
        expire: u32,
        cas: u64,
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        self.first_engine().cas(key, value, expire, cas, compress_level).await
    }

    pub async fn set_multi(
        &self,
        items: &[(Vec<u8>, Value, u32)],
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        let results = join_all(self.engines.iter().map(|e| e.set_multi(items, compress_level))).await;
        all_ok(results)
    }

    pub async fn delete_multi(&self, keys: &[Vec<u8>]) -> Result<bool, Error> {
        let results = join_all(self.engines.iter().map(|e| e.delete_multi(keys))).await;
        all_ok(results)
    }

    /// `incr`/`decr` target the first engine only: replicating a counter's
    /// increment across every server would double-count it.
    pub async fn incr(&self, key: &[u8], delta: u64, initial: u64, expire: u32) -> Result<u64, Error> {
        self.first_engine().incr(key, delta, initial, expire).await
    }

    pub async fn decr(&self, key: &[u8], delta: u64, initial: u64, expire: u32) -> Result<u64, Error> {
        self.first_engine().decr(key, delta, initial, expire).await
    }

    fn first_engine(&self) -> &Engine<S, C> {
        self.engines[0].as_ref()
    }

    pub(crate) fn engines(&self) -> &[Arc<Engine<S, C>>] {
        &self.engines
    }
}

/// Single-owner-per-key. Every operation maps its key through a
/// [`HashRing`] and talks to exactly that one engine.
pub struct ConsistentHashRouter<S: Stream, C: Compressor> {
    ring: HashRing,
    engines: Vec<Arc<Engine<S, C>>>,
}

impl<S: Stream, C: Compressor> ConsistentHashRouter<S, C> {
    pub fn new(labels: &[String], engines: Vec<Engine<S, C>>) -> Self {
        ConsistentHashRouter {
            ring: HashRing::new(labels),
            engines: engines.into_iter().map(Arc::new).collect(),
        }
    }

    fn engine_for(&self, key: &[u8]) -> &Engine<S, C> {
        self.engines[self.ring.index_for(key)].as_ref()
    }

    pub async fn get(&self, key: &[u8]) -> Result<Option<(Value, u64)>, Error> {
        self.engine_for(key).get(key).await
    }

    pub async fn set(&self, key: &[u8], value: Value, expire: u32, compress_level: Option<i32>) -> Result<bool, Error> {
        self.engine_for(key).set(key, value, expire, compress_level).await
    }

    pub async fn add(&self, key: &[u8], value: Value, expire: u32, compress_level: Option<i32>) -> Result<bool, Error> {
        self.engine_for(key).add(key, value, expire, compress_level).await
    }

    pub async fn replace(
        &self,
        key: &[u8],
        value: Value,
        expire: u32,
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        self.engine_for(key).replace(key, value, expire, compress_level).await
    }

    pub async fn delete(&self, key: &[u8], cas: u64) -> Result<bool, Error> {
        self.engine_for(key).delete(key, cas).await
    }

    pub async fn cas(
        &self,
        key: &[u8],
        value: Value,
        expire: u32,
        cas: u64,
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        self.engine_for(key).cas(key, value, expire, cas, compress_level).await
    }

    pub async fn incr(&self, key: &[u8], delta: u64, initial: u64, expire: u32) -> Result<u64, Error> {
        self.engine_for(key).incr(key, delta, initial, expire).await
    }

    pub async fn decr(&self, key: &[u8], delta: u64, initial: u64, expire: u32) -> Result<u64, Error> {
        self.engine_for(key).decr(key, delta, initial, expire).await
    }

    /// Group keys by owning engine and fan out one pipelined `get_multi`
    /// per engine that owns at least one of them.
    pub async fn get_multi(&self, keys: &[Vec<u8>]) -> Result<HashMap<Vec<u8>, (Value, u64)>, Error> {
        let groups = self.group_by_engine(keys);
        let futures = groups
            .into_iter()
            .map(|(index, group)| async move { self.engines[index].get_multi(&group).await });
        let results = join_all(futures).await;
        let mut merged = HashMap::new();
        for result in results {
            merged.extend(result?);
        }
        Ok(merged)
    }

    pub async fn set_multi(
        &self,
        items: &[(Vec<u8>, Value, u32)],
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        let mut by_engine: Vec<Vec<(Vec<u8>, Value, u32)>> = vec![vec![]; self.engines.len()];
        for (key, value, expire) in items {
            let index = self.ring.index_for(key);
            by_engine[index].push((key.clone(), value.clone(), *expire));
        }
        let futures = by_engine
            .into_iter()
            .enumerate()
            .filter(|(_, group)| !group.is_empty())
            .map(|(index, group)| async move { self.engines[index].set_multi(&group, compress_level).await });
        all_ok(join_all(futures).await)
    }

    pub async fn delete_multi(&self, keys: &[Vec<u8>]) -> Result<bool, Error> {
        let groups = self.group_by_engine(keys);
        let futures = groups
            .into_iter()
            .map(|(index, group)| async move { self.engines[index].delete_multi(&group).await });
        all_ok(join_all(futures).await)
    }

    pub(crate) fn engines(&self) -> &[Arc<Engine<S, C>>] {
        &self.engines
    }

    fn group_by_engine(&self, keys: &[Vec<u8>]) -> Vec<(usize, Vec<Vec<u8>>)> {
        let mut by_engine: Vec<Vec<Vec<u8>>> = vec![vec![]; self.engines.len()];
        for key in keys {
            by_engine[self.ring.index_for(key)].push(key.clone());
        }
        by_engine
            .into_iter()
            .enumerate()
            .filter(|(_, group)| !group.is_empty())
            .collect()
    }
}

fn any_ok(results: Vec<Result<bool, Error>>) -> Result<bool, Error> {
    let mut any = false;
    for result in results {
        if result? {
            any = true;
        }
    }
    Ok(any)
}

fn all_ok(results: Vec<Result<bool, Error>>) -> Result<bool, Error> {
    let mut all = true;
    for result in results {
        if !result? {
            all = false;
        }
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::NoCompressor;
    use crate::connection::Connection;
    use crate::transport::Endpoint;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct DeadStream;

    #[async_trait]
    impl Stream for DeadStream {
        async fn connect(_endpoint: &Endpoint, _timeout: Option<Duration>) -> Result<Self, Error> {
            Err(Error::IoError(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )))
        }
        async fn send_all(&mut self, _bytes: &[u8]) -> Result<(), Error> {
            Ok(())
        }
        async fn read_exact(&mut self, _n: usize) -> Result<Vec<u8>, Error> {
            Ok(vec![])
        }
        async fn close(&mut self) {}
    }

    fn dead_engine(label: &str) -> Engine<DeadStream, NoCompressor> {
        let conn = Connection::new(Endpoint::parse(label), None, None);
        Engine::new(conn, NoCompressor, -1)
    }

    #[test]
    fn test_replicating_get_with_all_servers_down_is_none_not_error() {
        tokio_test::block_on(async {
            let router = ReplicatingRouter::new(vec![dead_engine("a:1"), dead_engine("b:1")]);
            assert!(router.get(b"key").await.unwrap().is_none());
        });
    }

    #[test]
    fn test_consistent_hash_routes_deterministically() {
        tokio_test::block_on(async {
            let labels = vec!["a:1".to_string(), "b:1".to_string()];
            let router = ConsistentHashRouter::new(&labels, vec![dead_engine("a:1"), dead_engine("b:1")]);
            // A down owning engine still reports the neutral miss, not an error.
            assert!(router.get(b"key").await.unwrap().is_none());
        });
    }
}
