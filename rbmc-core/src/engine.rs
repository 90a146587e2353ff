//! The protocol engine (component E): per-op methods against one server,
//! including the pipelined multi-key operations, layered on top of a
//! [`Connection`] and the value/compression codecs.
//!
//! Every method here treats a disconnected server as a first-class, quiet
//! outcome rather than an error: a `get` against a server that is within its
//! retry-deferral window returns `Ok(None)`, exactly as if the key were
//! simply missing. The same holds if the server vanishes mid-exchange --
//! a short read or a framing violation on an otherwise-ready connection is
//! just as much "the server is gone" as a failed reconnect, so `exchange`
//! and the pipelined drains swallow those into each operation's neutral
//! result too (see [`is_disconnect`]). Only bad auth and statuses the
//! caller must react to come back as `Err`.

use std::collections::HashMap;

use futures::lock::Mutex;
use tracing::trace;

use crate::{
    compression::{maybe_compress, maybe_decompress, Compressor},
    connection::Connection,
    error::Error,
    protocol::{IncrDecrExtras, Packet, SetExtras, Status, GETK_OPCODE, NOOP_OPCODE},
    transport::Stream,
    value::Value,
};

/// A write/read failure partway through an exchange looks the same to the
/// caller as the server never having answered at all: a short read (`Error::
/// IoError`) or a framing violation (`Error::Protocol`) on an otherwise-ready
/// connection is the peer vanishing mid-conversation, not a bug in this
/// client. Treat it the same as a failed reconnect and let the caller
/// produce its neutral per-operation result.
fn is_disconnect(err: &Error) -> bool {
    matches!(err, Error::IoError(_) | Error::Protocol(_))
}

/// How a stored value should be accepted: unconditionally, only if the key
/// is absent, or only if it is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreMode {
    Set,
    Add,
    Replace,
}

pub struct Engine<S: Stream, C: Compressor> {
    connection: Mutex<Connection<S>>,
    compressor: C,
    compress_level: i32,
}

impl<S: Stream, C: Compressor> Engine<S, C> {
    pub fn new(connection: Connection<S>, compressor: C, compress_level: i32) -> Self {
        Engine {
            connection: Mutex::new(connection),
            compressor,
            compress_level,
        }
    }

    /// Run one request/response exchange. `Ok(None)` means the connection is
    /// disconnected -- whether that was known before the attempt (deferred or
    /// just-failed-to-connect) or the peer vanished partway through this very
    /// exchange. Callers should produce whatever neutral result that
    /// operation reports for a missing server either way.
    async fn exchange(&self, packet: Packet) -> Result<Option<Packet>, Error> {
        let mut conn = self.connection.lock().await;
        if !conn.ensure_ready().await? {
            return Ok(None);
        }
        if let Err(err) = conn.write_packet(&packet).await {
            return if is_disconnect(&err) { Ok(None) } else { Err(err) };
        }
        match conn.read_packet().await {
            Ok(response) => Ok(Some(response)),
            Err(err) if is_disconnect(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Encode and optionally compress a value. `compress_level` overrides the
    /// engine's configured level for this one call when given; `-1`/`0..=9`
    /// follow the same convention as the engine-wide level.
    fn encode_value(&self, value: Value, compress_level: Option<i32>) -> Result<(u32, Vec<u8>), Error> {
        let (flags, bytes) = value.encode();
        maybe_compress(&self.compressor, flags, bytes, compress_level.unwrap_or(self.compress_level))
    }

    fn decode_value(&self, flags: u32, bytes: Vec<u8>) -> Result<Value, Error> {
        let (flags, bytes) = maybe_decompress(&self.compressor, flags, bytes)?;
        Value::decode(flags, bytes)
    }

    /// Fetch one key. Returns the stored value and its CAS token.
    pub async fn get(&self, key: &[u8]) -> Result<Option<(Value, u64)>, Error> {
        let response = match self.exchange(Packet::get(key)).await? {
            Some(r) => r,
            None => return Ok(None),
        };
        match response.status() {
            Status::Success => {
                let value = self.decode_value(response.get_flags(), response.value.clone())?;
                Ok(Some((value, response.header.cas)))
            }
            Status::KeyNotFound => Ok(None),
            other => Err(Error::Status(other)),
        }
    }

    /// Fetch many keys in one pipelined round trip: `N-1` quiet `GetKQ`s
    /// followed by one non-quiet `GetK` sentinel. Missing keys never
    /// generate a response at all, so absent entries are simply absent from
    /// the returned map.
    pub async fn get_multi(&self, keys: &[Vec<u8>]) -> Result<HashMap<Vec<u8>, (Value, u64)>, Error> {
        let mut results = HashMap::new();
        if keys.is_empty() {
            return Ok(results);
        }

        let mut conn = self.connection.lock().await;
        if !conn.ensure_ready().await? {
            return Ok(results);
        }

        let (sentinel, rest) = keys.split_last().expect("checked non-empty above");
        for key in rest {
            if let Err(err) = conn.write_packet(&Packet::getkq(key)).await {
                return if is_disconnect(&err) { Ok(results) } else { Err(err) };
            }
        }
        if let Err(err) = conn.write_packet(&Packet::getk(sentinel)).await {
            return if is_disconnect(&err) { Ok(results) } else { Err(err) };
        }

        loop {
            let response = match conn.read_packet().await {
                Ok(response) => response,
                Err(err) if is_disconnect(&err) => break,
                Err(err) => return Err(err),
            };
            let is_sentinel = response.header.opcode == GETK_OPCODE;
            if response.status() == Status::Success {
                let value = self.decode_value(response.get_flags(), response.value.clone())?;
                results.insert(response.key.clone(), (value, response.header.cas));
            }
            if is_sentinel {
                break;
            }
        }
        trace!(requested = keys.len(), found = results.len(), "get_multi complete");
        Ok(results)
    }

    async fn store(
        &self,
        mode: StoreMode,
        key: &[u8],
        value: Value,
        expire: u32,
        cas: u64,
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        let (flags, bytes) = self.encode_value(value, compress_level)?;
        let extras = SetExtras::new(flags, expire);
        let packet = match mode {
            StoreMode::Set => Packet::set(key, bytes, extras, cas),
            StoreMode::Add => Packet::add(key, bytes, extras),
            StoreMode::Replace => Packet::replace(key, bytes, extras, cas),
        };
        let response = match self.exchange(packet).await? {
            Some(r) => r,
            None => return Ok(false),
        };
        match response.status() {
            Status::Success => Ok(true),
            Status::KeyExists | Status::KeyNotFound | Status::ItemNotStored => Ok(false),
            other => Err(Error::Status(other)),
        }
    }

    /// Unconditional store. `compress_level` overrides the engine's
    /// configured level for this call alone; `None` falls back to it.
    pub async fn set(
        &self,
        key: &[u8],
        value: Value,
        expire: u32,
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        self.store(StoreMode::Set, key, value, expire, 0, compress_level).await
    }

    /// Store only if the key does not already exist.
    pub async fn add(
        &self,
        key: &[u8],
        value: Value,
        expire: u32,
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        self.store(StoreMode::Add, key, value, expire, 0, compress_level).await
    }

    /// Store only if the key already exists.
    pub async fn replace(
        &self,
        key: &[u8],
        value: Value,
        expire: u32,
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        self.store(StoreMode::Replace, key, value, expire, 0, compress_level).await
    }

    /// Store only if the key's current CAS token matches `cas`. A `cas` of
    /// zero is rejected outright: sending it on the wire would silently turn
    /// into an unconditional set, defeating the whole point of the call.
    pub async fn cas(
        &self,
        key: &[u8],
        value: Value,
        expire: u32,
        cas: u64,
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        if cas == 0 {
            return Err(Error::Status(Status::InvalidArguments));
        }
        self.store(StoreMode::Set, key, value, expire, cas, compress_level).await
    }

    /// Store many key/value pairs in one pipelined round trip: quiet `SetQ`s
    /// for every item followed by a `Noop` sentinel. Because quiet stores
    /// respond only on failure, this reports the aggregate (`true` only if
    /// every item in the batch was accepted).
    pub async fn set_multi(
        &self,
        items: &[(Vec<u8>, Value, u32)],
        compress_level: Option<i32>,
    ) -> Result<bool, Error> {
        if items.is_empty() {
            return Ok(true);
        }
        let compress_level = compress_level.unwrap_or(self.compress_level);
        let mut conn = self.connection.lock().await;
        if !conn.ensure_ready().await? {
            return Ok(false);
        }
        for (key, value, expire) in items {
            let (flags, bytes) = value.clone().encode();
            let (flags, bytes) = maybe_compress(&self.compressor, flags, bytes, compress_level)?;
            let extras = SetExtras::new(flags, *expire);
            if let Err(err) = conn.write_packet(&Packet::setq(key, bytes, extras, 0)).await {
                return if is_disconnect(&err) { Ok(false) } else { Err(err) };
            }
        }
        if let Err(err) = conn.write_packet(&Packet::noop()).await {
            return if is_disconnect(&err) { Ok(false) } else { Err(err) };
        }

        let mut all_ok = true;
        loop {
            let response = match conn.read_packet().await {
                Ok(response) => response,
                Err(err) if is_disconnect(&err) => {
                    all_ok = false;
                    break;
                }
                Err(err) => return Err(err),
            };
            if response.header.opcode == NOOP_OPCODE {
                break;
            }
            if response.status() != Status::Success {
                all_ok = false;
            }
        }
        Ok(all_ok)
    }

    /// Delete one key. `cas` of zero means "no CAS check".
    pub async fn delete(&self, key: &[u8], cas: u64) -> Result<bool, Error> {
        let response = match self.exchange(Packet::delete(key, cas)).await? {
            Some(r) => r,
            None => return Ok(false),
        };
        match response.status() {
            Status::Success => Ok(true),
            Status::KeyNotFound | Status::KeyExists => Ok(false),
            other => Err(Error::Status(other)),
        }
    }

    /// Delete many keys in one pipelined round trip, aggregated the same way
    /// as [`Engine::set_multi`].
    pub async fn delete_multi(&self, keys: &[Vec<u8>]) -> Result<bool, Error> {
        if keys.is_empty() {
            return Ok(true);
        }
        let mut conn = self.connection.lock().await;
        if !conn.ensure_ready().await? {
            return Ok(false);
        }
        for key in keys {
            if let Err(err) = conn.write_packet(&Packet::deleteq(key, 0)).await {
                return if is_disconnect(&err) { Ok(false) } else { Err(err) };
            }
        }
        if let Err(err) = conn.write_packet(&Packet::noop()).await {
            return if is_disconnect(&err) { Ok(false) } else { Err(err) };
        }

        let mut all_ok = true;
        loop {
            let response = match conn.read_packet().await {
                Ok(response) => response,
                Err(err) if is_disconnect(&err) => {
                    all_ok = false;
                    break;
                }
                Err(err) => return Err(err),
            };
            if response.header.opcode == NOOP_OPCODE {
                break;
            }
            if response.status() != Status::Success {
                all_ok = false;
            }
        }
        Ok(all_ok)
    }

    /// A disconnected server and an absent key are both reported as `0`: the
    /// public counter API has no `Option`, so there is no other slot to put
    /// "the server never answered" in.
    async fn counter(&self, packet: Packet) -> Result<u64, Error> {
        let response = match self.exchange(packet).await? {
            Some(r) => r,
            None => return Ok(0),
        };
        match response.status() {
            Status::Success => Ok(response.counter_value().unwrap_or(0)),
            Status::KeyNotFound => Ok(0),
            other => Err(Error::Status(other)),
        }
    }

    /// Increment a counter by `delta`, creating it with `initial` if absent
    /// (unless `expire` is `0xFFFFFFFF`, which means "fail instead of
    /// creating" per the wire protocol).
    pub async fn incr(&self, key: &[u8], delta: u64, initial: u64, expire: u32) -> Result<u64, Error> {
        self.counter(Packet::incr(key, IncrDecrExtras::new(delta, initial, expire)))
            .await
    }

    pub async fn decr(&self, key: &[u8], delta: u64, initial: u64, expire: u32) -> Result<u64, Error> {
        self.counter(Packet::decr(key, IncrDecrExtras::new(delta, initial, expire)))
            .await
    }

    /// Invalidate every key on the server, optionally after `delay` seconds.
    /// A flush that never reached a disconnected server still reports
    /// success: there is nothing left to retry, and a future write starts
    /// from a clean slate either way once the server comes back.
    pub async fn flush_all(&self, delay: u32) -> Result<bool, Error> {
        let response = match self.exchange(Packet::flush(delay)).await? {
            Some(r) => r,
            None => return Ok(true),
        };
        response.error_for_status().map(|()| true).map_err(Error::Status)
    }

    /// The server's version string.
    pub async fn version(&self) -> Result<Option<String>, Error> {
        let response = match self.exchange(Packet::version()).await? {
            Some(r) => r,
            None => return Ok(None),
        };
        response.error_for_status().map_err(Error::Status)?;
        Ok(Some(String::from_utf8_lossy(&response.value).into_owned()))
    }

    /// Request server statistics. The wire protocol streams one response per
    /// stat, terminated by a response with an empty key.
    pub async fn stat(&self, group: Option<&[u8]>) -> Result<HashMap<String, String>, Error> {
        let mut conn = self.connection.lock().await;
        let mut stats = HashMap::new();
        if !conn.ensure_ready().await? {
            return Ok(stats);
        }
        if let Err(err) = conn.write_packet(&Packet::stat(group)).await {
            return if is_disconnect(&err) { Ok(stats) } else { Err(err) };
        }
        loop {
            let response = match conn.read_packet().await {
                Ok(response) => response,
                Err(err) if is_disconnect(&err) => break,
                Err(err) => return Err(err),
            };
            response.error_for_status().map_err(Error::Status)?;
            if response.key.is_empty() {
                break;
            }
            let key = String::from_utf8_lossy(&response.key).into_owned();
            let value = String::from_utf8_lossy(&response.value).into_owned();
            stats.insert(key, value);
        }
        Ok(stats)
    }

    /// Explicitly tear down the underlying connection.
    pub async fn disconnect(&self) {
        self.connection.lock().await.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::NoCompressor;
    use crate::protocol::GET_OPCODE;
    use crate::transport::Endpoint;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn status_code(status: Status) -> u16 {
        match status {
            Status::Success => 0x0000,
            Status::KeyNotFound => 0x0001,
            Status::KeyExists => 0x0002,
            other => panic!("status code not needed by these tests: {:?}", other),
        }
    }

    /// Build a fully-encoded response packet's wire bytes directly, without
    /// going through `Packet`'s request-only constructors.
    fn encode_response(opcode: u8, status: Status, key: &[u8], extras: &[u8], value: &[u8]) -> Vec<u8> {
        let body_len = (extras.len() + key.len() + value.len()) as u32;
        let mut header = [0_u8; 24];
        header[0] = 0x81;
        header[1] = opcode;
        header[2..4].copy_from_slice(&(key.len() as u16).to_be_bytes());
        header[4] = extras.len() as u8;
        header[6..8].copy_from_slice(&status_code(status).to_be_bytes());
        header[8..12].copy_from_slice(&body_len.to_be_bytes());
        let mut out = header.to_vec();
        out.extend_from_slice(extras);
        out.extend_from_slice(key);
        out.extend_from_slice(value);
        out
    }

    /// A stream whose response bytes are scripted in advance and handed back
    /// in order, regardless of what was written.
    #[derive(Default)]
    struct ScriptedStream {
        responses: StdMutex<VecDeque<u8>>,
    }

    impl ScriptedStream {
        fn with_responses(chunks: Vec<Vec<u8>>) -> Self {
            let mut bytes = VecDeque::new();
            for chunk in chunks {
                bytes.extend(chunk);
            }
            ScriptedStream {
                responses: StdMutex::new(bytes),
            }
        }
    }

    #[async_trait]
    impl Stream for ScriptedStream {
        async fn connect(_endpoint: &Endpoint, _timeout: Option<Duration>) -> Result<Self, Error> {
            Ok(ScriptedStream::default())
        }

        async fn send_all(&mut self, _bytes: &[u8]) -> Result<(), Error> {
            Ok(())
        }

        async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, Error> {
            let mut guard = self.responses.lock().unwrap();
            if guard.len() < n {
                return Err(Error::IoError(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "scripted stream exhausted",
                )));
            }
            Ok(guard.drain(..n).collect())
        }

        async fn close(&mut self) {}
    }

    fn engine_with(chunks: Vec<Vec<u8>>) -> Engine<ScriptedStream, NoCompressor> {
        let endpoint = Endpoint::parse("127.0.0.1:11211");
        let stream = ScriptedStream::with_responses(chunks);
        let conn = Connection::from_stream(endpoint, stream);
        Engine::new(conn, NoCompressor, -1)
    }

    #[test]
    fn test_get_hit_decodes_flags_and_cas() {
        tokio_test::block_on(async {
            let extras = 0_u32.to_be_bytes().to_vec();
            let response = encode_response(GET_OPCODE, Status::Success, b"", &extras, b"hi");
            let engine = engine_with(vec![response]);
            let (value, _cas) = engine.get(b"key").await.unwrap().unwrap();
            assert_eq!(value, Value::Bytes(b"hi".to_vec()));
        });
    }

    #[test]
    fn test_get_miss_returns_none() {
        tokio_test::block_on(async {
            let response = encode_response(GET_OPCODE, Status::KeyNotFound, b"", &[], &[]);
            let engine = engine_with(vec![response]);
            assert!(engine.get(b"key").await.unwrap().is_none());
        });
    }

    #[test]
    fn test_set_success() {
        tokio_test::block_on(async {
            let response = encode_response(crate::protocol::SET_OPCODE, Status::Success, b"", &[], &[]);
            let engine = engine_with(vec![response]);
            assert!(engine.set(b"key", Value::from(b"hi".to_vec()), 0, None).await.unwrap());
        });
    }

    #[test]
    fn test_add_conflict_returns_false_not_error() {
        tokio_test::block_on(async {
            let response = encode_response(crate::protocol::ADD_OPCODE, Status::KeyExists, b"", &[], &[]);
            let engine = engine_with(vec![response]);
            assert!(!engine.add(b"key", Value::from(1_i32), 0, None).await.unwrap());
        });
    }

    #[test]
    fn test_cas_zero_is_rejected() {
        tokio_test::block_on(async {
            let engine = engine_with(vec![]);
            assert!(engine.cas(b"key", Value::from(1_i32), 0, 0, None).await.is_err());
        });
    }

    #[test]
    fn test_incr_success_decodes_counter() {
        tokio_test::block_on(async {
            let response = encode_response(crate::protocol::INCR_OPCODE, Status::Success, b"", &[], &42_u64.to_be_bytes());
            let engine = engine_with(vec![response]);
            assert_eq!(engine.incr(b"key", 1, 0, 0).await.unwrap(), 42);
        });
    }

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

    fn dead_engine() -> Engine<DeadStream, NoCompressor> {
        let conn = Connection::new(Endpoint::parse("127.0.0.1:11211"), None, None);
        Engine::new(conn, NoCompressor, -1)
    }

    #[test]
    fn test_incr_against_disconnected_server_is_zero_not_error() {
        tokio_test::block_on(async {
            let engine = dead_engine();
            assert_eq!(engine.incr(b"key", 1, 0, 0).await.unwrap(), 0);
        });
    }

    #[test]
    fn test_flush_against_disconnected_server_is_true() {
        tokio_test::block_on(async {
            let engine = dead_engine();
            assert!(engine.flush_all(0).await.unwrap());
        });
    }
}
