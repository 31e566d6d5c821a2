// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis Stream as the inter-region bus.
//!
//! All regions `XADD` to one stream and tail it with `XREAD BLOCK`. A stream
//! is totally ordered, so per-ordering-key FIFO holds trivially.
//!
//! # Entry Format
//!
//! ```text
//! XADD region-sync:changes [MAXLEN ~ n] *
//!     ordering_key  "orders/42"
//!     region        "us"
//!     <attr>        <value>          # any further message attributes
//!     payload       <bytes>          # zstd-compressed when large
//!     hash          <sha256 hex>     # of the uncompressed payload
//! ```
//!
//! Entries that fail to parse (missing payload, bad compression, hash
//! mismatch) are logged and skipped; the cursor still moves past them.

use super::{BusEnvelope, BusFuture, BusMessage, MessageBus, MessageSource};
use crate::config::BusConfig;
use crate::error::{ReplicationError, Result};
use crate::payload::{compute_content_hash, decode, encode};
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, trace, warn};

const FIELD_ORDERING_KEY: &str = "ordering_key";
const FIELD_PAYLOAD: &str = "payload";
const FIELD_HASH: &str = "hash";
const RESERVED_FIELDS: [&str; 3] = [FIELD_ORDERING_KEY, FIELD_PAYLOAD, FIELD_HASH];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bus client over a single Redis Stream.
#[derive(Clone)]
pub struct RedisStreamBus {
    conn: ConnectionManager,
    stream_key: String,
    block_timeout: Duration,
    batch_size: usize,
    compression_threshold: Option<usize>,
    max_len: Option<usize>,
}

impl RedisStreamBus {
    /// Connect to the Redis instance named in `config`.
    pub async fn connect(config: &BusConfig) -> Result<Self> {
        info!(url = %config.redis_url, stream = %config.stream_key, "Connecting to bus");

        let client = Client::open(config.redis_url.as_str()).map_err(|e| {
            ReplicationError::Misconfigured(format!("Invalid Redis URL: {}", e))
        })?;

        let conn = timeout(CONNECT_TIMEOUT, client.get_connection_manager())
            .await
            .map_err(|_| ReplicationError::bus_msg("connect", "connection timed out"))?
            .map_err(|e| ReplicationError::bus("connect", e))?;

        Ok(Self {
            conn,
            stream_key: config.stream_key.clone(),
            block_timeout: config.block_timeout_duration(),
            batch_size: config.batch_size.max(1),
            compression_threshold: config.compression_threshold,
            max_len: config.max_len,
        })
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// Number of entries currently in the stream.
    pub async fn len(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = redis::cmd("XLEN")
            .arg(&self.stream_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| ReplicationError::bus("XLEN", e))?;
        Ok(len)
    }

    /// Id of the newest entry, for starting a subscriber at the tail.
    pub async fn latest_id(&self) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let result: Vec<(String, HashMap<String, redis::Value>)> = redis::cmd("XREVRANGE")
            .arg(&self.stream_key)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| ReplicationError::bus("XREVRANGE", e))?;
        Ok(result.first().map(|(id, _)| id.clone()))
    }
}

impl MessageBus for RedisStreamBus {
    fn publish(&self, message: BusMessage) -> BusFuture<'_, String> {
        Box::pin(async move {
            let hash = compute_content_hash(&message.payload);
            let payload = encode(&message.payload, self.compression_threshold);

            let mut cmd = redis::cmd("XADD");
            cmd.arg(&self.stream_key);
            if let Some(max_len) = self.max_len {
                cmd.arg("MAXLEN").arg("~").arg(max_len);
            }
            cmd.arg("*").arg(FIELD_ORDERING_KEY).arg(&message.ordering_key);
            for (name, value) in &message.attributes {
                if RESERVED_FIELDS.contains(&name.as_str()) {
                    warn!(attribute = %name, "Skipping attribute with reserved name");
                    continue;
                }
                cmd.arg(name).arg(value);
            }
            cmd.arg(FIELD_PAYLOAD).arg(payload).arg(FIELD_HASH).arg(hash);

            let mut conn = self.conn.clone();
            let id: String = cmd
                .query_async(&mut conn)
                .await
                .map_err(|e| ReplicationError::bus("XADD", e))?;

            trace!(stream_id = %id, ordering_key = %message.ordering_key, "Published to bus");
            Ok(id)
        })
    }
}

impl MessageSource for RedisStreamBus {
    fn next_batch(&self, cursor: &str) -> BusFuture<'_, Vec<BusEnvelope>> {
        let cursor = cursor.to_string();
        Box::pin(async move {
            let opts = StreamReadOptions::default()
                .block(self.block_timeout.as_millis() as usize)
                .count(self.batch_size);

            let start = Instant::now();
            let mut conn = self.conn.clone();
            let reply: StreamReadReply = conn
                .xread_options(&[&self.stream_key], &[&cursor], &opts)
                .await
                .map_err(|e| ReplicationError::bus("XREAD", e))?;

            let mut envelopes = Vec::new();
            for stream in reply.keys {
                for entry in stream.ids {
                    match parse_entry(&entry.id, &entry.map) {
                        Ok(envelope) => envelopes.push(envelope),
                        Err(e) => {
                            warn!(
                                stream_id = %entry.id,
                                error = %e,
                                "Failed to parse stream entry, skipping"
                            );
                            crate::metrics::record_dropped("bus", "unparseable_entry");
                            // Keep the cursor moving past the bad entry.
                            envelopes.push(BusEnvelope {
                                id: entry.id.clone(),
                                ordering_key: None,
                                attributes: HashMap::new(),
                                payload: Vec::new(),
                            });
                        }
                    }
                }
            }

            crate::metrics::record_bus_read(envelopes.len(), start.elapsed());
            if !envelopes.is_empty() {
                trace!(
                    count = envelopes.len(),
                    first_id = %envelopes.first().map(|e| e.id.as_str()).unwrap_or(""),
                    last_id = %envelopes.last().map(|e| e.id.as_str()).unwrap_or(""),
                    "Read bus messages"
                );
            }
            Ok(envelopes)
        })
    }
}

/// Parse a stream entry into an envelope.
fn parse_entry(stream_id: &str, fields: &HashMap<String, redis::Value>) -> Result<BusEnvelope> {
    let raw = get_bytes_field(fields, FIELD_PAYLOAD)?;
    let hash = get_string_field(fields, FIELD_HASH).ok();
    let payload = decode(&raw, hash.as_deref())?;
    let ordering_key = get_string_field(fields, FIELD_ORDERING_KEY).ok();

    let attributes = fields
        .keys()
        .filter(|name| !RESERVED_FIELDS.contains(&name.as_str()))
        .filter_map(|name| {
            get_string_field(fields, name)
                .ok()
                .map(|value| (name.clone(), value))
        })
        .collect();

    Ok(BusEnvelope {
        id: stream_id.to_string(),
        ordering_key,
        attributes,
        payload,
    })
}

/// Extract a string field from a stream entry.
fn get_string_field(fields: &HashMap<String, redis::Value>, name: &str) -> Result<String> {
    let value = fields
        .get(name)
        .ok_or_else(|| ReplicationError::MalformedInput(format!("Missing field: {}", name)))?;

    match value {
        redis::Value::BulkString(bytes) => String::from_utf8(bytes.clone()).map_err(|e| {
            ReplicationError::MalformedInput(format!("Invalid UTF-8 in {}: {}", name, e))
        }),
        redis::Value::SimpleString(s) => Ok(s.clone()),
        _ => Err(ReplicationError::MalformedInput(format!(
            "Unexpected type for field {}: {:?}",
            name, value
        ))),
    }
}

/// Extract a bytes field from a stream entry.
fn get_bytes_field(fields: &HashMap<String, redis::Value>, name: &str) -> Result<Vec<u8>> {
    let value = fields
        .get(name)
        .ok_or_else(|| ReplicationError::MalformedInput(format!("Missing field: {}", name)))?;

    match value {
        redis::Value::BulkString(bytes) => Ok(bytes.clone()),
        redis::Value::SimpleString(s) => Ok(s.as_bytes().to_vec()),
        _ => Err(ReplicationError::MalformedInput(format!(
            "Unexpected type for field {}: {:?}",
            name, value
        ))),
    }
}
