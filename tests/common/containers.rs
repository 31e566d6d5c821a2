// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Redis.
//!
//! Provides helpers to spin up a Redis container acting as the shared bus.

use region_sync::bus::stream::RedisStreamBus;
use region_sync::config::BusConfig;
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

/// Create a vanilla Redis container (streams-compatible).
///
/// Uses official redis:7 image. Waits for "Ready to accept connections".
pub fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

/// Get the Redis URL for a container.
pub fn redis_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(6379);
    format!("redis://127.0.0.1:{}", port)
}

/// A Redis container plus bus settings pointing at it.
pub struct TestBus<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    container: Container<'a, GenericImage>,
    pub config: BusConfig,
}

impl<'a> TestBus<'a> {
    pub fn new(docker: &'a Cli) -> Self {
        let container = redis_container(docker);
        let config = BusConfig {
            redis_url: redis_url(&container),
            block_timeout: "200ms".to_string(),
            ..Default::default()
        };
        Self { container, config }
    }

    /// Connect a bus client (one per region, as in production).
    pub async fn connect(&self) -> RedisStreamBus {
        RedisStreamBus::connect(&self.config)
            .await
            .expect("Failed to connect to Redis")
    }

    /// Append a raw entry, bypassing the bus client.
    pub async fn add_raw_entry(&self, fields: &[(&str, &[u8])]) -> redis::RedisResult<String> {
        let client = redis::Client::open(self.config.redis_url.as_str())?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        use redis::AsyncCommands;
        conn.xadd(&self.config.stream_key, "*", fields).await
    }
}
