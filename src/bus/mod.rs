// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ordered message bus between regions.
//!
//! Every region publishes its local changes to one shared bus and tails it
//! for the changes of the others. The bus must deliver messages that share an
//! ordering key (the document path) in publish order; nothing else about
//! ordering is assumed.
//!
//! # Message Shape
//!
//! ```text
//! BusMessage
//! ├── ordering_key: "orders/42"
//! ├── attributes:   { "region": "us" }
//! └── payload:      raw change-feed notification bytes
//! ```
//!
//! Two capabilities are split so a process can publish without tailing:
//! [`MessageBus`] (publish side) and [`MessageSource`] (subscribe side).

pub mod memory;
pub mod stream;

use crate::error::{ReplicationError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Attribute naming the region that published a message. Mandatory on apply.
pub const REGION_ATTRIBUTE: &str = "region";

/// Cursor meaning "from the start of the bus".
pub const START_CURSOR: &str = "0";

/// Type alias for boxed async futures returned by bus clients.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Per-key FIFO routing key (the document path).
    pub ordering_key: String,
    pub attributes: HashMap<String, String>,
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// A message from `region` for the document at `ordering_key`.
    pub fn new(ordering_key: impl Into<String>, region: impl Into<String>, payload: Vec<u8>) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert(REGION_ATTRIBUTE.to_string(), region.into());
        Self {
            ordering_key: ordering_key.into(),
            attributes,
            payload,
        }
    }

    pub fn region(&self) -> Option<&str> {
        self.attributes.get(REGION_ATTRIBUTE).map(String::as_str)
    }
}

/// A message as delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEnvelope {
    /// Bus-assigned id; also the cursor to resume after this message.
    pub id: String,
    pub ordering_key: Option<String>,
    pub attributes: HashMap<String, String>,
    pub payload: Vec<u8>,
}

impl BusEnvelope {
    /// Wrap a published message as the bus would deliver it.
    pub fn from_message(id: impl Into<String>, message: BusMessage) -> Self {
        Self {
            id: id.into(),
            ordering_key: Some(message.ordering_key),
            attributes: message.attributes,
            payload: message.payload,
        }
    }

    /// The publishing region. Missing or empty is malformed input.
    pub fn region(&self) -> Result<&str> {
        match self.attributes.get(REGION_ATTRIBUTE) {
            Some(region) if !region.is_empty() => Ok(region),
            _ => Err(ReplicationError::MalformedInput(format!(
                "message {} has no '{}' attribute",
                self.id, REGION_ATTRIBUTE
            ))),
        }
    }
}

/// Publish side of the bus.
pub trait MessageBus: Send + Sync + 'static {
    /// Publish a message and return the id the bus assigned to it.
    fn publish(&self, message: BusMessage) -> BusFuture<'_, String>;

    /// Wait until every published message is accepted by the bus.
    fn flush(&self) -> BusFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Subscribe side of the bus.
pub trait MessageSource: Send + Sync + 'static {
    /// Messages after `cursor`, oldest first.
    ///
    /// May wait for new messages up to an implementation-defined timeout and
    /// return an empty batch when none arrive.
    fn next_batch(&self, cursor: &str) -> BusFuture<'_, Vec<BusEnvelope>>;
}
