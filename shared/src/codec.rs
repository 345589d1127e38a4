//! Schema-driven binary encode/decode of wire messages.
//!
//! The field layout of [`Message`] is the wire contract; both peers must run
//! the same layout. The codec only stamps and checks a one-byte wire version,
//! so an unsynchronized layout change is a compatibility break it cannot
//! detect. The schema descriptor is loaded lazily exactly once per codec and
//! cached for the process lifetime; encode/decode calls issued before the
//! load resolves suspend on it instead of failing.

use crate::{Message, NetError};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::OnceCell;

/// Wire version stamped on every frame by the built-in schema.
pub const WIRE_VERSION: u8 = 1;

/// Descriptor for the message layout both peers agreed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSchema {
    pub wire_version: u8,
}

pub type SchemaFuture = Pin<Box<dyn Future<Output = Result<MessageSchema, NetError>> + Send>>;

/// Source of the schema descriptor. The production source is static; tests
/// inject slow or failing sources to exercise the suspension path.
pub trait SchemaSource: Send + Sync {
    fn load(&self) -> SchemaFuture;
}

/// Schema embedded in the binary, resolving immediately.
pub struct StaticSchema;

impl SchemaSource for StaticSchema {
    fn load(&self) -> SchemaFuture {
        Box::pin(async {
            Ok(MessageSchema {
                wire_version: WIRE_VERSION,
            })
        })
    }
}

pub struct Codec {
    source: Box<dyn SchemaSource>,
    schema: OnceCell<MessageSchema>,
}

impl Codec {
    pub fn new(source: Box<dyn SchemaSource>) -> Self {
        Self {
            source,
            schema: OnceCell::new(),
        }
    }

    pub fn with_static_schema() -> Self {
        Self::new(Box::new(StaticSchema))
    }

    /// Resolves the schema, loading it on first use. Concurrent callers all
    /// suspend on the same in-flight load; a failed load is not cached so a
    /// transient failure stays transient.
    async fn schema(&self) -> Result<&MessageSchema, NetError> {
        self.schema
            .get_or_try_init(|| self.source.load())
            .await
            .map_err(|e| NetError::SchemaUnavailable(e.to_string()))
    }

    pub async fn encode(&self, msg: &Message) -> Result<Vec<u8>, NetError> {
        let schema = self.schema().await?;

        let body =
            bincode::serialize(msg).map_err(|e| NetError::MalformedMessage(e.to_string()))?;
        let mut frame = Vec::with_capacity(body.len() + 1);
        frame.push(schema.wire_version);
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    pub async fn decode(&self, bytes: &[u8]) -> Result<Message, NetError> {
        let schema = self.schema().await?;

        match bytes.split_first() {
            Some((&version, body)) if version == schema.wire_version => {
                bincode::deserialize(body).map_err(|e| NetError::MalformedMessage(e.to_string()))
            }
            Some((&version, _)) => Err(NetError::MalformedMessage(format!(
                "unknown wire version {}",
                version
            ))),
            None => Err(NetError::MalformedMessage("empty buffer".to_string())),
        }
    }
}
