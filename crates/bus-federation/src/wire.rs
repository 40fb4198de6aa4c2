//! # Wire Codec
//!
//! Envelopes cross node boundaries as JSON. Content is type-erased in
//! memory, so every payload type that may travel needs a string tag and an
//! encode/decode pair in a [`TypeRegistry`]. Nothing is resolved by Rust
//! type name at runtime.
//!
//! Headers starting with `Trans` are transient and never leave the node.

use crate::error::CodecError;
use crate::sync::SyncStatus;
use bus_types::headers::TRANSIENT_HEADER_PREFIX;
use bus_types::{CrossNode, Envelope, MessageStatus, Payload, Response};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Tag of `String` content.
pub const STRING_TAG: &str = "String";
/// Tag of [`CrossNode`] content.
pub const CROSS_NODE_TAG: &str = "CrossNode";
/// Tag of `Vec<String>` content, used by heartbeats.
pub const STRING_LIST_TAG: &str = "StringList";
/// Tag of [`SyncStatus`] content.
pub const SYNC_STATUS_TAG: &str = "SyncStatus";

/// An envelope as it travels between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub id: Uuid,
    pub trx_id: Uuid,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    pub status: MessageStatus,
    pub topic: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// `None` means no content.
    #[serde(default)]
    pub type_tag: Option<String>,
    #[serde(default)]
    pub content: Option<Value>,
}

impl WireEnvelope {
    /// # Errors
    ///
    /// `CodecError::Json` if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// # Errors
    ///
    /// `CodecError::Json` for malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// Drop transient headers.
#[must_use]
pub fn filter_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .filter(|(key, _)| !key.starts_with(TRANSIENT_HEADER_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

type EncodeFn = dyn Fn(&Payload) -> Result<Value, CodecError> + Send + Sync;
type DecodeFn = dyn Fn(Value) -> Result<Payload, CodecError> + Send + Sync;

struct Codec {
    tag: String,
    encode: Box<EncodeFn>,
    decode: Box<DecodeFn>,
}

/// Type tag to codec mapping, filled by application code before use.
#[derive(Default)]
pub struct TypeRegistry {
    by_tag: RwLock<HashMap<String, Arc<Codec>>>,
    by_type: RwLock<HashMap<TypeId, Arc<Codec>>>,
}

impl TypeRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the types the bridge itself sends: `String`,
    /// [`CrossNode`], `Vec<String>` and [`SyncStatus`].
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register::<String>(STRING_TAG);
        registry.register::<CrossNode>(CROSS_NODE_TAG);
        registry.register::<Vec<String>>(STRING_LIST_TAG);
        registry.register::<SyncStatus>(SYNC_STATUS_TAG);
        registry
    }

    /// Register `T` under `tag`. A later registration of the same tag or
    /// type replaces the earlier one.
    pub fn register<T>(&self, tag: &str)
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
    {
        let codec = Arc::new(Codec {
            tag: tag.to_string(),
            encode: Box::new(|payload: &Payload| -> Result<Value, CodecError> {
                let value = payload
                    .downcast_ref::<T>()
                    .ok_or_else(|| CodecError::UnregisteredType(payload.type_name().to_string()))?;
                Ok(serde_json::to_value(value)?)
            }),
            decode: Box::new(|value: Value| -> Result<Payload, CodecError> {
                Ok(Payload::new(serde_json::from_value::<T>(value)?))
            }),
        });
        info!(tag = tag, rust_type = std::any::type_name::<T>(), "Registered wire type");
        self.by_tag.write().insert(tag.to_string(), codec.clone());
        self.by_type.write().insert(TypeId::of::<T>(), codec);
    }

    #[must_use]
    pub fn is_registered(&self, tag: &str) -> bool {
        self.by_tag.read().contains_key(tag)
    }

    /// Encode content into its tag and JSON value.
    ///
    /// # Errors
    ///
    /// `CodecError::UnregisteredType` if the content's type has no tag.
    pub fn encode(&self, payload: &Payload) -> Result<(String, Value), CodecError> {
        let codec = self
            .by_type
            .read()
            .get(&payload.value_type_id())
            .cloned()
            .ok_or_else(|| CodecError::UnregisteredType(payload.type_name().to_string()))?;
        let value = (codec.encode)(payload)?;
        Ok((codec.tag.clone(), value))
    }

    /// Decode tagged JSON back into content.
    ///
    /// # Errors
    ///
    /// `CodecError::UnknownTag` for an unregistered tag, `CodecError::Json`
    /// if the value does not fit the registered type.
    pub fn decode(&self, tag: &str, value: Value) -> Result<Payload, CodecError> {
        let codec = self
            .by_tag
            .read()
            .get(tag)
            .cloned()
            .ok_or_else(|| CodecError::UnknownTag(tag.to_string()))?;
        (codec.decode)(value)
    }

    fn encode_content(
        &self,
        content: Option<&Payload>,
    ) -> Result<(Option<String>, Option<Value>), CodecError> {
        match content {
            Some(payload) => {
                let (tag, value) = self.encode(payload)?;
                Ok((Some(tag), Some(value)))
            }
            None => Ok((None, None)),
        }
    }

    fn decode_content(&self, tag: Option<String>, value: Option<Value>) -> Result<Option<Payload>, CodecError> {
        match (tag, value) {
            (Some(tag), Some(value)) => self.decode(&tag, value).map(Some),
            _ => Ok(None),
        }
    }

    /// Wire form of an outgoing envelope.
    ///
    /// # Errors
    ///
    /// `CodecError::UnregisteredType` if the content cannot be encoded.
    pub fn encode_envelope(&self, envelope: &Envelope) -> Result<WireEnvelope, CodecError> {
        let (type_tag, content) = self.encode_content(envelope.content())?;
        Ok(WireEnvelope {
            id: envelope.id(),
            trx_id: envelope.trx_id(),
            created: envelope.created(),
            updated: envelope.updated(),
            status: envelope.status(),
            topic: envelope.topic().to_string(),
            headers: filter_headers(envelope.headers()),
            type_tag,
            content,
        })
    }

    /// Rebuild an inbound envelope. It starts over as `New` on this node;
    /// the sender's status is not carried into the local state machine.
    ///
    /// # Errors
    ///
    /// As [`TypeRegistry::decode`].
    pub fn decode_envelope(&self, wire: WireEnvelope) -> Result<Envelope, CodecError> {
        let content = self.decode_content(wire.type_tag, wire.content)?;
        Ok(Envelope::from_parts(
            wire.id,
            wire.trx_id,
            wire.created,
            wire.updated,
            MessageStatus::New,
            wire.topic,
            filter_headers(&wire.headers),
            content,
        ))
    }

    /// Wire form of the response of a processed envelope.
    ///
    /// # Errors
    ///
    /// `CodecError::UnregisteredType` if the response content cannot be encoded.
    pub fn encode_response(&self, envelope: &Envelope) -> Result<WireEnvelope, CodecError> {
        let response = envelope.response();
        let (type_tag, content) = self.encode_content(response.content.as_ref())?;
        Ok(WireEnvelope {
            id: envelope.id(),
            trx_id: envelope.trx_id(),
            created: envelope.created(),
            updated: envelope.updated(),
            status: envelope.status(),
            topic: envelope.topic().to_string(),
            headers: filter_headers(&response.headers),
            type_tag,
            content,
        })
    }

    /// Response carried by a wire reply.
    ///
    /// # Errors
    ///
    /// As [`TypeRegistry::decode`].
    pub fn decode_response(&self, wire: WireEnvelope) -> Result<Response, CodecError> {
        Ok(Response {
            content: self.decode_content(wire.type_tag, wire.content)?,
            headers: wire.headers,
        })
    }
}
