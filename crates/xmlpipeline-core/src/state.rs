//! `MessageState` and `HandlerMetadata` — spec §3.
//!
//! `MessageState` is the universal intermediate representation that flows
//! stage to stage through the pipeline (`pump.rs`). Each stage only ever
//! *adds* to it or sets `error`; nothing is ever removed, so a state can
//! always be inspected after the fact to see exactly how far it got.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::PumpError;
use crate::listener::Listener;
use crate::xmltree::Element;

/// Trustworthy context passed to every handler invocation.
#[derive(Debug, Clone)]
pub struct HandlerMetadata {
    pub thread_id: String,
    pub from_id: String,
    /// Only `Some` when the invoking listener is `is_agent = true`.
    pub own_name: Option<String>,
    /// Convenience flag: true when `from_id == own_name`.
    pub is_self_call: bool,
}

/// The record that flows through every pipeline stage. Cheap to clone —
/// every field is either a primitive, an `Arc`, or itself `Clone` — which
/// is what lets the driver fan the same routed state out to several
/// broadcast listeners without re-running the stages per listener.
#[derive(Clone)]
pub struct MessageState {
    pub raw_bytes: Option<Vec<u8>>,
    pub envelope_tree: Option<Element>,
    pub payload_tree: Option<Element>,
    /// Deserialised payload value, type-erased — downcast via `Payload`.
    pub payload: Option<Arc<dyn std::any::Any + Send + Sync>>,

    pub thread_id: Option<String>,
    pub from_id: Option<String>,
    pub to_id: Option<String>,

    pub target_listeners: Option<Vec<Arc<Listener>>>,

    pub error: Option<PumpError>,

    pub metadata: HashMap<String, Value>,
}

impl std::fmt::Debug for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageState")
            .field("thread_id", &self.thread_id)
            .field("from_id", &self.from_id)
            .field("to_id", &self.to_id)
            .field("error", &self.error)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

impl MessageState {
    /// A freshly injected message: only the raw bytes and provenance are
    /// known yet.
    pub fn from_injection(raw: Vec<u8>, thread_id: Option<String>, from_id: Option<String>) -> Self {
        MessageState {
            raw_bytes: Some(raw),
            envelope_tree: None,
            payload_tree: None,
            payload: None,
            thread_id,
            from_id,
            to_id: None,
            target_listeners: None,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// A state produced by response fan-out: raw bytes + inherited
    /// provenance, nothing else yet parsed.
    pub fn from_response(raw: Vec<u8>, thread_id: String, from_id: String) -> Self {
        MessageState {
            raw_bytes: Some(raw),
            envelope_tree: None,
            payload_tree: None,
            payload: None,
            thread_id: Some(thread_id),
            from_id: Some(from_id),
            to_id: None,
            target_listeners: None,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn fail(mut self, err: PumpError) -> Self {
        self.error = Some(err);
        self
    }
}
