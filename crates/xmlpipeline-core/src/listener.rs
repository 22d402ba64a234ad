//! Listener registration — spec §3 "Listener" entity, §6.3 handler contract.
//!
//! A `Listener` is built generically over its payload type (`register::<P, H>`)
//! but stored type-erased, per Design Note (a): a registry mapping payload
//! type identifiers to constructor functions, installed once at
//! registration and never touched again.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::PumpError;
use crate::payload::{Payload, PayloadSchema};
use crate::state::HandlerMetadata;
use crate::xmltree::Element;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a handler may hand back to the dispatcher — spec §6.3.
pub enum HandlerResponse {
    /// Raw bytes: a serialised envelope, or raw payload XML to be wrapped.
    Bytes(Vec<u8>),
    /// A structured reply: payload element plus an explicit addressee.
    /// The dispatcher wraps this into an envelope with
    /// `from = listener.name`, `to`, `thread = metadata.thread_id`.
    Reply { payload: Element, to: String },
    /// A sink: nothing is re-injected.
    None,
}

/// A typed handler. `FnHandler` is the usual way to build one from a
/// closure (mirrors the teacher's `FnHandler(|payload, ctx| Box::pin(...))`
/// pattern).
pub trait Handler<P: Payload>: Send + Sync {
    fn handle(&self, payload: P, metadata: HandlerMetadata) -> BoxFuture<'static, Result<HandlerResponse, PumpError>>;
}

pub struct FnHandler<F>(pub F);

impl<P, F> Handler<P> for FnHandler<F>
where
    P: Payload,
    F: Fn(P, HandlerMetadata) -> BoxFuture<'static, Result<HandlerResponse, PumpError>> + Send + Sync,
{
    fn handle(&self, payload: P, metadata: HandlerMetadata) -> BoxFuture<'static, Result<HandlerResponse, PumpError>> {
        (self.0)(payload, metadata)
    }
}

type ErasedDeserialize = Arc<dyn Fn(&Element) -> Result<Arc<dyn Any + Send + Sync>, PumpError> + Send + Sync>;
type ErasedInvoke =
    Arc<dyn Fn(Arc<dyn Any + Send + Sync>, HandlerMetadata) -> BoxFuture<'static, Result<HandlerResponse, PumpError>> + Send + Sync>;

/// A registered listener: immutable for the pump's lifetime (spec §3).
pub struct Listener {
    pub name: String,
    pub payload_type_name: String,
    /// `"<name>.<payload_type>"`, lowercased.
    pub root_tag: String,
    pub description: String,
    pub is_agent: bool,
    pub peers: Vec<String>,
    pub broadcast: bool,
    pub schema: PayloadSchema,
    /// `Some` iff `is_agent` — enforces `max_concurrent_per_agent`.
    pub semaphore: Option<Arc<Semaphore>>,

    deserialize: ErasedDeserialize,
    invoke: ErasedInvoke,
}

impl Listener {
    pub fn new<P, H>(
        name: impl Into<String>,
        description: impl Into<String>,
        is_agent: bool,
        peers: Vec<String>,
        broadcast: bool,
        semaphore: Option<Arc<Semaphore>>,
        handler: H,
    ) -> Self
    where
        P: Payload,
        H: Handler<P> + 'static,
    {
        let name = name.into();
        let payload_type_name = P::payload_type_name().to_lowercase();
        let root_tag = format!("{}.{}", name.to_lowercase(), payload_type_name);
        let handler = Arc::new(handler);

        let deserialize: ErasedDeserialize = Arc::new(|elem: &Element| {
            let value = P::parse_element(elem)?;
            Ok(Arc::new(value) as Arc<dyn Any + Send + Sync>)
        });

        let invoke: ErasedInvoke = {
            let handler = handler.clone();
            Arc::new(move |payload: Arc<dyn Any + Send + Sync>, metadata: HandlerMetadata| {
                let handler = handler.clone();
                let typed = payload
                    .downcast::<P>()
                    .map_err(|_| PumpError::Internal("payload type mismatch at dispatch".into()));
                Box::pin(async move {
                    let typed = typed?;
                    handler.handle((*typed).clone(), metadata).await
                }) as BoxFuture<'static, Result<HandlerResponse, PumpError>>
            })
        };

        Listener {
            name,
            payload_type_name,
            root_tag,
            description: description.into(),
            is_agent,
            peers,
            broadcast,
            schema: P::schema(),
            semaphore,
            deserialize,
            invoke,
        }
    }

    pub fn deserialize(&self, elem: &Element) -> Result<Arc<dyn Any + Send + Sync>, PumpError> {
        (self.deserialize)(elem)
    }

    pub fn invoke(
        &self,
        payload: Arc<dyn Any + Send + Sync>,
        metadata: HandlerMetadata,
    ) -> BoxFuture<'static, Result<HandlerResponse, PumpError>> {
        (self.invoke)(payload, metadata)
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("name", &self.name)
            .field("root_tag", &self.root_tag)
            .field("is_agent", &self.is_agent)
            .finish()
    }
}
