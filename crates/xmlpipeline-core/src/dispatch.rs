//! Dispatcher — spec §4.7.
//!
//! Bounded concurrency at two levels: a global `Semaphore` caps
//! `max_concurrent_handlers` across every listener, and each agent listener
//! carries its own `Semaphore` capping `max_concurrent_per_agent`. Both are
//! acquired as owned permits so they release on every exit path — including
//! a handler panic, which `tokio::spawn` turns into a `JoinError` we convert
//! to a `<huh>` response instead of letting it take the pump down (spec's
//! "Handler-crash policy").

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::envelope::{build_envelope, huh_payload};
use crate::fanout::fan_out;
use crate::listener::{HandlerResponse, Listener};
use crate::state::{HandlerMetadata, MessageState};

pub struct Dispatcher {
    global: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(max_concurrent_handlers: usize) -> Self {
        Dispatcher {
            global: Arc::new(Semaphore::new(max_concurrent_handlers.max(1))),
        }
    }

    /// Invoke `listener` with the payload already deserialised onto `state`,
    /// returning the (possibly fanned-out) response states to re-inject.
    /// Never panics and never returns an `Err`: every failure mode becomes
    /// a `<huh>` response per spec §6.5, which is itself re-injected so an
    /// error-handling listener downstream can see it.
    pub async fn dispatch(&self, listener: Arc<Listener>, state: MessageState) -> Vec<MessageState> {
        let thread_id = state.thread_id.clone().unwrap_or_default();
        let from_id = state.from_id.clone().unwrap_or_default();

        let own_name = if listener.is_agent { Some(listener.name.clone()) } else { None };
        let is_self_call = own_name.as_deref() == Some(from_id.as_str());
        let metadata = HandlerMetadata {
            thread_id: thread_id.clone(),
            from_id: from_id.clone(),
            own_name,
            is_self_call,
        };

        let Some(payload) = state.payload.clone() else {
            return vec![huh_state(&listener, &thread_id, &from_id, "no deserialised payload at dispatch")];
        };

        // Per-agent slot first, then the global dispatch slot — suspends
        // here, never blocks other in-flight handlers.
        let _agent_permit = match &listener.semaphore {
            Some(sem) => match sem.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return vec![huh_state(&listener, &thread_id, &from_id, "agent semaphore closed")],
            },
            None => None,
        };
        let _global_permit = match self.global.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return vec![huh_state(&listener, &thread_id, &from_id, "dispatch semaphore closed")],
        };

        let task_listener = listener.clone();
        let task_metadata = metadata.clone();
        let join_result = tokio::spawn(async move { task_listener.invoke(payload, task_metadata).await }).await;

        let response = match join_result {
            Ok(Ok(response)) => response,
            Ok(Err(handler_err)) => {
                tracing::warn!(thread_id = %thread_id, listener = %listener.name, kind = handler_err.kind(), "handler returned an error");
                return vec![huh_state(&listener, &thread_id, &from_id, &handler_err.to_string())];
            }
            Err(join_err) => {
                tracing::warn!(thread_id = %thread_id, listener = %listener.name, "handler panicked: {join_err}");
                return vec![huh_state(&listener, &thread_id, &from_id, &format!("handler panicked: {join_err}"))];
            }
        };

        match response {
            HandlerResponse::None => vec![],
            HandlerResponse::Bytes(raw) => {
                fan_out(MessageState::from_response(raw, thread_id, listener.name.clone()))
            }
            HandlerResponse::Reply { payload, to } => {
                let envelope = build_envelope(&listener.name, &to, &thread_id, payload);
                fan_out(MessageState::from_response(
                    envelope.to_xml_bytes(),
                    thread_id.clone(),
                    listener.name.clone(),
                ))
            }
        }
    }
}

fn huh_state(listener: &Listener, thread_id: &str, to: &str, message: &str) -> MessageState {
    let envelope = build_envelope(&listener.name, to, thread_id, huh_payload(message));
    MessageState::from_response(envelope.to_xml_bytes(), thread_id.to_string(), listener.name.clone())
}
