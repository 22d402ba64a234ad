//! Queue / Pipeline Driver — spec §4.9, §5.
//!
//! A single FIFO work queue feeds a composed stage pipeline:
//! repair/canonicalise → envelope-validate → payload-extract →
//! thread-assign → route → schema-validate-and-deserialise → dispatch
//! (bounded) → response fan-out → re-inject. Every `MessageState` that
//! reaches the queue — whether freshly injected or produced by fan-out —
//! runs the *same* composed pipeline from the top; there is no separate
//! "response path". This resolves the one place spec's prose composition
//! and its own per-stage contracts could be read two ways (where exactly
//! fan-out sits relative to routing) in favour of the per-stage contracts,
//! which are unambiguous: the dispatcher (§4.7) produces raw response
//! bytes, those are fanned out (§4.8), and every resulting state is
//! "pushed back onto the queue" (§4.9) — i.e. re-enters at the top, not
//! midway through.
//!
//! The source's 500ms poll (`asyncio.Queue.get(timeout=...)`) is an
//! artifact of cooperative scheduling without a native wakeup primitive;
//! the main loop here replaces it with `tokio::select!` racing queue
//! receipt against a `tokio::sync::watch` shutdown signal, so there's no
//! polling interval while messages are actually flowing. Only the final
//! drain phase — waiting for handlers that were already in flight when
//! shutdown fired to finish re-injecting their responses — falls back to
//! a short sleep loop, since there's no single event to wait on there.
//!
//! `max_concurrent_pipelines` (spec §6.2's "upper bound on simultaneously
//! in-flight messages") is a third `Semaphore`, separate from the
//! dispatcher's own global and per-agent ones: it bounds how many
//! `MessageState`s can be running the repair-through-dispatch stages at
//! once, regardless of how many listeners they end up routed to.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Notify, Semaphore};

use crate::dispatch::Dispatcher;
use crate::envelope::{extract_payload, validate_envelope};
use crate::error::PumpError;
use crate::registry::ListenerRegistry;
use crate::state::MessageState;
use crate::thread::{assign_thread_id, ThreadRegistry};
use crate::xmltree::repair_and_canonicalize;

/// The driver's lifecycle — spec §4.9's state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    New,
    Running,
    Draining,
    Stopped,
}

struct Queue {
    items: Mutex<VecDeque<MessageState>>,
    notify: Notify,
}

impl Queue {
    fn new() -> Self {
        Queue {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, item: MessageState) {
        self.items.lock().unwrap().push_back(item);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<MessageState> {
        self.items.lock().unwrap().pop_front()
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

/// One rejected message: what stage it died at and why. Kept so a caller
/// driving `Pipeline` from a test (or a future console) can assert on
/// exactly what was reported, the way spec §7 describes ("errors
/// accumulate on state and are reported, never raised").
#[derive(Debug, Clone)]
pub struct ReportedError {
    pub thread_id: Option<String>,
    pub from_id: Option<String>,
    pub error: PumpError,
    /// The raw bytes of the state that failed, when any had already been
    /// parsed or inherited — lets a caller (tests, a console) inspect what
    /// was actually rejected instead of just the error kind.
    pub raw_bytes: Option<Vec<u8>>,
}

/// The message pump itself. Owns the work queue, the listener registry,
/// and the bounded dispatcher; `run()` drives messages through the
/// pipeline until `shutdown()` is called and every in-flight handler has
/// finished.
pub struct Pipeline {
    registry: Arc<ListenerRegistry>,
    dispatcher: Arc<Dispatcher>,
    threads: Arc<ThreadRegistry>,
    queue: Arc<Queue>,
    errors: Arc<Mutex<Vec<ReportedError>>>,
    pipelines: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    injected_total: Arc<AtomicU64>,
    state_tx: watch::Sender<PumpState>,
    state_rx: watch::Receiver<PumpState>,
    shutdown_tx: watch::Sender<bool>,
}

impl Pipeline {
    pub fn new(
        registry: ListenerRegistry,
        threads: ThreadRegistry,
        max_concurrent_pipelines: usize,
        max_concurrent_handlers: usize,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(PumpState::New);
        let (shutdown_tx, _) = watch::channel(false);
        Pipeline {
            registry: Arc::new(registry),
            dispatcher: Arc::new(Dispatcher::new(max_concurrent_handlers)),
            threads: Arc::new(threads),
            queue: Arc::new(Queue::new()),
            errors: Arc::new(Mutex::new(Vec::new())),
            pipelines: Arc::new(Semaphore::new(max_concurrent_pipelines.max(1))),
            in_flight: Arc::new(AtomicUsize::new(0)),
            injected_total: Arc::new(AtomicU64::new(0)),
            state_tx,
            state_rx,
            shutdown_tx,
        }
    }

    pub fn state(&self) -> PumpState {
        *self.state_rx.borrow()
    }

    /// Number of messages currently sitting in the queue, unprocessed.
    /// Handlers in flight are not counted here — see `in_flight_count`.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn injected_total(&self) -> u64 {
        self.injected_total.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> Vec<ReportedError> {
        self.errors.lock().unwrap().clone()
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Queue Source (spec §4.9): push a freshly arrived envelope onto the
    /// work queue. Can be called before `run()` — the queue holds the
    /// backlog until a runner starts draining it.
    pub fn inject(&self, raw: Vec<u8>, thread_id: Option<String>, from_id: Option<String>) {
        self.injected_total.fetch_add(1, Ordering::SeqCst);
        self.queue.push(MessageState::from_injection(raw, thread_id, from_id));
    }

    /// Drive the queue until `shutdown()` is called and every message
    /// injected by then — including every response it produces — has
    /// either been dispatched or reported as an error. Multiple calls to
    /// `run()` on the same `Pipeline` would race each other on the state
    /// transitions; callers should only ever have one in flight.
    pub async fn run(&self) {
        self.state_tx.send_replace(PumpState::Running);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            let shutting_down = *shutdown_rx.borrow();
            if shutting_down {
                break;
            }
            tokio::select! {
                _ = self.queue.notify.notified() => {}
                _ = shutdown_rx.changed() => {}
            }
            self.drain_available();
        }

        self.state_tx.send_replace(PumpState::Draining);
        // The queue may still hold re-injected responses from handlers
        // that were mid-flight when shutdown fired; keep draining until
        // both the queue and in-flight count are empty.
        loop {
            self.drain_available();
            if self.queue.len() == 0 && self.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        self.state_tx.send_replace(PumpState::Stopped);
    }

    fn drain_available(&self) {
        while let Some(state) = self.queue.pop() {
            self.spawn_processing(state);
        }
    }

    fn spawn_processing(&self, state: MessageState) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let registry = self.registry.clone();
        let dispatcher = self.dispatcher.clone();
        let threads = self.threads.clone();
        let queue = self.queue.clone();
        let errors = self.errors.clone();
        let pipelines = self.pipelines.clone();
        let in_flight = self.in_flight.clone();

        tokio::spawn(async move {
            // Bounds how many MessageStates run the stage pipeline at once
            // (spec §6.2); tasks beyond the cap queue up here rather than
            // racing straight into repair/routing/dispatch.
            let _permit = match pipelines.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    report(&errors, &state, PumpError::Internal("pipeline concurrency semaphore closed".into()));
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            };
            process_one(state, &registry, &dispatcher, &threads, &queue, &errors).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Ask the driver to stop once the current backlog and every
    /// in-flight handler (and whatever it re-injects) have drained.
    /// `run()` returns only after that has happened.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        self.queue.notify.notify_one();
    }
}

async fn process_one(
    mut state: MessageState,
    registry: &ListenerRegistry,
    dispatcher: &Dispatcher,
    threads: &ThreadRegistry,
    queue: &Queue,
    errors: &Mutex<Vec<ReportedError>>,
) {
    macro_rules! fail {
        ($err:expr) => {{
            report(errors, &state, $err);
            return;
        }};
    }

    if state.envelope_tree.is_none() {
        let Some(raw) = state.raw_bytes.clone() else {
            fail!(PumpError::Internal("message state has neither raw bytes nor a parsed tree".into()));
        };
        match repair_and_canonicalize(&raw) {
            Ok(tree) => state.envelope_tree = Some(tree),
            Err(e) => fail!(e),
        }
    }
    let tree = state.envelope_tree.clone().unwrap();

    let info = match validate_envelope(&tree) {
        Ok(info) => info,
        Err(e) => fail!(e),
    };
    if info.from.is_some() {
        state.from_id = info.from.clone();
    }
    if info.to.is_some() {
        state.to_id = info.to.clone();
    }

    let payload_elem = match extract_payload(&tree) {
        Ok(p) => p,
        Err(e) => fail!(e),
    };
    state.payload_tree = Some(payload_elem.clone());

    let thread_id = assign_thread_id(info.thread.clone().or_else(|| state.thread_id.clone()));
    threads.observe(&thread_id);
    state.thread_id = Some(thread_id.clone());

    let payload_tag = payload_elem.local_name().to_string();
    let targets = match registry.resolve(state.to_id.as_deref(), &payload_tag) {
        Ok(t) => t,
        Err(e) => fail!(e),
    };

    // Schema/deserialisation is listener-specific, so it runs after
    // routing — spec §4.6's rationale. A naked broadcast may hand the
    // same payload element to several listeners; each validates and
    // deserialises with its own schema and `Payload` type.
    for listener in &targets {
        if let Err(e) = listener.schema.validate(&payload_elem) {
            report(errors, &state, e);
            continue;
        }
        let typed = match listener.deserialize(&payload_elem) {
            Ok(v) => v,
            Err(e) => {
                report(errors, &state, e);
                continue;
            }
        };

        let mut routed = state.clone();
        routed.payload = Some(typed);
        routed.target_listeners = Some(vec![listener.clone()]);

        let responses = dispatcher.dispatch(listener.clone(), routed).await;
        for response in responses {
            queue.push(response);
        }
    }
}

fn report(errors: &Mutex<Vec<ReportedError>>, state: &MessageState, error: PumpError) {
    tracing::warn!(
        thread_id = ?state.thread_id,
        from_id = ?state.from_id,
        kind = error.kind(),
        "{error}"
    );
    errors.lock().unwrap().push(ReportedError {
        thread_id: state.thread_id.clone(),
        from_id: state.from_id.clone(),
        error,
        raw_bytes: state.raw_bytes.clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ENVELOPE_NS;
    use crate::listener::{BoxFuture, FnHandler, HandlerResponse};
    use crate::payload::PayloadSchema;
    use crate::state::HandlerMetadata;
    use crate::xmltree::Element;
    use std::time::Duration;

    #[derive(Clone)]
    struct Ping {
        note: String,
    }

    impl crate::payload::Payload for Ping {
        fn payload_type_name() -> &'static str {
            "ping"
        }
        fn schema() -> PayloadSchema {
            PayloadSchema::default()
        }
        fn parse_element(elem: &Element) -> Result<Self, PumpError> {
            Ok(Ping {
                note: elem.text_trimmed().unwrap_or_default().to_string(),
            })
        }
        fn xml_value(&self, tag: &str) -> Element {
            Element::with_text(tag, &self.note)
        }
    }

    fn envelope_bytes(to: &str, body: &str) -> Vec<u8> {
        format!(
            r#"<message xmlns="{ENVELOPE_NS}"><meta><from>tester</from><to>{to}</to></meta><ping xmlns="">{body}</ping></message>"#
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn round_trips_a_single_message_to_completion() {
        let mut registry = ListenerRegistry::new(5);
        registry
            .register::<Ping, _>(
                "ponger",
                "replies to pings",
                false,
                vec![],
                false,
                FnHandler(|p: Ping, _m: HandlerMetadata| -> BoxFuture<'static, Result<HandlerResponse, PumpError>> {
                    Box::pin(async move {
                        assert_eq!(p.note, "hello");
                        Ok(HandlerResponse::None)
                    })
                }),
            )
            .unwrap();

        let pipeline = Arc::new(Pipeline::new(registry, ThreadRegistry::new(), 10, 10));
        pipeline.inject(envelope_bytes("ponger", "hello"), None, Some("tester".into()));

        let handle = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.run().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        pipeline.shutdown();
        handle.await.unwrap();

        assert_eq!(pipeline.state(), PumpState::Stopped);
        assert_eq!(pipeline.queue_len(), 0);
        assert_eq!(pipeline.in_flight_count(), 0);
        assert!(pipeline.errors().is_empty());
    }

    #[tokio::test]
    async fn unroutable_message_is_reported_not_panicked() {
        let registry = ListenerRegistry::new(5);
        let pipeline = Arc::new(Pipeline::new(registry, ThreadRegistry::new(), 10, 10));
        pipeline.inject(envelope_bytes("nobody", "hello"), None, Some("tester".into()));

        let handle = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.run().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        pipeline.shutdown();
        handle.await.unwrap();

        let errors = pipeline.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error.kind(), "NO_ROUTE");
    }
}
