//! `ListenerRegistry` — owns the Routing Table and Per-Agent Semaphore Map
//! (spec §3), and implements the Router (spec §4.5).
//!
//! Populated once at bootstrap, read-only thereafter — safe for concurrent
//! readers without locks (spec §5 "Shared-resource policy").

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::PumpError;
use crate::listener::{Handler, Listener};
use crate::payload::Payload;

pub struct ListenerRegistry {
    listeners: Vec<Arc<Listener>>,
    by_name: HashMap<String, Arc<Listener>>,
    /// `root_tag -> listener`. Unique by construction (registration fails
    /// on collision) — this is exactly the set the testable invariant in
    /// spec §8 quantifies over.
    routing_table: HashMap<String, Arc<Listener>>,
    /// `payload_type -> listeners`, populated only for `broadcast: true`
    /// listeners, in registration order. Consulted when a message carries
    /// no `to` (the "naked broadcast form" of spec §4.5).
    broadcast_index: HashMap<String, Vec<Arc<Listener>>>,
    max_concurrent_per_agent: usize,
}

impl ListenerRegistry {
    pub fn new(max_concurrent_per_agent: usize) -> Self {
        ListenerRegistry {
            listeners: Vec::new(),
            by_name: HashMap::new(),
            routing_table: HashMap::new(),
            broadcast_index: HashMap::new(),
            max_concurrent_per_agent,
        }
    }

    /// Register a listener. Fails if the name or the derived `root_tag` is
    /// already taken (spec §3 invariant: "`root_tag` is unique across
    /// listeners; registration fails on collision").
    pub fn register<P, H>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        is_agent: bool,
        peers: Vec<String>,
        broadcast: bool,
        handler: H,
    ) -> Result<Arc<Listener>, PumpError>
    where
        P: Payload,
        H: Handler<P> + 'static,
    {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(PumpError::Internal(format!("listener name collision: '{name}'")));
        }

        let semaphore = if is_agent {
            Some(Arc::new(Semaphore::new(self.max_concurrent_per_agent)))
        } else {
            None
        };

        let listener = Arc::new(Listener::new::<P, H>(
            name,
            description,
            is_agent,
            peers,
            broadcast,
            semaphore,
            handler,
        ));

        if self.routing_table.contains_key(&listener.root_tag) {
            return Err(PumpError::Internal(format!(
                "root_tag collision: '{}'",
                listener.root_tag
            )));
        }

        self.routing_table.insert(listener.root_tag.clone(), listener.clone());
        if listener.broadcast {
            self.broadcast_index
                .entry(listener.payload_type_name.clone())
                .or_default()
                .push(listener.clone());
        }
        self.by_name.insert(listener.name.clone(), listener.clone());
        self.listeners.push(listener.clone());

        Ok(listener)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Listener>> {
        self.by_name.get(name).cloned()
    }

    pub fn listeners(&self) -> &[Arc<Listener>] {
        &self.listeners
    }

    /// The set of `root_tag`s — always exactly
    /// `{ lowercase(name) + "." + lowercase(payload_type) }` with no dupes.
    pub fn root_tags(&self) -> HashSet<String> {
        self.routing_table.keys().cloned().collect()
    }

    /// Router (spec §4.5): directed lookup when `to_id` is non-empty,
    /// naked/broadcast lookup otherwise. Tie-breaks on the broadcast path
    /// are registration order, since `broadcast_index` entries are pushed
    /// in registration order and never reordered.
    pub fn resolve(&self, to_id: Option<&str>, payload_tag: &str) -> Result<Vec<Arc<Listener>>, PumpError> {
        let tag = payload_tag.to_lowercase();
        match to_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(to) => {
                let key = format!("{}.{}", to.to_lowercase(), tag);
                self.routing_table
                    .get(&key)
                    .cloned()
                    .map(|l| vec![l])
                    .ok_or_else(|| PumpError::NoRoute(key))
            }
            None => match self.broadcast_index.get(&tag) {
                Some(listeners) if !listeners.is_empty() => Ok(listeners.clone()),
                _ => Err(PumpError::NoRoute(tag)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PumpError as E;
    use crate::listener::{FnHandler, HandlerResponse};
    use crate::payload::PayloadSchema;
    use crate::state::HandlerMetadata;
    use crate::xmltree::Element;

    #[derive(Clone)]
    struct Ping;

    impl Payload for Ping {
        fn payload_type_name() -> &'static str {
            "ping"
        }
        fn schema() -> PayloadSchema {
            PayloadSchema::default()
        }
        fn parse_element(_elem: &Element) -> Result<Self, E> {
            Ok(Ping)
        }
        fn xml_value(&self, tag: &str) -> Element {
            Element::new(tag)
        }
    }

    fn noop_handler() -> FnHandler<impl Fn(Ping, HandlerMetadata) -> crate::listener::BoxFuture<'static, Result<HandlerResponse, E>> + Send + Sync>
    {
        FnHandler(|_p: Ping, _m: HandlerMetadata| Box::pin(async { Ok(HandlerResponse::None) }))
    }

    #[test]
    fn root_tag_is_unique_and_matches_formula() {
        let mut reg = ListenerRegistry::new(5);
        reg.register::<Ping, _>("pinger", "desc", false, vec![], false, noop_handler())
            .unwrap();

        assert_eq!(reg.root_tags(), HashSet::from(["pinger.ping".to_string()]));

        let err = reg
            .register::<Ping, _>("pinger", "dup", false, vec![], false, noop_handler())
            .unwrap_err();
        assert_eq!(err.kind(), "INTERNAL");
    }

    #[test]
    fn directed_route_resolves() {
        let mut reg = ListenerRegistry::new(5);
        reg.register::<Ping, _>("pinger", "desc", false, vec![], false, noop_handler())
            .unwrap();

        let found = reg.resolve(Some("pinger"), "Ping").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "pinger");
    }

    #[test]
    fn unknown_route_errors() {
        let reg = ListenerRegistry::new(5);
        let err = reg.resolve(Some("nonexistent"), "Ping").unwrap_err();
        assert_eq!(err.kind(), "NO_ROUTE");
    }

    #[test]
    fn naked_route_only_hits_broadcast_listeners_in_registration_order() {
        let mut reg = ListenerRegistry::new(5);
        reg.register::<Ping, _>("first", "d", false, vec![], true, noop_handler())
            .unwrap();
        reg.register::<Ping, _>("second", "d", false, vec![], true, noop_handler())
            .unwrap();
        reg.register::<Ping, _>("silent", "d", false, vec![], false, noop_handler())
            .unwrap();

        let found = reg.resolve(None, "Ping").unwrap();
        let names: Vec<&str> = found.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
