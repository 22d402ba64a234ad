//! Response Fan-out — spec §4.8.
//!
//! A handler's response bytes may carry several sibling root elements (one
//! per outgoing payload). We wrap them in a throwaway container element,
//! parse once, and emit one `MessageState` per child — each inheriting the
//! thread id and carrying `from_id = listener.name`. A parse failure here
//! leaves the state untouched so the *next* time it's processed (envelope
//! validation, on re-entry) the same bytes produce the same observable
//! error, rather than this stage inventing a different one.

use crate::state::MessageState;
use crate::xmltree::repair_and_canonicalize;

const FANOUT_WRAPPER: &str = "xmlpipeline-fanout-container";

fn wrap(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 64);
    out.extend_from_slice(format!("<{FANOUT_WRAPPER}>").as_bytes());
    out.extend_from_slice(raw);
    out.extend_from_slice(format!("</{FANOUT_WRAPPER}>").as_bytes());
    out
}

/// Fan a single response-producing `MessageState` out into one state per
/// top-level sibling in its `raw_bytes`. A state with no `raw_bytes` (e.g.
/// one that already failed upstream) passes through unchanged.
pub fn fan_out(state: MessageState) -> Vec<MessageState> {
    let Some(raw) = state.raw_bytes.clone() else {
        return vec![state];
    };

    let wrapped = wrap(&raw);
    let container = match repair_and_canonicalize(&wrapped) {
        Ok(c) => c,
        Err(_) => return vec![state],
    };

    if container.children.is_empty() {
        return vec![state];
    }

    let thread_id = state.thread_id.clone().unwrap_or_default();
    let from_id = state.from_id.clone().unwrap_or_default();

    container
        .children
        .into_iter()
        .map(|child| MessageState::from_response(child.to_xml_bytes(), thread_id.clone(), from_id.clone()))
        .collect()
}
