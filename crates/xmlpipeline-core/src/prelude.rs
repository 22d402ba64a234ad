//! Everything a listener crate needs, in one `use`.

pub use crate::dispatch::Dispatcher;
pub use crate::envelope::{build_envelope, huh_payload, EnvelopeInfo, ENVELOPE_NS};
pub use crate::error::PumpError;
pub use crate::listener::{BoxFuture, FnHandler, Handler, HandlerResponse, Listener};
pub use crate::payload::{Payload, PayloadSchema};
pub use crate::pump::{Pipeline, PumpState, ReportedError};
pub use crate::registry::ListenerRegistry;
pub use crate::state::{HandlerMetadata, MessageState};
pub use crate::thread::{assign_thread_id, ThreadRegistry};
pub use crate::xmltree::{repair_and_canonicalize, Element};
