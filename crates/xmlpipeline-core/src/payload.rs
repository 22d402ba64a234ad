//! The payload type boundary — spec §6.4.
//!
//! The Python original resolves this with `@xmlify` + runtime introspection
//! (`pydantic`-style). Design Note (a) in spec.md §9 calls out the systems
//! port as either a registry of constructor functions or a closed sum type;
//! we take (a) — `ListenerRegistry::register::<P: Payload>` installs a
//! type-erased constructor closure, so new payload types never require
//! touching the pump itself.

use crate::error::PumpError;
use crate::xmltree::Element;

/// A structural schema: which child tags a payload element must/may carry.
/// This stands in for the XSD the Python original generates via
/// `schemars`-style introspection — there is no Rust XSD engine in the
/// corpus to reach for, so validation here is a direct, cheap structural
/// check rather than a full grammar. Sufficient for spec §4.6's contract:
/// reject/accept before attempting typed construction.
#[derive(Debug, Clone, Default)]
pub struct PayloadSchema {
    pub required_children: Vec<&'static str>,
}

impl PayloadSchema {
    pub fn new(required_children: &[&'static str]) -> Self {
        PayloadSchema {
            required_children: required_children.to_vec(),
        }
    }

    /// `SCHEMA_INVALID` if any required child is missing.
    pub fn validate(&self, elem: &Element) -> Result<(), PumpError> {
        for tag in &self.required_children {
            if elem.find_child(tag).is_none() {
                return Err(PumpError::SchemaInvalid(format!(
                    "missing required child <{tag}> in <{}>",
                    elem.local_name()
                )));
            }
        }
        Ok(())
    }
}

/// A payload type: constructible from a parsed element, serialisable back
/// to one, and able to describe its own schema.
pub trait Payload: Send + Sync + Clone + 'static {
    /// The payload's local tag name, lowercased, e.g. `"greeting"` for
    /// `<Greeting>`. Combined with a listener's name this forms `root_tag`.
    fn payload_type_name() -> &'static str
    where
        Self: Sized;

    fn schema() -> PayloadSchema
    where
        Self: Sized;

    fn parse_element(elem: &Element) -> Result<Self, PumpError>
    where
        Self: Sized;

    /// Serialise to an XML element under the given local tag (no envelope
    /// wrapping — that's `envelope::build_envelope`'s job).
    fn xml_value(&self, tag: &str) -> Element;
}
