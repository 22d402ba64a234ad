//! Envelope handling — spec §4.2 (Envelope Validator), §4.3 (Payload
//! Extractor), §6.1 (wire format), §6.5 (`<huh>` error convention).

use crate::error::PumpError;
use crate::xmltree::Element;

pub const ENVELOPE_NS: &str = "https://xml-pipeline.org/ns/envelope/v1";

pub fn env_tag(local: &str) -> String {
    format!("{{{ENVELOPE_NS}}}{local}")
}

/// `from`/`to`/`thread` pulled out of a validated envelope.
#[derive(Debug, Default, Clone)]
pub struct EnvelopeInfo {
    pub from: Option<String>,
    pub to: Option<String>,
    pub thread: Option<String>,
}

/// Either the `<meta>` element (meta-wrapped form) or the envelope root
/// itself (direct-child form) — wherever `<from>`/`<to>`/`<thread>` actually
/// live. Also returns the set of tags that are "control" elements and so
/// must be excluded when the payload extractor looks for the lone payload
/// child.
fn control_source(tree: &Element) -> Result<(&Element, Vec<String>), PumpError> {
    let meta_tag = env_tag("meta");
    let metas: Vec<&Element> = tree.find_all(&meta_tag).collect();
    if metas.len() > 1 {
        return Err(PumpError::EnvelopeInvalid("more than one <meta> element".into()));
    }
    match metas.first() {
        Some(meta) => Ok((meta, vec![meta_tag])),
        None => Ok((
            tree,
            vec![env_tag("from"), env_tag("to"), env_tag("thread")],
        )),
    }
}

fn at_most_one_text(container: &Element, local: &str) -> Result<Option<String>, PumpError> {
    let tag = env_tag(local);
    let matches: Vec<&Element> = container.find_all(&tag).collect();
    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches[0].text_trimmed().map(str::to_string)),
        _ => Err(PumpError::EnvelopeInvalid(format!("more than one <{local}> element"))),
    }
}

/// Envelope Validator (spec §4.2). Root must be `<message>` in the envelope
/// namespace, with at most one `<from>`, `<to>`, `<thread>` (whether found
/// directly or inside a single `<meta>` wrapper) and exactly one payload
/// element (checked by `extract_payload`, called right after).
pub fn validate_envelope(tree: &Element) -> Result<EnvelopeInfo, PumpError> {
    if tree.tag != env_tag("message") {
        return Err(PumpError::EnvelopeInvalid(format!(
            "root element is '{}', expected <message> in {ENVELOPE_NS}",
            tree.tag
        )));
    }

    let (container, _control_tags) = control_source(tree)?;
    let from = at_most_one_text(container, "from")?;
    let to = at_most_one_text(container, "to")?;
    let thread = at_most_one_text(container, "thread")?;

    Ok(EnvelopeInfo { from, to, thread })
}

/// Payload Extractor (spec §4.3). Exactly one non-control child is
/// required; zero or more than one is `PAYLOAD_SHAPE_INVALID`.
pub fn extract_payload(tree: &Element) -> Result<Element, PumpError> {
    let (_container, control_tags) = control_source(tree)?;

    let candidates: Vec<&Element> = tree
        .children
        .iter()
        .filter(|c| !control_tags.iter().any(|t| t == &c.tag))
        .collect();

    match candidates.len() {
        0 => Err(PumpError::PayloadShapeInvalid("no payload element found inside <message>".into())),
        1 => Ok(candidates[0].clone()),
        n => Err(PumpError::PayloadShapeInvalid(format!(
            "{n} payload roots found — exactly one is allowed"
        ))),
    }
}

/// Builds a `<meta>`-wrapped envelope (spec §9: "the rewrite should accept
/// both on ingress but emit only the `<meta>`-wrapped form").
pub fn build_envelope(from: &str, to: &str, thread_id: &str, payload: Element) -> Element {
    let mut meta = Element::new(env_tag("meta"));
    meta.children.push(Element::with_text(env_tag("from"), from));
    meta.children.push(Element::with_text(env_tag("to"), to));
    meta.children.push(Element::with_text(env_tag("thread"), thread_id));

    let mut payload = payload;
    // Payload must declare a namespace other than the envelope namespace;
    // empty namespace is accepted. If the caller left it bare, force "".
    if payload.namespace() == Some(ENVELOPE_NS) || payload.namespace().is_none() {
        payload.tag = payload.local_name().to_string();
    }

    let mut message = Element::new(env_tag("message"));
    message.children.push(meta);
    message.children.push(payload);
    message
}

/// The spec §6.5 `<huh>` error convention — a synthetic payload describing
/// a handler/pipeline failure.
pub fn huh_payload(message: &str) -> Element {
    Element::with_text("huh", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmltree::repair_and_canonicalize;

    fn parse(xml: &str) -> Element {
        repair_and_canonicalize(xml.as_bytes()).unwrap()
    }

    #[test]
    fn accepts_meta_wrapped_form() {
        let tree = parse(&format!(
            r#"<message xmlns="{ENVELOPE_NS}"><meta><from>user</from><to>greeter</to><thread>T1</thread></meta><Greeting xmlns=""><name>World</name></Greeting></message>"#
        ));
        let info = validate_envelope(&tree).unwrap();
        assert_eq!(info.from.as_deref(), Some("user"));
        assert_eq!(info.to.as_deref(), Some("greeter"));
        assert_eq!(info.thread.as_deref(), Some("T1"));

        let payload = extract_payload(&tree).unwrap();
        assert_eq!(payload.local_name(), "Greeting");
    }

    #[test]
    fn accepts_direct_child_form() {
        let tree = parse(&format!(
            r#"<message xmlns="{ENVELOPE_NS}"><from>user</from><to>greeter</to><Greeting xmlns=""><name>World</name></Greeting></message>"#
        ));
        let info = validate_envelope(&tree).unwrap();
        assert_eq!(info.from.as_deref(), Some("user"));
        assert_eq!(info.thread, None);

        let payload = extract_payload(&tree).unwrap();
        assert_eq!(payload.local_name(), "Greeting");
    }

    #[test]
    fn zero_payload_roots_is_shape_invalid() {
        let tree = parse(&format!(r#"<message xmlns="{ENVELOPE_NS}"><meta><from>user</from></meta></message>"#));
        let err = extract_payload(&tree).unwrap_err();
        assert_eq!(err.kind(), "PAYLOAD_SHAPE_INVALID");
    }

    #[test]
    fn two_payload_roots_is_shape_invalid() {
        let tree = parse(&format!(
            r#"<message xmlns="{ENVELOPE_NS}"><meta><from>user</from></meta><A xmlns=""/><B xmlns=""/></message>"#
        ));
        let err = extract_payload(&tree).unwrap_err();
        assert_eq!(err.kind(), "PAYLOAD_SHAPE_INVALID");
    }

    #[test]
    fn wrong_root_is_envelope_invalid() {
        let tree = parse(r#"<not-a-message/>"#);
        let err = validate_envelope(&tree).unwrap_err();
        assert_eq!(err.kind(), "ENVELOPE_INVALID");
    }

    #[test]
    fn build_envelope_emits_meta_wrapped_form() {
        let payload = Element::with_text("Ack", "ok");
        let envelope = build_envelope("greeter", "user", "T1", payload);
        assert_eq!(envelope.tag, env_tag("message"));
        let meta = envelope.find_child(&env_tag("meta")).unwrap();
        assert_eq!(meta.find_child(&env_tag("from")).unwrap().text_trimmed(), Some("greeter"));
    }
}
