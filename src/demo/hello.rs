//! Multi-agent hello world: `user -> greeter -> shouter -> user`.
//!
//! Direct port of `handlers/hello.py`'s `Greeting` / `GreetingResponse` /
//! `ShoutedResponse` dataclasses and their two handlers, onto the
//! `Payload`/`Handler` traits. Registered by `bootstrap` against an
//! `OrganismConfig` whose `listeners` name `greeter`/`shouter` with these
//! payload classes.

use xmlpipeline_core::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub name: String,
}

impl Payload for Greeting {
    fn payload_type_name() -> &'static str {
        "greeting"
    }

    fn schema() -> PayloadSchema {
        PayloadSchema::new(&["name"])
    }

    fn parse_element(elem: &Element) -> Result<Self, PumpError> {
        let name = elem
            .find_child("name")
            .and_then(|c| c.text_trimmed())
            .ok_or_else(|| PumpError::DeserialisationFailed("Greeting missing <name>".into()))?
            .to_string();
        Ok(Greeting { name })
    }

    fn xml_value(&self, tag: &str) -> Element {
        Element::new(tag).child(Element::with_text("name", &self.name))
    }
}

/// Greeter's response — forwarded on to `shouter`, not back to the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreetingResponse {
    pub message: String,
    /// Tracks who started the conversation, so `shouter` knows where to
    /// send the final `ShoutedResponse`.
    pub original_sender: String,
}

impl Payload for GreetingResponse {
    fn payload_type_name() -> &'static str {
        "greetingresponse"
    }

    fn schema() -> PayloadSchema {
        PayloadSchema::new(&["message", "original_sender"])
    }

    fn parse_element(elem: &Element) -> Result<Self, PumpError> {
        let message = elem
            .find_child("message")
            .and_then(|c| c.text_trimmed())
            .ok_or_else(|| PumpError::DeserialisationFailed("GreetingResponse missing <message>".into()))?
            .to_string();
        let original_sender = elem
            .find_child("original_sender")
            .and_then(|c| c.text_trimmed())
            .ok_or_else(|| PumpError::DeserialisationFailed("GreetingResponse missing <original_sender>".into()))?
            .to_string();
        Ok(GreetingResponse { message, original_sender })
    }

    fn xml_value(&self, tag: &str) -> Element {
        Element::new(tag)
            .child(Element::with_text("message", &self.message))
            .child(Element::with_text("original_sender", &self.original_sender))
    }
}

/// Shouter's ALL CAPS response, sent back to the original sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShoutedResponse {
    pub message: String,
}

impl Payload for ShoutedResponse {
    fn payload_type_name() -> &'static str {
        "shoutedresponse"
    }

    fn schema() -> PayloadSchema {
        PayloadSchema::new(&["message"])
    }

    fn parse_element(elem: &Element) -> Result<Self, PumpError> {
        let message = elem
            .find_child("message")
            .and_then(|c| c.text_trimmed())
            .ok_or_else(|| PumpError::DeserialisationFailed("ShoutedResponse missing <message>".into()))?
            .to_string();
        Ok(ShoutedResponse { message })
    }

    fn xml_value(&self, tag: &str) -> Element {
        Element::new(tag).child(Element::with_text("message", &self.message))
    }
}

/// Receives `Greeting`, forwards a `GreetingResponse` to `shouter`. Flow:
/// user -> greeter -> shouter.
pub fn handle_greeting(payload: Greeting, metadata: HandlerMetadata) -> BoxFuture<'static, Result<HandlerResponse, PumpError>> {
    Box::pin(async move {
        let response = GreetingResponse {
            message: format!("Hello, {}!", payload.name),
            original_sender: metadata.from_id,
        };
        Ok(HandlerResponse::Reply {
            payload: response.xml_value("GreetingResponse"),
            to: "shouter".to_string(),
        })
    })
}

/// Receives `GreetingResponse`, shouts it back to the original sender.
/// Flow: greeter -> shouter -> user.
pub fn handle_shout(payload: GreetingResponse, _metadata: HandlerMetadata) -> BoxFuture<'static, Result<HandlerResponse, PumpError>> {
    Box::pin(async move {
        let response = ShoutedResponse {
            message: payload.message.to_uppercase(),
        };
        Ok(HandlerResponse::Reply {
            payload: response.xml_value("ShoutedResponse"),
            to: payload.original_sender,
        })
    })
}
