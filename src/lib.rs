//! `xmlpipeline` — wires an `OrganismConfig` to a running `Pipeline`, the
//! Rust counterpart of `run_organism.py` / `bootstrap()`.
//!
//! The source resolves `payload_class`/`handler` strings via Python's
//! import machinery at bootstrap time. Rust has no equivalent runtime
//! reflection, so `bootstrap` here matches the config's `handler` string
//! against a small fixed table of the demo listeners this crate ships
//! (`demo::hello`). A deployment with more handlers would grow that table;
//! nothing about `xmlpipeline-core` depends on it.

pub mod demo;

use xmlpipeline_core::prelude::*;
use xmlpipeline_organism::OrganismConfig;

use demo::hello::{handle_greeting, handle_shout, Greeting, GreetingResponse};

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("listener '{0}' names unknown handler '{1}'")]
    UnknownHandler(String, String),
    #[error(transparent)]
    Registration(#[from] PumpError),
}

/// Builds a `Pipeline` from a parsed organism description, registering
/// every listener named in `config.listeners` against this crate's demo
/// handler table.
pub fn bootstrap(config: &OrganismConfig) -> Result<Pipeline, BootstrapError> {
    let mut registry = ListenerRegistry::new(config.max_concurrent_per_agent);

    for listener in &config.listeners {
        match listener.handler.as_str() {
            "xmlpipeline::demo::hello::handle_greeting" => {
                registry.register::<Greeting, _>(
                    listener.name.clone(),
                    listener.description.clone(),
                    listener.agent,
                    listener.peers.clone(),
                    listener.broadcast,
                    FnHandler(handle_greeting),
                )?;
            }
            "xmlpipeline::demo::hello::handle_shout" => {
                registry.register::<GreetingResponse, _>(
                    listener.name.clone(),
                    listener.description.clone(),
                    listener.agent,
                    listener.peers.clone(),
                    listener.broadcast,
                    FnHandler(handle_shout),
                )?;
            }
            other => return Err(BootstrapError::UnknownHandler(listener.name.clone(), other.to_string())),
        }
    }

    Ok(Pipeline::new(
        registry,
        ThreadRegistry::new(),
        config.max_concurrent_pipelines,
        config.max_concurrent_handlers,
    ))
}
