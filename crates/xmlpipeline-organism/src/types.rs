//! Organism config types — spec §6.2.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_port() -> u16 {
    8765
}

fn default_max_concurrent_pipelines() -> usize {
    50
}

fn default_max_concurrent_handlers() -> usize {
    20
}

fn default_max_concurrent_per_agent() -> usize {
    5
}

/// Policy hint for the queue driver. The core pump is strictly FIFO and
/// does not currently act on this beyond carrying it through — see
/// `xmlpipeline_core::thread::ThreadRegistry` doc comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ThreadScheduling {
    #[default]
    BreadthFirst,
    DepthFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListenerConfig {
    pub name: String,
    /// Fully-qualified identifier of the payload type this listener
    /// consumes, e.g. `xmlpipeline::demo::hello::Greeting`.
    pub payload_class: String,
    /// Fully-qualified identifier of the handler function.
    pub handler: String,
    pub description: String,
    #[serde(default)]
    pub agent: bool,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default)]
    pub broadcast: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Organism {
    pub name: String,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OrganismConfig {
    pub organism: Organism,
    #[serde(default)]
    pub thread_scheduling: ThreadScheduling,
    #[serde(default = "default_max_concurrent_pipelines")]
    pub max_concurrent_pipelines: usize,
    #[serde(default = "default_max_concurrent_handlers")]
    pub max_concurrent_handlers: usize,
    #[serde(default = "default_max_concurrent_per_agent")]
    pub max_concurrent_per_agent: usize,
    pub listeners: Vec<ListenerConfig>,
}
