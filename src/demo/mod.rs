//! Demo listeners used by the integration tests and by `cargo run`.

pub mod hello;
