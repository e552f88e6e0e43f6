// Public API for integration tests and the relay-tail client

pub mod api;
pub mod config;
pub mod framer;
pub mod hub;
pub mod ingest;
pub mod protocol;
pub mod server;
pub mod state;
pub mod upstream;
pub mod view;
pub mod ws;
