//! HTTP clients for backend communication

pub mod agents;
pub mod client;
