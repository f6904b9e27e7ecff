//! Agent registry API models

pub mod models;
