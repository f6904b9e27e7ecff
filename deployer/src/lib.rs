//! Deployer Library
//!
//! Core modules for deploying Node.js applications to remote hosts over SSH.

pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod registry;
pub mod storage;
pub mod utils;
