//! Deployment module

pub mod archive;
pub mod build;
pub mod chain;
pub mod fsm;
pub mod git;
pub mod orchestrator;
pub mod provision;
pub mod runner;
pub mod shell;
pub mod ssh;
pub mod supervisor;
pub mod transcript;
pub mod transfer;
pub mod transport;
