//! `tape-session`: inspect and drive append-only agent session logs.
//!
//! The storage engine lives in the `session_store` crate; this crate wires it
//! to a CLI, environment configuration, builtin tools and a small agent loop.

pub mod agent;
pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod tools;
