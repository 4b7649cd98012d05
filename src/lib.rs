//! Paged Microsoft Graph reports: fetch, join, filter, sort and export
//!
//! The binary in `main.rs` is a thin clap front end; everything it runs
//! lives here so the pipeline can be driven against a mock Graph server.

pub mod cmd;
pub mod config;
pub mod error;
pub mod graph;
pub mod report;
