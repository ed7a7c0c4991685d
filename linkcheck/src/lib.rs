//! LinkCheck service
//!
//! Checks reachability of batches of URLs. Re-checks go through a persistent
//! task queue whose state survives restarts; results are served as PDF
//! reports over HTTP.

pub mod api;
pub mod checker;
pub mod config;
pub mod controller;
pub mod logger;
pub mod model;
pub mod queue;
pub mod report;
pub mod store;
