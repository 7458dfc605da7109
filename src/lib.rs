//! Client-side coordination of long-running analyses on a compute engine.
//!
//! Jobs are started over a request/response call while their progress arrives
//! on a separate event channel; the two are reconciled by analysis id. Result
//! pages fetched from the engine are kept in a cache bounded per pool.

pub mod api;
pub mod buffer;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod listener;
pub mod maintenance;
pub mod models;
pub mod notify;
pub mod registry;
pub mod service;
pub mod state;

pub use config::Config;
pub use service::AnalysisService;
