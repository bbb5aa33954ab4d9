//! vigil-backend
//!
//! Server-fleet monitoring backend: agents push samples over a
//! websocket, the live state store holds the current view of every
//! known host, the persistence pipeline rolls samples into five fixed
//! resolutions, and dashboards subscribe to a coalesced delta stream.
//! `main.rs` wires these into one `axum::Router`; everything else here
//! is usable standalone (and is, throughout the test suite).

pub mod admin;
pub mod auth;
pub mod codec;
pub mod collector;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod history;
pub mod ingest;
pub mod live_state;
pub mod middleware;
pub mod models;
pub mod persistence;
pub mod state;

pub use error::AppError;
