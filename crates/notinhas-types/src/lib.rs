//! Shared data types for the Notinhas blog server.
//!
//! `models` holds the domain aggregates persisted by `notinhas-db`; `api`
//! holds the JSON request and response bodies exchanged over HTTP.

pub mod api;
pub mod models;
