//! vigil server: ingest API, operator API, and the scheduling runtime.
//!
//! The binary wires an axum HTTP app (agent ingest plus the operator
//! read/write surface, OpenAPI-documented) to the worker runtime: queue
//! routers that serialize evaluation and notification per subject, the
//! HTTP prober, the heartbeat and evaluation sweeps, and the outbox
//! deliverer.

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod heartbeat;
pub mod logging;
pub mod outbox;
pub mod probe;
pub mod runtime;
pub mod state;
pub mod sweep;
