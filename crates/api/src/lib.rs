//! Courier API server: HTTP surface for job submission and health.

pub mod routes;
pub mod state;
