//! Admin HTTP surface and process wiring for the `feedrelay` service.

pub mod middleware;
pub mod routes;
pub mod state;
