//! Per-user browser session spawner.
//!
//! Maps `/u/<id>` request paths to one browser container per id, registers a
//! path-prefix route for each container through runtime labels, and reaps
//! sessions that stop producing forward-auth traffic.

pub mod api;
pub mod app_config;
pub mod container;
pub mod identity;
pub mod routing;
pub mod session;
