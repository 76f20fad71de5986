//! HTTP surface of the thor identity broker.
//!
//! Wires the access layer from `thor-platform-access` to axum routes,
//! Postgres storage and the GitHub and OpenID Connect providers.

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
