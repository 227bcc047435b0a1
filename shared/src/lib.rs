//! Types shared by the access gateway (`server`) and the terminal client (`tui`).
//!
//! - [`types`] — sessions, roles, token claims, wire envelopes, config structs
//! - [`policy`] — route classification and the access decision
//! - [`config`] — TOML loading and the hot-reloadable [`config::LiveConfig`]

pub mod config;
pub mod policy;
pub mod types;
