//! Presence and realtime relay server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod call;
pub mod chat;
pub mod config;
pub mod proto;
pub mod routes;
pub mod state;
pub mod status;
pub mod store;
pub mod ws;
