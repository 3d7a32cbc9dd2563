//! # guidora-server
//!
//! HTTP server library for the guidora appointment-booking backend.
//!
//! This library provides the API handlers and state management for guidora.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
