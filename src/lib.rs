//! Wolfline Voice Trading Library
//!
//! This library provides the core components for the Wolfline voice-driven
//! paper trading service.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
