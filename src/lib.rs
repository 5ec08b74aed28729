//! Editgate - Admission Control for an AI Image-Editing Endpoint
//!
//! This crate protects a costly downstream edit operation with a per-client
//! rate limiter, a system-wide circuit breaker and a system-wide load shedder.
//! State is held in memory by a single process.

pub mod admission;
pub mod backend;
pub mod config;
pub mod error;
pub mod http;
