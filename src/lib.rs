//! Rollcall Core - Identity & Access Control engine
//!
//! Authentication, bearer credential issuance and revocation, role and
//! capability gating, approval workflow and security event monitoring for a
//! multi-tenant attendance platform. Transport-agnostic: an HTTP layer maps
//! its requests onto these engines.

pub mod cache;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod jwt;
pub mod repository;
pub mod service;
pub mod telemetry;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{AppError, Result};
