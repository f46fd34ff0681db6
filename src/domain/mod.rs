//! Domain models for Rollcall Core

mod common;

pub mod approval;
pub mod password;
pub mod revocation;
pub mod security;
pub mod tenant;
pub mod user;

pub use approval::*;
pub use common::StringUuid;
pub use password::*;
pub use revocation::*;
pub use security::*;
pub use tenant::*;
pub use user::*;
