//! Identity and access control engines

pub mod access_control;
pub mod approval;
pub mod password;
pub mod revocation;
pub mod security_monitor;

pub use access_control::{AccessControlEngine, AuthResult, RegistrationPath};
pub use approval::ApprovalWorkflow;
pub use password::PasswordPolicyEngine;
pub use revocation::RevocationRegistry;
pub use security_monitor::{RecordedEvent, SecurityMonitor, SecurityRecorder};
