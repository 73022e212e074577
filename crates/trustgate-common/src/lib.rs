//! # Trustgate Common
//!
//! Shared types, traits, and utilities used across Trustgate components.
//!
//! ## Modules
//! - `types` - Core data structures (VerificationStatus, CapabilitySet, etc.)
//! - `error` - Common error types
//! - `constants` - Shared configuration constants

pub mod constants;
pub mod error;
pub mod types;

pub use error::TrustgateError;
pub use types::*;
