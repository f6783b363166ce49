//! modelcheck Core
//!
//! Types shared across the modelcheck validation service.
//!
//! This crate provides:
//! - The validation request and verdict exchanged with callers
//! - The model family enumeration used to pick a validator
//! - The error type every stage reports through

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ModelFamily, ValidationRequest, ValidationResult};
