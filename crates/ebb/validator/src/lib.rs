//! # Ebb Validator - Deployment pre-checks and post-checks
//!
//! Pre-checks run before any mutating cloud call and never mutate anything:
//!
//! - template validity (naming rules, duplicate names, scale bounds)
//! - global name availability, via a dry-run existence query per globally
//!   unique resource
//!
//! Post-checks run after the mutation:
//!
//! - resource existence confirmation
//! - an application-level health probe, polled with backoff over a bounded
//!   window
//!
//! Every failure names the check that failed so the controller can record it
//! on the layer's `Failed` state.

#![deny(unsafe_code)]

pub mod error;
pub mod template;
pub mod validator;

pub use error::{PostCheckError, ValidationError};
pub use template::{validate_name, validate_scale, validate_template};
pub use validator::DeploymentValidator;
