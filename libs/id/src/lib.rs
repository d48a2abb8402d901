//! # flotilla-id
//!
//! Stable ID types, parsing, and validation for the flotilla fleet controller.
//!
//! ## Design Principles
//!
//! - IDs are stable and controller-generated; names are operator-controlled labels
//! - All IDs have a canonical string representation with strict parsing
//! - IDs support roundtrip serialization (parse → format → parse)
//! - IDs are typed to prevent mixing different resource kinds
//!
//! ## ID Format
//!
//! All resource IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `pool_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `claim_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `node_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! This format provides:
//! - Type safety (prefix indicates resource kind)
//! - Sortability (ULID is time-ordered, so oldest-first selection is a plain sort)
//! - Uniqueness (ULID has 80 bits of randomness)
//! - Human readability (clear prefixes)

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
