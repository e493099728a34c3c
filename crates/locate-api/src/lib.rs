//! # Locate API
//!
//! Shared types, errors, and the client SDK for the Locate API v2.
//!
//! ## Modules
//! - `types` - Wire structures (Target, QueryFilter, NearestResult)
//! - `error` - Query and client error taxonomy
//! - `constants` - Shared defaults, paths, and claim identifiers
//! - `client` - Outbound HTTP client for a deployed locate service

pub mod client;
pub mod constants;
pub mod error;
pub mod types;

pub use client::{LocateClient, nearest_url, parse_nearest_reply};
pub use error::LocateError;
pub use types::*;
