//! Transparent, tamper-evident capture of method invocations, with
//! optional hash-chained signing and blockchain anchoring.

#![allow(clippy::type_complexity)]
#![warn(missing_docs)]

/// Re-export of the `futures` crate.
#[macro_use]
pub extern crate futures;

pub mod canonical;
pub mod clock;
pub mod error;
pub mod redact;
pub mod store;
pub mod types;
pub mod value;

#[cfg(feature = "async-runtime")]
pub mod cache;
#[cfg(feature = "async-runtime")]
pub mod config;
#[cfg(feature = "async-runtime")]
pub mod consistency;
#[cfg(feature = "async-runtime")]
pub mod interceptor;

#[cfg(feature = "signing")]
pub mod signing;
#[cfg(feature = "signing")]
pub mod wallet;

#[cfg(all(feature = "signing", feature = "async-runtime"))]
pub mod wrapper;

pub use crate::error::{Error, Result};
pub use crate::types::{AnchorState, AnchorStatus, ErrorInfo, Outcome, SignedRecord, TraceEntry};
pub use crate::value::Value;

#[cfg(all(feature = "signing", feature = "async-runtime"))]
pub use crate::wrapper::Wrapper;

#[cfg(feature = "async-runtime")]
pub use crate::config::{Config, ConfigBuilder, ConsistencyMode, KeySource};
