//! # EduSync Testkit
//!
//! Test utilities for EduSync.
//!
//! This crate provides:
//! - Domain fixtures (courses, groups, students, notifications) as typed
//!   rows and as the JSON the API serves
//! - Property-based test generators using proptest
//! - Store snapshots for before/after comparisons
//! - One-call tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use edusync_testkit::prelude::*;
//!
//! #[test]
//! fn rollback_restores_roster() {
//!     let mut store = roster_store(&[(10, "Ana"), (11, "Ben")]);
//!     let before = StoreSnapshot::capture(&store);
//!     // ... mutate and roll back
//!     assert_eq!(StoreSnapshot::capture(&store), before);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
}

pub use fixtures::*;
pub use generators::*;

/// Installs a test subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
