//! # fim-store
//!
//! Durable record store and content fingerprinting.
//!
//! [`RecordStore`] is the single mutation gateway for tracked-file rows;
//! [`fingerprint`] and [`modified_at`] are the filesystem reads both the
//! watcher and the reconciler feed into it.

pub mod error;
pub mod fingerprint;
pub mod store;

pub use error::{FingerprintError, StoreError};
pub use fingerprint::{fingerprint, modified_at};
pub use store::RecordStore;
