//! Wire protocol shared by producer and consumer
//!
//! ## Components
//!
//! - [`envelope`]: positional payload header and the `{ e, a, p }` shape
//! - [`version`]: `MAJOR.MINOR.PATCH[-bBETA]` parsing and drift tolerance
//! - [`selector`] and [`hash`]: node addressing
//! - [`scrub`]: privacy masking and its decoder-side inverse
//! - [`tokenize`]: back-reference compaction of repeated strings

pub mod envelope;
pub mod hash;
pub mod scrub;
pub mod selector;
pub mod tokenize;
pub mod version;

pub use envelope::{Envelope, UploadMode, WirePayload};
pub use version::{check_version, Version};

/// Protocol version spoken by this build.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Layout sizes are multiplied by this before being sent as integers.
pub const BOX_PRECISION: f64 = 100.0;
