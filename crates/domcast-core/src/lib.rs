//! Domcast Core Library
//!
//! Captures the structure of a live, mutating node tree, serializes the
//! observed changes into a compact positional token format, and decodes that
//! format back into typed events in a separate process.
//!
//! ## Overview
//!
//! ```text
//! change batches ─► MutationPipeline ─► ShadowTree ─► Encoder ─► EventQueue
//!                        (capture)                                   │
//!                                                                    ▼ flush()
//!                                                       { e, a, p } JSON payload
//!                                                                    │
//!                  typed event arrays ◄── Decoder ◄── version check ◄┘
//!                        (decode)
//! ```
//!
//! ## Core Principles
//!
//! - **Never block the host**: mutation processing is a cooperative task that
//!   yields whenever its time budget is spent
//! - **Storm tolerant**: repeated near-identical mutations are throttled by
//!   signature, with deferred removals replayed so the final state is correct
//! - **Byte frugal**: repeated strings inside one event become back-references
//! - **Drift tolerant**: decoders accept payloads from adjacent patch releases
//!
//! ## Quick Start
//!
//! ```ignore
//! use domcast_core::{decode, CaptureConfig, CaptureSession, VirtualDocument};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let document = VirtualDocument::new();
//!     let session = CaptureSession::new(CaptureConfig::default(), document.clone())?;
//!
//!     let html = document.create_element("HTML");
//!     document.append_child(document.root(), html);
//!
//!     // Mirror the whole tree once
//!     session.discover().completed().await;
//!
//!     // Feed mutation batches as the host reports them
//!     let body = document.create_element("BODY");
//!     document.append_child(html, body);
//!     session.handle(document.take_records()).completed().await;
//!
//!     // Ship a payload and read it back
//!     let payload = session.flush(false)?;
//!     let decoded = decode(&payload)?;
//!     println!("{} dom events", decoded.dom.len());
//!     Ok(())
//! }
//! ```

pub mod capture;
pub mod config;
pub mod decode;
pub mod error;
pub mod protocol;
pub mod types;

// Re-exports
pub use capture::{
    CaptureSession, Dimensions, HostError, HostNodeKind, HostTree, MetricKey, NodeMetadata,
    NodeRecord, RegionInteraction, RegionVisibility, ShadowTree, TaskCompletion, VirtualDocument,
};
pub use config::{CaptureConfig, DecoderConfig, MaskRule};
pub use decode::{decode, decode_with, DecodedEvent, DecodedPayload, DomData};
pub use error::{CaptureError, CaptureResult, DecodeError, DecodeResult};
pub use protocol::{Envelope, UploadMode, Version, WirePayload, PROTOCOL_VERSION};
pub use types::*;
