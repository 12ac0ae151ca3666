//! Producer side: mirror a live node tree and encode its changes
//!
//! ## Architecture
//!
//! ```text
//!                 HostTree (live document)
//!                     │ reads
//!   MutationBatch ──► session ──► mutation ──► extract ──► ShadowTree
//!                     │              │                       │ updates()
//!                     │           throttle                   ▼
//!                     │                                   encoder
//!                     ▼                                      │
//!                 TaskScheduler                        EventQueue ──► payload
//! ```
//!
//! - [`host`]: the binding trait the live tree is read through
//! - [`virtual_dom`]: an in-memory host that records its own mutations
//! - [`shadow`], [`identity`], [`privacy`]: the mirrored tree
//! - [`task`]: cooperative single-runner scheduling with time budgets
//! - [`throttle`]: signature history that suppresses mutation storms

pub mod diagnostics;
pub mod encoder;
pub mod extract;
pub mod host;
pub mod identity;
pub mod metrics;
mod mutation;
pub mod privacy;
pub mod queue;
pub mod region;
pub mod session;
pub mod shadow;
mod state;
pub mod task;
pub mod throttle;
pub mod virtual_dom;

pub use diagnostics::{LogCode, Severity};
pub use host::{Dimensions, HostError, HostNodeKind, HostTree};
pub use metrics::MetricKey;
pub use region::{RegionInteraction, RegionVisibility};
pub use session::CaptureSession;
pub use shadow::{NodeMetadata, NodeRecord, Selectors, ShadowTree};
pub use task::{IdleDeadline, IdleSource, TaskCompletion, TaskScheduler, TaskState};
pub use virtual_dom::VirtualDocument;
