//! Domain model for the batch generation task client.
//!
//! Everything in this crate is transport-agnostic: task status and
//! identity, the launch request and its wire parameters, result
//! collections, the persisted snapshot, and the protocol name constants
//! shared by the router and the command encoder.

pub mod error;
pub mod launch;
pub mod protocol;
pub mod results;
pub mod snapshot;
pub mod types;

pub use error::CoreError;
pub use launch::{BatchCopyParams, EntityFilters, LaunchRequest, TypeFilter};
pub use results::{ExtractedEntity, GeneratedArticle};
pub use snapshot::TaskSnapshot;
pub use types::{TaskIdentity, TaskStats, TaskStatus, Timestamp};
