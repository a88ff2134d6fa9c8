//! Persistence for the forecast bot.
//!
//! Dated artifact batches, the append-only weight history and the
//! retention window that prunes them.

pub mod artifacts;
pub mod retention;
pub mod weights;

pub use artifacts::{write_atomic, ArtifactKind, ArtifactStore, Batch, BatchFile};
pub use retention::{AgeBucket, DataStatus, KindStatus, RetentionManager, RetentionResult, SkippedArtifact};
pub use weights::{WeightHistory, WeightStore};
