//! Vesta Core
//!
//! Foundational types shared by every Vesta crate:
//!
//! - [`ObjectId`]: 128-bit content hashes used to deduplicate layouts and effects
//! - [`interner`]: global string interning for parameter and permutation key names
//! - [`ids`]: generational keys for long-lived objects and the per-frame node
//!   reference macro
//! - [`FrameStamp`]: "used during this frame" liveness tracking

pub mod hash;
pub mod ids;
pub mod interner;
pub mod liveness;

pub use hash::{ObjectId, ObjectIdBuilder};
pub use ids::{RenderObjectKey, StaticObjectNode};
pub use interner::Symbol;
pub use liveness::FrameStamp;
