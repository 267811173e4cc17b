//! Project Model
//!
//! In-memory representation of a production's folder/asset tree, the sync
//! and upload state of every node, and the naming suggestions waiting for a
//! decision.

pub mod node;
pub mod project;
pub mod suggestion;

pub use node::*;
pub use project::*;
pub use suggestion::*;
