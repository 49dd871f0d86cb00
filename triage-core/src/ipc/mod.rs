//! Serializable event types crossing the core's boundaries.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so hosts can
//! forward them to a UI or persist them alongside a report.

pub mod events;
