//! # gktrack
//!
//! Core data model shared by every GrooveKeeper crate: the immutable
//! [`TrackDescriptor`] produced by providers at admission time, the opaque
//! tenant/user handles, and the derived [`TrackKey`] used by the fairness
//! tracker to decide whether two requests name "the same track".
//!
//! Identity derivation is pure and deterministic; its rules are part of the
//! on-disk snapshot contract. Changing the normalization regex or the
//! platform-ID extraction requires a snapshot schema bump, because tracker
//! state rebuilt from older snapshots would otherwise disagree with itself.

mod descriptor;
mod identity;

pub use descriptor::{GuildId, SourceTag, TrackDescriptor, UserId};
pub use identity::{extract_url_key, normalize_title, TrackKey};
