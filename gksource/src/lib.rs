//! # gksource
//!
//! Media providers for the GrooveKeeper engine: URL recognition, metadata
//! extraction, and playable-URL resolution.
//!
//! ## Architecture
//!
//! A [`MediaProvider`] answers three questions about a track source:
//! - `matches(url)` — is this URL mine?
//! - `extract(url)` — what track does it name? Produces an immutable
//!   [`gktrack::TrackDescriptor`] whose `canonical_url` is a *permanent*
//!   reference (catalog page, not CDN endpoint).
//! - `resolve_playable(descriptor)` — a *fresh*, short-lived streamable URL,
//!   looked up again on every call for catalog sources.
//!
//! The split matters: transient CDN links rot within hours, so they are
//! never persisted. The queue stores canonical URLs and the playback pump
//! asks for a playable URL immediately before streaming.
//!
//! The [`ProviderRegistry`] holds the providers in a fixed priority order
//! and dispatches by first match. It is built once at startup from the
//! configuration and immutable afterwards.

mod config_ext;
mod error;
mod provider;
pub mod providers;
mod registry;

pub use config_ext::{NeteaseProxy, SourceConfigExt};
pub use error::{Result, SourceError};
pub use provider::MediaProvider;
pub use registry::{ProviderRegistry, ProviderRegistryBuilder};
