//! Filesystem change sources for quiesce
//!
//! This crate turns a watched directory tree into coalesced workspace events:
//! - notify-based watching with ignore rules and overflow rescans
//! - A fan-out change feed with explicit subscriptions
//! - Forwarders from the feed into per-entity coalescers
//! - Project metadata providers for Cargo and npm manifests

pub mod feed;
pub mod filter;
pub mod forward;
pub mod providers;
pub mod source;

pub use feed::{ChangeFeed, ChangeNotice, Subscription};
pub use filter::{PathFilter, WatchConfig};
pub use forward::Forwarder;
pub use providers::{CargoManifestProvider, NpmManifestProvider};
pub use source::FsChangeSource;
