//! Debounced change coalescing for quiesce
//!
//! This crate provides the engine between a change source and an event sink:
//! - Per-key trailing-edge debouncing (500ms default, bounded by a max wait)
//! - Pluggable key equality policies (subject, subject + kind)
//! - Payload resolution through injected resolvers
//! - Fire-and-forget sinks (channel, line-delimited JSON writer)
//! - Deterministic cancellation of outstanding timers on shutdown

pub mod coalescer;
pub mod config;
pub mod error;
pub mod event;
pub mod key;
pub mod resolve;
pub mod sink;

pub use coalescer::{Coalescer, CoalescerStats};
pub use config::CoalescerConfig;
pub use error::{Error, Result};
pub use event::{ChangeCategory, ChangeKey, ChangeKind, EntityKind, Snapshot, WorkspaceEvent};
pub use key::{BySubject, BySubjectAndKind, KeyPolicy, KeyPolicyKind};
pub use resolve::{MetadataProvider, NullResolver, PayloadResolver, ProjectResolver};
pub use sink::{ChannelSink, NullSink, Sink, StdioSink};
