//! Watch a directory tree and stream coalesced events to stdout
//!
//! Documents and projects each get their own coalescer fed from one change
//! feed. Project events carry Cargo and npm metadata; document events carry
//! only their version. Ctrl-C stops the watch, cancels pending timers and
//! lets the output writer drain.

use crate::system_config::SystemConfig;
use anyhow::{Context, Result};
use quiesce_core::{
    Coalescer, CoalescerConfig, EntityKind, KeyPolicyKind, NullResolver, PayloadResolver,
    ProjectResolver, Sink, StdioSink,
};
use quiesce_watcher::{
    CargoManifestProvider, ChangeFeed, Forwarder, FsChangeSource, NpmManifestProvider, PathFilter,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How long to wait for buffered events to reach stdout on exit
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Command-line overrides for the configured coalescer
#[derive(Debug, Default)]
pub struct WatchOptions {
    pub root: Option<PathBuf>,
    pub debounce_ms: Option<u64>,
    pub max_wait_ms: Option<u64>,
    pub key_policy: Option<KeyPolicyKind>,
}

/// Merge overrides into the configured coalescer settings
///
/// Raising the debounce above the configured max wait pulls the max wait
/// up with it unless one was given explicitly.
fn effective_coalescer(config: &SystemConfig, options: &WatchOptions) -> Result<CoalescerConfig> {
    let mut coalescer = config.coalescer.clone();

    if let Some(debounce_ms) = options.debounce_ms {
        coalescer.debounce_ms = debounce_ms;
        if options.max_wait_ms.is_none() && coalescer.max_wait_ms < debounce_ms {
            coalescer.max_wait_ms = debounce_ms;
        }
    }
    if let Some(max_wait_ms) = options.max_wait_ms {
        coalescer.max_wait_ms = max_wait_ms;
    }
    if let Some(key_policy) = options.key_policy {
        coalescer.key_policy = key_policy;
    }

    coalescer.validate()?;
    Ok(coalescer)
}

fn project_resolver() -> ProjectResolver {
    ProjectResolver::new()
        .with_provider(Arc::new(CargoManifestProvider))
        .with_provider(Arc::new(NpmManifestProvider))
}

pub async fn run(config: SystemConfig, options: WatchOptions) -> Result<()> {
    let coalescer_config = effective_coalescer(&config, &options)?;

    let root = match options.root {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };
    let root = root
        .canonicalize()
        .with_context(|| format!("Cannot watch {}", root.display()))?;

    let (stdio, writer) = StdioSink::stdout();
    let sink: Arc<dyn Sink> = Arc::new(stdio);
    let feed = ChangeFeed::new();

    let policy = coalescer_config.key_policy;
    let documents = Forwarder::spawn(
        feed.subscribe(),
        Coalescer::new(
            policy,
            &coalescer_config,
            Arc::new(NullResolver) as Arc<dyn PayloadResolver>,
            Arc::clone(&sink),
        )?,
        Some(EntityKind::Document),
    );
    let projects = Forwarder::spawn(
        feed.subscribe(),
        Coalescer::new(
            policy,
            &coalescer_config,
            Arc::new(project_resolver()) as Arc<dyn PayloadResolver>,
            Arc::clone(&sink),
        )?,
        Some(EntityKind::Project),
    );
    drop(sink);

    let filter = PathFilter::load(&root, config.watch.clone())?;
    info!(
        "Loaded {} ignore sources for {}",
        filter.active_sources(),
        root.display()
    );
    let source = FsChangeSource::start(&root, filter, feed)?;

    info!(
        "Watching {} (debounce: {}ms, max wait: {}ms, key policy: {})",
        source.root().display(),
        coalescer_config.debounce_ms,
        coalescer_config.max_wait_ms,
        policy
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Interrupted, shutting down");

    drop(source);
    let document_stats = documents.coalescer().stats();
    let project_stats = projects.coalescer().stats();
    let discarded = documents.shutdown().await + projects.shutdown().await;

    info!(
        "Emitted {} document and {} project events, discarded {} pending",
        document_stats.emitted, project_stats.emitted, discarded
    );

    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Output writer failed: {}", e),
        Err(_) => warn!("Output writer did not finish within {:?}", WRITER_DRAIN_TIMEOUT),
    }

    Ok(())
}
