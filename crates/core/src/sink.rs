//! Event sinks
//!
//! `emit` is fire-and-forget: sinks must not block and must absorb their
//! own transport failures.

use crate::event::WorkspaceEvent;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Accepts finished events for transmission
pub trait Sink: Send + Sync {
    fn emit(&self, event: WorkspaceEvent);
}

/// Sink that discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn emit(&self, _event: WorkspaceEvent) {}
}

/// Sink forwarding events to an in-process receiver
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<WorkspaceEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkspaceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Sink for ChannelSink {
    fn emit(&self, event: WorkspaceEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("Receiver closed, dropping {} for {}", e.0.kind, e.0.file_name);
        }
    }
}

/// Envelope written for every event
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EventPacket<'a> {
    #[serde(rename = "Type")]
    packet_type: &'static str,
    seq: u64,
    event: &'static str,
    body: &'a WorkspaceEvent,
}

/// Sink writing one JSON packet per line to an async writer
///
/// A single writer task owns the output, so packets never interleave.
/// The task ends once every clone of the sink has been dropped.
#[derive(Debug, Clone)]
pub struct StdioSink {
    tx: mpsc::UnboundedSender<WorkspaceEvent>,
}

impl StdioSink {
    /// Spawn the writer task for `writer`
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn<W>(writer: W) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_packets(writer, rx));
        (Self { tx }, task)
    }

    /// Spawn a writer for the process's stdout
    pub fn stdout() -> (Self, JoinHandle<()>) {
        Self::spawn(tokio::io::stdout())
    }
}

impl Sink for StdioSink {
    fn emit(&self, event: WorkspaceEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!("Output writer stopped, dropping {} for {}", e.0.kind, e.0.file_name);
        }
    }
}

async fn write_packets<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<WorkspaceEvent>)
where
    W: AsyncWrite + Unpin,
{
    let mut seq = 0u64;

    while let Some(event) = rx.recv().await {
        seq += 1;
        let packet = EventPacket {
            packet_type: "event",
            seq,
            event: event.kind.as_str(),
            body: &event,
        };

        let mut line = match serde_json::to_vec(&packet) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize {} packet: {}", event.kind, e);
                continue;
            }
        };
        line.push(b'\n');

        if let Err(e) = writer.write_all(&line).await {
            warn!("Failed to write {} packet: {}", event.kind, e);
            continue;
        }
        if let Err(e) = writer.flush().await {
            warn!("Failed to flush output: {}", e);
        }
    }

    debug!("Output writer finished after {} packets", seq);
}
