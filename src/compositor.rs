//! the per output compositing pass
//!
//! a [`SyncGroup`] pairs display outputs with the streams they scan out and
//! drives one acquire/post cycle per output per refresh, bracketed by the
//! frame accounting in [`FrameReport`]. posting is an external contract, the
//! core never touches display hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::{Buffer, BufferFlags};
use crate::report::{FrameReport, OutputId};
use crate::stream::Stream;

#[derive(Debug, thiserror::Error)]
pub enum PostError {
    #[error("output disconnected")]
    Disconnected,
    #[error("output rejected the frame")]
    Rejected,
}

/// external collaborator: one logical display output
///
/// `post` hands over the frame to display, `None` means blank. the
/// implementation owns the page flip, the core only iterates
pub trait DisplayOutput: Send {
    fn id(&self) -> OutputId;

    fn post(&mut self, frame: Option<Arc<dyn Buffer>>) -> Result<(), PostError>;
}

struct OutputSlot {
    output: Box<dyn DisplayOutput>,
    stream: Arc<Stream>,
}

/// iterates display buffers and triggers the swap, one pass per refresh cycle
pub struct SyncGroup {
    outputs: Vec<OutputSlot>,
    report: Arc<FrameReport>,
    acquire_wait: Duration,
}

impl SyncGroup {
    pub fn new(report: Arc<FrameReport>, acquire_wait: Duration) -> SyncGroup {
        SyncGroup {
            outputs: Vec::new(),
            report,
            acquire_wait,
        }
    }

    pub fn add_output(&mut self, output: Box<dyn DisplayOutput>, stream: Arc<Stream>, x: i32, y: i32) {
        let size = stream.size();
        self.report.added_display(size.width, size.height, x, y, output.id());
        self.outputs.push(OutputSlot { output, stream });
    }

    /// one compositing pass over every output
    ///
    /// a failed post is logged and the pass moves on, accounting still closes
    /// the frame. an output with no frame yet is skipped. buffers not flagged
    /// [`BufferFlags::SCANOUT`] cannot go to the output directly, those frames
    /// are posted blank
    pub fn compose_pass(&mut self) {
        for slot in &mut self.outputs {
            let id = slot.output.id();
            self.report.began_frame(id);
            if let Some(frame) = slot.stream.lock_compositor_buffer(self.acquire_wait) {
                let buffer = frame.buffer().filter(|b| {
                    let scanout = b.flags().contains(BufferFlags::SCANOUT);
                    if !scanout {
                        tracing::warn!(output = id.0, buffer = b.id().raw(), "buffer is not scanout capable, posting blank");
                    }
                    scanout
                });
                if let Err(err) = slot.output.post(buffer) {
                    tracing::warn!(output = id.0, error = %err, "failed to post frame");
                }
            }
            self.report.finished_frame(id);
        }
    }

    /// run compositing passes at `interval` until `stop` is raised
    pub fn run(&mut self, stop: &AtomicBool, interval: Duration) {
        self.report.started();
        while !stop.load(Ordering::Acquire) {
            self.report.scheduled();
            self.compose_pass();
            std::thread::sleep(interval);
        }
        self.report.stopped();
    }
}
