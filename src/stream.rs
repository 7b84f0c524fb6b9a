//! per surface aggregation point of the frame pipeline
//!
//! every client surface owns one [`Stream`]: the submit side of its
//! [`BufferQueue`], the buffer metadata the display pipeline needs, and the
//! fan-out to anyone watching frames arrive.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::buffer::{Buffer, PixelFormat, Size};
use crate::executor::Executor;
use crate::observer::ObserverMultiplexer;
use crate::queue::{AcquiredFrame, BufferQueue};

/// notified through the stream's multiplexer, on the observer's executor
pub trait StreamObserver: Send + Sync {
    /// a frame was submitted, `frames` is the backlog at that point
    fn frame_posted(&self, frames: usize);

    /// target metadata changed, buffers already in flight are unaffected
    fn resized(&self, size: Size) {
        let _ = size;
    }
}

struct Meta {
    size: Size,
    format: PixelFormat,
}

pub struct Stream {
    queue: BufferQueue,
    meta: Mutex<Meta>,
    observers: ObserverMultiplexer<dyn StreamObserver>,
}

impl Stream {
    pub fn new(
        size: Size,
        format: PixelFormat,
        depth: usize,
        dropping: bool,
        default_executor: Arc<dyn Executor>,
    ) -> Stream {
        Stream {
            queue: BufferQueue::new(depth, dropping),
            meta: Mutex::new(Meta { size, format }),
            observers: ObserverMultiplexer::new(default_executor),
        }
    }

    /// client side: a render finished, `None` submits a blank frame
    pub fn submit_buffer(&self, buffer: Option<Arc<dyn Buffer>>) {
        self.queue.submit(buffer);

        // skip the backlog count when nobody is listening
        if !self.observers.empty() {
            let frames = self.queue.pending_frames();
            self.observers.for_each_observer(move |o| o.frame_posted(frames));
        }
    }

    /// compositor side: the frame to display next, see [`BufferQueue::acquire`]
    pub fn lock_compositor_buffer(&self, timeout: Duration) -> Option<AcquiredFrame<'_>> {
        self.queue.acquire(timeout)
    }

    pub fn allow_framedropping(&self, allow: bool) {
        self.queue.allow_framedropping(allow);
    }

    pub fn framedropping(&self) -> bool {
        self.queue.framedropping()
    }

    pub fn size(&self) -> Size {
        self.meta.lock().unwrap().size
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.meta.lock().unwrap().format
    }

    /// change the target size, metadata only
    pub fn resize(&self, size: Size) {
        self.meta.lock().unwrap().size = size;
        if !self.observers.empty() {
            self.observers.for_each_observer(move |o| o.resized(size));
        }
    }

    pub fn register_interest(&self, observer: Weak<dyn StreamObserver>) {
        self.observers.register_interest(observer);
    }

    pub fn register_interest_with(
        &self,
        observer: Weak<dyn StreamObserver>,
        executor: Arc<dyn Executor>,
    ) {
        self.observers.register_interest_with(observer, executor);
    }

    pub fn unregister_interest(&self, observer: &(dyn StreamObserver + 'static)) {
        self.observers.unregister_interest(observer);
    }
}
