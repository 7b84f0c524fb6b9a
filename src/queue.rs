//! the bounded swapper between a rendering client and the compositor
//!
//! a [`BufferQueue`] hands completed frames from one producer to one consumer
//! with at most [`depth`](BufferQueue::depth) frames in flight. with
//! framedropping off delivery is strict fifo, with it on a fresh submission
//! replaces the queued backlog so the consumer always sees the newest frame.
//! ownership of a slot moves under the queue mutex, producer and consumer
//! never hold the same slot.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::buffer::Buffer;
use crate::config::SUBMIT_WAIT;

/// one completed frame: the (possibly blank) buffer plus its sequence stamp
#[derive(Clone)]
struct FrameSlot {
    buffer: Option<Arc<dyn Buffer>>,
    age: u64,
}

struct Inner {
    pending: VecDeque<FrameSlot>,
    /// newest frame the consumer has seen, kept for re-display
    current: Option<FrameSlot>,
    next_age: u64,
    dropping: bool,
    /// acquired frames not yet released, the queue does not advance past them
    outstanding: u32,
}

pub struct BufferQueue {
    inner: Mutex<Inner>,
    frame_ready: Condvar,
    space_free: Condvar,
    depth: usize,
}

impl BufferQueue {
    pub fn new(depth: usize, dropping: bool) -> BufferQueue {
        BufferQueue {
            inner: Mutex::new(Inner {
                pending: VecDeque::with_capacity(depth.max(1)),
                current: None,
                next_age: 0,
                dropping,
                outstanding: 0,
            }),
            frame_ready: Condvar::new(),
            space_free: Condvar::new(),
            depth: depth.max(1),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn framedropping(&self) -> bool {
        self.inner.lock().unwrap().dropping
    }

    /// switch the framedropping policy
    ///
    /// takes effect at the next queue boundary, frames already queued are
    /// untouched. wakes a producer blocked on backpressure so the switch is
    /// observed promptly
    pub fn allow_framedropping(&self, allow: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.dropping = allow;
        self.space_free.notify_all();
        self.frame_ready.notify_all();
    }

    /// producer side: hand over a completed buffer, `None` is a blank frame
    ///
    /// with framedropping on the newest queued frame is replaced and this
    /// never blocks. with it off and the queue full, waits up to
    /// [`SUBMIT_WAIT`] for the consumer, then pushes past the depth bound
    /// rather than skipping a frame
    pub fn submit(&self, buffer: Option<Arc<dyn Buffer>>) {
        let mut inner = self.inner.lock().unwrap();

        if inner.dropping {
            let age = inner.next_age;
            inner.next_age += 1;
            let slot = FrameSlot { buffer, age };
            match inner.pending.back_mut() {
                Some(backlog) => {
                    tracing::trace!(dropped = backlog.age, kept = age, "frame dropped");
                    *backlog = slot;
                }
                None => inner.pending.push_back(slot),
            }
        } else {
            if inner.pending.len() >= self.depth {
                let deadline = Instant::now() + SUBMIT_WAIT;
                while inner.pending.len() >= self.depth && !inner.dropping {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::trace!("backpressure wait expired, overshooting queue depth");
                        break;
                    }
                    let (guard, _) = self
                        .space_free
                        .wait_timeout(inner, deadline - now)
                        .unwrap();
                    inner = guard;
                }
            }
            let age = inner.next_age;
            inner.next_age += 1;
            inner.pending.push_back(FrameSlot { buffer, age });
        }

        drop(inner);
        self.frame_ready.notify_all();
    }

    /// consumer side: take the frame to display next
    ///
    /// pops the oldest pending frame, or waits up to `timeout` for one. when
    /// the wait expires the previous frame is handed out again, never a
    /// buffer the producer still owns. while an [`AcquiredFrame`] is still
    /// held the same frame is redelivered without advancing the queue.
    /// `None` only before the very first submission
    pub fn acquire(&self, timeout: Duration) -> Option<AcquiredFrame<'_>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.outstanding > 0 {
                if let Some(slot) = inner.current.clone() {
                    return Some(self.hand_out(&mut inner, &slot));
                }
            }

            if let Some(slot) = inner.pending.pop_front() {
                let frame = self.hand_out(&mut inner, &slot);
                inner.current = Some(slot);
                drop(inner);
                self.space_free.notify_all();
                return Some(frame);
            }

            let now = Instant::now();
            if now >= deadline {
                return match inner.current.clone() {
                    // re-display path
                    Some(slot) => Some(self.hand_out(&mut inner, &slot)),
                    None => None,
                };
            }
            let (guard, _) = self
                .frame_ready
                .wait_timeout(inner, deadline - now)
                .unwrap();
            inner = guard;
        }
    }

    /// frames submitted but not yet taken by the consumer
    pub fn pending_frames(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    fn hand_out(&self, inner: &mut Inner, slot: &FrameSlot) -> AcquiredFrame<'_> {
        inner.outstanding += 1;
        AcquiredFrame {
            queue: self,
            buffer: slot.buffer.clone(),
            age: slot.age,
        }
    }

    fn release(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.outstanding = inner.outstanding.saturating_sub(1);
    }
}

/// frame held by the compositor, released for reuse on drop
pub struct AcquiredFrame<'a> {
    queue: &'a BufferQueue,
    buffer: Option<Arc<dyn Buffer>>,
    age: u64,
}

impl AcquiredFrame<'_> {
    /// the buffer to display, `None` for a blank frame
    pub fn buffer(&self) -> Option<Arc<dyn Buffer>> {
        self.buffer.clone()
    }

    /// submission sequence stamp of this frame
    pub fn age(&self) -> u64 {
        self.age
    }
}

impl Drop for AcquiredFrame<'_> {
    fn drop(&mut self) {
        self.queue.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferAllocator, PixelFormat, SlabAllocator, Size};

    const WAIT: Duration = Duration::from_millis(200);

    fn buffers(n: usize) -> Vec<Arc<dyn Buffer>> {
        let alloc = SlabAllocator;
        (0..n)
            .map(|_| alloc.alloc_buffer(Size::new(380, 210), PixelFormat::Abgr8888))
            .collect()
    }

    #[test]
    fn fifo_delivery_without_framedropping() {
        let queue = BufferQueue::new(3, false);
        let buffers = buffers(3);
        for buffer in &buffers {
            queue.submit(Some(buffer.clone()));
        }

        for (n, buffer) in buffers.iter().enumerate() {
            let frame = queue.acquire(WAIT).unwrap();
            assert_eq!(frame.age(), n as u64);
            assert_eq!(frame.buffer().unwrap().id(), buffer.id());
        }
    }

    #[test]
    fn framedropping_keeps_only_newest() {
        let queue = BufferQueue::new(3, true);
        let buffers = buffers(4);
        for buffer in &buffers {
            queue.submit(Some(buffer.clone()));
        }

        let frame = queue.acquire(WAIT).unwrap();
        assert_eq!(frame.buffer().unwrap().id(), buffers[3].id());
        assert_eq!(frame.age(), 3);
    }

    #[test]
    fn blank_frames_are_legal() {
        let queue = BufferQueue::new(3, false);
        queue.submit(None);
        let frame = queue.acquire(WAIT).unwrap();
        assert!(frame.buffer().is_none());
        assert_eq!(frame.age(), 0);
    }

    #[test]
    fn acquire_before_first_submit_times_out_empty() {
        let queue = BufferQueue::new(3, false);
        assert!(queue.acquire(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn consumer_redisplays_previous_frame_on_timeout() {
        let queue = BufferQueue::new(3, false);
        queue.submit(buffers(1).pop());

        let first = queue.acquire(WAIT).unwrap().age();
        let again = queue.acquire(Duration::from_millis(10)).unwrap().age();
        assert_eq!(first, again);
    }

    #[test]
    fn held_frame_is_redelivered_without_advancing() {
        let queue = BufferQueue::new(3, false);
        queue.submit(None);
        queue.submit(None);

        let held = queue.acquire(WAIT).unwrap();
        assert_eq!(held.age(), 0);

        // the compositor still holds the first frame, a second acquire
        // must hand out the same content again
        let again = queue.acquire(WAIT).unwrap();
        assert_eq!(again.age(), held.age());
        drop(again);
        drop(held);

        assert_eq!(queue.acquire(WAIT).unwrap().age(), 1);
    }

    #[test]
    fn ages_never_regress() {
        let queue = BufferQueue::new(3, true);
        let mut last = 0;
        for round in 0..20u64 {
            queue.submit(None);
            if round % 3 == 0 {
                queue.submit(None);
            }
            let age = queue.acquire(WAIT).unwrap().age();
            assert!(age >= last, "age {age} after {last}");
            last = age;
        }
    }

    #[test]
    fn full_queue_blocks_then_overshoots() {
        let queue = BufferQueue::new(2, false);
        for _ in 0..3 {
            queue.submit(None);
        }
        // third submit waited out SUBMIT_WAIT and pushed anyway
        assert_eq!(queue.pending_frames(), 3);
        for n in 0..3u64 {
            assert_eq!(queue.acquire(WAIT).unwrap().age(), n);
        }
    }

    #[test]
    fn framedropping_toggle_wakes_blocked_producer() {
        let queue = Arc::new(BufferQueue::new(2, false));
        queue.submit(None);
        queue.submit(None);

        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.submit(None))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.allow_framedropping(true);
        producer.join().unwrap();
        assert!(queue.framedropping());
    }
}
