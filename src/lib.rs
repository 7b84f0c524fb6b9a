//! frame pipeline core of a display server
//!
//! [`Stream`] is the per surface entry point: clients submit rendered
//! buffers, the compositor locks the newest completed frame for display
//!
//! other modules contain one mechanism each
//!
//! - [`queue`], the bounded swapper between producer and consumer
//! - [`report`], per output frame accounting and the periodic fps summary
//! - [`observer`], weakly held, executor bound event fan-out
//! - [`executor`], the shared work pool observer callbacks run on
//! - [`compositor`], the per output acquire/post pass
//! - [`buffer`], opaque buffer handles and the allocator contract
//!
pub mod buffer;
pub mod compositor;
pub mod config;
pub mod executor;
pub mod observer;
pub mod queue;
pub mod report;
pub mod stream;

pub use buffer::{Buffer, BufferAllocator, BufferFlags, BufferId, PixelFormat, Size, SlabAllocator};
pub use compositor::{DisplayOutput, PostError, SyncGroup};
pub use config::Config;
pub use executor::{Executor, InlineExecutor, WorkPool};
pub use observer::ObserverMultiplexer;
pub use queue::{AcquiredFrame, BufferQueue};
pub use report::{Clock, FrameReport, FrameStats, MonotonicClock, OutputId};
pub use stream::{Stream, StreamObserver};
