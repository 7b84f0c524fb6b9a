use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;

use lamina::{
    Buffer, BufferAllocator, Config, DisplayOutput, FrameReport, MonotonicClock, OutputId,
    PixelFormat, PostError, Size, SlabAllocator, Stream, SyncGroup, WorkPool,
};

/// synthetic sink standing in for a real display backend
struct LoopbackOutput {
    id: OutputId,
    posted: Arc<AtomicUsize>,
}

impl DisplayOutput for LoopbackOutput {
    fn id(&self) -> OutputId {
        self.id
    }

    fn post(&mut self, _frame: Option<Arc<dyn Buffer>>) -> Result<(), PostError> {
        self.posted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn main() -> Result<()> {
    let _guard = setup_tracing();
    let config = Config::setup()?;

    let pool = WorkPool::setup(config.workers);
    let report = Arc::new(FrameReport::new(
        Arc::new(MonotonicClock::new()),
        config.report_interval,
    ));
    let stream = Arc::new(Stream::new(
        Size::new(1920, 1080),
        PixelFormat::Abgr8888,
        config.queue_depth,
        config.framedropping,
        pool.clone(),
    ));

    let posted = Arc::new(AtomicUsize::new(0));
    let mut group = SyncGroup::new(report, Duration::from_millis(12));
    group.add_output(
        Box::new(LoopbackOutput { id: OutputId(0x1), posted: posted.clone() }),
        stream.clone(),
        0,
        0,
    );

    let stop = Arc::new(AtomicBool::new(false));

    // synthetic client rendering at a jittered ~120Hz
    let producer = {
        let stream = stream.clone();
        let stop = stop.clone();
        std::thread::spawn(move || {
            let alloc = SlabAllocator;
            let mut rng = rand::rng();
            while !stop.load(Ordering::Acquire) {
                let buffer = alloc.alloc_buffer(stream.size(), stream.pixel_format());
                stream.submit_buffer(Some(buffer));
                std::thread::sleep(Duration::from_millis(rng.random_range(6..11)));
            }
        })
    };

    let compositor = {
        let stop = stop.clone();
        std::thread::spawn(move || group.run(&stop, Duration::from_millis(16)))
    };

    std::thread::sleep(Duration::from_secs(3));
    stop.store(true, Ordering::Release);
    producer.join().unwrap();
    compositor.join().unwrap();
    pool.shutdown();

    tracing::info!(frames = posted.load(Ordering::Relaxed), "demo finished");
    Ok(())
}

fn setup_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_appender::{rolling::never, non_blocking};
    std::fs::remove_file(".log").ok();
    let (log, guard) = non_blocking(never(".", ".log"));
    tracing_subscriber::fmt()
        .with_writer(log)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    guard
}
