use std::time::Duration;

use anyhow::Result;

use crate::buffer::PixelFormat;

pub const SUPPORTED_FORMATS: &[PixelFormat] = &[
    PixelFormat::Abgr2101010,
    PixelFormat::Argb2101010,
    PixelFormat::Abgr8888,
    PixelFormat::Argb8888,
];

/// how long a producer waits on a full queue before overshooting the depth
pub const SUBMIT_WAIT: Duration = Duration::from_millis(100);

pub struct Config {
    pub queue_depth: usize,
    pub workers: usize,
    pub framedropping: bool,
    pub report_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_depth: 3,
            workers: 2,
            framedropping: env("LAMINA_FRAMEDROP"),
            report_interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    pub fn setup() -> Result<Config> {
        let mut config = Config::default();
        if let Some(depth) = env_usize("LAMINA_QUEUE_DEPTH") {
            config.queue_depth = depth.max(1);
        }
        if let Some(workers) = env_usize("LAMINA_WORKERS") {
            config.workers = workers.max(1);
        }
        Ok(config)
    }
}

fn env(key: &str) -> bool {
    matches!(std::env::var(key).as_deref(),Ok("1"))
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}
