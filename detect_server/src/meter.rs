use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use serde::Serialize;
use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

#[derive(Default)]
pub struct Meter {
    captured_frames: AtomicU64,
    skipped_frames: AtomicU64,
    emitted_frames: AtomicU64,

    // Counted over the whole runtime, never reset by the logger
    total_captured: AtomicU64,
    total_skipped: AtomicU64,
    total_emitted: AtomicU64,
}

/// Snapshot of the frame counters since startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MeterTotals {
    pub captured: u64,
    pub skipped: u64,
    pub emitted: u64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            captured_frames: AtomicU64::new(0),
            skipped_frames: AtomicU64::new(0),
            emitted_frames: AtomicU64::new(0),
            total_captured: AtomicU64::new(0),
            total_skipped: AtomicU64::new(0),
            total_emitted: AtomicU64::new(0),
        }
    }

    pub fn tick_captured(&self) {
        self.captured_frames.fetch_add(1, Ordering::Relaxed);
        self.total_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_skipped(&self) {
        self.skipped_frames.fetch_add(1, Ordering::Relaxed);
        self.total_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_emitted(&self) {
        self.emitted_frames.fetch_add(1, Ordering::Relaxed);
        self.total_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset_captured(&self) -> u64 {
        self.captured_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_skipped(&self) -> u64 {
        self.skipped_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_emitted(&self) -> u64 {
        self.emitted_frames.swap(0, Ordering::Relaxed)
    }

    pub fn totals(&self) -> MeterTotals {
        MeterTotals {
            captured: self.total_captured.load(Ordering::Relaxed),
            skipped: self.total_skipped.load(Ordering::Relaxed),
            emitted: self.total_emitted.load(Ordering::Relaxed),
        }
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let captured_frames = METER.get_reset_captured();
            let skipped_frames = METER.get_reset_skipped();
            let emitted_frames = METER.get_reset_emitted();
            let elapsed = start.elapsed().as_secs_f32();
            let fps_captured = captured_frames as f32 / elapsed;
            let fps_emitted = emitted_frames as f32 / elapsed;

            if captured_frames > 0 {
                log::info!("Captured frames per second: {fps_captured:.2}")
            }
            if emitted_frames > 0 {
                log::info!("Emitted frames per second (all viewers): {fps_emitted:.2}")
            }
            if skipped_frames > 0 {
                log::warn!("Skipped {skipped_frames} frames in the last {elapsed:.1} s")
            }
        }
    })
}
