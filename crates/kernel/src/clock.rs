use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::intr::{InterruptController, Irq};

/// Milliseconds since boot.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    boot: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self { boot: Instant::now() }
    }

    pub fn now_ms(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }
}

/// Host thread raising the clock interrupt every tick. Stops when told to or
/// when the interrupt controller is gone.
pub struct Timer {
    stop: Arc<AtomicBool>,
}

impl Timer {
    pub fn start(interval_ms: u64, irq: Weak<InterruptController>) -> Option<Self> {
        if interval_ms == 0 {
            return None;
        }
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let spawned = thread::Builder::new()
            .name("timer".into())
            .spawn(move || {
                let period = Duration::from_millis(interval_ms);
                while !flag.load(Ordering::Relaxed) {
                    thread::sleep(period);
                    match irq.upgrade() {
                        Some(irq) => irq.raise(Irq::Clock),
                        None => break,
                    }
                }
            });
        if let Err(err) = spawned {
            log::warn!("timer thread failed to start, running without preemption: {}", err);
            return None;
        }
        log::debug!("timer started, period {} ms", interval_ms);
        Some(Self { stop })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}
