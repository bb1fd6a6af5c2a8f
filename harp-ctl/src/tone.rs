//! Tone playback on a dedicated worker thread
//!
//! The scan loop must never sleep for the length of a note, so tones go
//! through an unbounded MPSC queue to a single `tone-player` thread that plays
//! them strictly in submission order, one at a time.
//!
//! ```text
//! scan loop ──enqueue──┐
//! attract melody ──────┼──▶ [ToneRequest queue] ──▶ tone-player thread ──▶ ToneOutput
//! ```

use crate::hardware::ToneOutput;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use harp_common::{Error, HarpConfig, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

type SharedOutput = Arc<Mutex<Box<dyn ToneOutput + Send>>>;

fn lock_output(output: &SharedOutput) -> MutexGuard<'_, Box<dyn ToneOutput + Send>> {
    output.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A frequency to play
///
/// Non-positive (or non-finite) frequencies are wake-up sentinels: the worker
/// consumes them without sound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneRequest(pub f64);

impl ToneRequest {
    pub const SENTINEL: ToneRequest = ToneRequest(0.0);

    pub fn is_sentinel(&self) -> bool {
        !self.0.is_finite() || self.0 <= 0.0
    }
}

/// Playback parameters fixed for the player's lifetime
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneSettings {
    pub duty_cycle: f64,
    pub note_duration: Duration,
    /// How long shutdown waits for the worker before forcing silence
    pub shutdown_grace: Duration,
}

impl ToneSettings {
    pub fn from_config(config: &HarpConfig) -> Self {
        Self {
            duty_cycle: config.duty_cycle,
            note_duration: config.note_duration(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

/// Cloneable producer handle onto the tone queue
#[derive(Debug, Clone)]
pub struct ToneQueue {
    tx: Sender<ToneRequest>,
    running: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
}

impl ToneQueue {
    /// Queue a tone without blocking
    ///
    /// Returns false (and does nothing) once the player has shut down.
    pub fn enqueue(&self, frequency: f64) -> bool {
        if !self.running.load(Ordering::Acquire) {
            debug!("Tone player stopped, dropping {:.2} Hz", frequency);
            return false;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(ToneRequest(frequency)).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Requests queued or playing
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Serialized tone player
pub struct TonePlayer {
    queue: ToneQueue,
    output: SharedOutput,
    done_rx: Receiver<()>,
    worker: Option<JoinHandle<()>>,
    settings: ToneSettings,
    shut_down: bool,
}

impl TonePlayer {
    /// Spawn the worker thread and return the player
    pub fn start<T>(settings: ToneSettings, output: T) -> Result<Self>
    where
        T: ToneOutput + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let running = Arc::new(AtomicBool::new(true));
        let pending = Arc::new(AtomicUsize::new(0));
        let output: SharedOutput = Arc::new(Mutex::new(Box::new(output)));

        let worker = Worker {
            rx,
            running: Arc::clone(&running),
            pending: Arc::clone(&pending),
            output: Arc::clone(&output),
            settings,
        };
        let handle = thread::Builder::new()
            .name("tone-player".to_string())
            .spawn(move || {
                worker.run();
                let _ = done_tx.send(());
            })?;

        info!(
            "Tone player started (note {:?}, duty {:.0}%)",
            settings.note_duration, settings.duty_cycle
        );

        Ok(Self {
            queue: ToneQueue {
                tx,
                running,
                pending,
            },
            output,
            done_rx,
            worker: Some(handle),
            settings,
            shut_down: false,
        })
    }

    pub fn enqueue(&self, frequency: f64) -> bool {
        self.queue.enqueue(frequency)
    }

    /// Producer handle for other tasks sharing this player
    pub fn queue(&self) -> ToneQueue {
        self.queue.clone()
    }

    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    /// Block until every queued tone has finished, or `timeout` passes
    ///
    /// Returns true if the queue drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.queue.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Stop the worker and silence the output
    ///
    /// The worker finishes the tone it is playing and exits; queued tones are
    /// dropped. If it misses the grace period the output is silenced anyway
    /// and `ShutdownTimeout` is returned. Later calls only silence the output
    /// again.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            lock_output(&self.output).stop();
            return Ok(());
        }
        self.shut_down = true;

        self.queue.running.store(false, Ordering::Release);
        let _ = self.queue.tx.send(ToneRequest::SENTINEL);

        let result = match self.done_rx.recv_timeout(self.settings.shutdown_grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.worker.take() {
                    if handle.join().is_err() {
                        warn!("Tone worker panicked");
                    }
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Tone worker still busy after {:?}, forcing silence",
                    self.settings.shutdown_grace
                );
                Err(Error::ShutdownTimeout(self.settings.shutdown_grace))
            }
        };

        lock_output(&self.output).stop();
        info!("Tone player stopped");
        result
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Drop for TonePlayer {
    fn drop(&mut self) {
        if !self.shut_down {
            let _ = self.shutdown();
        }
    }
}

struct Worker {
    rx: Receiver<ToneRequest>,
    running: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    output: SharedOutput,
    settings: ToneSettings,
}

impl Worker {
    fn run(self) {
        debug!("Tone worker running");
        while let Ok(request) = self.rx.recv() {
            if !self.running.load(Ordering::Acquire) {
                break;
            }

            if request.is_sentinel() {
                trace!("Tone sentinel consumed");
            } else {
                self.play(request.0);
            }
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }

        // Requests left in the queue are dropped unplayed
        let dropped = self.rx.try_iter().count();
        self.pending.store(0, Ordering::Release);
        debug!("Tone worker exiting ({} queued tones dropped)", dropped);
    }

    fn play(&self, frequency: f64) {
        {
            let mut output = lock_output(&self.output);
            output.set_frequency(frequency);
            output.start(self.settings.duty_cycle);
        }
        thread::sleep(self.settings.note_duration);
        lock_output(&self.output).stop();
    }
}
