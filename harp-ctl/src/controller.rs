//! Harp controller: scan, dispatch, display
//!
//! Owns the beam scanner, tone player and sequence matcher, and wires them
//! together:
//!
//! ```text
//! BeamScanner::scan ─▶ BeamBroken(channel) ─▶ note lookup ─┬▶ TonePlayer::enqueue(frequency)
//!                                                          └▶ SequenceMatcher::push(symbol)
//!                                                                 └▶ Matched ─▶ TextDisplay::render
//! ```
//!
//! Everything here runs on the scan thread; only the tone queue crosses
//! threads.

use crate::display::{DisplayGeometry, Screen};
use crate::hardware::{DigitalIo, TextDisplay, ToneOutput};
use crate::matcher::{MatchResult, SequenceMatcher};
use crate::scanner::{BeamScanner, TransitionKind};
use crate::tone::{TonePlayer, ToneQueue, ToneSettings};
use harp_common::{Channel, EventBus, HarpConfig, HarpEvent, Result};
use std::collections::HashMap;
use std::future::Future;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const EVENT_BUS_CAPACITY: usize = 256;

/// What one control-loop iteration did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Symbols of notes triggered this cycle, in scan order
    pub triggered: Vec<String>,
    pub restored: usize,
    pub matched: bool,
}

/// Runtime owner of all harp components
pub struct HarpController<I: DigitalIo, D: TextDisplay> {
    config: HarpConfig,
    scanner: BeamScanner<I>,
    tone_player: TonePlayer,
    matcher: SequenceMatcher,
    display: D,
    geometry: DisplayGeometry,
    /// Receiver channel -> index into `config.notes`
    note_by_receiver: HashMap<Channel, usize>,
    events: EventBus,
    consecutive_failures: u32,
    shut_down: bool,
}

impl<I: DigitalIo, D: TextDisplay> HarpController<I, D> {
    /// Validate the configuration, arm the beams, start the tone worker and
    /// show the ready screen
    pub fn initialize<T>(config: HarpConfig, io: I, tone_output: T, display: D) -> Result<Self>
    where
        T: ToneOutput + Send + 'static,
    {
        config.validate()?;

        let mut scanner = BeamScanner::initialize(&config, io)?;
        let tone_player = match TonePlayer::start(ToneSettings::from_config(&config), tone_output)
        {
            Ok(player) => player,
            Err(e) => {
                scanner.release();
                return Err(e);
            }
        };
        let note_by_receiver = config
            .notes
            .iter()
            .enumerate()
            .map(|(idx, note)| (note.receiver_channel, idx))
            .collect();

        let mut controller = Self {
            matcher: SequenceMatcher::new(config.target_sequence.clone()),
            geometry: DisplayGeometry::from_config(&config.display),
            config,
            scanner,
            tone_player,
            display,
            note_by_receiver,
            events: EventBus::new(EVENT_BUS_CAPACITY),
            consecutive_failures: 0,
            shut_down: false,
        };

        // On failure the controller is dropped, which releases the hardware
        controller.show(Screen::Ready)?;

        controller.events.emit_lossy(HarpEvent::Ready {
            note_count: controller.config.notes.len(),
            timestamp: chrono::Utc::now(),
        });
        info!(
            "Laser harp ready: {} beams, target of {} notes",
            controller.config.notes.len(),
            controller.config.target_sequence.len()
        );
        Ok(controller)
    }

    /// One iteration of the control loop
    pub fn run_once(&mut self) -> Result<CycleReport> {
        self.run_once_at(Instant::now())
    }

    /// [`run_once`](Self::run_once) with an explicit scan timestamp
    pub fn run_once_at(&mut self, now: Instant) -> Result<CycleReport> {
        let transitions = match self.scanner.scan_at(now) {
            Ok(transitions) => {
                self.consecutive_failures = 0;
                transitions
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    "Scan failed ({} in a row): {}",
                    self.consecutive_failures, e
                );
                self.events.emit_lossy(HarpEvent::ScanFailed {
                    error: e.to_string(),
                    consecutive_failures: self.consecutive_failures,
                    timestamp: chrono::Utc::now(),
                });
                return Err(e);
            }
        };

        let mut report = CycleReport::default();
        for transition in transitions {
            match transition.kind {
                TransitionKind::BeamBroken => {
                    if let Some(symbol) = self.on_beam_broken(transition.channel) {
                        report.matched |= self.feed_matcher(&symbol);
                        report.triggered.push(symbol);
                    }
                }
                TransitionKind::BeamRestored => {
                    debug!("Beam on {} restored", transition.channel);
                    report.restored += 1;
                    self.events.emit_lossy(HarpEvent::BeamRestored {
                        receiver_channel: transition.channel,
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Queue the note for a blocked beam; returns its symbol
    fn on_beam_broken(&mut self, channel: Channel) -> Option<String> {
        let Some(&idx) = self.note_by_receiver.get(&channel) else {
            warn!("Transition on unmapped channel {}", channel);
            return None;
        };
        let note = &self.config.notes[idx];

        info!("Beam {} ({}) broken", idx + 1, note.symbol);
        self.tone_player.enqueue(note.frequency);
        self.events.emit_lossy(HarpEvent::NoteTriggered {
            receiver_channel: channel,
            symbol: note.symbol.clone(),
            frequency: note.frequency,
            index: idx + 1,
            timestamp: chrono::Utc::now(),
        });
        Some(note.symbol.clone())
    }

    /// Push a symbol; reveal the key on a match
    fn feed_matcher(&mut self, symbol: &str) -> bool {
        if self.matcher.push(symbol) != MatchResult::Matched {
            return false;
        }

        info!("Sequence found (occurrence {})", self.matcher.matches());
        let screen = Screen::SequenceFound {
            key: self.config.reveal_key.clone(),
        };
        if let Err(e) = self.show(screen) {
            warn!("Failed to show sequence screen: {}", e);
        }
        self.events.emit_lossy(HarpEvent::SequenceMatched {
            occurrence: self.matcher.matches(),
            timestamp: chrono::Utc::now(),
        });
        true
    }

    fn show(&mut self, screen: Screen) -> Result<()> {
        let lines = self.geometry.fit(&screen.lines());
        self.display.render(&lines)
    }

    /// Run the control loop every `poll_interval` until `shutdown` resolves
    ///
    /// A configuration error ends the loop at once. A hardware failure is
    /// retried on the next tick; once `max_consecutive_scan_failures` scans
    /// fail in a row the loop returns the last error.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!("Control loop running every {:?}", self.config.poll_interval());
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Stop requested, leaving control loop");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once() {
                        if !e.is_transient() {
                            error!("Fatal scan error: {}", e);
                            return Err(e);
                        }
                        if self.consecutive_failures >= self.config.max_consecutive_scan_failures {
                            error!(
                                "Giving up after {} consecutive scan failures",
                                self.consecutive_failures
                            );
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Stop the tone worker and release every channel
    ///
    /// Safe to call any number of times; never fails. A tone worker that
    /// misses its grace period is reported and silenced.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.tone_player.shutdown() {
            error!("Tone player shutdown: {}", e);
        }
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        let failures = self.scanner.release();
        if !failures.is_empty() {
            warn!("{} channels could not be released cleanly", failures.len());
        }
        self.events.emit_lossy(HarpEvent::ShutdownComplete {
            timestamp: chrono::Utc::now(),
        });
        info!("Laser harp shut down");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HarpEvent> {
        self.events.subscribe()
    }

    /// Producer handle onto the tone queue
    pub fn tone_queue(&self) -> ToneQueue {
        self.tone_player.queue()
    }

    pub fn config(&self) -> &HarpConfig {
        &self.config
    }

    pub fn scanner(&self) -> &BeamScanner<I> {
        &self.scanner
    }

    pub fn matcher(&self) -> &SequenceMatcher {
        &self.matcher
    }

    pub fn tone_player(&self) -> &TonePlayer {
        &self.tone_player
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl<I: DigitalIo, D: TextDisplay> Drop for HarpController<I, D> {
    fn drop(&mut self) {
        if !self.shut_down {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{MemoryDisplay, RecordingToneOutput, SimulatedIo};
    use harp_common::Error;
    use std::time::Duration;

    type TestController = HarpController<SimulatedIo, MemoryDisplay>;

    fn config() -> HarpConfig {
        HarpConfig {
            note_duration_secs: 0.005,
            debounce_ms: 20,
            ..HarpConfig::default()
        }
    }

    fn start(config: HarpConfig) -> (TestController, SimulatedIo, RecordingToneOutput, MemoryDisplay) {
        let io = SimulatedIo::new();
        for note in &config.notes {
            io.set_input(note.receiver_channel, false);
        }
        let tone = RecordingToneOutput::new();
        let display = MemoryDisplay::new();
        let controller =
            HarpController::initialize(config, io.clone(), tone.clone(), display.clone()).unwrap();
        (controller, io, tone, display)
    }

    #[test]
    fn test_initialize_shows_ready_screen() {
        let (controller, _io, _tone, display) = start(config());
        assert_eq!(
            display.last_frame().unwrap(),
            vec!["Laser Harp Ready", "Break a beam..."]
        );
        assert_eq!(controller.consecutive_failures(), 0);
    }

    #[test]
    fn test_invalid_config_rejected_before_touching_hardware() {
        let io = SimulatedIo::new();
        let mut bad = config();
        bad.target_sequence.clear();

        let result = HarpController::initialize(
            bad,
            io.clone(),
            RecordingToneOutput::new(),
            MemoryDisplay::new(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(io.configured_channels().is_empty());
    }

    #[test]
    fn test_break_then_restore_plays_once() {
        let (mut controller, io, tone, _display) = start(config());
        let t0 = Instant::now();
        let mi = Channel(20);

        io.set_input(mi, true);
        controller.run_once_at(t0).unwrap();
        let report = controller.run_once_at(t0 + Duration::from_millis(20)).unwrap();
        assert_eq!(report.triggered, vec!["mi"]);

        io.set_input(mi, false);
        controller.run_once_at(t0 + Duration::from_millis(30)).unwrap();
        let report = controller.run_once_at(t0 + Duration::from_millis(50)).unwrap();
        assert!(report.triggered.is_empty());
        assert_eq!(report.restored, 1);

        assert!(controller.tone_player().wait_idle(Duration::from_secs(1)));
        assert_eq!(tone.played_frequencies(), vec![329.63]);
        assert_eq!(controller.matcher().window(), vec!["mi"]);
    }

    #[test]
    fn test_scan_failures_are_counted_and_reset() {
        let (mut controller, io, _tone, _display) = start(config());

        io.fail_next_reads(2);
        assert!(controller.run_once().is_err());
        assert!(controller.run_once().is_err());
        assert_eq!(controller.consecutive_failures(), 2);

        controller.run_once().unwrap();
        assert_eq!(controller.consecutive_failures(), 0);
    }

    #[test]
    fn test_shutdown_twice_is_safe() {
        let (mut controller, io, tone, _display) = start(config());
        controller.shutdown();
        controller.shutdown();

        assert!(controller.is_shut_down());
        assert!(controller.scanner().is_released());
        assert!(!tone.is_sounding());
        assert!(io.configured_channels().is_empty());
    }

    #[tokio::test]
    async fn test_run_after_shutdown_fails_without_retrying() {
        let (mut controller, _io, _tone, _display) = start(HarpConfig {
            poll_interval_ms: 10,
            max_consecutive_scan_failures: 50,
            ..config()
        });
        let mut events = controller.subscribe();
        controller.shutdown();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            controller.run(std::future::pending::<()>()),
        )
        .await
        .expect("configuration error should end the loop at once");

        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(controller.consecutive_failures(), 1);

        let mut scan_failures = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, HarpEvent::ScanFailed { .. }) {
                scan_failures += 1;
            }
        }
        assert_eq!(scan_failures, 1);
    }
}
