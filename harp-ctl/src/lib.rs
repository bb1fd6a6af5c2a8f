//! # Laser Harp Controller Library (harp-ctl)
//!
//! Real-time control loop for the laser harp installation.
//!
//! **Purpose:** Poll the beam receivers, debounce them into discrete
//! transitions, play each broken beam's note without blocking the scan, and
//! reveal the key on the display once the target melody has been played.
//!
//! **Architecture:** single-threaded scan/dispatch loop plus one tone worker
//! thread fed by an unbounded MPSC queue. Hardware is reached only through the
//! capability traits in [`hardware`].

pub mod controller;
pub mod display;
pub mod hardware;
pub mod matcher;
pub mod melody;
pub mod performer;
pub mod scanner;
pub mod tone;

pub use controller::{CycleReport, HarpController};
pub use matcher::{MatchResult, SequenceMatcher};
pub use scanner::{BeamScanner, Transition, TransitionKind};
pub use tone::{TonePlayer, ToneQueue, ToneRequest, ToneSettings};
