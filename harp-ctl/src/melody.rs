//! Attract-mode melody
//!
//! While enabled, loops a phrase on the tone queue so the installation makes
//! sound before anyone touches it. Beam notes share the same queue and play
//! in between.

use crate::tone::ToneQueue;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const C4: f64 = 261.63;
const D4: f64 = 293.66;
const E4: f64 = 329.63;
const G4: f64 = 392.00;

/// Mary Had a Little Lamb:
/// E D C D E E E | D D D | E G G | E D C D E E E | E D D E D C
pub const MARY_HAD_A_LITTLE_LAMB: &[f64] = &[
    E4, D4, C4, D4, E4, E4, E4, //
    D4, D4, D4, //
    E4, G4, G4, //
    E4, D4, C4, D4, E4, E4, E4, //
    E4, D4, D4, E4, D4, C4,
];

/// Queue `melody` forever, one note per `note_duration`
///
/// The task ends by itself once the tone player shuts down; abort the handle
/// to stop it earlier.
pub fn spawn_attract_melody(
    queue: ToneQueue,
    melody: &'static [f64],
    note_duration: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Attract melody started ({} notes)", melody.len());
        let mut loops = 0u64;
        'outer: loop {
            for &frequency in melody {
                if !queue.enqueue(frequency) {
                    break 'outer;
                }
                tokio::time::sleep(note_duration).await;
            }
            loops += 1;
            debug!("Attract melody loop {} done", loops);
        }
        info!("Attract melody stopped after {} loops", loops);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::RecordingToneOutput;
    use crate::tone::{TonePlayer, ToneSettings};

    #[tokio::test]
    async fn test_melody_plays_in_order_and_stops_with_player() {
        let output = RecordingToneOutput::new();
        let mut player = TonePlayer::start(
            ToneSettings {
                duty_cycle: 50.0,
                note_duration: Duration::from_millis(2),
                shutdown_grace: Duration::from_secs(1),
            },
            output.clone(),
        )
        .unwrap();

        let task = spawn_attract_melody(player.queue(), &[C4, D4, E4], Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(60)).await;
        player.shutdown().unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("melody task should end after shutdown")
            .unwrap();

        let played = output.played_frequencies();
        assert!(played.len() >= 3, "expected at least one loop, got {:?}", played);
        for (i, hz) in played.iter().enumerate() {
            assert_eq!(*hz, [C4, D4, E4][i % 3]);
        }
    }

    #[test]
    fn test_phrase_length() {
        assert_eq!(MARY_HAD_A_LITTLE_LAMB.len(), 26);
    }
}
