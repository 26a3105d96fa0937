//! Task roster
//!
//! The fixed set of cooperating execution contexts. The audio pump runs on
//! its own OS thread at the highest logical priority with a hard cadence;
//! everything network-bound lives on the tokio runtime. Contexts talk only
//! through the jitter buffer, message queues and the shared engine lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::audio::{Advance, AudioEngine};
use crate::bus::BusHandle;
use crate::constants::{AUDIO_TICK_MS, ENGINE_LOCK_TIMEOUT_MS};
use crate::sensor::{self, SensorReport, SensorTopics};
use crate::transfer::UploadReceiver;

/// Static description of one roster entry
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    pub name: &'static str,
    /// Higher runs first when contexts compete (informational on hosts
    /// without scheduler priorities)
    pub priority: u8,
    pub period: Duration,
}

/// The roster, audio first
pub const ROSTER: &[TaskSpec] = &[
    TaskSpec {
        name: "audio-pump",
        priority: 3,
        period: Duration::from_millis(AUDIO_TICK_MS),
    },
    TaskSpec {
        name: "bus-loop",
        priority: 2,
        period: Duration::ZERO,
    },
    TaskSpec {
        name: "stream-ingress",
        priority: 2,
        period: Duration::ZERO,
    },
    TaskSpec {
        name: "sensor-forward",
        priority: 1,
        period: Duration::ZERO,
    },
    TaskSpec {
        name: "upload-watchdog",
        priority: 1,
        period: Duration::from_secs(5),
    },
];

/// Spawn the audio pump: a dedicated thread ticking the engine every
/// `AUDIO_TICK_MS`. The engine lock is taken with a short bounded wait;
/// a timeout skips the tick instead of stalling the real-time path.
pub fn spawn_audio_pump(
    engine: Arc<Mutex<AudioEngine>>,
    bus: BusHandle,
    status_topic: String,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    let period = Duration::from_millis(AUDIO_TICK_MS);
    let lock_timeout = Duration::from_millis(ENGINE_LOCK_TIMEOUT_MS);

    thread::Builder::new()
        .name("audio-pump".to_string())
        .spawn(move || {
            tracing::info!("Audio pump started ({:?} period)", period);

            while !shutdown.load(Ordering::Relaxed) {
                let tick_start = Instant::now();

                match engine.try_lock_for(lock_timeout) {
                    Some(mut engine) => {
                        let outcome = engine.advance();
                        drop(engine);

                        match outcome {
                            Advance::Finished => {
                                bus.publish(&status_topic, "finished");
                            }
                            Advance::Failed => {
                                bus.publish(&status_topic, "error");
                            }
                            _ => {}
                        }
                    }
                    None => {
                        // A mode switch holds the lock; keep cadence and retry
                        tracing::trace!("Engine busy, skipping tick");
                    }
                }

                let elapsed = tick_start.elapsed();
                if elapsed < period {
                    thread::sleep(period - elapsed);
                }
            }

            tracing::info!("Audio pump stopped");
        })
}

/// Forward relay records from the ingress queue to the bus. Publishing is
/// paused while an upload is receiving so sensor traffic cannot contend
/// with chunk ACKs on the transport.
pub fn spawn_sensor_forwarder(
    mut records: mpsc::Receiver<bytes::Bytes>,
    bus: BusHandle,
    topics: SensorTopics,
    upload: Arc<Mutex<UploadReceiver>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(record) = records.recv().await {
            let report = match SensorReport::parse(&record) {
                Ok(report) => report,
                Err(e) => {
                    tracing::warn!("Dropping relay record: {}", e);
                    continue;
                }
            };

            if upload.lock().is_receiving() {
                tracing::debug!("Skipping sensor publish (upload in progress)");
                continue;
            }

            sensor::publish_report(&bus, &topics, &report);
        }
    })
}

/// Periodically expire stale upload sessions
pub fn spawn_upload_watchdog(upload: Arc<Mutex<UploadReceiver>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            upload.lock().check_timeout(Instant::now());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_is_audio_first() {
        assert_eq!(ROSTER[0].name, "audio-pump");
        assert!(ROSTER
            .windows(2)
            .all(|pair| pair[0].priority >= pair[1].priority));
    }

    #[test]
    fn test_audio_pump_cadence_is_short() {
        let audio = &ROSTER[0];
        assert!(audio.period <= Duration::from_millis(20));
    }
}
