use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::sample_ingress::{SampleIngress, SensorEvent};
use crate::constants::threads;
use crate::error::{Result, VitalsError};

/// External producer of samples.
///
/// A source is handed the pipeline's single [`SampleIngress`] on start and
/// pushes samples through it from its own thread.
pub trait SensorSource: Send {
    fn start(&mut self, ingress: SampleIngress) -> Result<()>;

    /// Stop producing and release the ingress
    fn stop(&mut self);

    fn is_active(&self) -> bool;
}

/// One step of a replay script
#[derive(Debug, Clone, Copy)]
pub struct ScriptStep {
    /// Pause before submitting the event
    pub delay: Duration,
    pub event: SensorEvent,
}

/// Replays a prepared sequence of samples on a `vitals-sensor` thread
#[derive(Debug)]
pub struct ScriptedSensorSource {
    script: Option<Vec<ScriptStep>>,
    active: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    handle: Option<JoinHandle<SampleIngress>>,
}

impl ScriptedSensorSource {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script: Some(script),
            active: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Replay `events` with a fixed pause between them
    pub fn with_interval(events: impl IntoIterator<Item = SensorEvent>, interval: Duration) -> Self {
        Self::new(
            events
                .into_iter()
                .map(|event| ScriptStep { delay: interval, event })
                .collect(),
        )
    }

    /// Block until the script has been fully replayed, returning the ingress
    pub fn wait(&mut self) -> Option<SampleIngress> {
        let ingress = self.handle.take()?.join().ok();
        self.active.store(false, Ordering::Release);
        ingress
    }
}

impl SensorSource for ScriptedSensorSource {
    fn start(&mut self, mut ingress: SampleIngress) -> Result<()> {
        let script = self
            .script
            .take()
            .ok_or_else(|| VitalsError::Validation("scripted source already started".to_string()))?;

        let active = Arc::clone(&self.active);
        let stop_requested = Arc::clone(&self.stop_requested);
        active.store(true, Ordering::Release);

        let handle = std::thread::Builder::new()
            .name(threads::SENSOR.to_string())
            .spawn(move || {
                info!(steps = script.len(), "Scripted sensor source started");
                for step in &script {
                    if stop_requested.load(Ordering::Acquire) {
                        break;
                    }
                    if !step.delay.is_zero() {
                        std::thread::sleep(step.delay);
                    }
                    match ingress.submit(step.event) {
                        Ok(()) => {}
                        Err(VitalsError::Shutdown(reason)) => {
                            debug!(%reason, "Pipeline gone, scripted source stopping");
                            break;
                        }
                        Err(err) => debug!(error = %err, "Scripted sample not accepted"),
                    }
                }
                active.store(false, Ordering::Release);
                info!(
                    accepted = ingress.accepted(),
                    rejected = ingress.rejected(),
                    "Scripted sensor source finished"
                );
                ingress
            })
            .map_err(|e| VitalsError::Shutdown(format!("failed to spawn sensor thread: {e}")))?;

        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_requested.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Scripted sensor thread panicked");
            }
        }
        self.active.store(false, Ordering::Release);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for ScriptedSensorSource {
    fn drop(&mut self) {
        self.stop();
    }
}
