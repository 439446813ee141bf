//! Cooperative run loop on a tokio task.
//!
//! Stopping sets a flag checked between steps, so a stop never lands in the
//! middle of a command or an event batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::IdleConfig;
use crate::engine::Step;
use crate::error::{EngineError, EngineResult};

/// Idle strategy for steps that did no work: spin, then yield to the
/// runtime, then sleep with exponential backoff.
#[derive(Debug, Clone)]
pub struct BackoffIdle {
    spin_steps: u32,
    yield_steps: u32,
    min_park: Duration,
    max_park: Duration,
    idle_steps: u32,
    park: Duration,
}

impl BackoffIdle {
    pub fn new(config: &IdleConfig) -> Self {
        let min_park = Duration::from_micros(config.min_park_micros);
        Self {
            spin_steps: config.spin_steps,
            yield_steps: config.yield_steps,
            min_park,
            max_park: Duration::from_micros(config.max_park_micros),
            idle_steps: 0,
            park: min_park,
        }
    }

    /// Call after every step with the work it reported.
    pub async fn idle(&mut self, work: usize) {
        if work > 0 {
            self.reset();
            return;
        }

        self.idle_steps = self.idle_steps.saturating_add(1);
        if self.idle_steps <= self.spin_steps {
            std::hint::spin_loop();
        } else if self.idle_steps <= self.spin_steps.saturating_add(self.yield_steps) {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.park).await;
            self.park = (self.park * 2).min(self.max_park);
        }
    }

    pub fn reset(&mut self) {
        self.idle_steps = 0;
        self.park = self.min_park;
    }

    /// Sleep the next idle step would use once past spinning and yielding.
    pub fn current_park(&self) -> Duration {
        self.park
    }
}

impl Default for BackoffIdle {
    fn default() -> Self {
        Self::new(&IdleConfig::default())
    }
}

pub struct Runner;

impl Runner {
    /// Spawn the loop. Must be called from inside a tokio runtime.
    pub fn start<E>(mut engine: E, mut idle: BackoffIdle) -> RunnerHandle<E>
    where
        E: Step + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let task = tokio::spawn(async move {
            info!("Run loop started");
            let mut steps: u64 = 0;
            while flag.load(Ordering::Acquire) {
                let work = match engine.step() {
                    Ok(work) => work,
                    Err(e) => {
                        engine.exception_handler().handle_fatal(&e);
                        flag.store(false, Ordering::Release);
                        return Err(e);
                    }
                };
                steps += 1;
                idle.idle(work).await;
            }
            info!(steps, "Run loop stopped");
            Ok(engine)
        });

        RunnerHandle {
            running,
            task: Some(task),
        }
    }
}

/// Control handle for a spawned run loop.
pub struct RunnerHandle<E> {
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<EngineResult<E>>>,
}

impl<E> RunnerHandle<E> {
    /// Ask the loop to stop after the step in progress.
    pub fn stop(&self) {
        debug!("Stop requested");
        self.running.store(false, Ordering::Release);
    }

    /// `false` once stopped or after a fatal error.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Wait for the loop to finish and take the engine back.
    ///
    /// `Ok(None)` when the timeout elapsed first; the handle stays usable and
    /// `join` can be called again. A fatal step error comes back as `Err`.
    pub async fn join(&mut self, timeout: Duration) -> EngineResult<Option<E>> {
        let Some(task) = self.task.as_mut() else {
            return Err(EngineError::Join("run loop already joined".into()));
        };
        match tokio::time::timeout(timeout, task).await {
            Err(_) => Ok(None),
            Ok(joined) => {
                self.task = None;
                let result = joined.map_err(|e| EngineError::Join(e.to_string()))?;
                result.map(Some)
            }
        }
    }
}
