//! Trigger controller: polls the motion sensor and runs the pipeline once
//! per qualifying trigger, followed by a cooldown during which the sensor is
//! not sampled.

use crate::pipeline::{PipelineError, TriggerHandler};
use doorsight_hw::{MotionSensor, SensorError};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("motion sensor failed: {0}")]
    Sensor(#[from] SensorError),
    #[error("pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Processing,
    Cooldown,
}

/// What a failed pipeline run does to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Log the failure, cool down, keep watching.
    #[default]
    Recover,
    /// Stop the controller with the failure.
    Abort,
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recover" => Ok(ErrorPolicy::Recover),
            "abort" => Ok(ErrorPolicy::Abort),
            other => Err(format!("unknown error policy {other:?} (expected recover or abort)")),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorPolicy::Recover => "recover",
            ErrorPolicy::Abort => "abort",
        })
    }
}

/// Time source for polling and cooldown.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub poll_interval: Duration,
    pub cooldown: Duration,
}

pub struct Controller<S, H, K = SystemClock> {
    sensor: S,
    handler: H,
    clock: K,
    timing: Timing,
    policy: ErrorPolicy,
    state: TriggerState,
    triggers: u64,
}

impl<S, H, K> Controller<S, H, K>
where
    S: MotionSensor,
    H: TriggerHandler,
    K: Clock,
{
    pub fn new(sensor: S, handler: H, clock: K, timing: Timing, policy: ErrorPolicy) -> Self {
        Self {
            sensor,
            handler,
            clock,
            timing,
            policy,
            state: TriggerState::Idle,
            triggers: 0,
        }
    }

    /// Number of pipeline runs started so far.
    pub fn triggers(&self) -> u64 {
        self.triggers
    }

    /// Run until `shutdown` is set or a fatal error occurs.
    ///
    /// `shutdown` is checked between sensor samples and between cooldown
    /// slices, never while the pipeline is running.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), ControllerError> {
        tracing::info!(
            poll_ms = self.timing.poll_interval.as_millis() as u64,
            cooldown_ms = self.timing.cooldown.as_millis() as u64,
            policy = %self.policy,
            "watching for motion"
        );

        loop {
            if shutdown.load(Ordering::SeqCst) {
                tracing::info!(triggers = self.triggers, "shutdown requested");
                return Ok(());
            }

            match self.state {
                TriggerState::Idle => {
                    if self.sensor.is_active()? {
                        tracing::info!("motion detected");
                        self.state = TriggerState::Processing;
                    } else {
                        self.clock.sleep(self.timing.poll_interval);
                    }
                }
                TriggerState::Processing => {
                    self.process()?;
                    self.state = TriggerState::Cooldown;
                }
                TriggerState::Cooldown => {
                    if !self.cool_down(shutdown) {
                        continue;
                    }
                    self.state = TriggerState::Idle;
                }
            }
        }
    }

    fn process(&mut self) -> Result<(), ControllerError> {
        self.triggers += 1;
        let started = self.clock.now();
        match self.handler.handle_trigger() {
            Ok(()) => {
                tracing::debug!(
                    elapsed_ms = self.clock.now().duration_since(started).as_millis() as u64,
                    "trigger handled"
                );
                Ok(())
            }
            Err(e) => match self.policy {
                ErrorPolicy::Recover => {
                    tracing::warn!(error = %e, "trigger failed; continuing after cooldown");
                    Ok(())
                }
                ErrorPolicy::Abort => Err(e.into()),
            },
        }
    }

    /// Sleep out the cooldown in poll-sized slices. Returns false if
    /// shutdown was requested before it elapsed.
    fn cool_down(&mut self, shutdown: &AtomicBool) -> bool {
        let start = self.clock.now();
        loop {
            let now = self.clock.now();
            let elapsed = now.saturating_duration_since(start);
            if elapsed >= self.timing.cooldown {
                return true;
            }
            if shutdown.load(Ordering::SeqCst) {
                return false;
            }
            self.clock.sleep(self.timing.poll_interval.min(self.timing.cooldown - elapsed));
        }
    }
}
