//! Fixed-cadence tick loop shared by the binary and background drivers.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::SharedEngine;
use crate::command::CommandDrain;
use crate::control::ControlError;

/// Run one driver frame: apply queued commands, then step if started.
///
/// Returns whether a tick was executed.
pub fn drive_frame(engine: &SharedEngine, drain: &CommandDrain) -> Result<bool, ControlError> {
    let mut engine = engine.lock()?;
    drain(&mut *engine);
    Ok(engine.step_if_running().is_some())
}

/// Apply queued commands without stepping and return the resulting tick cadence.
pub fn settle_cadence(
    engine: &SharedEngine,
    drain: &CommandDrain,
) -> Result<Duration, ControlError> {
    let mut engine = engine.lock()?;
    drain(&mut *engine);
    Ok(Duration::from_millis(engine.config().tick_interval_ms))
}

/// Run `frames` driver frames on the calling thread, pacing them at `cadence`.
///
/// Frames spent while the engine is stopped still count. Returns the number
/// of ticks actually executed.
pub fn run_frames(
    engine: &SharedEngine,
    drain: &CommandDrain,
    frames: u64,
    cadence: Duration,
) -> Result<u64, ControlError> {
    let mut ticks = 0;
    for _ in 0..frames {
        let started = Instant::now();
        if drive_frame(engine, drain)? {
            ticks += 1;
        }
        pace(started, cadence);
    }
    Ok(ticks)
}

fn pace(started: Instant, cadence: Duration) {
    let remaining = cadence.saturating_sub(started.elapsed());
    if !remaining.is_zero() {
        thread::sleep(remaining);
    }
}

/// Background thread that drives the engine until stopped or dropped.
pub struct TickDriver {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<u64>>,
}

impl TickDriver {
    pub fn spawn(
        engine: SharedEngine,
        drain: CommandDrain,
        cadence: Duration,
    ) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("intentsim-tick-driver".into())
            .spawn(move || {
                let mut ticks = 0_u64;
                while !flag.load(Ordering::Acquire) {
                    let started = Instant::now();
                    match drive_frame(&engine, &drain) {
                        Ok(true) => ticks += 1,
                        Ok(false) => {}
                        Err(err) => {
                            warn!(error = %err, "tick driver exiting");
                            break;
                        }
                    }
                    pace(started, cadence);
                }
                debug!(ticks, "tick driver stopped");
                ticks
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signal the loop to exit and wait for it; returns ticks executed.
    pub fn shutdown(mut self) -> u64 {
        self.join()
    }

    fn join(&mut self) -> u64 {
        self.stop.store(true, Ordering::Release);
        match self.handle.take().map(thread::JoinHandle::join) {
            Some(Ok(ticks)) => ticks,
            Some(Err(_)) => {
                warn!("tick driver thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{create_command_bus, make_command_drain};
    use crate::control::{ControlHandle, KnobUpdate};
    use intentsim_core::{ControlCommand, SimulationConfig, SimulationEngine, Tick};
    use std::sync::Mutex;

    fn shared() -> SharedEngine {
        let engine = SimulationEngine::new(SimulationConfig {
            rng_seed: Some(3),
            ..SimulationConfig::default()
        })
        .expect("engine");
        Arc::new(Mutex::new(engine))
    }

    #[test]
    fn stopped_engine_consumes_frames_without_ticking() {
        let engine = shared();
        let (_sender, receiver) = create_command_bus(4);
        let drain = make_command_drain(receiver);
        let ticks = run_frames(&engine, &drain, 5, Duration::ZERO).expect("frames");
        assert_eq!(ticks, 0);
        assert_eq!(engine.lock().expect("lock").tick(), Tick::zero());
    }

    #[test]
    fn queued_start_is_applied_before_the_first_tick() {
        let engine = shared();
        let (sender, receiver) = create_command_bus(4);
        sender.try_send(ControlCommand::Start).expect("send");
        let drain = make_command_drain(receiver);
        let ticks = run_frames(&engine, &drain, 4, Duration::ZERO).expect("frames");
        assert_eq!(ticks, 4);
        assert_eq!(engine.lock().expect("lock").tick(), Tick(4));
    }

    #[test]
    fn cadence_reflects_queued_overrides() {
        let engine = shared();
        let (sender, receiver) = create_command_bus(4);
        let control = ControlHandle::new(Arc::clone(&engine), sender);
        let drain = make_command_drain(receiver);
        assert_eq!(
            settle_cadence(&engine, &drain).expect("cadence"),
            Duration::from_millis(33)
        );

        control
            .apply_updates(&[KnobUpdate {
                path: "tick_interval_ms".into(),
                value: serde_json::Value::from(0),
            }])
            .expect("patch");
        assert_eq!(settle_cadence(&engine, &drain).expect("cadence"), Duration::ZERO);
        assert_eq!(engine.lock().expect("lock").tick(), Tick::zero());
    }
}
