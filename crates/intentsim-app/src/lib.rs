//! Shared application plumbing for IntentSim control surfaces.

use std::sync::{Arc, Mutex};

use intentsim_core::SimulationEngine;

pub type SharedEngine = Arc<Mutex<SimulationEngine>>;

pub mod command;
pub mod control;
pub mod driver;

pub use command::{
    CommandDrain, CommandReceiver, CommandSender, create_command_bus, drain_pending_commands,
    make_command_drain,
};
pub use control::{ConfigSnapshot, ControlError, ControlHandle, KnobEntry, KnobKind, KnobUpdate};
pub use driver::{TickDriver, drive_frame, run_frames, settle_cadence};

/// Default capacity of the control command queue.
pub const COMMAND_QUEUE_CAPACITY: usize = 256;
