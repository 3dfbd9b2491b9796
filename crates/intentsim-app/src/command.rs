use crossfire::mpmc;
use crossfire::{MAsyncTx, MRx, TryRecvError, detect_backoff_cfg};
use intentsim_core::{ControlCommand, SimulationEngine, apply_control_command};
use std::sync::Arc;
use tracing::debug;

pub type CommandSender = MAsyncTx<ControlCommand>;
pub type CommandReceiver = MRx<ControlCommand>;
pub type CommandDrain = Arc<dyn Fn(&mut SimulationEngine) -> usize + Send + Sync>;

/// Bounded multi-producer queue carrying commands to the tick driver.
pub fn create_command_bus(capacity: usize) -> (CommandSender, CommandReceiver) {
    detect_backoff_cfg();
    mpmc::bounded_tx_async_rx_blocking(capacity.max(1))
}

/// Apply every queued command in arrival order; returns how many were applied.
pub fn drain_pending_commands(receiver: &CommandReceiver, engine: &mut SimulationEngine) -> usize {
    let mut applied = 0;
    loop {
        match receiver.try_recv() {
            Ok(command) => {
                debug!(?command, tick = engine.tick().0, "applying control command");
                apply_control_command(engine, command);
                applied += 1;
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
    applied
}

pub fn make_command_drain(receiver: CommandReceiver) -> CommandDrain {
    let receiver = Arc::new(receiver);
    Arc::new(move |engine: &mut SimulationEngine| drain_pending_commands(&receiver, engine))
}
