//! The process model and compiled RTL processes.
//!
//! Three process kinds cooperate behind one trait: compiled domain logic
//! ([`RtlProcess`]), clock generators ([`crate::clock::ClockProcess`]), and
//! user coroutines ([`crate::coro::CoroProcess`]). The scheduler drives
//! whichever processes are runnable, with no preemption: a process runs
//! until it returns.

use hdlsim_common::{ClockDomain, SimResult};
use tracing::trace;

use crate::host::{ModuleRunner, WasmHost};
use crate::state::SimState;

/// Mutable simulation context handed to a running process.
pub struct SimContext<'a> {
    /// Slot table, triggers, and timeline.
    pub state: &'a mut SimState,
    /// Wasm host bridge and slot memory.
    pub host: &'a mut WasmHost,
    /// Clock domains of the design, for tick resolution.
    pub domains: &'a [ClockDomain],
}

impl SimContext<'_> {
    /// Stage a slot value in both the state and the slot memory.
    pub fn set_slot(&mut self, index: usize, value: i64) -> SimResult<()> {
        self.state.set_slot(index, value);
        self.host.write_next(index, value)
    }

    /// Record changes drained from a module run.
    ///
    /// The module already stored the staged values in memory; only the
    /// state-side bookkeeping remains.
    pub fn apply_changes(&mut self, changes: &[(u64, u64)]) {
        for &(index, value) in changes {
            self.state.set_slot(index as usize, value as i64);
        }
    }

    /// Initialize memory for any slots allocated since the last sync.
    pub fn sync_new_slots(&mut self) -> SimResult<()> {
        let state = &self.state;
        self.host.sync_new_slots(state.num_slots(), |index| {
            let slot = state.slot(index);
            (slot.curr, slot.next)
        })
    }
}

/// A cooperative simulation process.
pub trait Process {
    /// Whether the scheduler should run this process in the next pass.
    fn runnable(&self) -> bool;

    /// Mark or clear runnability.
    fn set_runnable(&mut self, runnable: bool);

    /// Passive processes never keep the simulation alive.
    fn passive(&self) -> bool;

    /// Whether the process is parked on signal triggers.
    fn blocked_on_trigger(&self) -> bool {
        false
    }

    /// Return to the initial state. Trigger registrations made at
    /// construction time are retained; per-run registrations are cleared.
    fn reset(&mut self, state: &mut SimState);

    /// Run until the process yields or completes.
    fn run(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()>;
}

/// A compiled driver domain.
///
/// Combinational processes start runnable and re-run whenever an input
/// changes; clocked processes run on their domain's active clock edge (and
/// on reset assertion for async-reset domains). Always passive.
pub struct RtlProcess {
    runnable: bool,
    is_comb: bool,
    runner: ModuleRunner,
    domain_name: Option<String>,
}

impl RtlProcess {
    /// Wrap a compiled, instantiated domain module.
    pub fn new(runner: ModuleRunner, is_comb: bool, domain_name: Option<String>) -> Self {
        RtlProcess {
            runnable: is_comb,
            is_comb,
            runner,
            domain_name,
        }
    }
}

impl Process for RtlProcess {
    fn runnable(&self) -> bool {
        self.runnable
    }

    fn set_runnable(&mut self, runnable: bool) {
        self.runnable = runnable;
    }

    fn passive(&self) -> bool {
        true
    }

    fn blocked_on_trigger(&self) -> bool {
        true
    }

    fn reset(&mut self, _state: &mut SimState) {
        self.runnable = self.is_comb;
    }

    fn run(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        let (_, changes) = ctx.host.run(&self.runner)?;
        trace!(
            domain = self.domain_name.as_deref().unwrap_or("comb"),
            changes = changes.len(),
            "rtl process ran"
        );
        ctx.apply_changes(&changes);
        Ok(())
    }
}
