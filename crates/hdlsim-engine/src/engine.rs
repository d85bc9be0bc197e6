//! The event-driven scheduler.
//!
//! A settle step runs every runnable process, commits staged changes, and
//! wakes trigger watchers, repeating until no trigger fires; the timeline
//! then advances by one `(deadline, priority)` group. Within one settle
//! step compiled logic observes a frozen `curr`; writes accumulate only in
//! `next` and land atomically at commit.

use std::sync::Arc;

use hdlsim_common::{
    seconds_from_ps, ClockDomain, EngineConfig, SignalRef, SimError, SimResult,
};
use hdlsim_compiler::fragment::Fragment;
use hdlsim_compiler::FragmentCompiler;
use tracing::{debug, info, trace};

use crate::clock::ClockProcess;
use crate::coro::{Command, CoroProcess, ProcessFn};
use crate::host::WasmHost;
use crate::process::{Process, RtlProcess, SimContext};
use crate::state::{SimState, Trigger};
use crate::waveform::WaveformObserver;

/// The engine surface the simulator facade drives.
///
/// A concrete alternative engine may be substituted at simulator
/// construction.
pub trait BaseEngine {
    /// Register a user process; when `default_cmd` is a tick, the process
    /// behaves synchronously (one initial tick is consumed before user
    /// code).
    fn add_coroutine_process(
        &mut self,
        constructor: ProcessFn,
        default_cmd: Option<Command>,
    ) -> SimResult<()>;

    /// Register a free-running clock over `clock`.
    fn add_clock_process(
        &mut self,
        clock: SignalRef,
        phase_ps: u64,
        period_ps: u64,
    ) -> SimResult<()>;

    /// Reinitialize state, processes, and the timeline.
    fn reset(&mut self) -> SimResult<()>;

    /// Perform one settle step and one timeline advance.
    ///
    /// Returns `true` while the simulation has work: some non-passive
    /// process is runnable, scheduled, or parked on a trigger that can
    /// still fire.
    fn advance(&mut self) -> SimResult<bool>;

    /// Current simulated time in seconds.
    fn now(&self) -> f64;

    /// Attach a waveform observer; fatal once time has advanced.
    fn attach_waveform(&mut self, observer: Box<dyn WaveformObserver>) -> SimResult<()>;
}

/// The WebAssembly simulation engine.
pub struct WasmEngine {
    state: SimState,
    host: WasmHost,
    processes: Vec<Box<dyn Process>>,
    domains: Vec<ClockDomain>,
    waveform: Option<Box<dyn WaveformObserver>>,
}

impl WasmEngine {
    /// Compile `fragment` and build the process table.
    pub fn new(fragment: &Fragment) -> SimResult<Self> {
        let config = EngineConfig::from_env();
        let mut state = SimState::new();
        let domains = fragment.collect_domains();

        // domain clocks and resets get the first slots so clock processes
        // and tick triggers resolve without reallocation
        for domain in &domains {
            state.get_signal(&domain.clk);
            if let Some(rst) = &domain.rst {
                state.get_signal(rst);
            }
        }

        let compiled = FragmentCompiler::compile(&mut state, fragment)?;
        let mut host = WasmHost::new(&config)?;
        host.sync_new_slots(state.num_slots(), |index| {
            let slot = state.slot(index);
            (slot.curr, slot.next)
        })?;

        let mut processes: Vec<Box<dyn Process>> = Vec::new();
        for compiled_domain in compiled {
            let pid = processes.len();
            let runner = host.instantiate(&compiled_domain.unit.wat)?;
            match &compiled_domain.domain {
                None => {
                    for signal in &compiled_domain.unit.inputs {
                        let index = state.get_signal(signal);
                        state.add_trigger(pid, index, Trigger::AnyChange);
                    }
                }
                Some(domain) => {
                    let clk = state.get_signal(&domain.clk);
                    state.add_trigger(pid, clk, Trigger::Edge(domain.clk_edge.level()));
                    if domain.async_reset {
                        if let Some(rst) = &domain.rst {
                            let rst = state.get_signal(rst);
                            state.add_trigger(pid, rst, Trigger::Edge(1));
                        }
                    }
                }
            }
            processes.push(Box::new(RtlProcess::new(
                runner,
                compiled_domain.domain.is_none(),
                compiled_domain.domain.as_ref().map(|d| d.name.clone()),
            )));
        }

        info!(
            slots = state.num_slots(),
            rtl_processes = processes.len(),
            domains = domains.len(),
            "simulation engine constructed"
        );

        Ok(WasmEngine {
            state,
            host,
            processes,
            domains,
            waveform: None,
        })
    }

    /// Run the settle fixed point: eval all runnables, commit, wake, repeat
    /// while triggers fire.
    fn settle(&mut self) -> SimResult<()> {
        loop {
            for pid in 0..self.processes.len() {
                if self.processes[pid].runnable() {
                    self.processes[pid].set_runnable(false);
                    let mut ctx = SimContext {
                        state: &mut self.state,
                        host: &mut self.host,
                        domains: &self.domains,
                    };
                    self.processes[pid].run(&mut ctx)?;
                }
            }
            let result = self.state.commit();
            for (index, value) in &result.updates {
                self.host.write_curr(*index, *value)?;
            }
            if let Some(observer) = self.waveform.as_mut() {
                for (index, value) in &result.updates {
                    observer.change(self.state.now_ps(), self.state.signal_at(*index), *value);
                }
            }
            if result.woken.is_empty() {
                break;
            }
            trace!(woken = result.woken.len(), "triggers fired, re-settling");
            for pid in result.woken {
                self.processes[pid].set_runnable(true);
            }
        }
        Ok(())
    }

    fn has_work(&self) -> bool {
        let any_runnable = self.processes.iter().any(|p| p.runnable());
        let progress_possible = any_runnable || self.state.has_timeline();
        let any_active = self.processes.iter().enumerate().any(|(pid, p)| {
            !p.passive()
                && (p.runnable() || p.blocked_on_trigger() || self.state.scheduled(pid))
        });
        any_active && progress_possible
    }

    fn sync_all_slots(&mut self) -> SimResult<()> {
        for index in 0..self.state.num_slots() {
            let slot = *self.state.slot(index);
            self.host.write_curr(index, slot.curr)?;
            self.host.write_next(index, slot.next)?;
        }
        Ok(())
    }
}

impl BaseEngine for WasmEngine {
    fn add_coroutine_process(
        &mut self,
        constructor: ProcessFn,
        default_cmd: Option<Command>,
    ) -> SimResult<()> {
        let pid = self.processes.len();
        let process = CoroProcess::new(pid, constructor, default_cmd)?;
        self.processes.push(Box::new(process));
        debug!(pid, "coroutine process added");
        Ok(())
    }

    fn add_clock_process(
        &mut self,
        clock: SignalRef,
        phase_ps: u64,
        period_ps: u64,
    ) -> SimResult<()> {
        let pid = self.processes.len();
        let process = ClockProcess::new(pid, &mut self.state, &clock, phase_ps, period_ps)?;
        let state = &self.state;
        self.host.sync_new_slots(state.num_slots(), |index| {
            let slot = state.slot(index);
            (slot.curr, slot.next)
        })?;
        self.processes.push(Box::new(process));
        debug!(pid, clock = clock.name(), period_ps, phase_ps, "clock process added");
        Ok(())
    }

    fn reset(&mut self) -> SimResult<()> {
        self.state.reset();
        self.sync_all_slots()?;
        for pid in 0..self.processes.len() {
            self.processes[pid].reset(&mut self.state);
        }
        debug!("simulation reset");
        Ok(())
    }

    fn advance(&mut self) -> SimResult<bool> {
        self.settle()?;
        if let Some(woken) = self.state.advance_time() {
            for pid in woken {
                self.processes[pid].set_runnable(true);
            }
        }
        Ok(self.has_work())
    }

    fn now(&self) -> f64 {
        seconds_from_ps(self.state.now_ps())
    }

    fn attach_waveform(&mut self, observer: Box<dyn WaveformObserver>) -> SimResult<()> {
        if self.state.now_ps() != 0 {
            return Err(SimError::WaveformAfterTime);
        }
        self.waveform = Some(observer);
        Ok(())
    }
}

/// Build an engine by name; `"wasm"` is the only registered engine.
pub fn engine_by_name(name: &str, fragment: &Fragment) -> SimResult<Box<dyn BaseEngine>> {
    match name {
        "wasm" => Ok(Box::new(WasmEngine::new(fragment)?)),
        other => Err(SimError::UnknownEngine(other.to_string())),
    }
}

/// Convenience constructor used by `Simulator::add_process` and friends.
pub fn process_fn<F>(f: F) -> ProcessFn
where
    F: Fn(crate::coro::SimHandle) + Send + Sync + 'static,
{
    Arc::new(f)
}
