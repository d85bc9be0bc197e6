//! The outer simulation API.

use hdlsim_common::{ps_from_seconds, ClockDomain, SimError, SimResult};
use hdlsim_compiler::fragment::Fragment;
use tracing::info;

use crate::coro::{Command, SimHandle};
use crate::engine::{engine_by_name, process_fn, BaseEngine};
use crate::waveform::WaveformObserver;

/// Event-driven simulator over an elaborated fragment.
pub struct Simulator {
    engine: Box<dyn BaseEngine>,
    domains: Vec<ClockDomain>,
    clocked: Vec<String>,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("domains", &self.domains)
            .field("clocked", &self.clocked)
            .finish()
    }
}

impl Simulator {
    /// Simulate `fragment` on the WebAssembly engine.
    pub fn new(fragment: &Fragment) -> SimResult<Self> {
        Self::with_engine(fragment, "wasm")
    }

    /// Simulate `fragment` on a named engine; unknown names are fatal.
    pub fn with_engine(fragment: &Fragment, engine: &str) -> SimResult<Self> {
        let domains = fragment.collect_domains();
        let engine = engine_by_name(engine, fragment)?;
        Ok(Simulator {
            engine,
            domains,
            clocked: Vec::new(),
        })
    }

    /// Drive the `sync` domain with a clock of `period` seconds.
    pub fn add_clock(&mut self, period: f64) -> SimResult<()> {
        self.add_clock_to(period, 0.0, "sync", false)
    }

    /// Drive `domain` with a clock.
    ///
    /// The first transition occurs at `phase` seconds, subsequent ones every
    /// half period. Fails on a missing domain unless `if_exists`, and on a
    /// domain that already has a clock.
    pub fn add_clock_to(
        &mut self,
        period: f64,
        phase: f64,
        domain: &str,
        if_exists: bool,
    ) -> SimResult<()> {
        let Some(found) = self.domains.iter().find(|d| d.name == domain) else {
            if if_exists {
                return Ok(());
            }
            return Err(SimError::MissingDomain(domain.to_string()));
        };
        if self.clocked.iter().any(|name| name == domain) {
            return Err(SimError::DuplicateClock(domain.to_string()));
        }
        let clk = found.clk.clone();
        self.engine
            .add_clock_process(clk, ps_from_seconds(phase), ps_from_seconds(period))?;
        self.clocked.push(domain.to_string());
        info!(domain, period_s = period, phase_s = phase, "clock added");
        Ok(())
    }

    /// Add a user process.
    ///
    /// The closure runs on its own thread and drives the simulation through
    /// the [`SimHandle`]; a bare [`SimHandle::wait`] is an error for
    /// processes added this way.
    pub fn add_process<F>(&mut self, f: F) -> SimResult<()>
    where
        F: Fn(SimHandle) + Send + Sync + 'static,
    {
        self.engine.add_coroutine_process(process_fn(f), None)
    }

    /// Add a synchronous user process on `domain`.
    ///
    /// A bare [`SimHandle::wait`] waits for the domain's next active clock
    /// edge, and user code starts only after the first edge.
    pub fn add_sync_process<F>(&mut self, f: F, domain: &str) -> SimResult<()>
    where
        F: Fn(SimHandle) + Send + Sync + 'static,
    {
        self.engine
            .add_coroutine_process(process_fn(f), Some(Command::Tick(domain.to_string())))
    }

    /// Run until no active process remains runnable or scheduled.
    pub fn run(&mut self) -> SimResult<()> {
        while self.engine.advance()? {}
        Ok(())
    }

    /// Run until `deadline` seconds of simulated time, or completion,
    /// whichever comes first.
    pub fn run_until(&mut self, deadline: f64) -> SimResult<()> {
        while self.engine.advance()? && self.engine.now() < deadline {}
        Ok(())
    }

    /// Reinitialize every slot and process; the timeline clears and time
    /// rewinds to zero.
    pub fn reset(&mut self) -> SimResult<()> {
        self.engine.reset()
    }

    /// Current simulated time in seconds.
    pub fn now(&self) -> f64 {
        self.engine.now()
    }

    /// Begin waveform capture; fatal after simulated time has advanced.
    pub fn attach_waveform(&mut self, observer: Box<dyn WaveformObserver>) -> SimResult<()> {
        self.engine.attach_waveform(observer)
    }
}
