//! User coroutine processes and the command protocol.
//!
//! A user process is a closure running on its own thread, speaking to the
//! scheduler through a [`SimHandle`]: every handle method sends one
//! [`Command`] and blocks until the scheduler responds. The scheduler side
//! ([`CoroProcess`]) drains commands until one parks the process (a tick,
//! settle, or delay), mirroring generator semantics with a parked
//! continuation. Errors raised while interpreting a command are funnelled
//! back as the `Err` result of the handle call that issued it.

use std::any::Any;
use std::collections::HashSet;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use hdlsim_common::{ps_from_seconds, SignalRef, SimError, SimResult};
use hdlsim_compiler::ast::{Statement, Value};
use hdlsim_compiler::{compile_statements, compile_value, InitStyle};
use tracing::{debug, warn};

use crate::process::{Process, SimContext};
use crate::state::{ProcessId, SimState, Trigger};

/// Constructor of a user process body; re-invoked on simulator reset.
pub type ProcessFn = Arc<dyn Fn(SimHandle) + Send + Sync + 'static>;

/// A command yielded by a user process.
#[derive(Debug, Clone)]
pub enum Command {
    /// Evaluate an expression against committed values; responds with the
    /// result normalized to the expression's compile-time shape.
    Eval(Value),
    /// Execute statements, staging their writes.
    Exec(Vec<Statement>),
    /// Park until the named domain's active clock edge (or async reset).
    Tick(String),
    /// Park until the current instant has settled.
    Settle,
    /// Park for a duration in seconds; `None` parks with settle priority.
    Delay(Option<f64>),
    /// Stop keeping the simulation alive.
    Passive,
    /// Keep the simulation alive again.
    Active,
    /// A bare wait, resolved to the process's default command.
    Default,
}

#[derive(Debug)]
enum Response {
    Value(i64),
    Done,
    Error(SimError),
    Shutdown,
}

struct ShutdownToken;

/// The user process's side of the command protocol.
pub struct SimHandle {
    cmd_tx: Sender<Command>,
    resp_rx: Receiver<Response>,
}

impl SimHandle {
    fn issue(&self, cmd: Command) -> Response {
        if self.cmd_tx.send(cmd).is_err() {
            std::panic::panic_any(ShutdownToken);
        }
        match self.resp_rx.recv() {
            Ok(Response::Shutdown) | Err(_) => std::panic::panic_any(ShutdownToken),
            Ok(resp) => resp,
        }
    }

    fn expect_done(&self, cmd: Command) -> SimResult<()> {
        match self.issue(cmd) {
            Response::Done | Response::Value(_) => Ok(()),
            Response::Error(e) => Err(e),
            Response::Shutdown => unreachable!("shutdown unwinds"),
        }
    }

    /// Evaluate an expression against committed signal values.
    pub fn eval(&self, value: &Value) -> SimResult<i64> {
        match self.issue(Command::Eval(value.clone())) {
            Response::Value(v) => Ok(v),
            Response::Error(e) => Err(e),
            Response::Done => Err(SimError::UnsupportedCommand("eval yielded no value".into())),
            Response::Shutdown => unreachable!("shutdown unwinds"),
        }
    }

    /// Read a signal's committed value.
    pub fn get(&self, signal: &SignalRef) -> SimResult<i64> {
        self.eval(&Value::from(signal))
    }

    /// Execute statements, staging their writes until the next settle.
    pub fn exec(&self, stmts: Vec<Statement>) -> SimResult<()> {
        self.expect_done(Command::Exec(stmts))
    }

    /// Stage an assignment of `value` to `signal`.
    pub fn set(&self, signal: &SignalRef, value: i64) -> SimResult<()> {
        self.exec(vec![Value::from(signal).assign(Value::int(value))])
    }

    /// Park until the named domain's next active clock edge.
    pub fn tick(&self, domain: &str) -> SimResult<()> {
        self.expect_done(Command::Tick(domain.to_string()))
    }

    /// A bare wait: the process's default command (a tick for processes
    /// added with `add_sync_process`).
    pub fn wait(&self) -> SimResult<()> {
        self.expect_done(Command::Default)
    }

    /// Park until the current instant settles.
    pub fn settle(&self) -> SimResult<()> {
        self.expect_done(Command::Settle)
    }

    /// Park for `seconds` of simulated time.
    pub fn delay(&self, seconds: f64) -> SimResult<()> {
        self.expect_done(Command::Delay(Some(seconds)))
    }

    /// Mark this process passive: it no longer keeps the simulation alive.
    pub fn passive(&self) -> SimResult<()> {
        self.expect_done(Command::Passive)
    }

    /// Mark this process active again.
    pub fn active(&self) -> SimResult<()> {
        self.expect_done(Command::Active)
    }
}

/// Scheduler-side actor driving one user process.
pub struct CoroProcess {
    pid: ProcessId,
    runnable: bool,
    passive: bool,
    constructor: ProcessFn,
    default_cmd: Option<Command>,
    initial_tick: Option<String>,
    started: bool,
    finished: bool,
    thread: Option<JoinHandle<Result<(), Box<dyn Any + Send>>>>,
    cmd_rx: Option<Receiver<Command>>,
    resp_tx: Option<Sender<Response>>,
    pending_response: Option<Response>,
    waits_on: Vec<usize>,
}

impl CoroProcess {
    /// Spawn a user process.
    ///
    /// When the default command is a tick, one initial tick is consumed
    /// before user code runs, so synchronous testbench code starts after
    /// the first active edge like a synchronous flip-flop would.
    pub fn new(
        pid: ProcessId,
        constructor: ProcessFn,
        default_cmd: Option<Command>,
    ) -> SimResult<Self> {
        let initial_tick = match &default_cmd {
            Some(Command::Tick(domain)) => Some(domain.clone()),
            _ => None,
        };
        let mut proc = CoroProcess {
            pid,
            runnable: true,
            passive: false,
            constructor,
            default_cmd,
            initial_tick,
            started: false,
            finished: false,
            thread: None,
            cmd_rx: None,
            resp_tx: None,
            pending_response: None,
            waits_on: Vec::new(),
        };
        proc.spawn()?;
        Ok(proc)
    }

    fn spawn(&mut self) -> SimResult<()> {
        let (cmd_tx, cmd_rx) = channel();
        let (resp_tx, resp_rx) = channel();
        let handle = SimHandle { cmd_tx, resp_rx };
        let constructor = Arc::clone(&self.constructor);
        let thread = thread::Builder::new()
            .name("hdlsim-proc".into())
            .spawn(move || match catch_unwind(AssertUnwindSafe(|| constructor(handle))) {
                Ok(()) => Ok(()),
                Err(payload) if payload.downcast_ref::<ShutdownToken>().is_some() => Ok(()),
                Err(payload) => Err(payload),
            })
            .map_err(|e| SimError::ProcessTerminated(format!("failed to spawn thread: {e}")))?;
        self.thread = Some(thread);
        self.cmd_rx = Some(cmd_rx);
        self.resp_tx = Some(resp_tx);
        Ok(())
    }

    fn shutdown_thread(&mut self) {
        if let Some(tx) = self.resp_tx.take() {
            let _ = tx.send(Response::Shutdown);
        }
        self.cmd_rx = None;
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    fn respond(&self, resp: Response) {
        if let Some(tx) = &self.resp_tx {
            let _ = tx.send(resp);
        }
    }

    /// The user process completed; propagate any panic to the scheduler so
    /// testbench assertion failures surface.
    fn finish_thread(&mut self) -> SimResult<()> {
        self.passive = true;
        self.finished = true;
        self.cmd_rx = None;
        self.resp_tx = None;
        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(Ok(())) => debug!("coroutine process completed"),
                Ok(Err(payload)) | Err(payload) => resume_unwind(payload),
            }
        }
        Ok(())
    }

    fn register_tick(&mut self, ctx: &mut SimContext<'_>, name: &str) -> SimResult<()> {
        let domain = ctx
            .domains
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| SimError::NonexistentDomain(name.to_string()))?
            .clone();
        let clk = ctx.state.get_signal(&domain.clk);
        ctx.state
            .add_trigger(self.pid, clk, Trigger::Edge(domain.clk_edge.level()));
        self.waits_on.push(clk);
        if domain.async_reset {
            if let Some(rst) = &domain.rst {
                let rst = ctx.state.get_signal(rst);
                ctx.state.add_trigger(self.pid, rst, Trigger::Edge(1));
                self.waits_on.push(rst);
            }
        }
        Ok(())
    }

    fn eval(&self, ctx: &mut SimContext<'_>, value: &Value) -> Response {
        let shape = value.shape();
        let result = (|| -> SimResult<i64> {
            let unit = compile_value(ctx.state, value)?;
            ctx.sync_new_slots()?;
            let runner = ctx.host.instantiate(&unit.wat)?;
            let (raw, changes) = ctx.host.run(&runner)?;
            ctx.apply_changes(&changes);
            Ok(shape.normalize(raw))
        })();
        match result {
            Ok(v) => Response::Value(v),
            Err(e) => Response::Error(e),
        }
    }

    fn exec(&self, ctx: &mut SimContext<'_>, stmts: &[Statement]) -> Response {
        let result = (|| -> SimResult<()> {
            let mut outputs: Vec<SignalRef> = stmts
                .iter()
                .flat_map(Statement::lhs_signals)
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            outputs.sort_by_key(|s| s.id());
            let refs: Vec<&Statement> = stmts.iter().collect();
            let unit = compile_statements(ctx.state, &refs, &outputs, InitStyle::StoredNext)?;
            ctx.sync_new_slots()?;
            let runner = ctx.host.instantiate(&unit.wat)?;
            let (_, changes) = ctx.host.run(&runner)?;
            ctx.apply_changes(&changes);
            Ok(())
        })();
        match result {
            Ok(()) => Response::Done,
            Err(e) => Response::Error(e),
        }
    }
}

impl Process for CoroProcess {
    fn runnable(&self) -> bool {
        self.runnable
    }

    fn set_runnable(&mut self, runnable: bool) {
        self.runnable = runnable;
    }

    fn passive(&self) -> bool {
        self.passive
    }

    fn blocked_on_trigger(&self) -> bool {
        !self.waits_on.is_empty()
    }

    fn reset(&mut self, state: &mut SimState) {
        for slot in self.waits_on.drain(..) {
            state.remove_trigger(self.pid, slot);
        }
        self.shutdown_thread();
        self.runnable = true;
        self.passive = false;
        self.started = false;
        self.finished = false;
        self.pending_response = None;
        if let Err(e) = self.spawn() {
            warn!(error = %e, "failed to respawn coroutine process");
            self.finished = true;
            self.passive = true;
        }
    }

    fn run(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        if self.finished {
            return Ok(());
        }
        for slot in self.waits_on.drain(..) {
            ctx.state.remove_trigger(self.pid, slot);
        }

        if !self.started {
            self.started = true;
            if let Some(domain) = self.initial_tick.clone() {
                return self.register_tick(ctx, &domain);
            }
        }

        if let Some(resp) = self.pending_response.take() {
            self.respond(resp);
        }

        loop {
            let recv = match &self.cmd_rx {
                Some(rx) => rx.recv(),
                None => return self.finish_thread(),
            };
            let Ok(cmd) = recv else {
                return self.finish_thread();
            };
            let cmd = match cmd {
                Command::Default => match &self.default_cmd {
                    Some(default) => default.clone(),
                    None => {
                        self.respond(Response::Error(SimError::DefaultCommandRequired));
                        continue;
                    }
                },
                other => other,
            };
            match cmd {
                Command::Eval(value) => {
                    let resp = self.eval(ctx, &value);
                    self.respond(resp);
                }
                Command::Exec(stmts) => {
                    let resp = self.exec(ctx, &stmts);
                    self.respond(resp);
                }
                Command::Tick(domain) => match self.register_tick(ctx, &domain) {
                    Ok(()) => {
                        self.pending_response = Some(Response::Done);
                        return Ok(());
                    }
                    Err(e) => self.respond(Response::Error(e)),
                },
                Command::Settle => {
                    ctx.state.wait_interval(self.pid, None);
                    self.pending_response = Some(Response::Done);
                    return Ok(());
                }
                Command::Delay(seconds) => {
                    ctx.state
                        .wait_interval(self.pid, seconds.map(ps_from_seconds));
                    self.pending_response = Some(Response::Done);
                    return Ok(());
                }
                Command::Passive => {
                    self.passive = true;
                    self.respond(Response::Done);
                }
                Command::Active => {
                    self.passive = false;
                    self.respond(Response::Done);
                }
                Command::Default => {
                    // a default command must itself be concrete
                    self.respond(Response::Error(SimError::UnsupportedCommand(
                        "default command recursion".into(),
                    )));
                }
            }
        }
    }
}

impl Drop for CoroProcess {
    fn drop(&mut self) {
        self.shutdown_thread();
    }
}
