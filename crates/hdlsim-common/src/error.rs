use thiserror::Error;

/// Simulation error types covering compilation, scheduling, and host failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// A value's computed width exceeds the 63-bit slot limit.
    #[error("value {loc} is {width} bits wide, which exceeds the 63-bit limit")]
    OversizeValue {
        /// Description of the offending value.
        loc: String,
        /// Computed bit width.
        width: u64,
    },

    /// Internal compiler error (unimplemented operator or malformed node).
    #[error("compile error: {0}")]
    Compile(String),

    /// Simulator constructed with an engine name that is not registered.
    #[error("unknown simulation engine '{0}'")]
    UnknownEngine(String),

    /// A clock was requested for a domain the design does not contain.
    #[error("domain '{0}' is not present in simulation")]
    MissingDomain(String),

    /// A domain already has a clock driving it.
    #[error("domain '{0}' already has a clock driving it")]
    DuplicateClock(String),

    /// Clock processes require an exactly 1-bit signal.
    #[error("clock signal must be exactly 1-wide, not {0}")]
    ClockWidth(u64),

    /// A process issued a bare wait but was added without a default command.
    #[error(
        "process issued a bare wait but was added with add_process(); \
         did you mean to add it with add_sync_process() instead?"
    )]
    DefaultCommandRequired,

    /// A process yielded a command the scheduler does not understand.
    #[error("received unsupported command {0} from process")]
    UnsupportedCommand(String),

    /// A tick referred to a domain that does not exist.
    #[error("received tick for nonexistent domain '{0}'")]
    NonexistentDomain(String),

    /// A compiled module trapped during execution.
    #[error("wasm trap: {0}")]
    WasmTrap(String),

    /// Emitted module text failed to assemble or instantiate.
    #[error("module assembly failed: {0}")]
    ModuleAssembly(String),

    /// Waveform capture requested after simulated time advanced.
    #[error("cannot start writing waveforms after advancing simulation time")]
    WaveformAfterTime,

    /// A coroutine process terminated abnormally.
    #[error("process terminated: {0}")]
    ProcessTerminated(String),
}

/// Convenience type alias for simulation operations.
pub type SimResult<T> = Result<T, SimError>;
