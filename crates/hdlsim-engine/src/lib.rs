//! Event-driven WebAssembly simulation engine.
//!
//! This crate provides:
//! - [`host`] - wasmtime bridge and shared slot memory
//! - [`state`] - slot table, triggers, and timeline
//! - [`process`], [`clock`], [`coro`] - the three process kinds
//! - [`engine`] - the settle-step scheduler
//! - [`simulator`] - the outer API
//! - [`waveform`] - the interface consumed by waveform writers
//!
//! # Example
//!
//! ```
//! use hdlsim_common::{unsigned, Signal};
//! use hdlsim_compiler::ast::Value;
//! use hdlsim_compiler::fragment::Fragment;
//! use hdlsim_engine::Simulator;
//!
//! let a = Signal::new("a", unsigned(4));
//! let y = Signal::new("y", unsigned(4));
//! let mut frag = Fragment::new();
//! frag.add_driver(y.clone(), None);
//! frag.add_statements([Value::from(&y).assign(Value::from(&a).not_())]);
//!
//! let mut sim = Simulator::new(&frag).unwrap();
//! sim.add_process(move |h| {
//!     h.set(&a, 0b1010).unwrap();
//!     h.settle().unwrap();
//!     assert_eq!(h.get(&y).unwrap(), 0b0101);
//! })
//! .unwrap();
//! sim.run().unwrap();
//! ```

pub mod clock;
pub mod coro;
pub mod engine;
pub mod host;
pub mod process;
pub mod simulator;
pub mod state;
pub mod waveform;

pub use coro::{Command, SimHandle};
pub use engine::{BaseEngine, WasmEngine};
pub use simulator::Simulator;
pub use waveform::WaveformObserver;
