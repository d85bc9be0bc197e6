//! Interface consumed by waveform writers.
//!
//! VCD and GTKW emission lives outside this crate; the engine only feeds an
//! observer with every committed change. Capture must be attached before
//! simulated time advances.

use hdlsim_common::SignalRef;

/// Sink for committed signal changes.
pub trait WaveformObserver {
    /// A slot's committed value changed at `now_ps`.
    fn change(&mut self, now_ps: u64, signal: &SignalRef, value: i64);

    /// Simulation finished or the observer is being detached.
    fn close(&mut self, now_ps: u64) {
        let _ = now_ps;
    }
}
