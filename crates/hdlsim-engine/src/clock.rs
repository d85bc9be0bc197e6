//! Free-running clock generator.

use hdlsim_common::{SignalRef, SimError, SimResult};

use crate::process::{Process, SimContext};
use crate::state::{ProcessId, SimState};

/// Toggles a 1-bit signal forever.
///
/// The first run only schedules the phase delay; every subsequent run
/// toggles the staged value and waits half a period, so transitions occur at
/// `phase, phase + period/2, phase + period, ...`. Always passive: a clock
/// by itself never keeps the simulation alive.
#[derive(Debug)]
pub struct ClockProcess {
    pid: ProcessId,
    runnable: bool,
    slot: usize,
    phase_ps: u64,
    period_ps: u64,
    initial: bool,
}

impl ClockProcess {
    /// Create a clock over `signal`.
    ///
    /// Fails unless the signal is exactly 1 bit wide.
    pub fn new(
        pid: ProcessId,
        state: &mut SimState,
        signal: &SignalRef,
        phase_ps: u64,
        period_ps: u64,
    ) -> SimResult<Self> {
        if signal.width() != 1 {
            return Err(SimError::ClockWidth(signal.width()));
        }
        Ok(ClockProcess {
            pid,
            runnable: true,
            slot: state.get_signal(signal),
            phase_ps,
            period_ps,
            initial: true,
        })
    }
}

impl Process for ClockProcess {
    fn runnable(&self) -> bool {
        self.runnable
    }

    fn set_runnable(&mut self, runnable: bool) {
        self.runnable = runnable;
    }

    fn passive(&self) -> bool {
        true
    }

    fn reset(&mut self, _state: &mut SimState) {
        self.runnable = true;
        self.initial = true;
    }

    fn run(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        self.runnable = false;
        if self.initial {
            self.initial = false;
            ctx.state.wait_interval(self.pid, Some(self.phase_ps));
        } else {
            let level = ctx.state.slot(self.slot).curr;
            ctx.set_slot(self.slot, i64::from(level == 0))?;
            ctx.state.wait_interval(self.pid, Some(self.period_ps / 2));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdlsim_common::{unsigned, Signal};

    #[test]
    fn test_clock_requires_one_bit() {
        let mut state = SimState::new();
        let wide = Signal::new("wide", unsigned(4));
        let err = ClockProcess::new(0, &mut state, &wide, 0, 1000).unwrap_err();
        assert_eq!(err, SimError::ClockWidth(4));
    }
}
