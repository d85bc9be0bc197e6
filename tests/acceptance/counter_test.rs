//! Counter scenario: a 3-bit register incrementing on every clock edge.

use hdlsim_common::{unsigned, ClockDomain, Signal, SignalRef};
use hdlsim_compiler::ast::Value;
use hdlsim_compiler::fragment::Fragment;
use hdlsim_engine::Simulator;

use super::common::init_tracing;

fn counter_design() -> (Fragment, SignalRef) {
    let count = Signal::with_reset("count", unsigned(3), 4);
    let mut frag = Fragment::new();
    frag.add_domain(ClockDomain::new("sync"));
    frag.add_driver(count.clone(), Some("sync"));
    frag.add_statements([Value::from(&count).assign(Value::from(&count).add(Value::int(1)))]);
    (frag, count)
}

#[test]
fn test_counter_counts_and_wraps() {
    init_tracing();
    let (frag, count) = counter_design();
    let mut sim = Simulator::new(&frag).unwrap();
    sim.add_clock(1e-6).unwrap();

    sim.add_sync_process(
        move |h| {
            // reset value visible after the first edge, increment after the
            // second, wrap after four
            assert_eq!(h.get(&count).unwrap(), 4);
            h.wait().unwrap();
            assert_eq!(h.get(&count).unwrap(), 5);
            h.wait().unwrap();
            assert_eq!(h.get(&count).unwrap(), 6);
            h.wait().unwrap();
            assert_eq!(h.get(&count).unwrap(), 7);
            h.wait().unwrap();
            assert_eq!(h.get(&count).unwrap(), 0);
        },
        "sync",
    )
    .unwrap();
    sim.run().unwrap();
}

#[test]
fn test_counter_survives_reset() {
    init_tracing();
    let (frag, count) = counter_design();
    let mut sim = Simulator::new(&frag).unwrap();
    sim.add_clock(1e-6).unwrap();

    sim.add_sync_process(
        move |h| {
            assert_eq!(h.get(&count).unwrap(), 4);
            h.wait().unwrap();
            assert_eq!(h.get(&count).unwrap(), 5);
        },
        "sync",
    )
    .unwrap();

    sim.run().unwrap();
    let after_first = sim.now();
    sim.reset().unwrap();
    assert_eq!(sim.now(), 0.0);
    sim.run().unwrap();
    assert!(sim.now() <= after_first + 1e-12);
}
