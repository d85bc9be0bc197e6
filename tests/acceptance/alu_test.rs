//! ALU scenario: a switch-selected synchronous datapath.

use hdlsim_common::{unsigned, ClockDomain, Signal};
use hdlsim_compiler::ast::{Statement, SwitchCase, Value};
use hdlsim_compiler::fragment::Fragment;
use hdlsim_engine::Simulator;

use super::common::init_tracing;

#[test]
fn test_alu_add_sub_default() {
    init_tracing();
    let a = Signal::new("a", unsigned(8));
    let b = Signal::new("b", unsigned(8));
    let o = Signal::new("o", unsigned(8));
    let s = Signal::new("s", unsigned(2));

    let mut frag = Fragment::new();
    frag.add_domain(ClockDomain::new("sync"));
    frag.add_driver(o.clone(), Some("sync"));
    frag.add_statements([Statement::switch(
        Value::from(&s),
        vec![
            SwitchCase::new(
                vec!["00"],
                vec![Value::from(&o).assign(Value::from(&a).add(Value::from(&b)))],
            ),
            SwitchCase::new(
                vec!["01"],
                vec![Value::from(&o).assign(Value::from(&a).sub(Value::from(&b)))],
            ),
            SwitchCase::default_case(vec![Value::from(&o).assign(Value::int(0))]),
        ],
    )]);

    let mut sim = Simulator::new(&frag).unwrap();
    sim.add_clock(1e-6).unwrap();

    sim.add_sync_process(
        move |h| {
            h.set(&a, 5).unwrap();
            h.set(&b, 1).unwrap();

            // each opcode takes one edge to latch and one to observe
            for (opcode, expected) in [(0, 6), (1, 4), (2, 0)] {
                h.set(&s, opcode).unwrap();
                h.wait().unwrap();
                h.wait().unwrap();
                assert_eq!(h.get(&o).unwrap(), expected, "opcode {opcode}");
            }
        },
        "sync",
    )
    .unwrap();
    sim.run().unwrap();
}
