//! RTL-to-WebAssembly compiler pipeline.
//!
//! This crate provides:
//! - [`ast`] - Elaborated value and statement tree
//! - [`fragment`] - The elaborated design consumed by the compiler
//! - [`emitter`] - Textual Wasm module builder
//! - [`codegen`] - Expression, lvalue, and statement lowering
//!
//! # Example
//!
//! ```
//! use hdlsim_common::{unsigned, Signal};
//! use hdlsim_compiler::ast::Value;
//! use hdlsim_compiler::fragment::Fragment;
//! use hdlsim_compiler::{DenseSignalMap, FragmentCompiler};
//!
//! let count = Signal::new("count", unsigned(3));
//! let mut frag = Fragment::new();
//! frag.add_driver(count.clone(), None);
//! frag.add_statements([Value::from(&count).assign(Value::from(&count).add(Value::int(1)))]);
//!
//! let mut map = DenseSignalMap::default();
//! let compiled = FragmentCompiler::compile(&mut map, &frag).expect("compilation failed");
//! assert_eq!(compiled.len(), 1);
//! assert!(compiled[0].unit.wat.contains("(export \"run\")"));
//! ```

pub mod ast;
pub mod codegen;
pub mod emitter;
pub mod fragment;

use std::collections::HashMap;

use hdlsim_common::{ClockDomain, SignalRef, SimError, SimResult};
use tracing::debug;

use fragment::Fragment;

pub use codegen::{
    compile_statements, compile_value, AccessMode, CompiledUnit, InitStyle, SignalMap,
};

/// One compiled driver domain of a fragment tree.
#[derive(Debug, Clone)]
pub struct CompiledDomain {
    /// The clock domain, or `None` for combinational logic.
    pub domain: Option<ClockDomain>,
    /// The compiled module and its input/output signal sets.
    pub unit: CompiledUnit,
}

/// Straightforward [`SignalMap`] handing out indices in first-seen order.
#[derive(Debug, Default)]
pub struct DenseSignalMap {
    indices: HashMap<SignalRef, usize>,
}

impl SignalMap for DenseSignalMap {
    fn slot_index(&mut self, signal: &SignalRef) -> usize {
        let next = self.indices.len();
        *self.indices.entry(signal.clone()).or_insert(next)
    }
}

/// Compiles a fragment tree into one module per driver domain.
#[derive(Debug, Default)]
pub struct FragmentCompiler;

impl FragmentCompiler {
    /// Compile `fragment` and every subfragment.
    ///
    /// Each `(fragment, domain)` driver entry yields one [`CompiledDomain`].
    /// Combinational domains stage their outputs from reset constants;
    /// clocked domains from the stored `next` in slot memory.
    pub fn compile<M: SignalMap>(
        map: &mut M,
        fragment: &Fragment,
    ) -> SimResult<Vec<CompiledDomain>> {
        let domains = fragment.collect_domains();
        let mut out = Vec::new();
        Self::compile_into(map, fragment, &domains, &mut out)?;
        Ok(out)
    }

    fn compile_into<M: SignalMap>(
        map: &mut M,
        fragment: &Fragment,
        domains: &[ClockDomain],
        out: &mut Vec<CompiledDomain>,
    ) -> SimResult<()> {
        for (domain_name, signals) in &fragment.drivers {
            let domain = match domain_name {
                None => None,
                Some(name) => Some(
                    domains
                        .iter()
                        .find(|d| &d.name == name)
                        .cloned()
                        .ok_or_else(|| SimError::MissingDomain(name.clone()))?,
                ),
            };
            let init = if domain.is_none() {
                InitStyle::Reset
            } else {
                InitStyle::StoredNext
            };
            let stmts = fragment.statements_for(signals);
            let unit = compile_statements(map, &stmts, signals, init)?;
            debug!(
                domain = domain_name.as_deref().unwrap_or("comb"),
                statements = stmts.len(),
                outputs = unit.outputs.len(),
                inputs = unit.inputs.len(),
                module_bytes = unit.wat.len(),
                "compiled driver domain"
            );
            out.push(CompiledDomain { domain, unit });
        }
        for (sub, _) in &fragment.subfragments {
            Self::compile_into(map, sub, domains, out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ast::Value;
    use hdlsim_common::{unsigned, Signal};

    #[test]
    fn test_compile_comb_and_sync_domains() {
        let count = Signal::new("count", unsigned(3));
        let x = Signal::new("x", unsigned(8));
        let a = Signal::new("a", unsigned(8));

        let mut frag = Fragment::new();
        frag.add_domain(ClockDomain::new("sync"));
        frag.add_driver(count.clone(), Some("sync"));
        frag.add_driver(x.clone(), None);
        frag.add_statements([
            Value::from(&count).assign(Value::from(&count).add(Value::int(1))),
            Value::from(&x).assign(Value::from(&a).xor_(Value::int(0xff))),
        ]);

        let mut map = DenseSignalMap::default();
        let compiled = FragmentCompiler::compile(&mut map, &frag).unwrap();
        assert_eq!(compiled.len(), 2);

        let sync = compiled
            .iter()
            .find(|c| c.domain.is_some())
            .expect("sync domain");
        assert_eq!(sync.unit.outputs, vec![count]);

        let comb = compiled
            .iter()
            .find(|c| c.domain.is_none())
            .expect("comb domain");
        assert!(comb.unit.inputs.contains(&a));
    }

    #[test]
    fn test_missing_domain_is_an_error() {
        let s = Signal::new("s", unsigned(1));
        let mut frag = Fragment::new();
        frag.add_driver(s.clone(), Some("sync"));
        frag.add_statements([Value::from(&s).assign(Value::int(0))]);

        let mut map = DenseSignalMap::default();
        let err = FragmentCompiler::compile(&mut map, &frag).unwrap_err();
        assert_eq!(err, SimError::MissingDomain("sync".into()));
    }

    #[test]
    fn test_subfragments_are_compiled() {
        let inner_sig = Signal::new("inner", unsigned(2));
        let mut sub = Fragment::new();
        sub.add_driver(inner_sig.clone(), None);
        sub.add_statements([Value::from(&inner_sig).assign(Value::int(3))]);

        let mut root = Fragment::new();
        root.add_subfragment(sub, Some("u0"));

        let mut map = DenseSignalMap::default();
        let compiled = FragmentCompiler::compile(&mut map, &root).unwrap();
        assert_eq!(compiled.len(), 1);
        assert_eq!(compiled[0].unit.outputs, vec![inner_sig]);
    }
}
