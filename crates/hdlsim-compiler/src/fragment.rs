//! The elaborated design consumed by the compiler.
//!
//! A [`Fragment`] is what the HDL frontend produces after elaboration:
//! per-domain driver sets, a flat statement list, the clock domains the
//! design uses, and nested subfragments. A statement belongs to a driver
//! domain iff its left-hand signal set intersects that domain's driver set.

use std::collections::HashSet;

use hdlsim_common::{ClockDomain, SignalRef};

use crate::ast::Statement;

/// An elaborated design hierarchy node.
#[derive(Debug, Clone, Default)]
pub struct Fragment {
    /// Driver sets: `None` is the combinational domain, `Some(name)` a
    /// clocked domain. Insertion order is preserved.
    pub drivers: Vec<(Option<String>, Vec<SignalRef>)>,
    /// Statements of this fragment, in source order.
    pub statements: Vec<Statement>,
    /// Clock domains defined at this level.
    pub domains: Vec<ClockDomain>,
    /// Nested subfragments with optional instance names.
    pub subfragments: Vec<(Fragment, Option<String>)>,
}

impl Fragment {
    /// Empty fragment.
    pub fn new() -> Self {
        Fragment::default()
    }

    /// Record `signal` as driven from `domain` (`None` = combinational).
    pub fn add_driver(&mut self, signal: SignalRef, domain: Option<&str>) {
        let key = domain.map(String::from);
        if let Some((_, signals)) = self.drivers.iter_mut().find(|(d, _)| *d == key) {
            if !signals.contains(&signal) {
                signals.push(signal);
            }
        } else {
            self.drivers.push((key, vec![signal]));
        }
    }

    /// Append statements.
    pub fn add_statements(&mut self, stmts: impl IntoIterator<Item = Statement>) {
        self.statements.extend(stmts);
    }

    /// Define a clock domain.
    pub fn add_domain(&mut self, domain: ClockDomain) {
        self.domains.push(domain);
    }

    /// Attach a subfragment.
    pub fn add_subfragment(&mut self, fragment: Fragment, name: Option<&str>) {
        self.subfragments.push((fragment, name.map(String::from)));
    }

    /// Look up a domain by name anywhere in the hierarchy.
    pub fn domain(&self, name: &str) -> Option<&ClockDomain> {
        self.domains
            .iter()
            .find(|d| d.name == name)
            .or_else(|| self.subfragments.iter().find_map(|(f, _)| f.domain(name)))
    }

    /// All domains in the hierarchy, root first, deduplicated by name.
    pub fn collect_domains(&self) -> Vec<ClockDomain> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.collect_domains_into(&mut seen, &mut out);
        out
    }

    fn collect_domains_into(&self, seen: &mut HashSet<String>, out: &mut Vec<ClockDomain>) {
        for domain in &self.domains {
            if seen.insert(domain.name.clone()) {
                out.push(domain.clone());
            }
        }
        for (sub, _) in &self.subfragments {
            sub.collect_domains_into(seen, out);
        }
    }

    /// Statements of this fragment driving any signal in `driven`.
    pub fn statements_for(&self, driven: &[SignalRef]) -> Vec<&Statement> {
        let driven: HashSet<_> = driven.iter().collect();
        self.statements
            .iter()
            .filter(|stmt| stmt.lhs_signals().iter().any(|s| driven.contains(s)))
            .collect()
    }
}
