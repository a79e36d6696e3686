//! State-cube lifting
//!
//! Turns the individual states of a counterexample into cubes of states.
//! For each frame t of a failing trace we ask the solver: starting from the
//! concrete state of frame t and feeding the trace's inputs from t onwards,
//! can the property still hold at the failing frame? The answer is UNSAT,
//! and the final conflict names the state bits that were actually needed —
//! every state agreeing on just those bits fails the same way under the
//! same inputs.

#![forbid(unsafe_code)]

use std::io::{self, Write};

use crate::bv::LowerError;
use crate::cdcl::Cdcl;
use crate::expr::Expr;
use crate::netlist::Netlist;
use crate::solver::{Literal, PropSolver, SolveResult};
use crate::symtab::VarKind;
use crate::trace::{Bit, Trace};
use crate::unwind::{self, BmcMap};

/// A generalized state: the bits that force the violation.
#[derive(Debug, Clone)]
pub struct StateCube {
    pub frame: usize,
    /// (variable, bit index, value) triples, in variable-map order.
    pub bits: Vec<(String, usize, bool)>,
}

impl StateCube {
    pub fn show(&self, out: &mut impl Write) -> io::Result<()> {
        write!(out, "frame {}:", self.frame)?;
        if self.bits.is_empty() {
            write!(out, " (any state)")?;
        }
        for (name, bit, value) in &self.bits {
            write!(out, " {name}[{bit}]={}", *value as u8)?;
        }
        writeln!(out)
    }
}

/// Lift every state of a failing trace. The property expression is the same
/// always-wrapped form the driver lowered.
pub fn lift_trace(
    netlist: &Netlist,
    trace: &Trace,
    property_expr: &Expr,
) -> Result<Vec<StateCube>, LowerError> {
    let fail = trace.failing_frame();
    let mut cubes = Vec::with_capacity(fail + 1);

    for t in 0..=fail {
        let steps = fail - t;
        let mut solver = Cdcl::new();
        let map = BmcMap::map_timeframes(netlist, steps + 1, &mut solver);
        // no initial-state clauses: the cube quantifies over arbitrary states
        let step_lits = unwind::unwind(netlist, &map, &mut solver, false);
        let lits = unwind::unwind_property(property_expr, netlist, &map, &mut solver)?;

        // the lifted path takes every transition, and the property must
        // hold where the trace violates it
        for &s in &step_lits {
            solver.add_clause(&[s]);
        }
        solver.add_clause(&[lits[steps]]);

        let mut assumptions: Vec<Literal> = Vec::new();
        let mut state_bits: Vec<(String, usize, Literal, bool)> = Vec::new();
        for (name, entry) in &netlist.var_map.map {
            match entry.kind {
                VarKind::State => {
                    if let Some(value) = trace.frames[t].state.get(name) {
                        for (i, bit) in value.bits.iter().enumerate() {
                            let set = match bit {
                                Bit::One => true,
                                Bit::Zero => false,
                                Bit::X => continue,
                            };
                            let l = map.translate(0, entry.bits[i].current);
                            let a = if set { l } else { !l };
                            assumptions.push(a);
                            state_bits.push((name.clone(), i, a, set));
                        }
                    }
                }
                VarKind::Input => {
                    for u in 0..=steps {
                        if let Some(value) = trace.frames[t + u].inputs.get(name) {
                            for (i, bit) in value.bits.iter().enumerate() {
                                let set = match bit {
                                    Bit::One => true,
                                    Bit::Zero => false,
                                    Bit::X => continue,
                                };
                                let l = map.translate(u, entry.bits[i].current);
                                assumptions.push(if set { l } else { !l });
                            }
                        }
                    }
                }
                VarKind::Wire => {}
            }
        }

        solver.set_assumptions(&assumptions);
        let bits = match solver.solve() {
            SolveResult::Unsat => state_bits
                .into_iter()
                .filter(|(_, _, a, _)| solver.conflict_contains(!*a))
                .map(|(name, i, _, value)| (name, i, value))
                .collect(),
            // partially defined traces may not force the violation; fall
            // back to the un-generalized state
            _ => state_bits
                .into_iter()
                .map(|(name, i, _, value)| (name, i, value))
                .collect(),
        };
        cubes.push(StateCube { frame: t, bits });
    }
    Ok(cubes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::typecheck;
    use crate::parse::parse_modules;
    use crate::property::wrap_always;
    use crate::symtab::SymbolTable;
    use crate::trace::{BvValue, TraceFrame};

    fn netlist_of(src: &str) -> Netlist {
        let mut st = SymbolTable {
            modules: parse_modules(src).unwrap(),
        };
        typecheck(&mut st).unwrap();
        crate::netlist::build(&st, "main").unwrap()
    }

    #[test]
    fn irrelevant_state_bits_are_lifted_away() {
        // b never influences the property `always a == 0`; lifting the
        // 1-frame trace must drop it from the cube
        let nl = netlist_of(
            "module main;
               state a : bool;
               state b : bool;
               trans next(a) == a;
               trans next(b) == b;
             endmodule",
        );
        let mut frame = TraceFrame::default();
        frame.state.insert("a".into(), BvValue::from_u64(1, 1));
        frame.state.insert("b".into(), BvValue::from_u64(1, 1));
        let trace = Trace {
            frames: vec![frame],
        };
        let prop = wrap_always(crate::parse::parse_expr("a == false").unwrap());
        let cubes = lift_trace(&nl, &trace, &prop).unwrap();
        assert_eq!(cubes.len(), 1);
        assert_eq!(cubes[0].bits, vec![("a".to_string(), 0, true)]);
    }

    #[test]
    fn earlier_frames_lift_through_the_transition() {
        // a flows into itself; violating `always !a` at frame 1 pins a at
        // frame 0 but not the unrelated b
        let nl = netlist_of(
            "module main;
               state a : bool;
               state b : bool;
               trans next(a) == a;
               trans next(b) == !b;
             endmodule",
        );
        let mk = |a: u64, b: u64| {
            let mut f = TraceFrame::default();
            f.state.insert("a".into(), BvValue::from_u64(a, 1));
            f.state.insert("b".into(), BvValue::from_u64(b, 1));
            f
        };
        let trace = Trace {
            frames: vec![mk(1, 0), mk(1, 1)],
        };
        let prop = wrap_always(crate::parse::parse_expr("!a").unwrap());
        let cubes = lift_trace(&nl, &trace, &prop).unwrap();
        assert_eq!(cubes.len(), 2);
        assert_eq!(cubes[0].bits, vec![("a".to_string(), 0, true)]);
        assert_eq!(cubes[1].bits, vec![("a".to_string(), 0, true)]);
    }
}
