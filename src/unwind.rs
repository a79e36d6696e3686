//! Bit-level unwinding
//!
//! Replicates the netlist across k+1 time frames. The [`BmcMap`] allocates
//! one fresh solver literal per netlist node per frame; gates translate to
//! Tseitin clauses at each frame, latches are stitched across frames by
//! identity constraints ℓ_{t,current} ≡ ℓ_{t−1,next}, and the netlist's
//! initial literals become unit clauses at frame 0. A latch's frame-0 value
//! is constrained by nothing else, so uninitialized state is genuinely free.

#![forbid(unsafe_code)]

use tracing::debug;

use crate::bv::{self, GateOps, LowerEnv, LowerError};
use crate::expr::Expr;
use crate::netlist::{NetNode, Netlist};
use crate::property::{self, FrameLowerer};
use crate::solver::{Literal, PropSolver};
use crate::trace::{Bit, BvValue, Trace, TraceFrame};
use crate::symtab::VarKind;

/// Frame-indexed literal map: (frame, netlist literal) → solver literal.
pub struct BmcMap {
    /// `frames[t][node]` is the solver literal standing for netlist node
    /// `node` at frame `t`; node 0 stays the constant.
    frames: Vec<Vec<Literal>>,
}

impl BmcMap {
    /// Allocate fresh solver variables for every node in every frame.
    pub fn map_timeframes(
        netlist: &Netlist,
        frames: usize,
        solver: &mut dyn PropSolver,
    ) -> BmcMap {
        let mut rows = Vec::with_capacity(frames);
        for _ in 0..frames {
            let mut row = Vec::with_capacity(netlist.number_of_nodes());
            for (i, _) in netlist.nodes() {
                if i == 0 {
                    row.push(Literal::TRUE);
                } else {
                    row.push(solver.new_variable());
                }
            }
            rows.push(row);
        }
        debug!(
            frames,
            per_frame = netlist.number_of_nodes() - 1,
            "mapped timeframes"
        );
        BmcMap { frames: rows }
    }

    /// Number of mapped frames (k+1).
    pub fn frames(&self) -> usize {
        self.frames.len()
    }

    /// Translate a netlist literal into its frame-`t` solver literal.
    pub fn translate(&self, t: usize, l: Literal) -> Literal {
        let base = self.frames[t][l.var() as usize];
        if l.is_negated() {
            !base
        } else {
            base
        }
    }
}

/// Emit the unwound netlist into the solver. `initial_states` controls
/// whether frame 0 is pinned to the initial-state clauses (the lifter
/// unwinds without them).
///
/// Gate clauses and latch coupling are asserted outright: they define
/// values and never exclude an execution. The netlist's transition
/// constraints are returned as one frozen step literal per transition
/// instead, so the driver can require exactly the steps a counterexample
/// prefix takes.
pub fn unwind(
    netlist: &Netlist,
    bmc_map: &BmcMap,
    solver: &mut dyn PropSolver,
    initial_states: bool,
) -> Vec<Literal> {
    if initial_states {
        for &l in &netlist.initial {
            let l0 = bmc_map.translate(0, l);
            solver.add_clause(&[l0]);
        }
    }

    for t in 0..bmc_map.frames() {
        for (v, node) in netlist.nodes() {
            if let NetNode::And(a, b) = node {
                let o = bmc_map.translate(t, Literal::new(v, false));
                let a = bmc_map.translate(t, a);
                let b = bmc_map.translate(t, b);
                solver.add_clause(&[!o, a]);
                solver.add_clause(&[!o, b]);
                solver.add_clause(&[o, !a, !b]);
            }
        }
    }

    // latch coupling, in strict temporal order
    for t in 1..bmc_map.frames() {
        for latch in &netlist.var_map.latches {
            let cur = bmc_map.translate(t, Literal::new(latch.var, false));
            let prev_next = bmc_map.translate(t - 1, latch.next);
            solver.assert_equal(cur, prev_next);
        }
    }

    let mut steps = Vec::with_capacity(bmc_map.frames().saturating_sub(1));
    for t in 0..bmc_map.frames().saturating_sub(1) {
        let constraints: Vec<Literal> = netlist
            .transition
            .iter()
            .map(|&c| bmc_map.translate(t, c))
            .collect();
        let step = solver.land(&constraints);
        solver.set_frozen(step);
        steps.push(step);
    }
    steps
}

/// Frame lowerer over the netlist projection: state predicates are
/// bit-blasted straight into the solver, with variable bits resolved through
/// the variable map at the frame in question.
pub struct NetlistLowerer<'a, S: PropSolver> {
    pub solver: &'a mut S,
    pub netlist: &'a Netlist,
    pub bmc_map: &'a BmcMap,
    frame: usize,
}

impl<'a, S: PropSolver> NetlistLowerer<'a, S> {
    pub fn new(solver: &'a mut S, netlist: &'a Netlist, bmc_map: &'a BmcMap) -> Self {
        NetlistLowerer {
            solver,
            netlist,
            bmc_map,
            frame: 0,
        }
    }
}

impl<S: PropSolver> GateOps for NetlistLowerer<'_, S> {
    fn and2(&mut self, a: Literal, b: Literal) -> Literal {
        self.solver.land2(a, b)
    }
    fn xor2(&mut self, a: Literal, b: Literal) -> Literal {
        self.solver.lxor2(a, b)
    }
}

impl<S: PropSolver> LowerEnv for NetlistLowerer<'_, S> {
    fn bits(&mut self, name: &str, next: bool) -> Result<Vec<Literal>, LowerError> {
        if next {
            return Err(LowerError::NextUnavailable(name.to_string()));
        }
        let entry = self
            .netlist
            .var_map
            .entry(name)
            .ok_or_else(|| LowerError::UnmappedVariable(name.to_string()))?;
        Ok(entry
            .bits
            .iter()
            .map(|b| self.bmc_map.translate(self.frame, b.current))
            .collect())
    }
}

impl<S: PropSolver> FrameLowerer for NetlistLowerer<'_, S> {
    fn solver(&mut self) -> &mut dyn PropSolver {
        &mut *self.solver
    }

    fn lower_state(&mut self, expr: &Expr, frame: usize) -> Result<Literal, LowerError> {
        self.frame = frame;
        bv::lower_bool(self, expr)
    }
}

/// Lower a property against the unwound netlist: one literal per frame.
pub fn unwind_property<S: PropSolver>(
    expr: &Expr,
    netlist: &Netlist,
    bmc_map: &BmcMap,
    solver: &mut S,
) -> Result<Vec<Literal>, LowerError> {
    let mut lw = NetlistLowerer::new(solver, netlist, bmc_map);
    property::lower_timeframes(&mut lw, expr, bmc_map.frames())
}

/// Project the satisfying assignment onto state and input variables. The
/// trace ends at the first frame whose property literal is false.
pub fn compute_trace<S: PropSolver>(
    netlist: &Netlist,
    bmc_map: &BmcMap,
    solver: &S,
    timeframe_literals: &[Literal],
) -> Trace {
    let fail = timeframe_literals
        .iter()
        .position(|&l| solver.model_value(l) == Some(false))
        .unwrap_or_else(|| timeframe_literals.len().saturating_sub(1));

    let mut trace = Trace::default();
    for t in 0..=fail {
        let mut frame = TraceFrame::default();
        for (name, entry) in &netlist.var_map.map {
            if entry.kind == VarKind::Wire {
                continue;
            }
            let bits: Vec<Bit> = entry
                .bits
                .iter()
                .map(|b| Bit::from_model(solver.model_value(bmc_map.translate(t, b.current))))
                .collect();
            let value = BvValue::new(bits);
            match entry.kind {
                VarKind::State => frame.state.insert(name.clone(), value),
                _ => frame.inputs.insert(name.clone(), value),
            };
        }
        trace.frames.push(frame);
    }
    trace
}
