//! Word-level unwinding
//!
//! The word-level path skips the netlist: structured formulas are handed to
//! the decision procedure's expression front-end, which bit-blasts at the
//! solver boundary. [`WordConv`] is that front-end — it renames every state
//! reference to a frame-specific instance (allocating solver literals on
//! demand per `(variable, frame)` pair) and converts predicates to single
//! literals. The same converter projects the model back onto frame
//! instances when a counterexample is reconstructed.
//!
//! `--smt2` reuses the frame instantiation as a pure printer, emitting the
//! unwinding and negated properties as an SMT-LIB benchmark instead of
//! solving in process.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};

use crate::bv::{self, GateOps, LowerEnv, LowerError};
use crate::expr::{BinOp, Expr, Sort};
use crate::property::{self, FrameLowerer, Property};
use crate::solver::{Literal, PropSolver};
use crate::trace::{Bit, BvValue, Trace, TraceFrame};
use crate::trans::TransitionSystem;

/// Expression-to-literal converter with frame renaming. Owns the solver it
/// feeds; the driver reaches the underlying engine through `solver_mut`.
pub struct WordConv<S: PropSolver> {
    solver: S,
    sorts: BTreeMap<String, Sort>,
    instances: HashMap<(String, usize), Vec<Literal>>,
    frame: usize,
}

impl<S: PropSolver> WordConv<S> {
    pub fn new(solver: S, ts: &TransitionSystem) -> Self {
        WordConv {
            solver,
            sorts: ts.vars.iter().map(|v| (v.name.clone(), v.sort)).collect(),
            instances: HashMap::new(),
            frame: 0,
        }
    }

    pub fn solver_mut(&mut self) -> &mut S {
        &mut self.solver
    }

    fn instance(&mut self, name: &str, frame: usize) -> Result<Vec<Literal>, LowerError> {
        if let Some(bits) = self.instances.get(&(name.to_string(), frame)) {
            return Ok(bits.clone());
        }
        let sort = *self
            .sorts
            .get(name)
            .ok_or_else(|| LowerError::UnmappedVariable(name.to_string()))?;
        let bits: Vec<Literal> = (0..sort.width())
            .map(|_| self.solver.new_variable())
            .collect();
        self.instances
            .insert((name.to_string(), frame), bits.clone());
        Ok(bits)
    }

    /// Convert a predicate at a frame to a single literal.
    pub fn convert_bool(&mut self, e: &Expr, frame: usize) -> Result<Literal, LowerError> {
        self.frame = frame;
        bv::lower_bool(self, e)
    }

    /// Convert a bit-vector expression at a frame.
    pub fn convert_vec(&mut self, e: &Expr, frame: usize) -> Result<Vec<Literal>, LowerError> {
        self.frame = frame;
        bv::lower_vec(self, e)
    }

    /// Model projection of one variable at one frame. A variable the
    /// unwinding never mentioned has no instance and reads as all-`x`.
    pub fn model_value(&self, name: &str, frame: usize) -> BvValue {
        let width = self.sorts.get(name).map(|s| s.width()).unwrap_or(0);
        match self.instances.get(&(name.to_string(), frame)) {
            Some(bits) => BvValue::new(
                bits.iter()
                    .map(|&l| Bit::from_model(self.solver.model_value(l)))
                    .collect(),
            ),
            None => BvValue::new(vec![Bit::X; width as usize]),
        }
    }
}

impl<S: PropSolver> GateOps for WordConv<S> {
    fn and2(&mut self, a: Literal, b: Literal) -> Literal {
        self.solver.land2(a, b)
    }
    fn xor2(&mut self, a: Literal, b: Literal) -> Literal {
        self.solver.lxor2(a, b)
    }
}

impl<S: PropSolver> LowerEnv for WordConv<S> {
    fn bits(&mut self, name: &str, next: bool) -> Result<Vec<Literal>, LowerError> {
        let frame = self.frame + next as usize;
        self.instance(name, frame)
    }
}

impl<S: PropSolver> FrameLowerer for WordConv<S> {
    fn solver(&mut self) -> &mut dyn PropSolver {
        &mut self.solver
    }

    fn lower_state(&mut self, expr: &Expr, frame: usize) -> Result<Literal, LowerError> {
        self.convert_bool(expr, frame)
    }
}

/// Emit the word-level unwinding: `init` at frame 0 (when `initial_states`
/// is set), one `trans` instance per step, and the combinational
/// definitions in every frame. Each `trans` instance comes back as a
/// frozen step literal rather than a unit clause, so violation checks can
/// require exactly the steps of their counterexample prefix.
pub fn unwind<S: PropSolver>(
    ts: &TransitionSystem,
    conv: &mut WordConv<S>,
    frames: usize,
    initial_states: bool,
) -> Result<Vec<Literal>, LowerError> {
    if initial_states {
        let l = conv.convert_bool(&ts.init, 0)?;
        conv.solver.add_clause(&[l]);
    }
    let mut steps = Vec::with_capacity(frames.saturating_sub(1));
    for t in 0..frames.saturating_sub(1) {
        let l = conv.convert_bool(&ts.trans, t)?;
        conv.solver.set_frozen(l);
        steps.push(l);
    }
    for t in 0..frames {
        for (name, rhs) in &ts.assigns {
            let lhs = conv.instance(name, t)?;
            let rhs = conv.convert_vec(rhs, t)?;
            for (a, b) in lhs.iter().zip(rhs) {
                conv.solver.assert_equal(*a, b);
            }
        }
    }
    Ok(steps)
}

/// Lower a property against the word-level unwinding.
pub fn unwind_property<S: PropSolver>(
    expr: &Expr,
    conv: &mut WordConv<S>,
    frames: usize,
) -> Result<Vec<Literal>, LowerError> {
    property::lower_timeframes(conv, expr, frames)
}

/// Reconstruct a trace from the model, via the frame instances.
pub fn compute_trace<S: PropSolver>(
    ts: &TransitionSystem,
    conv: &WordConv<S>,
    timeframe_literals: &[Literal],
) -> Trace {
    let fail = timeframe_literals
        .iter()
        .position(|&l| conv.solver.model_value(l) == Some(false))
        .unwrap_or_else(|| timeframe_literals.len().saturating_sub(1));

    let mut trace = Trace::default();
    for t in 0..=fail {
        let mut frame = TraceFrame::default();
        for v in ts.state_vars() {
            frame.state.insert(v.name.clone(), conv.model_value(&v.name, t));
        }
        for v in ts.input_vars() {
            frame
                .inputs
                .insert(v.name.clone(), conv.model_value(&v.name, t));
        }
        trace.frames.push(frame);
    }
    trace
}

// ============================================================================
// SMT-LIB output (`--smt2`, and `--smt1` with a deprecation warning)
// ============================================================================

/// Dump failure: either the sink or the property structure.
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Lower(#[from] LowerError),
}

fn smt2_symbol(name: &str, frame: usize) -> String {
    format!("|{name}@{frame}|")
}

fn smt2_expr(e: &Expr, frame: usize, out: &mut String) -> Result<(), LowerError> {
    match e {
        Expr::Const { value, sort } => match sort {
            Sort::Bool => out.push_str(if *value != 0 { "true" } else { "false" }),
            Sort::Bv(w) => out.push_str(&format!("(_ bv{value} {w})")),
        },
        Expr::Var(n) => out.push_str(&smt2_symbol(n, frame)),
        Expr::Next(n) => out.push_str(&smt2_symbol(n, frame + 1)),
        Expr::Not(a) => {
            out.push_str("(not ");
            smt2_expr(a, frame, out)?;
            out.push(')');
        }
        Expr::Neg(a) => {
            out.push_str("(bvneg ");
            smt2_expr(a, frame, out)?;
            out.push(')');
        }
        Expr::BvNot(a) => {
            out.push_str("(bvnot ");
            smt2_expr(a, frame, out)?;
            out.push(')');
        }
        Expr::Bin(op, a, b) => {
            let (head, negate) = match op {
                BinOp::And => ("and", false),
                BinOp::Or => ("or", false),
                BinOp::Implies => ("=>", false),
                BinOp::BvAnd => ("bvand", false),
                BinOp::BvOr => ("bvor", false),
                BinOp::BvXor => ("bvxor", false),
                BinOp::Add => ("bvadd", false),
                BinOp::Sub => ("bvsub", false),
                BinOp::Mul => ("bvmul", false),
                BinOp::Shl => ("bvshl", false),
                BinOp::Shr => ("bvlshr", false),
                BinOp::Eq => ("=", false),
                BinOp::Neq => ("=", true),
                BinOp::Lt => ("bvult", false),
                BinOp::Le => ("bvule", false),
                BinOp::Gt => ("bvugt", false),
                BinOp::Ge => ("bvuge", false),
            };
            if negate {
                out.push_str("(not ");
            }
            out.push('(');
            out.push_str(head);
            out.push(' ');
            smt2_expr(a, frame, out)?;
            out.push(' ');
            smt2_expr(b, frame, out)?;
            out.push(')');
            if negate {
                out.push(')');
            }
        }
        Expr::Always(_) | Expr::Nexttime(_) | Expr::Until(_, _) => {
            return Err(LowerError::Temporal("nested"))
        }
    }
    Ok(())
}

/// Property body at one frame, with the temporal skeleton expanded to
/// boolean structure over frame instances.
fn smt2_prop(e: &Expr, t: usize, frames: usize, out: &mut String) -> Result<(), LowerError> {
    match e {
        Expr::Always(b) => {
            out.push_str("(and");
            for j in t..frames {
                out.push(' ');
                smt2_prop(b, j, frames, out)?;
            }
            out.push(')');
            Ok(())
        }
        Expr::Nexttime(b) => {
            if t + 1 < frames {
                smt2_prop(b, t + 1, frames, out)
            } else {
                out.push_str("true");
                Ok(())
            }
        }
        Expr::Until(p, r) => {
            let mut acc = String::new();
            for j in (t..frames).rev() {
                let mut rj = String::new();
                smt2_prop(r, j, frames, &mut rj)?;
                if acc.is_empty() {
                    acc = rj;
                } else {
                    let mut pj = String::new();
                    smt2_prop(p, j, frames, &mut pj)?;
                    acc = format!("(or {rj} (and {pj} {acc}))");
                }
            }
            if acc.is_empty() {
                acc = "true".to_string();
            }
            out.push_str(&acc);
            Ok(())
        }
        e if !e.has_temporal() => smt2_expr(e, t, out),
        _ => Err(LowerError::Temporal("nested")),
    }
}

/// Write the decision problem as an SMT-LIB 2 benchmark: declarations for
/// every frame instance, the unwinding, and one negated conjunction per
/// enabled property.
pub fn write_smt2(
    ts: &TransitionSystem,
    properties: &[Property],
    bound: usize,
    out: &mut impl Write,
) -> Result<(), DumpError> {
    let frames = bound + 1;
    writeln!(out, "(set-info :source |generated by rtlbmc, module {}|)", ts.module)?;
    writeln!(out, "(set-logic QF_BV)")?;
    for v in &ts.vars {
        for t in 0..frames {
            let sort = match v.sort {
                Sort::Bool => "Bool".to_string(),
                Sort::Bv(w) => format!("(_ BitVec {w})"),
            };
            writeln!(out, "(declare-fun {} () {})", smt2_symbol(&v.name, t), sort)?;
        }
    }
    let mut buf = String::new();
    smt2_expr(&ts.init, 0, &mut buf)?;
    writeln!(out, "(assert {buf})")?;
    for t in 0..bound {
        buf.clear();
        smt2_expr(&ts.trans, t, &mut buf)?;
        writeln!(out, "(assert {buf})")?;
    }
    for t in 0..frames {
        for (name, rhs) in &ts.assigns {
            buf.clear();
            smt2_expr(rhs, t, &mut buf)?;
            writeln!(out, "(assert (= {} {buf}))", smt2_symbol(name, t))?;
        }
    }
    for p in properties {
        if p.is_disabled() {
            continue;
        }
        writeln!(out, "; property {}", p.name)?;
        buf.clear();
        smt2_prop(&p.expr, 0, frames, &mut buf)?;
        writeln!(out, "(assert (not {buf}))")?;
    }
    writeln!(out, "(check-sat)")?;
    Ok(())
}
