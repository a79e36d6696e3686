//! Explicit-state simulation
//!
//! A small reference semantics for transition systems: concrete evaluation
//! of expressions, enumeration of initial states, relational stepping, and
//! bounded violation search. The solver pipeline never calls this; it backs
//! the soundness tests (the SAT/UNSAT verdicts must agree with brute force
//! on small systems) and counterexample replay.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use crate::expr::{BinOp, Expr, Sort};
use crate::symtab::VarDecl;
use crate::trace::Trace;
use crate::trans::TransitionSystem;

/// Concrete assignment: variable name → value.
pub type Env = BTreeMap<String, u64>;

/// Evaluation failure.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("variable `{0}` has no value")]
    UnknownVariable(String),
    #[error("next-state reference outside a transition context")]
    NextUnavailable,
    #[error("temporal operator in a concrete evaluation")]
    Temporal,
    #[error("state space too large to enumerate ({0} bits)")]
    TooLarge(u32),
}

/// Reference evaluator over a transition system.
pub struct Simulator<'a> {
    ts: &'a TransitionSystem,
}

impl<'a> Simulator<'a> {
    pub fn new(ts: &'a TransitionSystem) -> Simulator<'a> {
        Simulator { ts }
    }

    fn sort_of(&self, name: &str) -> Option<Sort> {
        self.ts.var(name).map(|v| v.sort)
    }

    fn width(&self, e: &Expr) -> u32 {
        crate::bv::width_of(e, &|n| self.sort_of(n)).unwrap_or(1)
    }

    fn mask(&self, e: &Expr) -> u64 {
        let w = self.width(e);
        if w >= 64 {
            u64::MAX
        } else {
            (1u64 << w) - 1
        }
    }

    /// Evaluate an expression under current (and optionally next) values.
    pub fn eval(&self, e: &Expr, cur: &Env, next: Option<&Env>) -> Result<u64, EvalError> {
        match e {
            Expr::Const { value, .. } => Ok(*value),
            Expr::Var(n) => cur
                .get(n)
                .copied()
                .ok_or_else(|| EvalError::UnknownVariable(n.clone())),
            Expr::Next(n) => next
                .ok_or(EvalError::NextUnavailable)?
                .get(n)
                .copied()
                .ok_or_else(|| EvalError::UnknownVariable(n.clone())),
            Expr::Not(a) => Ok((self.eval(a, cur, next)? == 0) as u64),
            Expr::Neg(a) => {
                let v = self.eval(a, cur, next)?;
                Ok(v.wrapping_neg() & self.mask(a))
            }
            Expr::BvNot(a) => {
                let v = self.eval(a, cur, next)?;
                Ok(!v & self.mask(a))
            }
            Expr::Bin(op, a, b) => {
                let x = self.eval(a, cur, next)?;
                let y = self.eval(b, cur, next)?;
                let mask = self.mask(a);
                let w = self.width(a) as u64;
                Ok(match op {
                    BinOp::And => (x != 0 && y != 0) as u64,
                    BinOp::Or => (x != 0 || y != 0) as u64,
                    BinOp::Implies => (x == 0 || y != 0) as u64,
                    BinOp::BvAnd => x & y,
                    BinOp::BvOr => x | y,
                    BinOp::BvXor => x ^ y,
                    BinOp::Add => x.wrapping_add(y) & mask,
                    BinOp::Sub => x.wrapping_sub(y) & mask,
                    BinOp::Mul => x.wrapping_mul(y) & mask,
                    BinOp::Shl => {
                        if y >= w {
                            0
                        } else {
                            (x << y) & mask
                        }
                    }
                    BinOp::Shr => {
                        if y >= w {
                            0
                        } else {
                            x >> y
                        }
                    }
                    BinOp::Eq => (x == y) as u64,
                    BinOp::Neq => (x != y) as u64,
                    BinOp::Lt => (x < y) as u64,
                    BinOp::Le => (x <= y) as u64,
                    BinOp::Gt => (x > y) as u64,
                    BinOp::Ge => (x >= y) as u64,
                })
            }
            Expr::Always(_) | Expr::Nexttime(_) | Expr::Until(_, _) => Err(EvalError::Temporal),
        }
    }

    /// Extend a state+input assignment with the wire values it induces.
    pub fn with_wires(&self, base: &Env) -> Result<Env, EvalError> {
        let mut env = base.clone();
        // assigns were cycle-checked at netlist build; a fixed number of
        // passes resolves any dependency order
        for _ in 0..self.ts.assigns.len().max(1) {
            for (name, rhs) in &self.ts.assigns {
                if let Ok(v) = self.eval(rhs, &env, None) {
                    env.insert(name.clone(), v);
                }
            }
        }
        Ok(env)
    }

    fn enumerate(vars: &[&VarDecl]) -> Result<Vec<Env>, EvalError> {
        let total: u32 = vars.iter().map(|v| v.sort.width()).sum();
        if total > 20 {
            return Err(EvalError::TooLarge(total));
        }
        let mut out = vec![Env::new()];
        for v in vars {
            let count = 1u64 << v.sort.width();
            let mut grown = Vec::with_capacity(out.len() * count as usize);
            for env in &out {
                for value in 0..count {
                    let mut e = env.clone();
                    e.insert(v.name.clone(), value);
                    grown.push(e);
                }
            }
            out = grown;
        }
        Ok(out)
    }

    /// All state assignments satisfying `init`.
    pub fn initial_states(&self) -> Result<Vec<Env>, EvalError> {
        let states: Vec<&VarDecl> = self.ts.state_vars().collect();
        let mut out = Vec::new();
        for s in Simulator::enumerate(&states)? {
            let env = self.with_wires(&s)?;
            if self.eval(&self.ts.init, &env, None)? != 0 {
                out.push(s);
            }
        }
        Ok(out)
    }

    /// All input assignments.
    pub fn input_choices(&self) -> Result<Vec<Env>, EvalError> {
        let inputs: Vec<&VarDecl> = self.ts.input_vars().collect();
        Simulator::enumerate(&inputs)
    }

    /// Successor states of `state` under `input` (the transition predicate
    /// is a relation; a deterministic design yields exactly one).
    pub fn successors(&self, state: &Env, input: &Env) -> Result<Vec<Env>, EvalError> {
        let mut cur = state.clone();
        cur.extend(input.clone());
        let cur = self.with_wires(&cur)?;
        let states: Vec<&VarDecl> = self.ts.state_vars().collect();
        let mut out = Vec::new();
        for next in Simulator::enumerate(&states)? {
            if self.eval(&self.ts.trans, &cur, Some(&next))? != 0 {
                out.push(next);
            }
        }
        Ok(out)
    }

    /// Search for a violation of `always body` within `bound` transitions.
    /// Returns the offending path of (state, input) pairs when one exists.
    pub fn bounded_violation(
        &self,
        body: &Expr,
        bound: usize,
    ) -> Result<Option<Vec<(Env, Env)>>, EvalError> {
        let inputs = self.input_choices()?;
        let mut frontier: Vec<(Env, Vec<(Env, Env)>)> = self
            .initial_states()?
            .into_iter()
            .map(|s| (s, Vec::new()))
            .collect();

        for _depth in 0..=bound {
            let mut next_frontier = Vec::new();
            for (state, path) in frontier {
                for input in &inputs {
                    let mut env = state.clone();
                    env.extend(input.clone());
                    let env = self.with_wires(&env)?;
                    let mut here = path.clone();
                    here.push((state.clone(), input.clone()));
                    if self.eval(body, &env, None)? == 0 {
                        return Ok(Some(here));
                    }
                    if here.len() <= bound {
                        for succ in self.successors(&state, input)? {
                            next_frontier.push((succ, here.clone()));
                        }
                    }
                }
            }
            frontier = next_frontier;
        }
        Ok(None)
    }

    /// Check that a reconstructed trace is a genuine execution: `init` holds
    /// in frame 0 and `trans` links every consecutive pair. `x` bits fail
    /// the replay (a counterexample must pin every bit it relies on, and
    /// bits the design leaves free are replayed as zero).
    pub fn replay(&self, trace: &Trace) -> Result<bool, EvalError> {
        let envs: Vec<Env> = trace
            .frames
            .iter()
            .map(|f| {
                let mut env = Env::new();
                for (name, value) in f.state.iter().chain(&f.inputs) {
                    env.insert(name.clone(), value.as_u64().unwrap_or(0));
                }
                self.with_wires(&env)
            })
            .collect::<Result<_, _>>()?;

        match envs.first() {
            None => return Ok(false),
            Some(first) => {
                if self.eval(&self.ts.init, first, None)? == 0 {
                    return Ok(false);
                }
            }
        }
        for pair in envs.windows(2) {
            if self.eval(&self.ts.trans, &pair[0], Some(&pair[1]))? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
