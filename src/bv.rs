//! Bit-vector lowering
//!
//! One bit-blaster serves both pipelines. The caller supplies a context that
//! can mint gates ([`GateOps`]) and resolve variable bits ([`LowerEnv`]);
//! the netlist builder routes gates into its AIG arena, the solver-backed
//! paths route them into CNF through the Tseitin primitives. Word widths are
//! already settled by the sort checker, so mismatches here are internal
//! errors, reported rather than asserted.

#![forbid(unsafe_code)]

use crate::expr::{BinOp, Expr, Sort};
use crate::solver::Literal;

/// Lowering failure. `Temporal` is the §-"cannot be lowered" case: temporal
/// operators never reach the bit-blaster; the property layer peels them off
/// and anything left over is an error, not a propositional approximation.
#[derive(Debug, thiserror::Error)]
pub enum LowerError {
    #[error("variable `{0}` has no literal mapping")]
    UnmappedVariable(String),
    #[error("temporal operator `{0}` cannot be lowered in this context")]
    Temporal(&'static str),
    #[error("next-state reference `next({0})` is not available in this context")]
    NextUnavailable(String),
    #[error("combinational cycle through wire `{0}`")]
    CombinationalCycle(String),
    #[error("operand widths differ ({0} vs {1})")]
    WidthMismatch(usize, usize),
}

/// Boolean gate construction.
pub trait GateOps {
    fn and2(&mut self, a: Literal, b: Literal) -> Literal;
    fn xor2(&mut self, a: Literal, b: Literal) -> Literal;

    fn or2(&mut self, a: Literal, b: Literal) -> Literal {
        !self.and2(!a, !b)
    }

    fn equal2(&mut self, a: Literal, b: Literal) -> Literal {
        !self.xor2(a, b)
    }

    fn ite(&mut self, c: Literal, t: Literal, f: Literal) -> Literal {
        let a = self.and2(c, t);
        let b = self.and2(!c, f);
        self.or2(a, b)
    }
}

/// Resolution of variable references to per-bit literals, LSB first.
pub trait LowerEnv {
    fn bits(&mut self, name: &str, next: bool) -> Result<Vec<Literal>, LowerError>;
}

/// Bits of a constant, LSB first.
pub fn const_bits(value: u64, width: u32) -> Vec<Literal> {
    (0..width)
        .map(|i| {
            if value >> i & 1 == 1 {
                Literal::TRUE
            } else {
                Literal::FALSE
            }
        })
        .collect()
}

fn same_width(a: &[Literal], b: &[Literal]) -> Result<(), LowerError> {
    if a.len() == b.len() {
        Ok(())
    } else {
        Err(LowerError::WidthMismatch(a.len(), b.len()))
    }
}

/// Ripple-carry sum of `a` and `b` plus `carry_in`.
fn add<C: GateOps + ?Sized>(
    ctx: &mut C,
    a: &[Literal],
    b: &[Literal],
    mut carry: Literal,
) -> Vec<Literal> {
    let mut out = Vec::with_capacity(a.len());
    for (&x, &y) in a.iter().zip(b) {
        let xy = ctx.xor2(x, y);
        out.push(ctx.xor2(xy, carry));
        // majority(x, y, carry)
        let xa = ctx.and2(x, y);
        let ca = ctx.and2(carry, xy);
        carry = ctx.or2(xa, ca);
    }
    out
}

/// Unsigned `a < b` via an LSB-to-MSB comparison chain.
fn less_than<C: GateOps + ?Sized>(ctx: &mut C, a: &[Literal], b: &[Literal]) -> Literal {
    let mut lt = Literal::FALSE;
    for (&x, &y) in a.iter().zip(b) {
        let eq = ctx.equal2(x, y);
        let here = ctx.and2(!x, y);
        lt = ctx.ite(eq, lt, here);
    }
    lt
}

fn equal_vec<C: GateOps + ?Sized>(ctx: &mut C, a: &[Literal], b: &[Literal]) -> Literal {
    let mut acc = Literal::TRUE;
    for (&x, &y) in a.iter().zip(b) {
        let eq = ctx.equal2(x, y);
        acc = ctx.and2(acc, eq);
    }
    acc
}

/// Barrel shifter. `left` selects the direction; vacated bits are zero.
fn shift<C: GateOps + ?Sized>(
    ctx: &mut C,
    value: &[Literal],
    amount: &[Literal],
    left: bool,
) -> Vec<Literal> {
    let w = value.len();
    let mut cur: Vec<Literal> = value.to_vec();
    let mut overflow = Literal::FALSE;
    for (k, &s) in amount.iter().enumerate() {
        if k >= 32 || (1usize << k) >= w {
            overflow = ctx.or2(overflow, s);
            continue;
        }
        let dist = 1usize << k;
        let mut stage = Vec::with_capacity(w);
        for i in 0..w {
            let from = if left {
                i.checked_sub(dist)
            } else if i + dist < w {
                Some(i + dist)
            } else {
                None
            };
            let shifted = from.map_or(Literal::FALSE, |j| cur[j]);
            stage.push(ctx.ite(s, shifted, cur[i]));
        }
        cur = stage;
    }
    cur.into_iter().map(|l| ctx.and2(l, !overflow)).collect()
}

/// Lower an expression to its bit-vector of literals (booleans are a single
/// bit). Temporal operators are rejected.
pub fn lower_vec<C: GateOps + LowerEnv + ?Sized>(
    ctx: &mut C,
    e: &Expr,
) -> Result<Vec<Literal>, LowerError> {
    match e {
        Expr::Const { value, sort } => Ok(const_bits(*value, sort.width())),
        Expr::Var(n) => ctx.bits(n, false),
        Expr::Next(n) => ctx.bits(n, true),
        Expr::Not(a) => {
            let l = lower_bool(ctx, a)?;
            Ok(vec![!l])
        }
        Expr::BvNot(a) => {
            let v = lower_vec(ctx, a)?;
            Ok(v.into_iter().map(|l| !l).collect())
        }
        Expr::Neg(a) => {
            // two's complement: ~a + 1
            let v: Vec<Literal> = lower_vec(ctx, a)?.into_iter().map(|l| !l).collect();
            let one = const_bits(1, v.len() as u32);
            Ok(add(ctx, &v, &one, Literal::FALSE))
        }
        Expr::Bin(op, a, b) => lower_bin(ctx, *op, a, b),
        Expr::Always(_) => Err(LowerError::Temporal("always")),
        Expr::Nexttime(_) => Err(LowerError::Temporal("next")),
        Expr::Until(_, _) => Err(LowerError::Temporal("until")),
    }
}

fn lower_bin<C: GateOps + LowerEnv + ?Sized>(
    ctx: &mut C,
    op: BinOp,
    a: &Expr,
    b: &Expr,
) -> Result<Vec<Literal>, LowerError> {
    match op {
        BinOp::And | BinOp::Or | BinOp::Implies => {
            let x = lower_bool(ctx, a)?;
            let y = lower_bool(ctx, b)?;
            let l = match op {
                BinOp::And => ctx.and2(x, y),
                BinOp::Or => ctx.or2(x, y),
                _ => ctx.or2(!x, y),
            };
            Ok(vec![l])
        }
        BinOp::BvAnd | BinOp::BvOr | BinOp::BvXor => {
            let x = lower_vec(ctx, a)?;
            let y = lower_vec(ctx, b)?;
            same_width(&x, &y)?;
            let out = x
                .into_iter()
                .zip(y)
                .map(|(p, q)| match op {
                    BinOp::BvAnd => ctx.and2(p, q),
                    BinOp::BvOr => ctx.or2(p, q),
                    _ => ctx.xor2(p, q),
                })
                .collect();
            Ok(out)
        }
        BinOp::Add => {
            let x = lower_vec(ctx, a)?;
            let y = lower_vec(ctx, b)?;
            same_width(&x, &y)?;
            Ok(add(ctx, &x, &y, Literal::FALSE))
        }
        BinOp::Sub => {
            let x = lower_vec(ctx, a)?;
            let y: Vec<Literal> = lower_vec(ctx, b)?.into_iter().map(|l| !l).collect();
            same_width(&x, &y)?;
            Ok(add(ctx, &x, &y, Literal::TRUE))
        }
        BinOp::Mul => {
            let x = lower_vec(ctx, a)?;
            let y = lower_vec(ctx, b)?;
            same_width(&x, &y)?;
            let w = x.len();
            let mut acc = const_bits(0, w as u32);
            for i in 0..w {
                let mut addend = Vec::with_capacity(w);
                for j in 0..w {
                    if j < i {
                        addend.push(Literal::FALSE);
                    } else {
                        addend.push(ctx.and2(x[i], y[j - i]));
                    }
                }
                acc = add(ctx, &acc, &addend, Literal::FALSE);
            }
            Ok(acc)
        }
        BinOp::Shl | BinOp::Shr => {
            let x = lower_vec(ctx, a)?;
            let y = lower_vec(ctx, b)?;
            Ok(shift(ctx, &x, &y, op == BinOp::Shl))
        }
        BinOp::Eq | BinOp::Neq => {
            let x = lower_vec(ctx, a)?;
            let y = lower_vec(ctx, b)?;
            same_width(&x, &y)?;
            let eq = equal_vec(ctx, &x, &y);
            Ok(vec![if op == BinOp::Eq { eq } else { !eq }])
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let x = lower_vec(ctx, a)?;
            let y = lower_vec(ctx, b)?;
            same_width(&x, &y)?;
            let l = match op {
                BinOp::Lt => less_than(ctx, &x, &y),
                BinOp::Gt => less_than(ctx, &y, &x),
                BinOp::Le => !less_than(ctx, &y, &x),
                _ => !less_than(ctx, &x, &y),
            };
            Ok(vec![l])
        }
    }
}

/// Lower a boolean-sorted expression to a single literal.
pub fn lower_bool<C: GateOps + LowerEnv + ?Sized>(
    ctx: &mut C,
    e: &Expr,
) -> Result<Literal, LowerError> {
    let v = lower_vec(ctx, e)?;
    match v.as_slice() {
        [l] => Ok(*l),
        other => Err(LowerError::WidthMismatch(other.len(), 1)),
    }
}

/// Width of an expression whose sorts were already checked; variables are
/// resolved through the sort lookup.
pub fn width_of(e: &Expr, sort_of: &impl Fn(&str) -> Option<Sort>) -> Option<u32> {
    match e {
        Expr::Const { sort, .. } => Some(sort.width()),
        Expr::Var(n) | Expr::Next(n) => sort_of(n).map(Sort::width),
        Expr::Not(_) => Some(1),
        Expr::Neg(a) | Expr::BvNot(a) => width_of(a, sort_of),
        Expr::Bin(op, a, _) if !op.is_predicate() => width_of(a, sort_of),
        Expr::Bin(_, _, _) => Some(1),
        Expr::Always(_) | Expr::Nexttime(_) | Expr::Until(_, _) => Some(1),
    }
}
