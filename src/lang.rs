//! Front-end registry and sort checking
//!
//! HDL parsing proper is a collaborator, not part of the checker core. The
//! [`LanguageRegistry`] is the seam: front-ends are registered once at
//! start-up and the registry value is threaded down from the orchestrator,
//! so tests can instantiate alternate registries without touching process
//! globals. One built-in front-end ("rtl") elaborates the textual
//! transition-system format understood by [`crate::parse`].
//!
//! Sort checking runs after parsing and before anything touches a solver.
//! It rewrites the expression trees it accepts: bare integer literals adapt
//! to the width of the opposing operand, so `q + 1` checks against a two-bit
//! `q` without annotation.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use crate::expr::{BinOp, Expr, Sort};
use crate::parse;
use crate::symtab::{Module, SymbolTable, VarKind};

/// Front-end failure, already rendered for the user.
#[derive(Debug, thiserror::Error)]
pub enum LanguageError {
    #[error("{0}")]
    Syntax(String),
}

/// A registered HDL front-end.
pub trait Language {
    /// Mode string recorded on modules this front-end produces.
    fn mode(&self) -> &'static str;
    /// File extensions claimed by this front-end.
    fn file_extensions(&self) -> &'static [&'static str];
    /// Parse a source file into modules (not yet sort-checked).
    fn parse(&self, src: &str) -> Result<Vec<Module>, LanguageError>;
    /// Parse a bare expression, as given with `-p` or `--reset`.
    fn parse_expression(&self, src: &str) -> Result<Expr, LanguageError>;
}

/// Built-in front-end for the textual transition-system format.
pub struct RtlLanguage;

impl Language for RtlLanguage {
    fn mode(&self) -> &'static str {
        "rtl"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["rtl"]
    }

    fn parse(&self, src: &str) -> Result<Vec<Module>, LanguageError> {
        parse::parse_modules(src).map_err(|e| LanguageError::Syntax(e.to_string()))
    }

    fn parse_expression(&self, src: &str) -> Result<Expr, LanguageError> {
        parse::parse_expr(src).map_err(|e| LanguageError::Syntax(e.to_string()))
    }
}

/// The set of available front-ends, threaded as a value.
pub struct LanguageRegistry {
    languages: Vec<Box<dyn Language>>,
}

impl LanguageRegistry {
    /// Empty registry, for tests that register their own front-ends.
    pub fn new() -> LanguageRegistry {
        LanguageRegistry {
            languages: Vec::new(),
        }
    }

    /// Registry with the built-in front-end.
    pub fn builtin() -> LanguageRegistry {
        let mut r = LanguageRegistry::new();
        r.register(Box::new(RtlLanguage));
        r
    }

    pub fn register(&mut self, language: Box<dyn Language>) {
        self.languages.push(language);
    }

    /// Front-end by mode string.
    pub fn by_mode(&self, mode: &str) -> Option<&dyn Language> {
        self.languages
            .iter()
            .find(|l| l.mode() == mode)
            .map(|l| l.as_ref())
    }

    /// Front-end claiming the given file extension; falls back to the first
    /// registered front-end so extension-less files still parse.
    pub fn by_extension(&self, ext: &str) -> Option<&dyn Language> {
        self.languages
            .iter()
            .find(|l| l.file_extensions().contains(&ext))
            .or(self.languages.first())
            .map(|l| l.as_ref())
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        LanguageRegistry::builtin()
    }
}

// ============================================================================
// Sort checking
// ============================================================================

/// Sort-checking failure.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    #[error("variable `{0}` declared twice")]
    DuplicateVariable(String),
    #[error("sort mismatch: `{expr}` has sort {actual}, expected {expected}")]
    SortMismatch {
        expr: String,
        actual: Sort,
        expected: Sort,
    },
    #[error("operands of `{op}` have different widths ({lhs} vs {rhs})")]
    WidthMismatch { op: String, lhs: Sort, rhs: Sort },
    #[error("`{expr}` is not a boolean")]
    ExpectedBool { expr: String },
    #[error("`{expr}` is not a bit-vector")]
    ExpectedBv { expr: String },
    #[error("literal {value} does not fit in {sort}")]
    LiteralTooWide { value: u64, sort: Sort },
    #[error("next(…) is only allowed inside trans")]
    NextNotAllowed,
    #[error("temporal operator only allowed inside properties")]
    TemporalNotAllowed,
    #[error("assign target `{0}` is not a wire")]
    AssignTargetNotWire(String),
}

struct Ctx<'a> {
    sorts: &'a BTreeMap<String, Sort>,
    allow_next: bool,
    allow_temporal: bool,
}

/// True for expressions whose width should be inherited from context:
/// numeric literals, possibly under arithmetic unary operators.
fn is_adaptable(e: &Expr) -> bool {
    match e {
        Expr::Const {
            sort: Sort::Bv(_), ..
        } => true,
        Expr::Neg(a) | Expr::BvNot(a) => is_adaptable(a),
        _ => false,
    }
}

fn check(e: &Expr, expected: Option<Sort>, ctx: &Ctx<'_>) -> Result<(Expr, Sort), TypeError> {
    match e {
        Expr::Const { value, sort } => match (sort, expected) {
            (Sort::Bool, Some(Sort::Bv(_))) | (Sort::Bv(_), Some(Sort::Bool)) => {
                Err(TypeError::SortMismatch {
                    expr: e.to_string(),
                    actual: *sort,
                    expected: expected.unwrap_or(*sort),
                })
            }
            (Sort::Bv(_), Some(target @ Sort::Bv(_))) => {
                if *value & !target.mask() != 0 {
                    return Err(TypeError::LiteralTooWide {
                        value: *value,
                        sort: target,
                    });
                }
                Ok((
                    Expr::Const {
                        value: *value,
                        sort: target,
                    },
                    target,
                ))
            }
            _ => Ok((e.clone(), *sort)),
        },
        Expr::Var(n) => {
            let sort = *ctx
                .sorts
                .get(n)
                .ok_or_else(|| TypeError::UnknownVariable(n.clone()))?;
            require(e, sort, expected)?;
            Ok((e.clone(), sort))
        }
        Expr::Next(n) => {
            if !ctx.allow_next {
                return Err(TypeError::NextNotAllowed);
            }
            let sort = *ctx
                .sorts
                .get(n)
                .ok_or_else(|| TypeError::UnknownVariable(n.clone()))?;
            require(e, sort, expected)?;
            Ok((e.clone(), sort))
        }
        Expr::Not(a) => {
            require(e, Sort::Bool, expected)?;
            let (a, _) = check(a, Some(Sort::Bool), ctx)?;
            Ok((Expr::Not(Box::new(a)), Sort::Bool))
        }
        Expr::Neg(a) | Expr::BvNot(a) => {
            let bv_expected = match expected {
                Some(Sort::Bool) => {
                    return Err(TypeError::ExpectedBv {
                        expr: e.to_string(),
                    })
                }
                other => other,
            };
            let (a2, sort) = check(a, bv_expected, ctx)?;
            if sort == Sort::Bool {
                return Err(TypeError::ExpectedBv {
                    expr: e.to_string(),
                });
            }
            let node = match e {
                Expr::Neg(_) => Expr::Neg(Box::new(a2)),
                _ => Expr::BvNot(Box::new(a2)),
            };
            Ok((node, sort))
        }
        Expr::Bin(op, a, b) => check_bin(e, *op, a, b, expected, ctx),
        Expr::Always(a) => {
            check_temporal(ctx, expected, e)?;
            let (a, _) = check(a, Some(Sort::Bool), ctx)?;
            Ok((Expr::Always(Box::new(a)), Sort::Bool))
        }
        Expr::Nexttime(a) => {
            check_temporal(ctx, expected, e)?;
            let (a, _) = check(a, Some(Sort::Bool), ctx)?;
            Ok((Expr::Nexttime(Box::new(a)), Sort::Bool))
        }
        Expr::Until(a, b) => {
            check_temporal(ctx, expected, e)?;
            let (a, _) = check(a, Some(Sort::Bool), ctx)?;
            let (b, _) = check(b, Some(Sort::Bool), ctx)?;
            Ok((Expr::Until(Box::new(a), Box::new(b)), Sort::Bool))
        }
    }
}

fn check_temporal(ctx: &Ctx<'_>, expected: Option<Sort>, e: &Expr) -> Result<(), TypeError> {
    if !ctx.allow_temporal {
        return Err(TypeError::TemporalNotAllowed);
    }
    require(e, Sort::Bool, expected)
}

fn require(e: &Expr, actual: Sort, expected: Option<Sort>) -> Result<(), TypeError> {
    match expected {
        Some(exp) if exp != actual => Err(TypeError::SortMismatch {
            expr: e.to_string(),
            actual,
            expected: exp,
        }),
        _ => Ok(()),
    }
}

/// Check a pair of operands that must agree on a sort, adapting a literal
/// side to the other side's width.
fn check_pair(
    op: BinOp,
    a: &Expr,
    b: &Expr,
    ctx: &Ctx<'_>,
) -> Result<(Expr, Expr, Sort), TypeError> {
    let (a2, b2, sort) = if is_adaptable(a) && !is_adaptable(b) {
        let (b2, sb) = check(b, None, ctx)?;
        let (a2, _) = check(a, Some(sb), ctx)?;
        (a2, b2, sb)
    } else if is_adaptable(b) && !is_adaptable(a) {
        let (a2, sa) = check(a, None, ctx)?;
        let (b2, _) = check(b, Some(sa), ctx)?;
        (a2, b2, sa)
    } else {
        let (a2, sa) = check(a, None, ctx)?;
        let (b2, sb) = check(b, None, ctx)?;
        if sa.width() >= sb.width() && is_adaptable(b) {
            let (b2, _) = check(b, Some(sa), ctx)?;
            (a2, b2, sa)
        } else if is_adaptable(a) {
            let (a2, _) = check(a, Some(sb), ctx)?;
            (a2, b2, sb)
        } else {
            if sa != sb {
                return Err(TypeError::WidthMismatch {
                    op: op.symbol().to_string(),
                    lhs: sa,
                    rhs: sb,
                });
            }
            (a2, b2, sa)
        }
    };
    Ok((a2, b2, sort))
}

/// A comparison against a literal too wide for the other operand has a
/// statically known value (`q < 4` on a two-bit `q` is simply true); fold
/// it instead of rejecting the expression.
fn fold_wide_literal(
    op: BinOp,
    a: &Expr,
    b: &Expr,
    ctx: &Ctx<'_>,
) -> Result<Option<Expr>, TypeError> {
    let bare_literal = |e: &Expr| match e {
        Expr::Const {
            value,
            sort: Sort::Bv(_),
        } => Some(*value),
        _ => None,
    };
    let (value, other, literal_on_left) = match (bare_literal(a), bare_literal(b)) {
        (Some(v), None) => (v, b, true),
        (None, Some(v)) => (v, a, false),
        _ => return Ok(None),
    };
    let (_, sort) = check(other, None, ctx)?;
    if !matches!(sort, Sort::Bv(_)) || value & !sort.mask() == 0 {
        return Ok(None);
    }
    let result = match (op, literal_on_left) {
        (BinOp::Eq, _) => false,
        (BinOp::Neq, _) => true,
        (BinOp::Lt, false) | (BinOp::Le, false) => true,
        (BinOp::Lt, true) | (BinOp::Le, true) => false,
        (BinOp::Gt, true) | (BinOp::Ge, true) => true,
        (BinOp::Gt, false) | (BinOp::Ge, false) => false,
        _ => return Ok(None),
    };
    Ok(Some(Expr::bool_const(result)))
}

fn check_bin(
    whole: &Expr,
    op: BinOp,
    a: &Expr,
    b: &Expr,
    expected: Option<Sort>,
    ctx: &Ctx<'_>,
) -> Result<(Expr, Sort), TypeError> {
    match op {
        BinOp::And | BinOp::Or | BinOp::Implies => {
            require(whole, Sort::Bool, expected)?;
            let (a, _) = check(a, Some(Sort::Bool), ctx)?;
            let (b, _) = check(b, Some(Sort::Bool), ctx)?;
            Ok((Expr::bin(op, a, b), Sort::Bool))
        }
        BinOp::Eq | BinOp::Neq => {
            require(whole, Sort::Bool, expected)?;
            if let Some(folded) = fold_wide_literal(op, a, b, ctx)? {
                return Ok((folded, Sort::Bool));
            }
            let (a, b, _) = check_pair(op, a, b, ctx)?;
            Ok((Expr::bin(op, a, b), Sort::Bool))
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            require(whole, Sort::Bool, expected)?;
            if let Some(folded) = fold_wide_literal(op, a, b, ctx)? {
                return Ok((folded, Sort::Bool));
            }
            let (a, b, sort) = check_pair(op, a, b, ctx)?;
            if sort == Sort::Bool {
                return Err(TypeError::ExpectedBv {
                    expr: whole.to_string(),
                });
            }
            Ok((Expr::bin(op, a, b), Sort::Bool))
        }
        BinOp::BvAnd | BinOp::BvOr | BinOp::BvXor | BinOp::Add | BinOp::Sub | BinOp::Mul => {
            let (a, b, sort) = check_pair(op, a, b, ctx)?;
            if sort == Sort::Bool {
                return Err(TypeError::ExpectedBv {
                    expr: whole.to_string(),
                });
            }
            require(whole, sort, expected)?;
            Ok((Expr::bin(op, a, b), sort))
        }
        BinOp::Shl | BinOp::Shr => {
            // result width follows the left operand; the shift amount keeps
            // whatever width it has
            let (a, sort) = check(a, expected.filter(|s| matches!(s, Sort::Bv(_))), ctx)?;
            if sort == Sort::Bool {
                return Err(TypeError::ExpectedBv {
                    expr: whole.to_string(),
                });
            }
            let (b, sb) = check(b, None, ctx)?;
            if sb == Sort::Bool {
                return Err(TypeError::ExpectedBv {
                    expr: whole.to_string(),
                });
            }
            require(whole, sort, expected)?;
            Ok((Expr::bin(op, a, b), sort))
        }
    }
}

/// Sort map for a module's declared variables.
pub fn sort_map(module: &Module) -> BTreeMap<String, Sort> {
    module
        .vars
        .iter()
        .map(|v| (v.name.clone(), v.sort))
        .collect()
}

/// Check one expression against a module's declarations. Returns the
/// rewritten tree (literal widths resolved).
pub fn typecheck_expr(
    module: &Module,
    expr: &Expr,
    allow_next: bool,
    allow_temporal: bool,
) -> Result<Expr, TypeError> {
    let sorts = sort_map(module);
    let ctx = Ctx {
        sorts: &sorts,
        allow_next,
        allow_temporal,
    };
    let (rewritten, _) = check(expr, Some(Sort::Bool), &ctx)?;
    Ok(rewritten)
}

/// Sort-check every module in the table, rewriting its expressions in place.
pub fn typecheck(symtab: &mut SymbolTable) -> Result<(), TypeError> {
    for m in &mut symtab.modules {
        typecheck_module(m)?;
    }
    Ok(())
}

fn typecheck_module(m: &mut Module) -> Result<(), TypeError> {
    let mut seen = Vec::new();
    for v in &m.vars {
        if seen.contains(&&v.name) {
            return Err(TypeError::DuplicateVariable(v.name.clone()));
        }
        seen.push(&v.name);
    }

    let sorts = sort_map(m);

    for (name, rhs) in &mut m.assigns {
        let target = m
            .vars
            .iter()
            .find(|v| v.name == *name)
            .ok_or_else(|| TypeError::UnknownVariable(name.clone()))?;
        if target.kind != VarKind::Wire {
            return Err(TypeError::AssignTargetNotWire(name.clone()));
        }
        let ctx = Ctx {
            sorts: &sorts,
            allow_next: false,
            allow_temporal: false,
        };
        let (e, _) = check(rhs, Some(target.sort), &ctx)?;
        *rhs = e;
    }

    let ctx_init = Ctx {
        sorts: &sorts,
        allow_next: false,
        allow_temporal: false,
    };
    for e in &mut m.init {
        let (e2, _) = check(e, Some(Sort::Bool), &ctx_init)?;
        *e = e2;
    }

    let ctx_trans = Ctx {
        sorts: &sorts,
        allow_next: true,
        allow_temporal: false,
    };
    for e in &mut m.trans {
        let (e2, _) = check(e, Some(Sort::Bool), &ctx_trans)?;
        *e = e2;
    }

    let ctx_prop = Ctx {
        sorts: &sorts,
        allow_next: false,
        allow_temporal: true,
    };
    for p in &mut m.properties {
        let (e2, _) = check(&p.expr, Some(Sort::Bool), &ctx_prop)?;
        p.expr = e2;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_modules;

    fn checked(src: &str) -> SymbolTable {
        let mut st = SymbolTable {
            modules: parse_modules(src).unwrap(),
        };
        typecheck(&mut st).unwrap();
        st
    }

    #[test]
    fn literal_adapts_to_variable_width() {
        let st = checked(
            "module main;
               state q : bv[2];
               init q == 0;
               trans next(q) == q + 1;
             endmodule",
        );
        let m = &st.modules[0];
        // the `1` in `q + 1` must have been narrowed to bv[2]
        let trans = m.trans[0].to_string();
        assert_eq!(trans, "next(q) == q + 1");
        match &m.trans[0] {
            Expr::Bin(BinOp::Eq, _, rhs) => match rhs.as_ref() {
                Expr::Bin(BinOp::Add, _, one) => match one.as_ref() {
                    Expr::Const { sort, .. } => assert_eq!(*sort, Sort::Bv(2)),
                    other => panic!("unexpected literal: {other:?}"),
                },
                other => panic!("unexpected rhs: {other:?}"),
            },
            other => panic!("unexpected trans: {other:?}"),
        }
    }

    #[test]
    fn comparisons_against_wide_literals_fold() {
        // `q < 4` on a two-bit q is statically true, `q == 9` statically
        // false; neither is an error
        let st = checked(
            "module main;
               state q : bv[2];
               init q == 0;
               property p1: always q < 4;
               property p2: always q == 9;
             endmodule",
        );
        let m = &st.modules[0];
        assert_eq!(m.properties[0].expr.to_string(), "always true");
        assert_eq!(m.properties[1].expr.to_string(), "always false");
    }

    #[test]
    fn rejects_oversized_literal_in_arithmetic() {
        let mut st = SymbolTable {
            modules: parse_modules(
                "module main;
                   state q : bv[2];
                   init q + 9 == 0;
                 endmodule",
            )
            .unwrap(),
        };
        assert!(matches!(
            typecheck(&mut st),
            Err(TypeError::LiteralTooWide { value: 9, .. })
        ));
    }

    #[test]
    fn rejects_next_outside_trans() {
        let mut st = SymbolTable {
            modules: parse_modules(
                "module main;
                   state q : bv[2];
                   init next(q) == 0;
                 endmodule",
            )
            .unwrap(),
        };
        assert!(matches!(typecheck(&mut st), Err(TypeError::NextNotAllowed)));
    }

    #[test]
    fn rejects_temporal_in_trans() {
        let mut st = SymbolTable {
            modules: parse_modules(
                "module main;
                   state q : bv[2];
                   trans always q == 0;
                 endmodule",
            )
            .unwrap(),
        };
        assert!(matches!(
            typecheck(&mut st),
            Err(TypeError::TemporalNotAllowed)
        ));
    }

    #[test]
    fn rejects_width_mismatch() {
        let mut st = SymbolTable {
            modules: parse_modules(
                "module main;
                   state a : bv[2];
                   state b : bv[3];
                   init a == b;
                 endmodule",
            )
            .unwrap(),
        };
        assert!(matches!(
            typecheck(&mut st),
            Err(TypeError::WidthMismatch { .. })
        ));
    }

    #[test]
    fn registry_lookup_by_mode_and_extension() {
        let r = LanguageRegistry::builtin();
        assert!(r.by_mode("rtl").is_some());
        assert!(r.by_mode("vhdl").is_none());
        assert!(r.by_extension("rtl").is_some());
        // unknown extensions fall back to the first front-end
        assert!(r.by_extension("txt").is_some());
    }
}
