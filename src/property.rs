//! Property store, temporal lowering skeleton, and result reporting
//!
//! A property is a safety assertion over traces, implicitly wrapped in
//! `always` (writing the wrapper yourself parses to the identical record).
//! The store keeps declaration order; identity is by name and `--property`
//! selection matches the first occurrence, disabling everything else.
//!
//! Both pipelines share one lowering skeleton: the temporal structure is
//! peeled off here frame by frame, and a path-specific [`FrameLowerer`]
//! turns the state-level residue into literals. Unknown temporal structure
//! is an error — a property is never silently read as its propositional
//! skeleton.

#![forbid(unsafe_code)]

use std::io::{self, Write};

use tracing::debug;

use crate::bv::LowerError;
use crate::expr::Expr;
use crate::lang::{LanguageRegistry, TypeError};
use crate::solver::{Literal, PropSolver};
use crate::symtab::Module;
use crate::trace::Trace;
use crate::xml::Xml;

/// Lifecycle status. Transitions UNKNOWN → SUCCESS | FAILURE exactly once
/// per solver invocation; DISABLED only via name-based selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyStatus {
    Unknown,
    Success,
    Failure,
    Disabled,
}

impl PropertyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PropertyStatus::Unknown => "UNKNOWN",
            PropertyStatus::Success => "SUCCESS",
            PropertyStatus::Failure => "FAILURE",
            PropertyStatus::Disabled => "DISABLED",
        }
    }
}

/// One property with its per-run solving state.
#[derive(Debug, Clone)]
pub struct Property {
    pub number: usize,
    pub name: String,
    /// Always-wrapped expression.
    pub expr: Expr,
    pub expr_string: String,
    pub description: String,
    pub mode: String,
    pub status: PropertyStatus,
    /// Filled by lowering: `⋀ timeframe_literals` ⇔ the property holds in
    /// every frame of the unwinding.
    pub timeframe_literals: Vec<Literal>,
    pub counterexample: Option<Trace>,
}

impl Property {
    pub fn is_disabled(&self) -> bool {
        self.status == PropertyStatus::Disabled
    }

    pub fn is_failure(&self) -> bool {
        self.status == PropertyStatus::Failure
    }

    pub fn make_success(&mut self) {
        self.status = PropertyStatus::Success;
    }

    pub fn make_failure(&mut self) {
        self.status = PropertyStatus::Failure;
    }
}

/// Property acquisition / selection failure.
#[derive(Debug, thiserror::Error)]
pub enum PropertyError {
    #[error("no front-end registered for mode `{0}`")]
    UnknownMode(String),
    #[error("{0}")]
    Language(#[from] crate::lang::LanguageError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error("property {0} not found")]
    NotFound(String),
}

/// Apply the implicit `always`, as in SVA. Idempotent.
pub fn wrap_always(e: Expr) -> Expr {
    if matches!(e, Expr::Always(_)) {
        e
    } else {
        Expr::Always(Box::new(e))
    }
}

fn new_property(number: usize, name: String, description: String, mode: String, expr: Expr) -> Property {
    let expr = wrap_always(expr);
    let expr_string = expr.to_string();
    debug!("Property: {expr_string}");
    Property {
        number,
        name,
        expr,
        expr_string,
        description,
        mode,
        status: PropertyStatus::Unknown,
        timeframe_literals: Vec::new(),
        counterexample: None,
    }
}

/// Properties declared by the module, in declaration order.
pub fn from_module(module: &Module) -> Vec<Property> {
    module
        .properties
        .iter()
        .enumerate()
        .map(|(i, p)| {
            new_property(
                i,
                p.name.clone(),
                p.name.clone(),
                module.mode.clone(),
                p.expr.clone(),
            )
        })
        .collect()
}

/// Parse a `-p` command-line assertion with the module's own front-end.
pub fn from_command_line(
    source: &str,
    module: &Module,
    registry: &LanguageRegistry,
) -> Result<Property, PropertyError> {
    let language = registry
        .by_mode(&module.mode)
        .ok_or_else(|| PropertyError::UnknownMode(module.mode.clone()))?;
    let expr = language.parse_expression(source)?;
    let expr = crate::lang::typecheck_expr(module, &expr, false, true)?;
    Ok(new_property(
        0,
        "command-line assertion".to_string(),
        "command-line assertion".to_string(),
        module.mode.clone(),
        expr,
    ))
}

/// `--property NAME`: disable everything, re-enable the first match.
pub fn select(properties: &mut [Property], name: &str) -> Result<(), PropertyError> {
    for p in properties.iter_mut() {
        p.status = PropertyStatus::Disabled;
    }
    match properties.iter_mut().find(|p| p.name == name) {
        Some(p) => {
            p.status = PropertyStatus::Unknown;
            Ok(())
        }
        None => Err(PropertyError::NotFound(name.to_string())),
    }
}

pub fn any_failure(properties: &[Property]) -> bool {
    properties.iter().any(|p| p.is_failure())
}

/// Listing for `--show-properties`.
pub fn show(properties: &[Property], out: &mut impl Write) -> io::Result<()> {
    for p in properties {
        writeln!(out, "[{}] {}: {}", p.name, p.expr_string, p.status.as_str())?;
    }
    Ok(())
}

// ============================================================================
// Temporal lowering skeleton
// ============================================================================

/// Path-specific part of property lowering: turn a temporal-free state
/// predicate into a literal valid at one frame.
pub trait FrameLowerer {
    fn solver(&mut self) -> &mut dyn PropSolver;
    fn lower_state(&mut self, expr: &Expr, frame: usize) -> Result<Literal, LowerError>;
}

/// Lower an (always-wrapped) property into its per-frame literal vector for
/// an unwinding of `frames` frames: `L[t]` ⇔ the body holds at frame `t`.
pub fn lower_timeframes(
    lw: &mut dyn FrameLowerer,
    expr: &Expr,
    frames: usize,
) -> Result<Vec<Literal>, LowerError> {
    let body = match expr {
        Expr::Always(b) => b.as_ref(),
        // the store always wraps; a bare expression still means "always"
        other => other,
    };
    (0..frames).map(|t| lower_at(lw, body, t, frames)).collect()
}

fn lower_at(
    lw: &mut dyn FrameLowerer,
    e: &Expr,
    t: usize,
    frames: usize,
) -> Result<Literal, LowerError> {
    match e {
        // nested always: conjunction over the remaining horizon
        Expr::Always(b) => {
            let mut lits = Vec::with_capacity(frames - t);
            for j in t..frames {
                lits.push(lower_at(lw, b, j, frames)?);
            }
            Ok(lw.solver().land(&lits))
        }
        // index shift, truncated at the horizon
        Expr::Nexttime(b) => {
            if t + 1 < frames {
                lower_at(lw, b, t + 1, frames)
            } else {
                Ok(Literal::TRUE)
            }
        }
        // bounded expansion u_j = r_j ∨ (p_j ∧ u_{j+1}), u at the horizon
        // collapsing to r alone
        Expr::Until(p, r) => {
            let mut u: Option<Literal> = None;
            for j in (t..frames).rev() {
                let rj = lower_at(lw, r, j, frames)?;
                u = Some(match u {
                    None => rj,
                    Some(rest) => {
                        let pj = lower_at(lw, p, j, frames)?;
                        let cont = lw.solver().land2(pj, rest);
                        lw.solver().lor2(rj, cont)
                    }
                });
            }
            Ok(u.unwrap_or(Literal::TRUE))
        }
        e if !e.has_temporal() => lw.lower_state(e, t),
        // temporal structure under a boolean connective
        _ => Err(LowerError::Temporal("nested")),
    }
}

/// The violation condition the driver assumes: some frame t where the
/// property fails after t valid transition steps. Guarding each case by its
/// step prefix keeps short counterexamples visible even when a constrained
/// transition relation (a reset override, a `trans` side condition) has no
/// full-length execution, and makes FAILURE monotone in the bound.
pub fn violation_literal(
    solver: &mut dyn PropSolver,
    timeframe_literals: &[Literal],
    step_literals: &[Literal],
) -> Literal {
    let mut prefix = Literal::TRUE;
    let mut cases = Vec::with_capacity(timeframe_literals.len());
    for (t, &l) in timeframe_literals.iter().enumerate() {
        let case = solver.land2(!l, prefix);
        cases.push(case);
        if t < step_literals.len() {
            prefix = solver.land2(prefix, step_literals[t]);
        }
    }
    solver.lor(&cases)
}

// ============================================================================
// Reporting
// ============================================================================

/// Report sink options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOptions {
    pub xml_ui: bool,
    pub with_trace: bool,
}

/// Emit per-property results; text or structured depending on the sink.
pub fn report_results(
    properties: &[Property],
    options: ReportOptions,
    out: &mut impl Write,
) -> io::Result<()> {
    if options.xml_ui {
        for p in properties {
            if p.is_disabled() {
                continue;
            }
            let mut xml = Xml::new("result");
            xml.set_attribute("property", p.name.clone());
            xml.set_attribute("status", p.status.as_str());
            if let (true, Some(trace)) = (p.is_failure(), &p.counterexample) {
                xml.children.push(trace.xml_element());
            }
            write!(out, "{xml}")?;
        }
        return Ok(());
    }

    writeln!(out)?;
    writeln!(out, "** Results:")?;
    for p in properties {
        if p.is_disabled() {
            continue;
        }
        writeln!(out, "[{}] {}: {}", p.name, p.expr_string, p.status.as_str())?;
        if p.is_failure() && options.with_trace {
            if let Some(trace) = &p.counterexample {
                writeln!(out, "Counterexample:")?;
                trace.show_text(out)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinOp;
    use crate::lang::typecheck;
    use crate::parse::parse_modules;
    use crate::symtab::SymbolTable;

    fn module() -> Module {
        let mut st = SymbolTable {
            modules: parse_modules(
                "module main;
                   state q : bv[2];
                   init q == 0;
                   trans next(q) == q + 1;
                   property p1: always q != 3;
                   property p2: q != 2;
                 endmodule",
            )
            .unwrap(),
        };
        typecheck(&mut st).unwrap();
        st.modules.remove(0)
    }

    #[test]
    fn implicit_always_is_idempotent() {
        let m = module();
        let registry = LanguageRegistry::builtin();
        let explicit = from_command_line("always q != 3", &m, &registry).unwrap();
        let implicit = from_command_line("q != 3", &m, &registry).unwrap();
        assert_eq!(explicit.expr, implicit.expr);
        assert_eq!(explicit.expr_string, "always q != 3");
    }

    #[test]
    fn module_properties_are_wrapped_and_ordered() {
        let props = from_module(&module());
        assert_eq!(props.len(), 2);
        assert_eq!(props[0].name, "p1");
        assert!(matches!(props[1].expr, Expr::Always(_)));
        assert_eq!(props[1].number, 1);
    }

    #[test]
    fn selection_disables_the_rest() {
        let mut props = from_module(&module());
        select(&mut props, "p1").unwrap();
        assert_eq!(props[0].status, PropertyStatus::Unknown);
        assert_eq!(props[1].status, PropertyStatus::Disabled);
        assert!(matches!(
            select(&mut props, "p9"),
            Err(PropertyError::NotFound(_))
        ));
    }

    #[test]
    fn command_line_property_is_sort_checked() {
        let m = module();
        let registry = LanguageRegistry::builtin();
        assert!(from_command_line("q == 9", &m, &registry).is_err());
        assert!(from_command_line("r == 0", &m, &registry).is_err());
    }

    // a lowerer over a plain CDCL instance: each (var, frame) pair gets one
    // fresh literal, which is enough to test the temporal skeleton shape
    struct TestLowerer {
        solver: crate::cdcl::Cdcl,
        atoms: Vec<(String, usize, Literal)>,
    }

    impl FrameLowerer for TestLowerer {
        fn solver(&mut self) -> &mut dyn PropSolver {
            &mut self.solver
        }
        fn lower_state(&mut self, expr: &Expr, frame: usize) -> Result<Literal, LowerError> {
            let key = expr.to_string();
            if let Some((_, _, l)) = self
                .atoms
                .iter()
                .find(|(k, f, _)| *k == key && *f == frame)
            {
                return Ok(*l);
            }
            let l = self.solver.new_variable();
            self.atoms.push((key, frame, l));
            Ok(l)
        }
    }

    fn atom(name: &str) -> Expr {
        Expr::bin(
            BinOp::Eq,
            Expr::Var(name.to_string()),
            Expr::Const {
                value: 0,
                sort: crate::expr::Sort::Bv(1),
            },
        )
    }

    #[test]
    fn always_yields_one_literal_per_frame() {
        let mut lw = TestLowerer {
            solver: crate::cdcl::Cdcl::new(),
            atoms: Vec::new(),
        };
        let p = wrap_always(atom("a"));
        let lits = lower_timeframes(&mut lw, &p, 4).unwrap();
        assert_eq!(lits.len(), 4);
        assert_eq!(lw.atoms.len(), 4);
    }

    #[test]
    fn nexttime_truncates_at_horizon() {
        let mut lw = TestLowerer {
            solver: crate::cdcl::Cdcl::new(),
            atoms: Vec::new(),
        };
        let p = wrap_always(Expr::Nexttime(Box::new(atom("a"))));
        let lits = lower_timeframes(&mut lw, &p, 3).unwrap();
        assert_eq!(lits.len(), 3);
        // the final frame has no successor: its obligation is vacuous
        assert_eq!(lits[2], Literal::TRUE);
        // frame t speaks about atom at frame t+1
        assert!(lw.atoms.iter().any(|(_, f, l)| *f == 1 && *l == lits[0]));
    }

    #[test]
    fn nested_temporal_under_connective_is_an_error() {
        let mut lw = TestLowerer {
            solver: crate::cdcl::Cdcl::new(),
            atoms: Vec::new(),
        };
        let bad = wrap_always(Expr::and(Expr::Always(Box::new(atom("a"))), atom("b")));
        assert!(matches!(
            lower_timeframes(&mut lw, &bad, 2),
            Err(LowerError::Temporal(_))
        ));
    }
}
