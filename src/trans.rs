//! Transition-system representation
//!
//! The in-memory form of one elaborated module: an initial-state predicate
//! over current-state variables and a transition predicate over current and
//! next state, both stored as conjunction trees. Solvers never see this type;
//! only the two unwinders consume it.
//!
//! The record is immutable after extraction except for one sanctioned
//! amendment: a user-supplied reset predicate `R` turns `init` into
//! `init ∧ R` and `trans` into `trans ∧ ¬next(R)` — the design is in reset
//! exactly in frame 0 and never again.

#![forbid(unsafe_code)]

use crate::expr::{make_next_state, Expr};
use crate::symtab::{SymbolTable, VarDecl, VarKind};

/// Extraction failure.
#[derive(Debug, thiserror::Error)]
pub enum TransError {
    #[error("module `{0}` not found")]
    ModuleNotFound(String),
    #[error("module `{0}` has no transition value")]
    NoTransitionValue(String),
}

/// One module as a transition system.
#[derive(Debug, Clone)]
pub struct TransitionSystem {
    /// Name of the module this was extracted from.
    pub module: String,
    /// Source language mode of the module.
    pub mode: String,
    pub vars: Vec<VarDecl>,
    /// Combinational wire definitions, kept separate from `trans` so the
    /// netlist builder sees them as equations rather than constraints.
    pub assigns: Vec<(String, Expr)>,
    /// Predicate over current-state variables.
    pub init: Expr,
    /// Predicate over current- and next-state variables. Never references
    /// any frame other than current and next.
    pub trans: Expr,
}

fn conjoin_all(mut exprs: impl Iterator<Item = Expr>) -> Expr {
    match exprs.next() {
        None => Expr::bool_const(true),
        Some(first) => exprs.fold(first, Expr::and),
    }
}

impl TransitionSystem {
    /// Extract the transition system of `top` from the symbol table. A
    /// module without a single `trans` declaration is malformed; a module
    /// that asserts `trans true;` is a legitimate free-running design.
    pub fn extract(symtab: &SymbolTable, top: &str) -> Result<TransitionSystem, TransError> {
        let m = symtab
            .module(top)
            .ok_or_else(|| TransError::ModuleNotFound(top.to_string()))?;
        if m.trans.is_empty() {
            return Err(TransError::NoTransitionValue(m.name.clone()));
        }
        Ok(TransitionSystem {
            module: m.name.clone(),
            mode: m.mode.clone(),
            vars: m.vars.clone(),
            assigns: m.assigns.clone(),
            init: conjoin_all(m.init.iter().cloned()),
            trans: conjoin_all(m.trans.iter().cloned()),
        })
    }

    /// Declared variable lookup.
    pub fn var(&self, name: &str) -> Option<&VarDecl> {
        self.vars.iter().find(|v| v.name == name)
    }

    /// Combinational assignment right-hand side for `name`, if any.
    pub fn assign_of(&self, name: &str) -> Option<&Expr> {
        self.assigns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }

    /// State variables in declaration order.
    pub fn state_vars(&self) -> impl Iterator<Item = &VarDecl> {
        self.vars.iter().filter(|v| v.kind == VarKind::State)
    }

    /// Input variables in declaration order.
    pub fn input_vars(&self) -> impl Iterator<Item = &VarDecl> {
        self.vars.iter().filter(|v| v.kind == VarKind::Input)
    }

    /// Strengthen the initial-state predicate.
    pub fn conjoin_init(&mut self, constraint: Expr) {
        let init = std::mem::replace(&mut self.init, Expr::bool_const(true));
        self.init = Expr::and(init, constraint);
    }

    /// Strengthen the transition predicate.
    pub fn conjoin_trans(&mut self, constraint: Expr) {
        let trans = std::mem::replace(&mut self.trans, Expr::bool_const(true));
        self.trans = Expr::and(trans, constraint);
    }

    /// Apply a `--reset` predicate: true in the initial state, false in
    /// every successor state.
    pub fn apply_reset(&mut self, reset: Expr) {
        let reset_next = make_next_state(&reset);
        self.conjoin_init(reset);
        self.conjoin_trans(Expr::Not(Box::new(reset_next)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::typecheck;
    use crate::parse::parse_modules;

    fn system(src: &str) -> TransitionSystem {
        let mut st = SymbolTable {
            modules: parse_modules(src).unwrap(),
        };
        typecheck(&mut st).unwrap();
        TransitionSystem::extract(&st, "main").unwrap()
    }

    #[test]
    fn extracts_counter() {
        let ts = system(
            "module main;
               state q : bv[2];
               init q == 0;
               trans next(q) == q + 1;
             endmodule",
        );
        assert_eq!(ts.module, "main");
        assert_eq!(ts.state_vars().count(), 1);
        assert_eq!(ts.init.to_string(), "q == 0");
    }

    #[test]
    fn missing_module_is_an_error() {
        let st = SymbolTable::default();
        assert!(matches!(
            TransitionSystem::extract(&st, "main"),
            Err(TransError::ModuleNotFound(_))
        ));
    }

    #[test]
    fn module_without_transition_value_is_an_error() {
        let mut st = SymbolTable {
            modules: crate::parse::parse_modules(
                "module main;
                   state q : bv[2];
                   init q == 0;
                 endmodule",
            )
            .unwrap(),
        };
        typecheck(&mut st).unwrap();
        assert!(matches!(
            TransitionSystem::extract(&st, "main"),
            Err(TransError::NoTransitionValue(_))
        ));
        // an explicit `trans true;` is not the same as no transition value
        let mut st = SymbolTable {
            modules: crate::parse::parse_modules(
                "module main;
                   state q : bv[2];
                   init q == 0;
                   trans true;
                 endmodule",
            )
            .unwrap(),
        };
        typecheck(&mut st).unwrap();
        assert!(TransitionSystem::extract(&st, "main").is_ok());
    }

    #[test]
    fn reset_patches_both_predicates() {
        let mut ts = system(
            "module main;
               state q : bv[2];
               init q == 0;
               trans next(q) == q + 1;
             endmodule",
        );
        let reset = crate::parse::parse_expr("q == 0").unwrap();
        ts.apply_reset(reset);
        assert_eq!(ts.init.to_string(), "q == 0 && q == 0");
        assert!(ts.trans.to_string().contains("!(next(q) == 0)"));
    }
}
