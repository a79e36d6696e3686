//! Symbol table of elaborated modules
//!
//! The checker core consumes modules that a front-end has already elaborated:
//! variable declarations with sorts and kinds, combinational `assign`
//! equations, `init`/`trans` conjuncts, and named properties in declaration
//! order. HDL parsing itself lives behind the [`crate::lang`] registry.

#![forbid(unsafe_code)]

use std::fmt;

use crate::expr::{Expr, Sort};

/// Storage class of a module variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// Holds state across frames; contributes latches.
    State,
    /// Free in every frame.
    Input,
    /// Combinational, defined by an `assign` (or free if never assigned).
    Wire,
}

impl fmt::Display for VarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VarKind::State => "state",
            VarKind::Input => "input",
            VarKind::Wire => "wire",
        };
        write!(f, "{s}")
    }
}

/// A declared module variable.
#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: String,
    pub sort: Sort,
    pub kind: VarKind,
}

/// A named property as written in the source, prior to the implicit
/// `always` wrap applied by the property store.
#[derive(Debug, Clone)]
pub struct PropertyDecl {
    pub name: String,
    pub expr: Expr,
}

/// One elaborated module.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    /// Source language mode, e.g. `"rtl"`. Carried so `-p` expressions are
    /// parsed with the same front-end that produced the module.
    pub mode: String,
    pub vars: Vec<VarDecl>,
    /// Combinational definitions, in source order.
    pub assigns: Vec<(String, Expr)>,
    pub init: Vec<Expr>,
    pub trans: Vec<Expr>,
    pub properties: Vec<PropertyDecl>,
}

impl Module {
    /// Look up a declared variable.
    pub fn var(&self, name: &str) -> Option<&VarDecl> {
        self.vars.iter().find(|v| v.name == name)
    }

    /// Sort of a declared variable.
    pub fn sort_of(&self, name: &str) -> Option<Sort> {
        self.var(name).map(|v| v.sort)
    }

    /// The `assign` right-hand side for a wire, if any.
    pub fn assign_of(&self, name: &str) -> Option<&Expr> {
        self.assigns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }
}

/// All modules seen by the front-ends, in parse order.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    pub modules: Vec<Module>,
}

impl SymbolTable {
    /// Find a module by name.
    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// One line per module, used by `--show-modules`.
    pub fn show_modules(&self, out: &mut impl fmt::Write) -> fmt::Result {
        for m in &self.modules {
            let latches: u32 = m
                .vars
                .iter()
                .filter(|v| v.kind == VarKind::State)
                .map(|v| v.sort.width())
                .sum();
            writeln!(
                out,
                "{} (mode {}, {} variables, {} state bits, {} properties)",
                m.name,
                m.mode,
                m.vars.len(),
                latches,
                m.properties.len()
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for SymbolTable {
    /// Full dump, used by `--show-symbol-table`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.modules {
            writeln!(f, "module {}", m.name)?;
            for v in &m.vars {
                writeln!(f, "  {} {} : {}", v.kind, v.name, v.sort)?;
            }
            for (n, e) in &m.assigns {
                writeln!(f, "  assign {n} = {e}")?;
            }
            for e in &m.init {
                writeln!(f, "  init {e}")?;
            }
            for e in &m.trans {
                writeln!(f, "  trans {e}")?;
            }
            for p in &m.properties {
                writeln!(f, "  property {}: {}", p.name, p.expr)?;
            }
        }
        Ok(())
    }
}
