//! Bounded model checking for synchronous transition systems
//!
//! Given a module elaborated into initial-state and transition predicates
//! plus a set of safety properties, this crate decides, for a bound k,
//! whether any property can be violated within k transitions — and if so,
//! reconstructs a bit-accurate counterexample trace over the k+1 time
//! frames of the unwinding.
//!
//! Two lowering paths share one property-orchestration skeleton:
//!
//! - the **bit-level** path compiles the design to an AND-inverter netlist
//!   ([`netlist`]), replicates it per frame through a time-frame literal
//!   map ([`unwind`]), and feeds CNF to the incremental engine;
//! - the **word-level** path ([`word`]) hands structured bit-vector
//!   formulas to the decision procedure's converter front-end, which
//!   bit-blasts at the solver boundary.
//!
//! Solver engines are collaborators behind the narrow [`solver::PropSolver`]
//! capability trait (fresh literals, clauses, freezing, assumptions, model
//! and final-conflict access); [`cdcl`] is the in-tree implementation.
//! Properties are checked one per assumption-scoped solve against the
//! shared unwinding; on SAT the assignment is projected into a [`trace`]
//! and reported as text, XML, or VCD. [`ldg`] and [`lifter`] are the
//! structural analyses reachable from the command line; [`driver`] holds
//! the orchestration and the exit-code surface.

#![forbid(unsafe_code)]

/// Version string reported by `--version` and dump banners.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Expression trees and sorts.
pub mod expr;
/// Tokenizer and parser for the built-in module format.
pub mod parse;
/// Front-end registry and sort checking.
pub mod lang;
/// Symbol table of elaborated modules.
pub mod symtab;
/// Transition-system representation and the reset amendment.
pub mod trans;
/// The solver capability trait, literals, and the DIMACS sink.
pub mod solver;
/// In-tree incremental CDCL engine.
pub mod cdcl;
/// Bit-vector lowering, shared by the netlist builder and both paths.
pub mod bv;
/// Gate-level netlist and variable map.
pub mod netlist;
/// Bit-level time-frame map and unwinder.
pub mod unwind;
/// Word-level converter, unwinder, and SMT-LIB output.
pub mod word;
/// Property store, temporal lowering skeleton, result reporting.
pub mod property;
/// Counterexample traces and their serializations.
pub mod trace;
/// Minimal XML output for `--xml-ui`.
pub mod xml;
/// Latch dependency graph and the recurrence-diameter bound.
pub mod ldg;
/// UNSAT-core state-cube lifting.
pub mod lifter;
/// Explicit-state reference semantics (trace replay, bounded search).
pub mod sim;
/// Orchestration, options, and exit codes.
pub mod driver;

pub use driver::{run, run_with_registry, Options};
pub use expr::{Expr, Sort};
pub use lang::LanguageRegistry;
pub use netlist::Netlist;
pub use property::{Property, PropertyStatus};
pub use solver::{Literal, PropSolver, SolveResult};
pub use trace::Trace;
pub use trans::TransitionSystem;
