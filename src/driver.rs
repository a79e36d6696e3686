//! Orchestration: options, path selection, the incremental property sweep,
//! and exit codes
//!
//! The run is a straight line: register front-ends, honor the purely
//! informational flags with an early exit, acquire the model (parse →
//! sort-check → extract → optional reset patch → property acquisition),
//! pick a path (a word-level solver flag routes through [`crate::word`],
//! everything else through the netlist), unwind, sweep the properties, and
//! report. Only this layer converts the error taxonomy into exit codes;
//! everything below surfaces errors structurally.

#![forbid(unsafe_code)]

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use tracing::{info, warn};

use crate::bv::LowerError;
use crate::cdcl::Cdcl;
use crate::expr::Expr;
use crate::lang::LanguageRegistry;
use crate::ldg::Ldg;
use crate::netlist::{self, Netlist};
use crate::property::{self, Property, PropertyStatus, ReportOptions};
use crate::solver::{CnfWriter, Literal, PropSolver, SolveResult};
use crate::symtab::SymbolTable;
use crate::trace::Trace;
use crate::trans::TransitionSystem;
use crate::unwind::{self, BmcMap};
use crate::word::{self, WordConv};

/// All enabled properties hold (or informational success).
pub const EXIT_SUCCESS: i32 = 0;
/// Usage or model error.
pub const EXIT_USAGE_OR_MODEL: i32 = 1;
/// The decision procedure reported an error.
pub const EXIT_SOLVER: i32 = 2;
/// Software-model acquisition failed (software co-verification surface;
/// reserved).
pub const EXIT_SOFTWARE_MODEL: i32 = 6;
/// Property-set failure (software co-verification surface; reserved).
pub const EXIT_PROPERTY_SET: i32 = 7;
/// At least one property violated, or a run-time error caught mid-check.
pub const EXIT_VIOLATION: i32 = 10;

/// Command-line surface.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "rtlbmc",
    version,
    about = "bounded model checker for synchronous transition systems"
)]
pub struct Options {
    /// Source files
    pub files: Vec<PathBuf>,

    /// Top module to verify (default: main)
    #[arg(long, value_name = "NAME")]
    pub module: Option<String>,
    /// Alias for --module
    #[arg(long, value_name = "NAME")]
    pub top: Option<String>,
    /// Unwinding bound k; the unwinding spans k+1 frames (default: 1)
    #[arg(long, value_name = "N")]
    pub bound: Option<usize>,
    /// Iterate the bound from 1 to N, stopping at the first failure
    #[arg(long = "max-bound", value_name = "N")]
    pub max_bound: Option<usize>,
    /// Check a property given on the command line instead of the module's
    #[arg(short = 'p', value_name = "EXPR")]
    pub p: Option<String>,
    /// Restrict the run to the named property; the rest are disabled
    #[arg(long, value_name = "NAME")]
    pub property: Option<String>,
    /// Reset predicate: conjoined to init, its negation to every transition
    #[arg(long, value_name = "EXPR")]
    pub reset: Option<String>,
    /// Include path, forwarded to front-ends that use one
    #[arg(short = 'I', value_name = "PATH")]
    pub include: Vec<PathBuf>,

    /// Dump the bit-level decision problem as DIMACS CNF, do not solve
    #[arg(long)]
    pub dimacs: bool,
    /// Dump the word-level problem in SMT-LIB (deprecated alias of --smt2)
    #[arg(long)]
    pub smt1: bool,
    /// Dump the word-level problem as an SMT-LIB 2 benchmark
    #[arg(long)]
    pub smt2: bool,
    /// Word-level path, Boolector flavor
    #[arg(long)]
    pub boolector: bool,
    /// Word-level path, CVC3 flavor
    #[arg(long)]
    pub cvc3: bool,
    /// Word-level path, Yices flavor
    #[arg(long)]
    pub yices: bool,
    /// Word-level path, Z3 flavor
    #[arg(long)]
    pub z3: bool,
    /// Word-level path, generic prover
    #[arg(long)]
    pub prover: bool,

    /// k-induction (separate engine, not linked into this tool)
    #[arg(long = "k-induction")]
    pub k_induction: bool,
    /// Bit-level interpolation (separate engine, not linked in)
    #[arg(long)]
    pub interpolation: bool,
    /// Word-level interpolation (currently disabled)
    #[arg(long = "interpolation-word")]
    pub interpolation_word: bool,
    /// Compute a structural bound on the recurrence diameter
    #[arg(long = "compute-ct")]
    pub compute_ct: bool,
    /// Coverage measurement (separate engine, not linked in)
    #[arg(long)]
    pub coverage: bool,
    /// Lift counterexample states to state cubes
    #[arg(long)]
    pub lifter: bool,

    /// Write the first failing trace as a VCD file
    #[arg(long, value_name = "FILE")]
    pub vcd: Option<PathBuf>,
    /// Redirect dump output (DIMACS, SMT) to a file
    #[arg(long, value_name = "FILE")]
    pub outfile: Option<PathBuf>,
    /// Print counterexample traces with the results
    #[arg(long)]
    pub trace: bool,
    /// Structured (XML) result output
    #[arg(long = "xml-ui")]
    pub xml_ui: bool,
    /// Verbosity 0..10 (default 6)
    #[arg(long, value_name = "N")]
    pub verbosity: Option<u32>,

    /// Show the parse trees and exit
    #[arg(long = "show-parse")]
    pub show_parse: bool,
    /// Show the modules and exit
    #[arg(long = "show-modules")]
    pub show_modules: bool,
    /// Show the symbol table and exit
    #[arg(long = "show-symbol-table")]
    pub show_symbol_table: bool,
    /// Show the variable map and exit
    #[arg(long = "show-varmap")]
    pub show_varmap: bool,
    /// Show the latch dependency graph and exit
    #[arg(long = "show-ldg")]
    pub show_ldg: bool,
    /// Show the netlist and exit
    #[arg(long = "show-netlist")]
    pub show_netlist: bool,
    /// Show the netlist in SMV format and exit
    #[arg(long = "smv-netlist")]
    pub smv_netlist: bool,
    /// Show the netlist in DOT format and exit
    #[arg(long = "dot-netlist")]
    pub dot_netlist: bool,
    /// Show the properties and exit
    #[arg(long = "show-properties")]
    pub show_properties: bool,
}

impl Options {
    fn word_level(&self) -> bool {
        self.smt1 || self.smt2 || self.boolector || self.cvc3 || self.yices || self.z3 || self.prover
    }

    fn solver_flavor(&self) -> &'static str {
        if self.boolector {
            "Boolector front-end, in-tree back-end"
        } else if self.cvc3 {
            "CVC3 front-end, in-tree back-end"
        } else if self.yices {
            "Yices front-end, in-tree back-end"
        } else if self.z3 {
            "Z3 front-end, in-tree back-end"
        } else if self.prover {
            "prover front-end, in-tree back-end"
        } else {
            "word-level bit-blasting"
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum DriverError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Model(String),
    #[error("error from decision procedure")]
    Solver,
    #[error("{0}")]
    Runtime(String),
}

impl DriverError {
    fn exit_code(&self) -> i32 {
        match self {
            DriverError::Usage(_) | DriverError::Model(_) => EXIT_USAGE_OR_MODEL,
            DriverError::Solver => EXIT_SOLVER,
            DriverError::Runtime(_) => EXIT_VIOLATION,
        }
    }
}

/// Run with the built-in front-end registry.
pub fn run(options: &Options) -> i32 {
    let registry = LanguageRegistry::builtin();
    run_with_registry(options, &registry)
}

/// Run with a caller-supplied registry (tests register their own).
pub fn run_with_registry(options: &Options, registry: &LanguageRegistry) -> i32 {
    match run_inner(options, registry) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}

enum ModelOutcome {
    Ready(Box<ModelData>),
    EarlyExit(i32),
}

struct ModelData {
    ts: TransitionSystem,
    properties: Vec<Property>,
}

fn run_inner(options: &Options, registry: &LanguageRegistry) -> Result<i32, DriverError> {
    // engines that are their own tools are dispatched before any model work
    if options.k_induction {
        eprintln!("no support for k-induction linked in");
        return Ok(EXIT_USAGE_OR_MODEL);
    }
    if options.interpolation || options.coverage {
        eprintln!("no support for interpolation linked in");
        return Ok(EXIT_USAGE_OR_MODEL);
    }
    if options.interpolation_word {
        println!("This option is currently disabled");
        return Ok(EXIT_USAGE_OR_MODEL);
    }

    let model = match get_model(options, registry)? {
        ModelOutcome::EarlyExit(code) => return Ok(code),
        ModelOutcome::Ready(model) => model,
    };

    if options.compute_ct {
        return do_compute_ct(&model.ts);
    }
    if options.lifter {
        return do_lifter(options, model);
    }

    if options.dimacs {
        return do_dimacs(options, &model);
    }
    if options.word_level() {
        do_word(options, model)
    } else {
        do_bit(options, model)
    }
}

// ============================================================================
// Model acquisition
// ============================================================================

fn get_model(
    options: &Options,
    registry: &LanguageRegistry,
) -> Result<ModelOutcome, DriverError> {
    if options.files.is_empty() {
        return Err(DriverError::Usage("no input files".to_string()));
    }

    let mut symtab = SymbolTable::default();
    for path in &options.files {
        let source = fs::read_to_string(path)
            .map_err(|e| DriverError::Usage(format!("cannot read {}: {e}", path.display())))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let language = registry
            .by_extension(ext)
            .ok_or_else(|| DriverError::Usage("no front-end registered".to_string()))?;
        let modules = language
            .parse(&source)
            .map_err(|e| DriverError::Model(format!("{}: {e}", path.display())))?;
        symtab.modules.extend(modules);
    }

    if options.show_parse {
        print!("{symtab}");
        return Ok(ModelOutcome::EarlyExit(EXIT_SUCCESS));
    }

    crate::lang::typecheck(&mut symtab).map_err(|e| DriverError::Model(e.to_string()))?;

    if options.show_modules {
        let mut out = String::new();
        symtab
            .show_modules(&mut out)
            .map_err(|e| DriverError::Runtime(e.to_string()))?;
        print!("{out}");
        return Ok(ModelOutcome::EarlyExit(EXIT_SUCCESS));
    }
    if options.show_symbol_table {
        print!("{symtab}");
        return Ok(ModelOutcome::EarlyExit(EXIT_SUCCESS));
    }

    let top = options
        .module
        .clone()
        .or_else(|| options.top.clone())
        .unwrap_or_else(|| "main".to_string());
    let module = symtab
        .module(&top)
        .cloned()
        .ok_or_else(|| DriverError::Model(format!("module `{top}` not found")))?;
    let mut ts = TransitionSystem::extract(&symtab, &top)
        .map_err(|e| DriverError::Model(e.to_string()))?;

    if options.show_varmap {
        let nl = build_netlist(&ts)?;
        let stdout = io::stdout();
        nl.var_map
            .output(&mut stdout.lock())
            .map_err(|e| DriverError::Runtime(e.to_string()))?;
        return Ok(ModelOutcome::EarlyExit(EXIT_SUCCESS));
    }
    if options.show_ldg {
        let nl = build_netlist(&ts)?;
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if !nl.transition.is_empty() {
            writeln!(out, "WARNING: transition constraint found!")
                .and_then(|_| writeln!(out))
                .map_err(|e| DriverError::Runtime(e.to_string()))?;
        }
        Ldg::compute(&nl)
            .show(&mut out)
            .map_err(|e| DriverError::Runtime(e.to_string()))?;
        return Ok(ModelOutcome::EarlyExit(EXIT_SUCCESS));
    }

    if let Some(reset_src) = &options.reset {
        let language = registry
            .by_mode(&module.mode)
            .ok_or_else(|| DriverError::Model(format!("no front-end for mode {}", module.mode)))?;
        let reset = language
            .parse_expression(reset_src)
            .map_err(|e| DriverError::Model(e.to_string()))?;
        let reset = crate::lang::typecheck_expr(&module, &reset, false, false)
            .map_err(|e| DriverError::Model(e.to_string()))?;
        ts.apply_reset(reset);
    }

    let mut properties = match &options.p {
        Some(source) => vec![property::from_command_line(source, &module, registry)
            .map_err(|e| DriverError::Model(e.to_string()))?],
        None => property::from_module(&module),
    };

    if let Some(name) = &options.property {
        property::select(&mut properties, name)
            .map_err(|e| DriverError::Usage(e.to_string()))?;
    }

    if options.show_properties {
        let stdout = io::stdout();
        property::show(&properties, &mut stdout.lock())
            .map_err(|e| DriverError::Runtime(e.to_string()))?;
        return Ok(ModelOutcome::EarlyExit(EXIT_SUCCESS));
    }

    if options.show_netlist || options.smv_netlist || options.dot_netlist {
        let nl = build_netlist(&ts)?;
        let stdout = io::stdout();
        let mut out = stdout.lock();
        let result = if options.show_netlist {
            nl.print(&mut out)
        } else if options.smv_netlist {
            writeln!(out, "-- Generated by rtlbmc {}", crate::VERSION)
                .and_then(|_| writeln!(out, "-- Generated from {}", ts.module))
                .and_then(|_| writeln!(out))
                .and_then(|_| nl.output_smv(&mut out))
        } else {
            writeln!(out, "digraph netlist {{")
                .and_then(|_| nl.output_dot(&mut out))
                .and_then(|_| writeln!(out, "}}"))
        };
        result.map_err(|e| DriverError::Runtime(e.to_string()))?;
        return Ok(ModelOutcome::EarlyExit(EXIT_SUCCESS));
    }

    Ok(ModelOutcome::Ready(Box::new(ModelData { ts, properties })))
}

fn build_netlist(ts: &TransitionSystem) -> Result<Netlist, DriverError> {
    netlist::build_from(ts).map_err(|e| DriverError::Model(e.to_string()))
}

fn get_bound(options: &Options) -> usize {
    match options.bound {
        Some(b) => b,
        None => {
            warn!("using default bound 1");
            1
        }
    }
}

fn bounds_to_try(options: &Options) -> Vec<usize> {
    match options.max_bound {
        Some(max) => (1..=max).collect(),
        None => vec![get_bound(options)],
    }
}

fn require_properties(properties: &[Property]) -> Result<(), DriverError> {
    if properties.iter().all(|p| p.is_disabled()) {
        return Err(DriverError::Usage("no properties".to_string()));
    }
    Ok(())
}

fn reset_statuses(properties: &mut [Property]) {
    for p in properties {
        if !p.is_disabled() {
            p.status = PropertyStatus::Unknown;
            p.timeframe_literals.clear();
            p.counterexample = None;
        }
    }
}

// ============================================================================
// The property sweep, shared by both paths
// ============================================================================

trait Engine {
    fn name(&self) -> &'static str;
    fn lower(&mut self, expr: &Expr) -> Result<Vec<Literal>, LowerError>;
    fn solver(&mut self) -> &mut dyn PropSolver;
    /// Frozen per-transition step literals of the shared unwinding.
    fn steps(&self) -> &[Literal];
    fn extract_trace(&mut self, timeframe_literals: &[Literal]) -> Trace;
}

struct BitEngine<'a> {
    netlist: &'a Netlist,
    map: BmcMap,
    solver: Cdcl,
    steps: Vec<Literal>,
}

impl Engine for BitEngine<'_> {
    fn name(&self) -> &'static str {
        "built-in CDCL"
    }
    fn lower(&mut self, expr: &Expr) -> Result<Vec<Literal>, LowerError> {
        unwind::unwind_property(expr, self.netlist, &self.map, &mut self.solver)
    }
    fn solver(&mut self) -> &mut dyn PropSolver {
        &mut self.solver
    }
    fn steps(&self) -> &[Literal] {
        &self.steps
    }
    fn extract_trace(&mut self, timeframe_literals: &[Literal]) -> Trace {
        unwind::compute_trace(self.netlist, &self.map, &self.solver, timeframe_literals)
    }
}

struct WordEngine<'a> {
    ts: &'a TransitionSystem,
    conv: WordConv<Cdcl>,
    frames: usize,
    steps: Vec<Literal>,
    flavor: &'static str,
}

impl Engine for WordEngine<'_> {
    fn name(&self) -> &'static str {
        self.flavor
    }
    fn lower(&mut self, expr: &Expr) -> Result<Vec<Literal>, LowerError> {
        word::unwind_property(expr, &mut self.conv, self.frames)
    }
    fn solver(&mut self) -> &mut dyn PropSolver {
        self.conv.solver_mut()
    }
    fn steps(&self) -> &[Literal] {
        &self.steps
    }
    fn extract_trace(&mut self, timeframe_literals: &[Literal]) -> Trace {
        word::compute_trace(self.ts, &self.conv, timeframe_literals)
    }
}

/// Check every enabled property against the shared unwinding, one
/// assumption-scoped solver call each.
fn finish_bmc(engine: &mut dyn Engine, properties: &mut [Property]) -> Result<i32, DriverError> {
    // lower and freeze everything first so the incremental solves reuse one
    // unwinding
    for p in properties.iter_mut() {
        if p.is_disabled() {
            continue;
        }
        p.timeframe_literals = engine
            .lower(&p.expr)
            .map_err(|e| DriverError::Runtime(e.to_string()))?;
        for &l in &p.timeframe_literals {
            engine.solver().set_frozen(l);
        }
    }

    info!("Solving with {}", engine.name());
    let start = Instant::now();

    for i in 0..properties.len() {
        if properties[i].is_disabled() {
            continue;
        }
        info!("Checking {}", properties[i].name);
        let lits = properties[i].timeframe_literals.clone();

        // a fresh activator guards the violation condition; releasing it by
        // a unit clause leaves later properties a clean solver state
        let activator = {
            let steps = engine.steps().to_vec();
            let solver = engine.solver();
            let violated = property::violation_literal(solver, &lits, &steps);
            let activator = solver.new_variable();
            solver.add_clause(&[!activator, violated]);
            solver.set_assumptions(&[activator]);
            activator
        };

        match engine.solver().solve() {
            SolveResult::Sat => {
                info!("SAT: counterexample found");
                let trace = engine.extract_trace(&lits);
                properties[i].make_failure();
                properties[i].counterexample = Some(trace);
            }
            SolveResult::Unsat => {
                info!("UNSAT: No counterexample found within bound");
                properties[i].make_success();
            }
            SolveResult::Error => return Err(DriverError::Solver),
        }

        engine.solver().add_clause(&[!activator]);
    }

    info!("Solver time: {:?}", start.elapsed());
    Ok(if property::any_failure(properties) {
        EXIT_VIOLATION
    } else {
        EXIT_SUCCESS
    })
}

// ============================================================================
// Paths
// ============================================================================

fn do_bit(options: &Options, model: Box<ModelData>) -> Result<i32, DriverError> {
    let ModelData { ts, mut properties } = *model;
    require_properties(&properties)?;
    let netlist = build_netlist(&ts)?;

    let mut code = EXIT_SUCCESS;
    for bound in bounds_to_try(options) {
        info!("Doing BMC with bound {bound}");
        reset_statuses(&mut properties);
        let mut solver = Cdcl::new();
        info!("Unwinding Netlist");
        let map = BmcMap::map_timeframes(&netlist, bound + 1, &mut solver);
        let steps = unwind::unwind(&netlist, &map, &mut solver, true);
        let mut engine = BitEngine {
            netlist: &netlist,
            map,
            solver,
            steps,
        };
        code = finish_bmc(&mut engine, &mut properties)?;
        if code == EXIT_VIOLATION {
            break;
        }
    }

    report(options, &properties, &ts.module)?;
    Ok(code)
}

fn do_word(options: &Options, model: Box<ModelData>) -> Result<i32, DriverError> {
    let ModelData { ts, mut properties } = *model;
    let convert_only = options.smt1 || options.smt2;
    if convert_only {
        if options.max_bound.is_some() {
            return Err(DriverError::Usage("please set a specific bound".to_string()));
        }
        if options.smt1 {
            warn!("--smt1 is deprecated; emitting SMT-LIB 2");
        }
        let bound = get_bound(options);
        let mut sink = open_sink(options)?;
        word::write_smt2(&ts, &properties, bound, &mut sink)
            .map_err(|e| DriverError::Runtime(e.to_string()))?;
        return Ok(EXIT_SUCCESS);
    }

    require_properties(&properties)?;
    let mut code = EXIT_SUCCESS;
    for bound in bounds_to_try(options) {
        info!("Doing BMC with bound {bound}");
        reset_statuses(&mut properties);
        info!("Generating Decision Problem");
        let mut conv = WordConv::new(Cdcl::new(), &ts);
        let steps = word::unwind(&ts, &mut conv, bound + 1, true)
            .map_err(|e| DriverError::Runtime(e.to_string()))?;
        let mut engine = WordEngine {
            ts: &ts,
            conv,
            frames: bound + 1,
            steps,
            flavor: options.solver_flavor(),
        };
        code = finish_bmc(&mut engine, &mut properties)?;
        if code == EXIT_VIOLATION {
            break;
        }
    }

    report(options, &properties, &ts.module)?;
    Ok(code)
}

fn do_dimacs(options: &Options, model: &ModelData) -> Result<i32, DriverError> {
    if options.max_bound.is_some() {
        return Err(DriverError::Usage("please set a specific bound".to_string()));
    }
    let bound = get_bound(options);
    let netlist = build_netlist(&model.ts)?;
    let mut writer = CnfWriter::new();
    let map = BmcMap::map_timeframes(&netlist, bound + 1, &mut writer);
    let steps = unwind::unwind(&netlist, &map, &mut writer, true);

    // the dump decides the same question the driver would: is some enabled
    // property violated within the bound
    let mut violations: Vec<Literal> = Vec::new();
    for p in &model.properties {
        if p.is_disabled() {
            continue;
        }
        let lits = unwind::unwind_property(&p.expr, &netlist, &map, &mut writer)
            .map_err(|e| DriverError::Runtime(e.to_string()))?;
        violations.push(property::violation_literal(&mut writer, &lits, &steps));
    }
    if !violations.is_empty() {
        let any = writer.lor(&violations);
        writer.add_clause(&[any]);
    }

    let mut sink = open_sink(options)?;
    writer
        .write(&mut sink)
        .map_err(|e| DriverError::Runtime(e.to_string()))?;
    Ok(EXIT_SUCCESS)
}

fn do_compute_ct(ts: &TransitionSystem) -> Result<i32, DriverError> {
    info!("Making Netlist");
    let netlist = build_netlist(ts)?;
    info!("Making LDG");
    let ldg = Ldg::compute(&netlist);
    println!("CT = {}", ldg.compute_ct());
    Ok(EXIT_SUCCESS)
}

fn do_lifter(options: &Options, model: Box<ModelData>) -> Result<i32, DriverError> {
    let ModelData { ts, mut properties } = *model;
    require_properties(&properties)?;
    let netlist = build_netlist(&ts)?;
    let bound = get_bound(options);

    let mut solver = Cdcl::new();
    let map = BmcMap::map_timeframes(&netlist, bound + 1, &mut solver);
    let steps = unwind::unwind(&netlist, &map, &mut solver, true);
    let mut engine = BitEngine {
        netlist: &netlist,
        map,
        solver,
        steps,
    };
    let code = finish_bmc(&mut engine, &mut properties)?;

    let failing = properties
        .iter()
        .find(|p| p.is_failure() && p.counterexample.is_some());
    match failing {
        None => {
            println!("nothing to lift: no property fails within bound {bound}");
            Ok(code)
        }
        Some(p) => {
            let trace = p.counterexample.as_ref().unwrap();
            let cubes = crate::lifter::lift_trace(&netlist, trace, &p.expr)
                .map_err(|e| DriverError::Runtime(e.to_string()))?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            writeln!(out, "[{}] state cubes:", p.name)
                .map_err(|e| DriverError::Runtime(e.to_string()))?;
            for cube in &cubes {
                cube.show(&mut out)
                    .map_err(|e| DriverError::Runtime(e.to_string()))?;
            }
            Ok(code)
        }
    }
}

// ============================================================================
// Reporting
// ============================================================================

fn open_sink(options: &Options) -> Result<Box<dyn Write>, DriverError> {
    match &options.outfile {
        Some(path) => {
            let file = fs::File::create(path).map_err(|e| {
                DriverError::Runtime(format!("cannot write {}: {e}", path.display()))
            })?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(io::stdout())),
    }
}

fn report(
    options: &Options,
    properties: &[Property],
    module: &str,
) -> Result<(), DriverError> {
    let stdout = io::stdout();
    property::report_results(
        properties,
        ReportOptions {
            xml_ui: options.xml_ui,
            with_trace: options.trace,
        },
        &mut stdout.lock(),
    )
    .map_err(|e| DriverError::Runtime(e.to_string()))?;

    if let Some(path) = &options.vcd {
        for p in properties {
            if let (true, Some(trace)) = (p.is_failure(), &p.counterexample) {
                let mut file = fs::File::create(path).map_err(|e| {
                    DriverError::Runtime(format!("cannot write {}: {e}", path.display()))
                })?;
                trace
                    .write_vcd(module, &mut file)
                    .map_err(|e| DriverError::Runtime(e.to_string()))?;
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::wrap_always;
    use crate::sim::Simulator;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::io::Write as _;

    const COUNTER: &str = "
        module main;
          state q : bv[2];
          init q == 0;
          trans next(q) == q + 1;
          property p1: always q != 3;
        endmodule";

    fn source_file(dir: &tempfile::TempDir, source: &str) -> PathBuf {
        let path = dir.path().join("model.rtl");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(source.as_bytes()).unwrap();
        path
    }

    fn opts(dir: &tempfile::TempDir, source: &str) -> Options {
        Options {
            files: vec![source_file(dir, source)],
            ..Options::default()
        }
    }

    #[test]
    fn counter_holds_at_two_and_fails_at_three() {
        let dir = tempfile::tempdir().unwrap();
        for (bound, expected) in [(2, EXIT_SUCCESS), (3, EXIT_VIOLATION)] {
            let mut o = opts(&dir, COUNTER);
            o.bound = Some(bound);
            assert_eq!(run(&o), expected, "bit-level, bound {bound}");
            o.z3 = true;
            assert_eq!(run(&o), expected, "word-level, bound {bound}");
        }
    }

    #[test]
    fn free_input_violation_at_bound_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut o = opts(
            &dir,
            "module main;
               state q : bv[1];
               input i : bv[1];
               init q == 0;
               trans next(q) == i;
               property p: always q == 0;
             endmodule",
        );
        o.bound = Some(1);
        assert_eq!(run(&o), EXIT_VIOLATION);
    }

    #[test]
    fn reset_composition() {
        let dir = tempfile::tempdir().unwrap();
        let source = "
            module main;
              state q : bv[2];
              trans next(q) == q + 1;
              property p1: always q < 4;
            endmodule";
        // without reset q starts anywhere but p1 still holds trivially
        let mut o = opts(&dir, source);
        o.bound = Some(5);
        o.reset = Some("q == 0".to_string());
        assert_eq!(run(&o), EXIT_SUCCESS);
        // frame 0 of any counterexample satisfies the reset: q != 0 must
        // fail immediately
        o.p = Some("q != 0".to_string());
        assert_eq!(run(&o), EXIT_VIOLATION);
    }

    #[test]
    fn property_selection_disables_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let source = "
            module main;
              state q : bv[2];
              init q == 0;
              trans next(q) == q + 1;
              property p1: always q < 4;
              property p2: always q != 2;
            endmodule";
        let mut o = opts(&dir, source);
        o.bound = Some(2);
        assert_eq!(run(&o), EXIT_VIOLATION); // p2 fails at frame 2
        o.property = Some("p1".to_string());
        assert_eq!(run(&o), EXIT_SUCCESS); // p2 disabled
        o.property = Some("p2".to_string());
        assert_eq!(run(&o), EXIT_VIOLATION);
        o.property = Some("nonexistent".to_string());
        assert_eq!(run(&o), EXIT_USAGE_OR_MODEL);
    }

    #[test]
    fn usage_and_early_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(run(&Options::default()), EXIT_USAGE_OR_MODEL);
        let mut o = opts(&dir, COUNTER);
        o.show_properties = true;
        assert_eq!(run(&o), EXIT_SUCCESS);
        let mut o = opts(&dir, COUNTER);
        o.show_netlist = true;
        assert_eq!(run(&o), EXIT_SUCCESS);
        let mut o = opts(&dir, COUNTER);
        o.interpolation_word = true;
        assert_eq!(run(&o), EXIT_USAGE_OR_MODEL);
        let mut o = opts(&dir, COUNTER);
        o.k_induction = true;
        assert_eq!(run(&o), EXIT_USAGE_OR_MODEL);
        let mut o = opts(
            &dir,
            "module main; state q : bv[2]; trans next(q) == q; endmodule",
        );
        o.bound = Some(1);
        // no properties at all: a usage error, not a verdict
        assert_eq!(run(&o), EXIT_USAGE_OR_MODEL);
    }

    #[test]
    fn vcd_written_for_first_failure_and_max_bound_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let vcd_path = dir.path().join("trace.vcd");
        let mut o = opts(&dir, COUNTER);
        o.max_bound = Some(5);
        o.vcd = Some(vcd_path.clone());
        assert_eq!(run(&o), EXIT_VIOLATION);
        let vcd = fs::read_to_string(&vcd_path).unwrap();
        assert!(vcd.starts_with("$timescale 1ns $end"));
        // the shortest counterexample has frames 0..=3, nothing beyond
        assert!(vcd.contains("#3"));
        assert!(!vcd.contains("#4"));
    }

    #[test]
    fn compute_ct_prints_the_ring_bound() {
        let dir = tempfile::tempdir().unwrap();
        let mut o = opts(
            &dir,
            "module main;
               state a : bool;
               state b : bool;
               state c : bool;
               trans next(a) == c;
               trans next(b) == a;
               trans next(c) == b;
             endmodule",
        );
        o.compute_ct = true;
        assert_eq!(run(&o), EXIT_SUCCESS);
    }

    #[test]
    fn lifter_runs_on_a_failing_counter() {
        let dir = tempfile::tempdir().unwrap();
        let mut o = opts(&dir, COUNTER);
        o.bound = Some(3);
        o.lifter = true;
        assert_eq!(run(&o), EXIT_VIOLATION);
    }

    #[test]
    fn smt2_dump_is_written_to_the_outfile() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("problem.smt2");
        let mut o = opts(&dir, COUNTER);
        o.bound = Some(2);
        o.smt2 = true;
        o.outfile = Some(out.clone());
        assert_eq!(run(&o), EXIT_SUCCESS);
        let text = fs::read_to_string(&out).unwrap();
        assert!(text.contains("(set-logic QF_BV)"));
        assert!(text.contains("(check-sat)"));
    }

    /// Feed a DIMACS dump back into the in-tree engine.
    fn solve_dimacs(text: &str) -> SolveResult {
        let mut solver = Cdcl::new();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        let vars: u32 = header.split_whitespace().nth(2).unwrap().parse().unwrap();
        let lits: Vec<Literal> = (0..vars).map(|_| solver.new_variable()).collect();
        for line in lines {
            let clause: Vec<Literal> = line
                .split_whitespace()
                .map(|t| t.parse::<i64>().unwrap())
                .take_while(|&v| v != 0)
                .map(|v| {
                    let l = lits[(v.unsigned_abs() - 1) as usize];
                    if v < 0 {
                        !l
                    } else {
                        l
                    }
                })
                .collect();
            solver.add_clause(&clause);
        }
        solver.set_assumptions(&[]);
        solver.solve()
    }

    #[test]
    fn dimacs_dump_agrees_with_the_in_process_verdict() {
        let dir = tempfile::tempdir().unwrap();
        for (bound, expected) in [(2, SolveResult::Unsat), (3, SolveResult::Sat)] {
            let out = dir.path().join(format!("b{bound}.cnf"));
            let mut o = opts(&dir, COUNTER);
            o.bound = Some(bound);
            o.dimacs = true;
            o.outfile = Some(out.clone());
            assert_eq!(run(&o), EXIT_SUCCESS);
            let text = fs::read_to_string(&out).unwrap();
            assert!(text.starts_with("p cnf "));
            assert_eq!(solve_dimacs(&text), expected, "bound {bound}");
        }
    }

    #[test]
    fn dimacs_frame_variable_count_for_gate_free_model() {
        // 5 bits of state+input and no gates: exactly 5 × (k+1) variables
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("frames.cnf");
        let mut o = opts(
            &dir,
            "module main;
               state a : bool;
               state b : bool;
               state c : bool;
               input x : bool;
               input y : bool;
               trans next(a) == x;
               trans next(b) == y;
               trans next(c) == a;
             endmodule",
        );
        o.bound = Some(4);
        o.dimacs = true;
        o.outfile = Some(out.clone());
        assert_eq!(run(&o), EXIT_SUCCESS);
        let text = fs::read_to_string(&out).unwrap();
        assert!(text.starts_with("p cnf 25 "), "header: {}", text.lines().next().unwrap());
    }

    // ------------------------------------------------------------------
    // randomized soundness: both pipelines must agree with brute force
    // ------------------------------------------------------------------

    fn random_bool_expr(rng: &mut StdRng, vars: &[&str]) -> String {
        match rng.gen_range(0..6) {
            0 => vars[rng.gen_range(0..vars.len())].to_string(),
            1 => format!("!{}", vars[rng.gen_range(0..vars.len())]),
            2 => format!(
                "({} && {})",
                vars[rng.gen_range(0..vars.len())],
                vars[rng.gen_range(0..vars.len())]
            ),
            3 => format!(
                "({} || {})",
                vars[rng.gen_range(0..vars.len())],
                vars[rng.gen_range(0..vars.len())]
            ),
            4 => format!(
                "({} != {})",
                vars[rng.gen_range(0..vars.len())],
                vars[rng.gen_range(0..vars.len())]
            ),
            _ => format!(
                "({} == {})",
                vars[rng.gen_range(0..vars.len())],
                vars[rng.gen_range(0..vars.len())]
            ),
        }
    }

    fn random_module(rng: &mut StdRng) -> (String, String) {
        let states = ["s0", "s1", "s2"];
        let all = ["s0", "s1", "s2", "inp"];
        let mut src = String::from("module main;\n");
        for s in states {
            src.push_str(&format!("  state {s} : bool;\n"));
        }
        src.push_str("  input inp : bool;\n");
        for s in states {
            if rng.gen_bool(0.8) {
                let value = if rng.gen_bool(0.5) { "true" } else { "false" };
                src.push_str(&format!("  init {s} == {value};\n"));
            }
        }
        for s in states {
            src.push_str(&format!(
                "  trans next({s}) == {};\n",
                random_bool_expr(rng, &all)
            ));
        }
        let body = random_bool_expr(rng, &all);
        src.push_str(&format!("  property p: always {body};\nendmodule\n"));
        (src, body)
    }

    fn bit_level_fails(ts: &TransitionSystem, body: &Expr, bound: usize) -> bool {
        let nl = netlist::build_from(ts).unwrap();
        let mut solver = Cdcl::new();
        let map = BmcMap::map_timeframes(&nl, bound + 1, &mut solver);
        let steps = unwind::unwind(&nl, &map, &mut solver, true);
        let prop = wrap_always(body.clone());
        let lits = unwind::unwind_property(&prop, &nl, &map, &mut solver).unwrap();
        let violated = property::violation_literal(&mut solver, &lits, &steps);
        solver.set_assumptions(&[violated]);
        solver.solve() == SolveResult::Sat
    }

    fn word_level_fails(ts: &TransitionSystem, body: &Expr, bound: usize) -> bool {
        let mut conv = WordConv::new(Cdcl::new(), ts);
        let steps = word::unwind(ts, &mut conv, bound + 1, true).unwrap();
        let prop = wrap_always(body.clone());
        let lits = word::unwind_property(&prop, &mut conv, bound + 1).unwrap();
        let violated = property::violation_literal(conv.solver_mut(), &lits, &steps);
        conv.solver_mut().set_assumptions(&[violated]);
        conv.solver_mut().solve() == SolveResult::Sat
    }

    #[test]
    fn verdicts_agree_with_brute_force_on_random_systems() {
        let mut rng = StdRng::seed_from_u64(0x0b5e55ed);
        for round in 0..25 {
            let (src, body_src) = random_module(&mut rng);
            let mut st = SymbolTable {
                modules: crate::parse::parse_modules(&src).unwrap(),
            };
            crate::lang::typecheck(&mut st).unwrap();
            let ts = TransitionSystem::extract(&st, "main").unwrap();
            let body = {
                let parsed = crate::parse::parse_expr(&body_src).unwrap();
                crate::lang::typecheck_expr(st.module("main").unwrap(), &parsed, false, true)
                    .unwrap()
            };
            let sim = Simulator::new(&ts);
            for bound in 1..=3usize {
                let brute = sim.bounded_violation(&body, bound).unwrap().is_some();
                let bit = bit_level_fails(&ts, &body, bound);
                let word = word_level_fails(&ts, &body, bound);
                assert_eq!(bit, brute, "bit level, round {round}, bound {bound}\n{src}");
                assert_eq!(word, brute, "word level, round {round}, bound {bound}\n{src}");
            }
        }
    }

    /// Bound monotonicity on the counter: success is downward closed,
    /// failure upward closed.
    #[test]
    fn bound_monotonicity() {
        let mut st = SymbolTable {
            modules: crate::parse::parse_modules(COUNTER).unwrap(),
        };
        crate::lang::typecheck(&mut st).unwrap();
        let ts = TransitionSystem::extract(&st, "main").unwrap();
        let body = crate::parse::parse_expr("q != 3").unwrap();
        let verdicts: Vec<bool> = (0..=6).map(|k| bit_level_fails(&ts, &body, k)).collect();
        let first_failure = verdicts.iter().position(|&f| f).unwrap();
        assert_eq!(first_failure, 3);
        assert!(verdicts[first_failure..].iter().all(|&f| f));
        assert!(verdicts[..first_failure].iter().all(|&f| !f));
    }

    /// Replaying a reconstructed counterexample against the transition
    /// system validates every frame.
    #[test]
    fn counterexamples_replay_against_the_semantics() {
        let mut st = SymbolTable {
            modules: crate::parse::parse_modules(COUNTER).unwrap(),
        };
        crate::lang::typecheck(&mut st).unwrap();
        let ts = TransitionSystem::extract(&st, "main").unwrap();
        let nl = netlist::build_from(&ts).unwrap();
        let mut solver = Cdcl::new();
        let map = BmcMap::map_timeframes(&nl, 4, &mut solver);
        let steps = unwind::unwind(&nl, &map, &mut solver, true);
        let prop = wrap_always(crate::parse::parse_expr("q != 3").unwrap());
        let lits = unwind::unwind_property(&prop, &nl, &map, &mut solver).unwrap();
        let violated = property::violation_literal(&mut solver, &lits, &steps);
        solver.set_assumptions(&[violated]);
        assert_eq!(solver.solve(), SolveResult::Sat);
        let trace = unwind::compute_trace(&nl, &map, &solver, &lits);
        let sim = Simulator::new(&ts);
        assert!(sim.replay(&trace).unwrap());
    }
}
