//! Gate-level netlist
//!
//! An AND-inverter arena with designated input nodes, plus the variable map
//! that ties HDL bits to literals. Nodes are dense indices; a [`Literal`]
//! addressing node `v` with a sign is exactly the same packed encoding the
//! solvers use, so time-frame translation later is a single array lookup.
//!
//! The builder turns a transition system into:
//! - one input node per state/input bit (the *current*-frame literal),
//! - gate cones for every latch's next-state function and every wire,
//! - `initial` literals (hold in frame 0) and `transition` literals
//!   (hold in every frame).
//!
//! Invariant: a latch's next-frame literal is a cone over current-frame
//! literals and primary inputs only; no cross-frame edge exists inside one
//! frame. `next(…)` on non-state variables is rejected here (the word-level
//! path accepts it).

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::info;

use crate::bv::{self, GateOps, LowerEnv, LowerError};
use crate::expr::{BinOp, Expr, Sort};
use crate::solver::Literal;
use crate::symtab::{SymbolTable, VarKind};
use crate::trans::{TransError, TransitionSystem};

/// Netlist construction failure.
#[derive(Debug, thiserror::Error)]
pub enum NetlistError {
    #[error(transparent)]
    Trans(#[from] TransError),
    #[error(transparent)]
    Lower(#[from] LowerError),
}

/// One arena node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetNode {
    /// Node 0: constant true.
    True,
    /// Primary input: a state bit's current value, an input bit, or a free
    /// (undriven) latch/wire bit.
    Input,
    /// AND gate over two fanin literals.
    And(Literal, Literal),
}

/// Per-bit literal pair. For latches `current` and `next` differ; for
/// inputs and wires only `current` is meaningful and `next` repeats it.
#[derive(Debug, Clone, Copy)]
pub struct BitMap {
    pub current: Literal,
    pub next: Literal,
}

/// Variable-map entry for one HDL variable.
#[derive(Debug, Clone)]
pub struct MapEntry {
    pub kind: VarKind,
    pub sort: Sort,
    pub bits: Vec<BitMap>,
}

impl MapEntry {
    pub fn is_latch(&self) -> bool {
        self.kind == VarKind::State
    }
}

/// One latch bit: the input node holding its current value and the literal
/// defining its next value.
#[derive(Debug, Clone)]
pub struct LatchBit {
    pub name: String,
    pub bit: usize,
    /// Node index of the current-value input node.
    pub var: u32,
    pub next: Literal,
}

/// Mapping from (variable, bit) to literals, plus the latch list.
#[derive(Debug, Default, Clone)]
pub struct VarMap {
    pub map: BTreeMap<String, MapEntry>,
    pub latches: Vec<LatchBit>,
}

impl VarMap {
    pub fn entry(&self, name: &str) -> Option<&MapEntry> {
        self.map.get(name)
    }

    /// Dump for `--show-varmap`.
    pub fn output(&self, out: &mut impl std::io::Write) -> std::io::Result<()> {
        for (name, entry) in &self.map {
            writeln!(out, "{name}: {} {}", entry.kind, entry.sort)?;
            for (i, bit) in entry.bits.iter().enumerate() {
                if entry.is_latch() {
                    writeln!(
                        out,
                        "  bit {i}: current {:?}, next {:?}",
                        bit.current, bit.next
                    )?;
                } else {
                    writeln!(out, "  bit {i}: {:?}", bit.current)?;
                }
            }
        }
        Ok(())
    }
}

/// The netlist proper.
#[derive(Debug, Clone)]
pub struct Netlist {
    nodes: Vec<NetNode>,
    /// structural hashing of AND gates
    strash: HashMap<(usize, usize), Literal>,
    pub var_map: VarMap,
    /// Literals that must hold in frame 0.
    pub initial: Vec<Literal>,
    /// Literals that must hold in every frame.
    pub transition: Vec<Literal>,
}

impl Netlist {
    fn empty() -> Netlist {
        Netlist {
            nodes: vec![NetNode::True],
            strash: HashMap::new(),
            var_map: VarMap::default(),
            initial: Vec::new(),
            transition: Vec::new(),
        }
    }

    /// Allocate a fresh primary input node.
    pub fn new_input(&mut self) -> Literal {
        let var = self.nodes.len() as u32;
        self.nodes.push(NetNode::Input);
        Literal::new(var, false)
    }

    pub fn node(&self, var: u32) -> NetNode {
        self.nodes[var as usize]
    }

    pub fn number_of_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Iterate `(node index, node)` pairs, constant first.
    pub fn nodes(&self) -> impl Iterator<Item = (u32, NetNode)> + '_ {
        self.nodes.iter().enumerate().map(|(i, n)| (i as u32, *n))
    }

    fn lit_name(l: Literal) -> String {
        if l == Literal::TRUE {
            "1".to_string()
        } else if l == Literal::FALSE {
            "0".to_string()
        } else if l.is_negated() {
            format!("!n{}", l.var())
        } else {
            format!("n{}", l.var())
        }
    }

    /// Plain-text dump for `--show-netlist`.
    pub fn print(&self, out: &mut impl std::io::Write) -> std::io::Result<()> {
        for (i, node) in self.nodes() {
            match node {
                NetNode::True => writeln!(out, "n{i} = TRUE")?,
                NetNode::Input => writeln!(out, "n{i} = input")?,
                NetNode::And(a, b) => writeln!(
                    out,
                    "n{i} = AND({}, {})",
                    Netlist::lit_name(a),
                    Netlist::lit_name(b)
                )?,
            }
        }
        for l in &self.var_map.latches {
            writeln!(
                out,
                "latch {}[{}]: current n{}, next {}",
                l.name,
                l.bit,
                l.var,
                Netlist::lit_name(l.next)
            )?;
        }
        for l in &self.initial {
            writeln!(out, "init {}", Netlist::lit_name(*l))?;
        }
        for l in &self.transition {
            writeln!(out, "trans {}", Netlist::lit_name(*l))?;
        }
        Ok(())
    }

    /// SMV rendition for `--smv-netlist`.
    pub fn output_smv(&self, out: &mut impl std::io::Write) -> std::io::Result<()> {
        writeln!(out, "MODULE main")?;
        for (i, node) in self.nodes() {
            if node == NetNode::Input {
                writeln!(out, "VAR n{i} : boolean;")?;
            }
        }
        for (i, node) in self.nodes() {
            if let NetNode::And(a, b) = node {
                writeln!(
                    out,
                    "DEFINE n{i} := {} & {};",
                    Netlist::lit_name(a),
                    Netlist::lit_name(b)
                )?;
            }
        }
        for l in &self.var_map.latches {
            writeln!(out, "ASSIGN next(n{}) := {};", l.var, Netlist::lit_name(l.next))?;
        }
        for l in &self.initial {
            writeln!(out, "INIT {}", Netlist::lit_name(*l))?;
        }
        for l in &self.transition {
            writeln!(out, "TRANS {}", Netlist::lit_name(*l))?;
        }
        Ok(())
    }

    /// DOT body for `--dot-netlist`; the caller wraps it in `digraph`.
    pub fn output_dot(&self, out: &mut impl std::io::Write) -> std::io::Result<()> {
        for (i, node) in self.nodes() {
            match node {
                NetNode::True => {}
                NetNode::Input => writeln!(out, "  n{i} [shape=box];")?,
                NetNode::And(a, b) => {
                    for fanin in [a, b] {
                        let style = if fanin.is_negated() {
                            " [style=dashed]"
                        } else {
                            ""
                        };
                        writeln!(out, "  n{} -> n{i}{style};", fanin.var())?;
                    }
                }
            }
        }
        for l in &self.var_map.latches {
            writeln!(out, "  n{} -> n{} [label=\"latch\"];", l.next.var(), l.var)?;
        }
        Ok(())
    }
}

impl GateOps for Netlist {
    fn and2(&mut self, a: Literal, b: Literal) -> Literal {
        if a == Literal::FALSE || b == Literal::FALSE || a == !b {
            return Literal::FALSE;
        }
        if a == Literal::TRUE {
            return b;
        }
        if b == Literal::TRUE || a == b {
            return a;
        }
        let key = if a.code() <= b.code() {
            (a.code(), b.code())
        } else {
            (b.code(), a.code())
        };
        if let Some(&l) = self.strash.get(&key) {
            return l;
        }
        let var = self.nodes.len() as u32;
        self.nodes.push(NetNode::And(a, b));
        let l = Literal::new(var, false);
        self.strash.insert(key, l);
        l
    }

    fn xor2(&mut self, a: Literal, b: Literal) -> Literal {
        let p = self.and2(a, !b);
        let q = self.and2(!a, b);
        self.or2(p, q)
    }
}

// ============================================================================
// Builder
// ============================================================================

struct Builder<'a> {
    ts: &'a TransitionSystem,
    nl: Netlist,
    current: HashMap<String, Vec<Literal>>,
    next_defs: HashMap<String, Vec<Literal>>,
    in_progress: HashSet<String>,
    allow_next: bool,
}

impl GateOps for Builder<'_> {
    fn and2(&mut self, a: Literal, b: Literal) -> Literal {
        self.nl.and2(a, b)
    }
    fn xor2(&mut self, a: Literal, b: Literal) -> Literal {
        self.nl.xor2(a, b)
    }
}

impl LowerEnv for Builder<'_> {
    fn bits(&mut self, name: &str, next: bool) -> Result<Vec<Literal>, LowerError> {
        if next {
            if !self.allow_next {
                return Err(LowerError::NextUnavailable(name.to_string()));
            }
            // only latches carry a next-frame literal
            return self
                .next_defs
                .get(name)
                .cloned()
                .ok_or_else(|| LowerError::NextUnavailable(name.to_string()));
        }
        if let Some(bits) = self.current.get(name) {
            return Ok(bits.clone());
        }
        let ts = self.ts;
        let decl = ts
            .var(name)
            .ok_or_else(|| LowerError::UnmappedVariable(name.to_string()))?;
        if decl.kind != VarKind::Wire {
            return Err(LowerError::UnmappedVariable(name.to_string()));
        }
        if self.in_progress.contains(name) {
            return Err(LowerError::CombinationalCycle(name.to_string()));
        }
        let bits = match ts.assign_of(name) {
            Some(rhs) => {
                self.in_progress.insert(name.to_string());
                let bits = bv::lower_vec(self, rhs)?;
                self.in_progress.remove(name);
                bits
            }
            // undriven wire: free in every frame
            None => (0..decl.sort.width())
                .map(|_| self.nl.new_input())
                .collect(),
        };
        self.current.insert(name.to_string(), bits.clone());
        Ok(bits)
    }
}

/// Recognize a definitional conjunct `next(x) == rhs` (either orientation)
/// where `rhs` does not itself refer to the next frame.
fn as_next_def(e: &Expr) -> Option<(&str, &Expr)> {
    if let Expr::Bin(BinOp::Eq, a, b) = e {
        if let Expr::Next(x) = a.as_ref() {
            if !b.has_next() {
                return Some((x, b));
            }
        }
        if let Expr::Next(x) = b.as_ref() {
            if !a.has_next() {
                return Some((x, a));
            }
        }
    }
    None
}

/// Compile the transition system of `top` into a netlist.
pub fn build(symtab: &SymbolTable, top: &str) -> Result<Netlist, NetlistError> {
    let ts = TransitionSystem::extract(symtab, top)?;
    build_from(&ts)
}

/// Compile an (already reset-amended) transition system into a netlist.
pub fn build_from(ts: &TransitionSystem) -> Result<Netlist, NetlistError> {
    let mut b = Builder {
        ts,
        nl: Netlist::empty(),
        current: HashMap::new(),
        next_defs: HashMap::new(),
        in_progress: HashSet::new(),
        allow_next: false,
    };

    // current-frame input nodes for every state and input bit
    for v in &ts.vars {
        if matches!(v.kind, VarKind::State | VarKind::Input) {
            let bits: Vec<Literal> = (0..v.sort.width()).map(|_| b.nl.new_input()).collect();
            b.current.insert(v.name.clone(), bits);
        }
    }

    // definitional conjuncts first: they provide the latches' next functions
    let conjuncts = ts.trans.conjuncts();
    let mut constraints: Vec<&Expr> = Vec::new();
    for c in conjuncts {
        if let Some((x, rhs)) = as_next_def(c) {
            let is_state = ts.var(x).map(|v| v.kind == VarKind::State).unwrap_or(false);
            if is_state && !b.next_defs.contains_key(x) {
                let bits = bv::lower_vec(&mut b, rhs)?;
                b.next_defs.insert(x.to_string(), bits);
                continue;
            }
        }
        constraints.push(c);
    }

    // a latch without a definitional conjunct is free
    for v in ts.state_vars() {
        if !b.next_defs.contains_key(&v.name) {
            let bits: Vec<Literal> = (0..v.sort.width()).map(|_| b.nl.new_input()).collect();
            b.next_defs.insert(v.name.clone(), bits);
        }
    }

    // remaining conjuncts constrain every frame
    b.allow_next = true;
    for c in constraints {
        let l = bv::lower_bool(&mut b, c)?;
        b.nl.transition.push(l);
    }
    b.allow_next = false;

    // initial-state literals
    for c in ts.init.conjuncts() {
        let l = bv::lower_bool(&mut b, c)?;
        b.nl.initial.push(l);
    }

    // force evaluation of every declared wire so the map is complete
    for v in &ts.vars {
        if v.kind == VarKind::Wire {
            b.bits(&v.name, false)?;
        }
    }

    // assemble the variable map
    let mut nl = b.nl;
    for v in &ts.vars {
        let current = &b.current[&v.name];
        let mut bits = Vec::with_capacity(current.len());
        for (i, &cur) in current.iter().enumerate() {
            let next = match v.kind {
                VarKind::State => b.next_defs[&v.name][i],
                _ => cur,
            };
            bits.push(BitMap { current: cur, next });
            if v.kind == VarKind::State {
                nl.var_map.latches.push(LatchBit {
                    name: v.name.clone(),
                    bit: i,
                    var: cur.var(),
                    next,
                });
            }
        }
        nl.var_map.map.insert(
            v.name.clone(),
            MapEntry {
                kind: v.kind,
                sort: v.sort,
                bits,
            },
        );
    }

    info!(
        "Latches: {}, nodes: {}",
        nl.var_map.latches.len(),
        nl.number_of_nodes()
    );
    Ok(nl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::typecheck;
    use crate::parse::parse_modules;

    fn netlist_of(src: &str) -> Result<Netlist, NetlistError> {
        let mut st = SymbolTable {
            modules: parse_modules(src).unwrap(),
        };
        typecheck(&mut st).unwrap();
        build(&st, "main")
    }

    #[test]
    fn counter_has_two_latches() {
        let nl = netlist_of(
            "module main;
               state q : bv[2];
               init q == 0;
               trans next(q) == q + 1;
             endmodule",
        )
        .unwrap();
        assert_eq!(nl.var_map.latches.len(), 2);
        assert_eq!(nl.initial.len(), 1);
        assert!(nl.transition.is_empty());
        let entry = nl.var_map.entry("q").unwrap();
        assert!(entry.is_latch());
        // latch next cones must not be trivially the current value
        assert_ne!(entry.bits[0].current, entry.bits[0].next);
    }

    #[test]
    fn free_latch_gets_fresh_inputs() {
        // `trans true;` constrains nothing: the latch has no definitional
        // conjunct and its next state is free
        let nl = netlist_of(
            "module main;
               state q : bv[1];
               init q == 0;
               trans true;
             endmodule",
        )
        .unwrap();
        let entry = nl.var_map.entry("q").unwrap();
        assert_ne!(entry.bits[0].current.var(), entry.bits[0].next.var());
        assert_eq!(nl.node(entry.bits[0].next.var()), NetNode::Input);
    }

    #[test]
    fn combinational_cycle_is_detected() {
        let err = netlist_of(
            "module main;
               wire a : bool;
               wire b : bool;
               assign a = b;
               assign b = a;
               trans true;
             endmodule",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            NetlistError::Lower(LowerError::CombinationalCycle(_))
        ));
    }

    #[test]
    fn non_definitional_conjunct_becomes_transition_constraint() {
        let nl = netlist_of(
            "module main;
               state q : bv[2];
               init q == 0;
               trans next(q) == q + 1;
               trans q != 2;
             endmodule",
        )
        .unwrap();
        assert_eq!(nl.transition.len(), 1);
    }

    #[test]
    fn next_on_input_is_rejected() {
        let err = netlist_of(
            "module main;
               state q : bv[1];
               input i : bv[1];
               trans next(q) == q;
               trans next(i) == 0;
             endmodule",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            NetlistError::Lower(LowerError::NextUnavailable(_))
        ));
    }

    #[test]
    fn structural_hashing_shares_gates() {
        let mut nl = Netlist::empty();
        let a = nl.new_input();
        let b = nl.new_input();
        let g1 = nl.and2(a, b);
        let g2 = nl.and2(b, a);
        assert_eq!(g1, g2);
        assert_eq!(nl.number_of_nodes(), 4); // TRUE + 2 inputs + 1 gate
    }

    #[test]
    fn dumps_do_not_panic_and_mention_nodes() {
        let nl = netlist_of(
            "module main;
               state q : bv[2];
               input i : bv[1];
               wire  w : bool;
               assign w = q == 3;
               init q == 0;
               trans next(q) == q + 1;
               property p: always !w;
             endmodule",
        )
        .unwrap();
        let mut text = Vec::new();
        nl.print(&mut text).unwrap();
        assert!(String::from_utf8(text).unwrap().contains("latch q[0]"));
        let mut smv = Vec::new();
        nl.output_smv(&mut smv).unwrap();
        assert!(String::from_utf8(smv).unwrap().starts_with("MODULE main"));
        let mut dot = Vec::new();
        nl.output_dot(&mut dot).unwrap();
        assert!(String::from_utf8(dot).unwrap().contains("->"));
    }
}
