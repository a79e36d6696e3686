//! In-tree incremental CDCL engine
//!
//! Conflict-driven clause learning with two-watched-literal propagation,
//! first-UIP learning, and assumption handling in the MiniSat style:
//! assumptions are placed as the first decisions, and when one turns out
//! false the final-conflict analysis yields the subset of assumptions
//! actually responsible — which is what the state-cube lifter reads back
//! through `conflict_contains`.
//!
//! There is no clause deletion, no restart schedule, and no activity
//! heuristic; instances produced by BMC unwindings at the scale this tool
//! targets do not need them, and their absence keeps every `solve()` call
//! deterministic. `set_frozen` is consequently bookkeeping only: nothing is
//! ever simplified away.
//!
//! Invariants relied on throughout:
//! - `lits[0]` of a reason clause is the literal it implied.
//! - A watched literal may only be false if the other watched literal is
//!   true or the clause is on the propagation queue.
//! - Between `solve()` calls the trail holds exactly the level-0 facts.

#![forbid(unsafe_code)]

use tracing::debug;

use crate::solver::{Literal, PropSolver, SolveResult};

#[derive(Debug)]
struct Clause {
    lits: Vec<Literal>,
}

/// Incremental CDCL solver.
pub struct Cdcl {
    num_vars: u32,
    clauses: Vec<Clause>,
    /// watch lists, indexed by literal code
    watches: Vec<Vec<usize>>,
    /// per-variable assignment: 0 unassigned, 1 true, -1 false
    values: Vec<i8>,
    level: Vec<u32>,
    reason: Vec<Option<usize>>,
    seen: Vec<bool>,
    /// true for variables occurring in at least one clause; only these are
    /// branched on, so unconstrained variables stay unassigned in the model
    /// and surface as `x` in traces
    occurs: Vec<bool>,
    trail: Vec<Literal>,
    trail_lim: Vec<usize>,
    qhead: usize,
    assumptions: Vec<Literal>,
    /// final conflict clause after an assumption-driven UNSAT
    conflict: Vec<Literal>,
    model: Vec<i8>,
    frozen: Vec<bool>,
    /// false once the clause set is unsatisfiable regardless of assumptions
    ok: bool,
    stat_conflicts: u64,
    stat_decisions: u64,
    stat_propagations: u64,
}

impl Default for Cdcl {
    fn default() -> Self {
        Cdcl::new()
    }
}

impl Cdcl {
    pub fn new() -> Cdcl {
        Cdcl {
            num_vars: 0,
            clauses: Vec::new(),
            // slots for the reserved constant variable
            watches: vec![Vec::new(), Vec::new()],
            values: vec![1], // constant true
            level: vec![0],
            reason: vec![None],
            seen: vec![false],
            occurs: vec![false],
            trail: Vec::new(),
            trail_lim: Vec::new(),
            qhead: 0,
            assumptions: Vec::new(),
            conflict: Vec::new(),
            model: Vec::new(),
            frozen: vec![false],
            ok: true,
            stat_conflicts: 0,
            stat_decisions: 0,
            stat_propagations: 0,
        }
    }

    #[inline]
    fn lit_value(&self, l: Literal) -> Option<bool> {
        match self.values[l.var() as usize] {
            0 => None,
            v => Some((v > 0) != l.is_negated()),
        }
    }

    #[inline]
    fn decision_level(&self) -> u32 {
        self.trail_lim.len() as u32
    }

    fn new_level(&mut self) {
        self.trail_lim.push(self.trail.len());
    }

    fn unchecked_enqueue(&mut self, l: Literal, reason: Option<usize>) {
        let v = l.var() as usize;
        debug_assert_eq!(self.values[v], 0, "enqueue of assigned variable");
        self.values[v] = if l.is_negated() { -1 } else { 1 };
        self.level[v] = self.decision_level();
        self.reason[v] = reason;
        self.trail.push(l);
    }

    fn cancel_until(&mut self, target: u32) {
        if self.decision_level() <= target {
            return;
        }
        let keep = self.trail_lim[target as usize];
        while self.trail.len() > keep {
            let l = self.trail.pop().unwrap();
            let v = l.var() as usize;
            self.values[v] = 0;
            self.reason[v] = None;
        }
        self.trail_lim.truncate(target as usize);
        self.qhead = self.trail.len();
    }

    fn attach_clause(&mut self, lits: Vec<Literal>) -> usize {
        debug_assert!(lits.len() >= 2);
        let cr = self.clauses.len();
        self.watches[lits[0].code()].push(cr);
        self.watches[lits[1].code()].push(cr);
        for l in &lits {
            self.occurs[l.var() as usize] = true;
        }
        self.clauses.push(Clause { lits });
        cr
    }

    /// Two-watched-literal unit propagation. Returns a conflicting clause.
    fn propagate(&mut self) -> Option<usize> {
        while self.qhead < self.trail.len() {
            let p = self.trail[self.qhead];
            self.qhead += 1;
            self.stat_propagations += 1;
            let fl = !p; // this literal just became false
            let ws = std::mem::take(&mut self.watches[fl.code()]);
            let mut kept: Vec<usize> = Vec::with_capacity(ws.len());
            let mut confl: Option<usize> = None;
            let mut i = 0;
            while i < ws.len() {
                let cr = ws[i];
                i += 1;
                if self.clauses[cr].lits[0] == fl {
                    self.clauses[cr].lits.swap(0, 1);
                }
                let first = self.clauses[cr].lits[0];
                if self.lit_value(first) == Some(true) {
                    kept.push(cr);
                    continue;
                }
                let replacement = self.clauses[cr]
                    .lits
                    .iter()
                    .enumerate()
                    .skip(2)
                    .find(|(_, &q)| self.lit_value(q) != Some(false))
                    .map(|(k, _)| k);
                match replacement {
                    Some(k) => {
                        let c = &mut self.clauses[cr];
                        c.lits.swap(1, k);
                        let nw = c.lits[1];
                        self.watches[nw.code()].push(cr);
                    }
                    None => {
                        kept.push(cr);
                        if self.lit_value(first) == Some(false) {
                            // conflict: keep remaining watches intact, stop
                            kept.extend_from_slice(&ws[i..]);
                            self.qhead = self.trail.len();
                            confl = Some(cr);
                            break;
                        }
                        self.unchecked_enqueue(first, Some(cr));
                    }
                }
            }
            self.watches[fl.code()] = kept;
            if confl.is_some() {
                return confl;
            }
        }
        None
    }

    /// First-UIP conflict analysis. Returns the learnt clause (asserting
    /// literal first, a literal of the backjump level second) and the level
    /// to backtrack to.
    fn analyze(&mut self, mut confl: usize) -> (Vec<Literal>, u32) {
        let mut learnt: Vec<Literal> = vec![Literal::TRUE]; // slot for the asserting literal
        let mut counter = 0usize;
        let mut resolved_on_reason = false;
        let mut idx = self.trail.len();
        let current = self.decision_level();

        loop {
            let start = usize::from(resolved_on_reason);
            // borrow dance: copy the clause tail we look at
            let tail: Vec<Literal> = self.clauses[confl].lits[start..].to_vec();
            for q in tail {
                let v = q.var() as usize;
                if !self.seen[v] && self.level[v] > 0 {
                    self.seen[v] = true;
                    if self.level[v] >= current {
                        counter += 1;
                    } else {
                        learnt.push(q);
                    }
                }
            }
            let pl = loop {
                idx -= 1;
                let l = self.trail[idx];
                if self.seen[l.var() as usize] {
                    break l;
                }
            };
            self.seen[pl.var() as usize] = false;
            counter -= 1;
            if counter == 0 {
                learnt[0] = !pl;
                break;
            }
            confl = self.reason[pl.var() as usize]
                .expect("every non-decision current-level literal has a reason");
            resolved_on_reason = true;
        }

        for l in &learnt[1..] {
            self.seen[l.var() as usize] = false;
        }

        let bt = if learnt.len() == 1 {
            0
        } else {
            let mut max_i = 1;
            for i in 2..learnt.len() {
                if self.level[learnt[i].var() as usize] > self.level[learnt[max_i].var() as usize] {
                    max_i = i;
                }
            }
            learnt.swap(1, max_i);
            self.level[learnt[1].var() as usize]
        };
        (learnt, bt)
    }

    /// Compute the final conflict clause when assumption `a` is found false:
    /// the negations of all assumptions that participate in forcing `¬a`.
    fn analyze_final(&mut self, a: Literal) {
        self.conflict.clear();
        self.conflict.push(!a);
        if self.decision_level() == 0 {
            return;
        }
        self.seen[a.var() as usize] = true;
        for i in (self.trail_lim[0]..self.trail.len()).rev() {
            let x = self.trail[i];
            let v = x.var() as usize;
            if !self.seen[v] {
                continue;
            }
            match self.reason[v] {
                None => {
                    debug_assert!(self.level[v] > 0);
                    self.conflict.push(!x);
                }
                Some(cr) => {
                    let tail: Vec<Literal> = self.clauses[cr].lits[1..].to_vec();
                    for q in tail {
                        if self.level[q.var() as usize] > 0 {
                            self.seen[q.var() as usize] = true;
                        }
                    }
                }
            }
            self.seen[v] = false;
        }
        self.seen[a.var() as usize] = false;
    }

    fn learn(&mut self, learnt: Vec<Literal>) {
        self.stat_conflicts += 1;
        if learnt.len() == 1 {
            self.unchecked_enqueue(learnt[0], None);
        } else {
            let first = learnt[0];
            let cr = self.attach_clause(learnt);
            self.unchecked_enqueue(first, Some(cr));
        }
    }

    fn pick_branch(&mut self) -> Option<Literal> {
        for v in 1..=self.num_vars {
            if self.values[v as usize] == 0 && self.occurs[v as usize] {
                self.stat_decisions += 1;
                return Some(Literal::new(v, true));
            }
        }
        None
    }

    fn search(&mut self) -> SolveResult {
        loop {
            if let Some(confl) = self.propagate() {
                if self.decision_level() == 0 {
                    self.ok = false;
                    self.conflict.clear();
                    return SolveResult::Unsat;
                }
                let (learnt, bt) = self.analyze(confl);
                self.cancel_until(bt);
                self.learn(learnt);
            } else {
                let placed = self.decision_level() as usize;
                if placed < self.assumptions.len() {
                    let a = self.assumptions[placed];
                    match self.lit_value(a) {
                        Some(true) => self.new_level(), // hold the slot
                        Some(false) => {
                            self.analyze_final(a);
                            return SolveResult::Unsat;
                        }
                        None => {
                            self.new_level();
                            self.unchecked_enqueue(a, None);
                        }
                    }
                } else if let Some(next) = self.pick_branch() {
                    self.new_level();
                    self.unchecked_enqueue(next, None);
                } else {
                    self.model = self.values.clone();
                    return SolveResult::Sat;
                }
            }
        }
    }
}

impl PropSolver for Cdcl {
    fn new_variable(&mut self) -> Literal {
        self.num_vars += 1;
        self.values.push(0);
        self.level.push(0);
        self.reason.push(None);
        self.seen.push(false);
        self.occurs.push(false);
        self.frozen.push(false);
        self.watches.push(Vec::new());
        self.watches.push(Vec::new());
        Literal::new(self.num_vars, false)
    }

    fn num_variables(&self) -> u32 {
        self.num_vars
    }

    fn add_clause(&mut self, lits: &[Literal]) {
        if !self.ok {
            return;
        }
        if lits.contains(&Literal::TRUE) {
            return;
        }
        let mut c: Vec<Literal> = lits
            .iter()
            .copied()
            .filter(|l| *l != Literal::FALSE)
            .collect();
        c.sort();
        c.dedup();
        if c.windows(2).any(|w| w[0] == !w[1]) {
            return; // tautology
        }
        // fold in level-0 facts
        let mut out: Vec<Literal> = Vec::with_capacity(c.len());
        for l in c {
            let v = l.var() as usize;
            match self.lit_value(l) {
                Some(true) if self.level[v] == 0 => return, // already satisfied
                Some(false) if self.level[v] == 0 => {}     // permanently false
                _ => out.push(l),
            }
        }
        match out.len() {
            0 => self.ok = false,
            1 => {
                self.occurs[out[0].var() as usize] = true;
                match self.lit_value(out[0]) {
                    None => self.unchecked_enqueue(out[0], None),
                    Some(false) => self.ok = false,
                    Some(true) => {}
                }
            }
            _ => {
                self.attach_clause(out);
            }
        }
    }

    fn set_frozen(&mut self, l: Literal) {
        let v = l.var() as usize;
        if v < self.frozen.len() {
            self.frozen[v] = true;
        }
    }

    fn set_assumptions(&mut self, lits: &[Literal]) {
        self.assumptions = lits.to_vec();
    }

    fn solve(&mut self) -> SolveResult {
        self.model.clear();
        self.conflict.clear();
        if !self.ok {
            return SolveResult::Unsat;
        }
        if self.assumptions.contains(&Literal::FALSE) {
            self.conflict.push(Literal::TRUE);
            return SolveResult::Unsat;
        }
        self.cancel_until(0);
        let result = self.search();
        self.cancel_until(0);
        debug!(
            conflicts = self.stat_conflicts,
            decisions = self.stat_decisions,
            propagations = self.stat_propagations,
            "solve finished"
        );
        result
    }

    fn model_value(&self, l: Literal) -> Option<bool> {
        if l.is_constant() {
            return Some(l == Literal::TRUE);
        }
        match self.model.get(l.var() as usize) {
            None | Some(0) => None,
            Some(v) => Some((*v > 0) != l.is_negated()),
        }
    }

    fn conflict_contains(&self, l: Literal) -> bool {
        self.conflict.contains(&l)
    }

    fn solver_text(&self) -> &'static str {
        "built-in CDCL"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(s: &mut Cdcl, n: usize) -> Vec<Literal> {
        (0..n).map(|_| s.new_variable()).collect()
    }

    #[test]
    fn empty_instance_is_sat() {
        let mut s = Cdcl::new();
        assert_eq!(s.solve(), SolveResult::Sat);
    }

    #[test]
    fn unit_propagation_chain() {
        let mut s = Cdcl::new();
        let v = vars(&mut s, 4);
        s.add_clause(&[v[0]]);
        s.add_clause(&[!v[0], v[1]]);
        s.add_clause(&[!v[1], v[2]]);
        s.add_clause(&[!v[2], v[3]]);
        assert_eq!(s.solve(), SolveResult::Sat);
        for l in &v {
            assert_eq!(s.model_value(*l), Some(true));
        }
    }

    #[test]
    fn contradictory_units_are_unsat() {
        let mut s = Cdcl::new();
        let v = vars(&mut s, 1);
        s.add_clause(&[v[0]]);
        s.add_clause(&[!v[0]]);
        assert_eq!(s.solve(), SolveResult::Unsat);
        // unsat without assumptions: solver is dead for good
        assert_eq!(s.solve(), SolveResult::Unsat);
    }

    #[test]
    fn requires_search_not_just_propagation() {
        // (a ∨ b) ∧ (¬a ∨ b) ∧ (a ∨ ¬b) — forces a = b = true
        let mut s = Cdcl::new();
        let v = vars(&mut s, 2);
        s.add_clause(&[v[0], v[1]]);
        s.add_clause(&[!v[0], v[1]]);
        s.add_clause(&[v[0], !v[1]]);
        assert_eq!(s.solve(), SolveResult::Sat);
        assert_eq!(s.model_value(v[0]), Some(true));
        assert_eq!(s.model_value(v[1]), Some(true));
    }

    #[test]
    fn pigeonhole_three_into_two_is_unsat() {
        // p[i][j]: pigeon i sits in hole j
        let mut s = Cdcl::new();
        let mut p = [[Literal::TRUE; 2]; 3];
        for row in &mut p {
            for slot in row.iter_mut() {
                *slot = s.new_variable();
            }
        }
        for row in &p {
            s.add_clause(&[row[0], row[1]]);
        }
        for j in 0..2 {
            for i1 in 0..3 {
                for i2 in (i1 + 1)..3 {
                    s.add_clause(&[!p[i1][j], !p[i2][j]]);
                }
            }
        }
        assert_eq!(s.solve(), SolveResult::Unsat);
    }

    #[test]
    fn assumptions_scope_per_call() {
        let mut s = Cdcl::new();
        let v = vars(&mut s, 2);
        s.add_clause(&[!v[0], v[1]]);
        s.set_assumptions(&[v[0], !v[1]]);
        assert_eq!(s.solve(), SolveResult::Unsat);
        // same clauses, different assumptions: satisfiable again
        s.set_assumptions(&[v[0]]);
        assert_eq!(s.solve(), SolveResult::Sat);
        assert_eq!(s.model_value(v[1]), Some(true));
        // no assumptions at all
        s.set_assumptions(&[]);
        assert_eq!(s.solve(), SolveResult::Sat);
    }

    #[test]
    fn final_conflict_names_responsible_assumptions() {
        let mut s = Cdcl::new();
        let v = vars(&mut s, 4);
        // v0 ∧ v1 → ⊥, v2/v3 unrelated
        s.add_clause(&[!v[0], !v[1]]);
        s.set_assumptions(&[v[2], v[0], v[3], v[1]]);
        assert_eq!(s.solve(), SolveResult::Unsat);
        assert!(s.conflict_contains(!v[0]));
        assert!(s.conflict_contains(!v[1]));
        assert!(!s.conflict_contains(!v[2]));
        assert!(!s.conflict_contains(!v[3]));
    }

    #[test]
    fn unconstrained_variables_stay_unassigned_in_model() {
        let mut s = Cdcl::new();
        let v = vars(&mut s, 2);
        s.add_clause(&[v[0]]);
        // v1 appears in no clause and must not be invented by the model
        assert_eq!(s.solve(), SolveResult::Sat);
        assert_eq!(s.model_value(v[0]), Some(true));
        assert_eq!(s.model_value(v[1]), None);
    }

    #[test]
    fn incremental_clause_addition_after_solve() {
        let mut s = Cdcl::new();
        let v = vars(&mut s, 2);
        s.add_clause(&[v[0], v[1]]);
        assert_eq!(s.solve(), SolveResult::Sat);
        s.add_clause(&[!v[0]]);
        s.add_clause(&[!v[1]]);
        assert_eq!(s.solve(), SolveResult::Unsat);
    }

    #[test]
    fn gate_primitives_respect_semantics() {
        let mut s = Cdcl::new();
        let v = vars(&mut s, 2);
        let and = s.land2(v[0], v[1]);
        let xor = s.lxor2(v[0], v[1]);
        s.set_assumptions(&[v[0], v[1]]);
        assert_eq!(s.solve(), SolveResult::Sat);
        assert_eq!(s.model_value(and), Some(true));
        assert_eq!(s.model_value(xor), Some(false));
        s.set_assumptions(&[v[0], !v[1]]);
        assert_eq!(s.solve(), SolveResult::Sat);
        assert_eq!(s.model_value(and), Some(false));
        assert_eq!(s.model_value(xor), Some(true));
    }
}
