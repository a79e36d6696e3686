//! Latch dependency graph and recurrence-diameter bound
//!
//! Nodes are latch bits; an edge u → v says latch u lies in the
//! combinational support of latch v's next-state function. `show-ldg` dumps
//! the graph; `compute-ct` condenses it into strongly connected components
//! and returns a structural upper bound on the recurrence diameter: an SCC
//! of n latches can distinguish at most 2^n states, so it contributes
//! 2^n − 1 steps, and contributions add up along condensation paths.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Write};

use crate::netlist::{NetNode, Netlist};
use crate::solver::Literal;

/// One latch-bit node with its dependencies.
#[derive(Debug, Clone)]
pub struct LdgNode {
    pub name: String,
    pub bit: usize,
    /// Latch vars feeding this latch's next-state cone.
    pub in_edges: Vec<u32>,
    /// Latches whose next-state cone this latch feeds.
    pub out_edges: Vec<u32>,
}

/// The dependency graph, keyed by the latch's current-value node index.
#[derive(Debug, Default, Clone)]
pub struct Ldg {
    pub nodes: BTreeMap<u32, LdgNode>,
}

impl Ldg {
    /// Build the graph from a netlist by walking each latch's support cone.
    pub fn compute(netlist: &Netlist) -> Ldg {
        let latch_vars: HashSet<u32> = netlist.var_map.latches.iter().map(|l| l.var).collect();

        let mut ldg = Ldg::default();
        for latch in &netlist.var_map.latches {
            ldg.nodes.insert(
                latch.var,
                LdgNode {
                    name: latch.name.clone(),
                    bit: latch.bit,
                    in_edges: Vec::new(),
                    out_edges: Vec::new(),
                },
            );
        }

        for latch in &netlist.var_map.latches {
            let support = support_cone(netlist, latch.next, &latch_vars);
            for u in support {
                if !ldg.nodes[&latch.var].in_edges.contains(&u) {
                    ldg.nodes.get_mut(&latch.var).unwrap().in_edges.push(u);
                    ldg.nodes.get_mut(&u).unwrap().out_edges.push(latch.var);
                }
            }
        }
        ldg
    }

    /// Textual dump for `show-ldg`.
    pub fn show(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "Latch dependencies:")?;
        for (var, node) in &self.nodes {
            write!(out, "  {}[{}] = {var}:", node.name, node.bit)?;
            for u in &node.in_edges {
                write!(out, " {u}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Structural upper bound on the recurrence diameter.
    pub fn compute_ct(&self) -> u64 {
        let sccs = self.tarjan();
        // map node → SCC index
        let mut scc_of: HashMap<u32, usize> = HashMap::new();
        for (i, scc) in sccs.iter().enumerate() {
            for &v in scc {
                scc_of.insert(v, i);
            }
        }
        let weight = |scc: &[u32]| -> u64 {
            if scc.len() >= 64 {
                u64::MAX
            } else {
                (1u64 << scc.len()) - 1
            }
        };
        // Tarjan emits an SCC only after every SCC it reaches, so a single
        // pass in emission order sees all successors resolved
        let mut dp: Vec<u64> = vec![0; sccs.len()];
        let mut best = 0u64;
        for (i, scc) in sccs.iter().enumerate() {
            let mut longest_succ = 0u64;
            for &v in scc {
                for &w in &self.nodes[&v].out_edges {
                    let j = scc_of[&w];
                    if j != i {
                        longest_succ = longest_succ.max(dp[j]);
                    }
                }
            }
            dp[i] = weight(scc).saturating_add(longest_succ);
            best = best.max(dp[i]);
        }
        best
    }

    /// Iterative Tarjan SCC decomposition (successor SCCs emitted first).
    fn tarjan(&self) -> Vec<Vec<u32>> {
        let mut index: HashMap<u32, u32> = HashMap::new();
        let mut low: HashMap<u32, u32> = HashMap::new();
        let mut on_stack: HashSet<u32> = HashSet::new();
        let mut stack: Vec<u32> = Vec::new();
        let mut next_index: u32 = 0;
        let mut sccs: Vec<Vec<u32>> = Vec::new();

        for &root in self.nodes.keys() {
            if index.contains_key(&root) {
                continue;
            }
            let mut call: Vec<(u32, usize)> = vec![(root, 0)];
            index.insert(root, next_index);
            low.insert(root, next_index);
            next_index += 1;
            stack.push(root);
            on_stack.insert(root);

            while !call.is_empty() {
                let (v, child) = *call.last().unwrap();
                let succs = &self.nodes[&v].out_edges;
                if child < succs.len() {
                    let w = succs[child];
                    call.last_mut().unwrap().1 += 1;
                    if !index.contains_key(&w) {
                        index.insert(w, next_index);
                        low.insert(w, next_index);
                        next_index += 1;
                        stack.push(w);
                        on_stack.insert(w);
                        call.push((w, 0));
                    } else if on_stack.contains(&w) {
                        let lw = index[&w];
                        let lv = low[&v];
                        low.insert(v, lv.min(lw));
                    }
                } else {
                    call.pop();
                    if let Some(&(parent, _)) = call.last() {
                        let lv = low[&v];
                        let lp = low[&parent];
                        low.insert(parent, lp.min(lv));
                    }
                    if low[&v] == index[&v] {
                        let mut scc = Vec::new();
                        loop {
                            let w = stack.pop().unwrap();
                            on_stack.remove(&w);
                            scc.push(w);
                            if w == v {
                                break;
                            }
                        }
                        sccs.push(scc);
                    }
                }
            }
        }
        sccs
    }
}

/// Latch vars in the combinational support of a literal's cone.
fn support_cone(netlist: &Netlist, root: Literal, latch_vars: &HashSet<u32>) -> Vec<u32> {
    let mut seen: HashSet<u32> = HashSet::new();
    let mut out = Vec::new();
    let mut todo = vec![root.var()];
    while let Some(v) = todo.pop() {
        if !seen.insert(v) {
            continue;
        }
        match netlist.node(v) {
            NetNode::True => {}
            NetNode::Input => {
                if latch_vars.contains(&v) {
                    out.push(v);
                }
            }
            NetNode::And(a, b) => {
                todo.push(a.var());
                todo.push(b.var());
            }
        }
    }
    out.sort_unstable();
    out
}
