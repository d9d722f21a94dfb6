//! Graph topology analysis using CSR format.
//!
//! [`GraphTopology`] is a snapshot of a genome's connection graph in
//! Compressed Sparse Row form, with forward and reverse adjacency. Node keys
//! (including the negative input pins) are mapped to dense indices once, so
//! the traversals below run over flat slices instead of rescanning the
//! connection list for every step.
//!
//! ## Determinism
//!
//! Edges are inserted in connection-key order, so successor and predecessor
//! iteration, and therefore layer contents, do not depend on mutation
//! history. Nodes inside a layer are sorted by key.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::gene::NodeKey;
use crate::genome::Genome;

/// CSR-format graph topology for efficient graph algorithms.
#[derive(Debug, Clone)]
pub struct GraphTopology {
    /// Maps a node key to its dense index (0..node_count).
    node_to_idx: HashMap<NodeKey, usize>,
    /// Maps dense index back to the node key.
    idx_to_node: Vec<NodeKey>,
    /// CSR offsets for forward edges (outgoing). Length = node_count + 1.
    fwd_offsets: Vec<usize>,
    /// fwd_targets[fwd_offsets[i]..fwd_offsets[i+1]] are successors of node i.
    fwd_targets: Vec<usize>,
    /// CSR offsets for reverse edges (incoming). Length = node_count + 1.
    rev_offsets: Vec<usize>,
    /// rev_sources[rev_offsets[i]..rev_offsets[i+1]] are predecessors of node i.
    rev_sources: Vec<usize>,
}

impl GraphTopology {
    /// Build a topology from a node list and `(from, to)` edges.
    ///
    /// Edge endpoints missing from `nodes` are added as nodes.
    #[must_use]
    pub fn from_edges<N, E>(nodes: N, edges: E) -> Self
    where
        N: IntoIterator<Item = NodeKey>,
        E: IntoIterator<Item = (NodeKey, NodeKey)>,
    {
        let mut node_to_idx: HashMap<NodeKey, usize> = HashMap::new();
        let mut idx_to_node: Vec<NodeKey> = Vec::new();
        let mut intern = |key: NodeKey| -> usize {
            *node_to_idx.entry(key).or_insert_with(|| {
                idx_to_node.push(key);
                idx_to_node.len() - 1
            })
        };

        for key in nodes {
            intern(key);
        }
        let edges: Vec<(usize, usize)> = edges
            .into_iter()
            .map(|(from, to)| (intern(from), intern(to)))
            .collect();

        let node_count = idx_to_node.len();
        let (fwd_offsets, fwd_targets) = build_csr(node_count, edges.iter().copied());
        let (rev_offsets, rev_sources) =
            build_csr(node_count, edges.iter().map(|&(from, to)| (to, from)));

        Self {
            node_to_idx,
            idx_to_node,
            fwd_offsets,
            fwd_targets,
            rev_offsets,
            rev_sources,
        }
    }

    /// Topology of a genome's enabled connections: the graph the phenotype
    /// compiler and the acyclicity invariant are about.
    #[must_use]
    pub fn enabled(genome: &Genome) -> Self {
        Self::from_genome(genome, true)
    }

    /// Topology of every connection gene, enabled or not.
    ///
    /// Structural mutations check cycles against this graph so that a later
    /// enable toggle can never close a loop.
    #[must_use]
    pub fn all_edges(genome: &Genome) -> Self {
        Self::from_genome(genome, false)
    }

    fn from_genome(genome: &Genome, enabled_only: bool) -> Self {
        let mut connections: Vec<_> = genome
            .connection_genes
            .iter()
            .filter(|c| c.enabled || !enabled_only)
            .collect();
        connections.sort_by_key(|c| c.key);

        let nodes = genome
            .input_pins
            .iter()
            .copied()
            .chain(genome.node_genes.iter().map(|n| n.key));
        Self::from_edges(nodes, connections.iter().map(|c| (c.from_node, c.to_node)))
    }

    /// Get the dense index for a node key.
    #[inline]
    #[must_use]
    pub fn node_index(&self, key: NodeKey) -> Option<usize> {
        self.node_to_idx.get(&key).copied()
    }

    /// Get the node key for a dense index.
    #[inline]
    #[must_use]
    pub fn node_key(&self, idx: usize) -> Option<NodeKey> {
        self.idx_to_node.get(idx).copied()
    }

    /// Number of nodes in the topology.
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.idx_to_node.len()
    }

    /// Number of edges in the topology.
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.fwd_targets.len()
    }

    /// Iterate over successors of a node (forward edges).
    #[inline]
    pub fn successors(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.fwd_targets[self.fwd_offsets[idx]..self.fwd_offsets[idx + 1]]
            .iter()
            .copied()
    }

    /// Iterate over predecessors of a node (reverse edges).
    #[inline]
    pub fn predecessors(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.rev_sources[self.rev_offsets[idx]..self.rev_offsets[idx + 1]]
            .iter()
            .copied()
    }

    /// Check if adding edge `from -> to` would create a cycle.
    ///
    /// Runs a forward BFS from `to`; the edge closes a loop iff `from` is
    /// reachable. A self-loop always counts as a cycle.
    #[must_use]
    pub fn would_create_cycle(&self, from: NodeKey, to: NodeKey) -> bool {
        if from == to {
            return true;
        }
        let (Some(from_idx), Some(to_idx)) = (self.node_index(from), self.node_index(to)) else {
            return false;
        };

        let mut visited = vec![false; self.node_count()];
        let mut queue = VecDeque::new();
        queue.push_back(to_idx);
        visited[to_idx] = true;

        while let Some(current) = queue.pop_front() {
            for succ in self.successors(current) {
                if succ == from_idx {
                    return true;
                }
                if !visited[succ] {
                    visited[succ] = true;
                    queue.push_back(succ);
                }
            }
        }

        false
    }

    /// Detect if the graph contains any cycle using Kahn's algorithm.
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        self.topological_order().is_none()
    }

    /// Node keys in topological order, or `None` if the graph has a cycle.
    #[must_use]
    pub fn topological_order(&self) -> Option<Vec<NodeKey>> {
        let n = self.node_count();
        let mut in_degree: Vec<usize> = (0..n)
            .map(|idx| self.rev_offsets[idx + 1] - self.rev_offsets[idx])
            .collect();

        let mut queue: VecDeque<usize> = (0..n).filter(|&idx| in_degree[idx] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(u) = queue.pop_front() {
            order.push(self.idx_to_node[u]);
            for v in self.successors(u) {
                in_degree[v] -= 1;
                if in_degree[v] == 0 {
                    queue.push_back(v);
                }
            }
        }

        (order.len() == n).then_some(order)
    }

    /// Nodes whose value can influence some output.
    ///
    /// Starts from the outputs and walks edges backwards, never through an
    /// input pin. The outputs are always part of the result; inputs never
    /// are.
    #[must_use]
    pub fn required_for_output(&self, inputs: &[NodeKey], outputs: &[NodeKey]) -> HashSet<NodeKey> {
        let input_set: HashSet<NodeKey> = inputs.iter().copied().collect();
        let mut required: HashSet<NodeKey> = outputs.iter().copied().collect();
        let mut queue: VecDeque<usize> = outputs
            .iter()
            .filter_map(|&key| self.node_index(key))
            .collect();

        while let Some(idx) = queue.pop_front() {
            for pred in self.predecessors(idx) {
                let key = self.idx_to_node[pred];
                if !input_set.contains(&key) && required.insert(key) {
                    queue.push_back(pred);
                }
            }
        }

        required
    }

    /// Partition the required nodes into evaluation layers.
    ///
    /// A node joins a layer once every one of its predecessors is an input
    /// or sits in an earlier layer. Required nodes that never get there (an
    /// unconnected feeder, a cycle) are left out of every layer.
    #[must_use]
    pub fn feed_forward_layers(&self, inputs: &[NodeKey], outputs: &[NodeKey]) -> Vec<Vec<NodeKey>> {
        let required = self.required_for_output(inputs, outputs);
        let n = self.node_count();

        let mut in_frontier = vec![false; n];
        let mut newest: Vec<usize> = inputs
            .iter()
            .filter_map(|&key| self.node_index(key))
            .collect();
        for &idx in &newest {
            in_frontier[idx] = true;
        }

        let mut considered = vec![false; n];
        let mut layers = Vec::new();
        loop {
            let mut layer: Vec<usize> = Vec::new();
            for &a in &newest {
                for c in self.successors(a) {
                    if in_frontier[c] || considered[c] {
                        continue;
                    }
                    considered[c] = true;
                    if required.contains(&self.idx_to_node[c])
                        && self.predecessors(c).all(|p| in_frontier[p])
                    {
                        layer.push(c);
                    }
                }
            }
            // a rejected candidate may pass once more of its feeders resolve
            for &a in &newest {
                for c in self.successors(a) {
                    considered[c] = false;
                }
            }

            if layer.is_empty() {
                break;
            }
            layer.sort_by_key(|&idx| self.idx_to_node[idx]);
            for &idx in &layer {
                in_frontier[idx] = true;
            }
            layers.push(layer.iter().map(|&idx| self.idx_to_node[idx]).collect());
            newest = layer;
        }

        layers
    }
}

/// Build a CSR adjacency (offsets, targets) for `node_count` nodes, keeping
/// edges in insertion order per row.
fn build_csr<I>(node_count: usize, edges: I) -> (Vec<usize>, Vec<usize>)
where
    I: Iterator<Item = (usize, usize)> + Clone,
{
    let mut offsets = vec![0usize; node_count + 1];
    for (row, _) in edges.clone() {
        offsets[row + 1] += 1;
    }
    for i in 0..node_count {
        offsets[i + 1] += offsets[i];
    }

    let mut targets = vec![0usize; offsets[node_count]];
    let mut write_pos = offsets[..node_count].to_vec();
    for (row, col) in edges {
        targets[write_pos[row]] = col;
        write_pos[row] += 1;
    }
    (offsets, targets)
}

/// Nodes whose value can influence some output, over `(from, to)` edges.
#[must_use]
pub fn required_for_output(
    inputs: &[NodeKey],
    outputs: &[NodeKey],
    connections: &[(NodeKey, NodeKey)],
) -> HashSet<NodeKey> {
    GraphTopology::from_edges(inputs.iter().copied(), connections.iter().copied())
        .required_for_output(inputs, outputs)
}

/// Evaluation layers for `(from, to)` edges; see
/// [`GraphTopology::feed_forward_layers`].
#[must_use]
pub fn feed_forward_layers(
    inputs: &[NodeKey],
    outputs: &[NodeKey],
    connections: &[(NodeKey, NodeKey)],
) -> Vec<Vec<NodeKey>> {
    GraphTopology::from_edges(inputs.iter().copied(), connections.iter().copied())
        .feed_forward_layers(inputs, outputs)
}
