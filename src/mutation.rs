//! Mutation operators.
//!
//! Every operator takes the genome mutably, the population's RNG and, for
//! structural changes, the population's [`InnovationTracker`]. Operators
//! whose precondition does not hold (no genes to pick from, a rejected
//! edge) leave the genome untouched; they never fail.
//!
//! [`Genome::mutate`] is the top-level entry point used by breeding. It
//! rolls each parametric and connection operator independently against the
//! genome's [`MutationRates`](crate::MutationRates), then always runs one
//! node-mutation step.

use log::trace;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::activation::{Activation, Aggregation};
use crate::gene::{ConnectionGene, ConnectionKey, NodeGene, NodeKey};
use crate::genome::Genome;
use crate::innovation::InnovationTracker;
use crate::topology::GraphTopology;

/// Draw from N(0, sigma²).
#[inline]
pub(crate) fn gaussian<R: Rng>(rng: &mut R, sigma: f64) -> f64 {
    rng.sample::<f64, _>(StandardNormal) * sigma
}

/// Whether a uniform draw in [0, 1) falls below `chance`.
#[inline]
fn roll<R: Rng>(rng: &mut R, chance: f64) -> bool {
    rng.random::<f64>() < chance
}

impl Genome {
    /// Apply one round of mutation.
    ///
    /// Weight, add-connection, delete-connection, bias, response and the
    /// enable toggle each fire independently with their own chance. The
    /// node step always runs afterwards.
    pub fn mutate<R: Rng>(&mut self, rng: &mut R, tracker: &mut InnovationTracker) {
        let rates = self.mutation_rates.clone();

        if roll(rng, rates.weight_mutate_chance) {
            self.mutate_weight(rng);
        }
        if roll(rng, rates.connection_add_chance) {
            self.mutate_add_connection(rng, tracker);
        }
        if roll(rng, rates.connection_delete_chance) {
            self.mutate_delete_connection(rng);
        }
        if roll(rng, rates.bias_mutation_chance) {
            self.mutate_bias(rng);
        }
        if roll(rng, rates.response_mutation_chance) {
            self.mutate_response(rng);
        }
        if roll(rng, rates.enable_mutation_chance) {
            self.mutate_enable_disable(rng);
        }

        self.mutate_node(rng, tracker);
    }

    /// The node step of [`mutate`](Self::mutate).
    ///
    /// Adds a node with `node_add_chance`, otherwise deletes one with
    /// `node_delete_chance`; then changes an aggregation function with
    /// `aggregation_mutation_chance`, otherwise an activation function with
    /// `activation_mutation_chance`. A genome without node genes always
    /// gains a node.
    pub fn mutate_node<R: Rng>(&mut self, rng: &mut R, tracker: &mut InnovationTracker) {
        if self.node_genes.is_empty() {
            self.add_node(rng, tracker);
            return;
        }

        let rates = &self.mutation_rates;
        let (add, delete) = (rates.node_add_chance, rates.node_delete_chance);
        let (aggregation, activation) = (
            rates.aggregation_mutation_chance,
            rates.activation_mutation_chance,
        );

        if roll(rng, add) {
            self.add_node(rng, tracker);
        } else if roll(rng, delete) {
            self.delete_node(rng);
        }

        if roll(rng, aggregation) {
            self.mutate_aggregation_function(rng);
        } else if roll(rng, activation) {
            self.mutate_activation_function(rng);
        }
    }

    /// Perturb one random connection weight by N(0, weight_mutation_rate²).
    pub fn mutate_weight<R: Rng>(&mut self, rng: &mut R) {
        if self.connection_genes.is_empty() {
            return;
        }
        let sigma = self.mutation_rates.weight_mutation_rate;
        let idx = rng.random_range(0..self.connection_genes.len());
        self.connection_genes[idx].weight += gaussian(rng, sigma);
    }

    /// Try to add one random connection.
    ///
    /// A fair coin picks the source among the input pins or the node genes.
    /// An input source may only feed a hidden node; any other source feeds
    /// either an output pin or any node gene, again by a fair coin. The
    /// candidate is dropped if it is a self-loop, duplicates an existing
    /// pair, or (for feed-forward genomes) would close a cycle.
    ///
    /// Returns the key of the new connection.
    pub fn mutate_add_connection<R: Rng>(
        &mut self,
        rng: &mut R,
        tracker: &mut InnovationTracker,
    ) -> Option<ConnectionKey> {
        if self.node_genes.is_empty() {
            return None;
        }

        let (from, to) = if rng.random::<bool>() && !self.input_pins.is_empty() {
            let from = self.input_pins[rng.random_range(0..self.input_pins.len())];
            let hidden = self.hidden_keys();
            if hidden.is_empty() {
                return None;
            }
            (from, hidden[rng.random_range(0..hidden.len())])
        } else {
            let from = self.node_genes[rng.random_range(0..self.node_genes.len())].key;
            let to = if rng.random::<bool>() && !self.output_pins.is_empty() {
                self.output_pins[rng.random_range(0..self.output_pins.len())]
            } else {
                self.node_genes[rng.random_range(0..self.node_genes.len())].key
            };
            (from, to)
        };

        let weight = gaussian(rng, self.mutation_rates.weight_mutation_rate);
        self.add_connection(from, to, weight, tracker)
    }

    /// Add the connection `from -> to` if it is structurally valid.
    ///
    /// Rejects self-loops, targets that are input pins, existing pairs and,
    /// unless recurrence is allowed, edges that would close a cycle over
    /// enabled and disabled connections alike. The key is drawn only for an
    /// accepted edge.
    pub fn add_connection(
        &mut self,
        from: NodeKey,
        to: NodeKey,
        weight: f64,
        tracker: &mut InnovationTracker,
    ) -> Option<ConnectionKey> {
        if from == to || to < 0 {
            trace!("genome {}: rejected connection {from} -> {to}", self.key);
            return None;
        }
        if self.has_connection(from, to) {
            trace!("genome {}: duplicate connection {from} -> {to}", self.key);
            return None;
        }
        if !self.recurrent_allowed && GraphTopology::all_edges(self).would_create_cycle(from, to) {
            trace!("genome {}: connection {from} -> {to} would close a cycle", self.key);
            return None;
        }

        let key = tracker.next_connection_key();
        self.connection_genes
            .push(ConnectionGene::new(key, from, to, weight));
        Some(key)
    }

    /// Remove one random enabled connection. No-op with one connection or
    /// fewer.
    pub fn mutate_delete_connection<R: Rng>(&mut self, rng: &mut R) {
        if self.connection_genes.len() <= 1 {
            return;
        }
        let enabled: Vec<ConnectionKey> = self
            .connection_genes
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.key)
            .collect();
        if enabled.is_empty() {
            return;
        }
        let key = enabled[rng.random_range(0..enabled.len())];
        self.connection_genes.retain(|c| c.key != key);
    }

    /// Add a hidden node.
    ///
    /// With connections present, one is chosen uniformly and split (see
    /// [`split_connection`](Self::split_connection)). Otherwise an isolated
    /// node is wired from a random input pin and into a random output pin
    /// with N(0, weight_mutation_rate²) weights.
    pub fn add_node<R: Rng>(
        &mut self,
        rng: &mut R,
        tracker: &mut InnovationTracker,
    ) -> Option<NodeKey> {
        if !self.connection_genes.is_empty() {
            let idx = rng.random_range(0..self.connection_genes.len());
            let key = self.connection_genes[idx].key;
            return self.split_connection(key, tracker);
        }

        if self.input_pins.is_empty() || self.output_pins.is_empty() {
            return None;
        }
        let from = self.input_pins[rng.random_range(0..self.input_pins.len())];
        let to = self.output_pins[rng.random_range(0..self.output_pins.len())];
        let sigma = self.mutation_rates.weight_mutation_rate;

        let node = tracker.next_node_key();
        self.node_genes.push(NodeGene::new(node));
        let (w1, w2) = (gaussian(rng, sigma), gaussian(rng, sigma));
        self.connection_genes
            .push(ConnectionGene::new(tracker.next_connection_key(), from, node, w1));
        self.connection_genes
            .push(ConnectionGene::new(tracker.next_connection_key(), node, to, w2));
        Some(node)
    }

    /// Split connection `key` (`u -> v`, weight `w`) with a new node `n`.
    ///
    /// The original gene is disabled and `u -> n`, `n -> v` are appended,
    /// both enabled and both carrying `w`. The new node is sigmoid / sum
    /// with bias 0 and response 1.
    pub fn split_connection(
        &mut self,
        key: ConnectionKey,
        tracker: &mut InnovationTracker,
    ) -> Option<NodeKey> {
        let conn = self.connection_genes.iter_mut().find(|c| c.key == key)?;
        conn.enabled = false;
        let (from, to, weight) = (conn.from_node, conn.to_node, conn.weight);

        let node = tracker.next_node_key();
        self.node_genes.push(NodeGene::new(node));
        self.connection_genes.push(ConnectionGene::new(
            tracker.next_connection_key(),
            from,
            node,
            weight,
        ));
        self.connection_genes.push(ConnectionGene::new(
            tracker.next_connection_key(),
            node,
            to,
            weight,
        ));
        Some(node)
    }

    /// Remove one random hidden node together with every connection that
    /// touches it. Output nodes are never removed.
    pub fn delete_node<R: Rng>(&mut self, rng: &mut R) -> Option<NodeKey> {
        if self.node_genes.len() <= 1 {
            return None;
        }
        let hidden = self.hidden_keys();
        if hidden.is_empty() {
            return None;
        }
        let key = hidden[rng.random_range(0..hidden.len())];
        self.connection_genes.retain(|c| !c.touches(key));
        self.node_genes.retain(|n| n.key != key);
        Some(key)
    }

    /// Give one random node a random activation function.
    pub fn mutate_activation_function<R: Rng>(&mut self, rng: &mut R) {
        if self.node_genes.is_empty() {
            return;
        }
        let idx = rng.random_range(0..self.node_genes.len());
        self.node_genes[idx].activation =
            Activation::random(rng, self.mutation_rates.activation_choices);
    }

    /// Give one random node a random aggregation function.
    pub fn mutate_aggregation_function<R: Rng>(&mut self, rng: &mut R) {
        if self.node_genes.is_empty() {
            return;
        }
        let idx = rng.random_range(0..self.node_genes.len());
        self.node_genes[idx].aggregation =
            Aggregation::random(rng, self.mutation_rates.aggregation_choices);
    }

    /// Perturb one random node's bias by N(0, bias_mutation_rate²).
    pub fn mutate_bias<R: Rng>(&mut self, rng: &mut R) {
        if self.node_genes.is_empty() {
            return;
        }
        let idx = rng.random_range(0..self.node_genes.len());
        self.node_genes[idx].bias += gaussian(rng, self.mutation_rates.bias_mutation_rate);
    }

    /// Perturb one random node's response by N(0, response_mutation_rate²).
    pub fn mutate_response<R: Rng>(&mut self, rng: &mut R) {
        if self.node_genes.is_empty() {
            return;
        }
        let idx = rng.random_range(0..self.node_genes.len());
        self.node_genes[idx].response +=
            gaussian(rng, self.mutation_rates.response_mutation_rate);
    }

    /// Flip `enabled` on one random connection.
    pub fn mutate_enable_disable<R: Rng>(&mut self, rng: &mut R) {
        if self.connection_genes.is_empty() {
            return;
        }
        let idx = rng.random_range(0..self.connection_genes.len());
        let conn = &mut self.connection_genes[idx];
        conn.enabled = !conn.enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MutationRates, NetworkShape};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn genome(inputs: usize, outputs: usize) -> (Genome, InnovationTracker) {
        let shape = NetworkShape::new(inputs, outputs);
        (
            Genome::new(&shape, MutationRates::default(), 0),
            InnovationTracker::new(outputs),
        )
    }

    #[test]
    fn test_add_connection_rejections() {
        let (mut g, mut tracker) = genome(2, 1);
        let hidden = g.split_connection(99, &mut tracker);
        assert!(hidden.is_none());

        assert!(g.add_connection(-1, 0, 1.0, &mut tracker).is_some());
        // duplicate pair
        assert!(g.add_connection(-1, 0, 2.0, &mut tracker).is_none());
        // self-loop
        assert!(g.add_connection(0, 0, 1.0, &mut tracker).is_none());
        // input pins are never targets
        assert!(g.add_connection(0, -1, 1.0, &mut tracker).is_none());
        assert_eq!(g.connection_genes.len(), 1);
        // the rejected attempts did not consume keys
        assert_eq!(tracker.peek_connection_key(), 1);
    }

    #[test]
    fn test_add_connection_rejects_cycles() {
        let (mut g, mut tracker) = genome(1, 1);
        g.add_connection(-1, 0, 1.0, &mut tracker);
        let n = g.split_connection(0, &mut tracker).unwrap();
        // 0 -> n would close -1 -> n -> 0 -> n
        assert!(g.add_connection(0, n, 1.0, &mut tracker).is_none());

        g.recurrent_allowed = true;
        assert!(g.add_connection(0, n, 1.0, &mut tracker).is_some());
    }

    #[test]
    fn test_split_connection() {
        let (mut g, mut tracker) = genome(1, 1);
        g.add_connection(-1, 0, 0.5, &mut tracker);
        let n = g.split_connection(0, &mut tracker).unwrap();
        assert_eq!(n, 1);

        assert!(!g.connection(0).unwrap().enabled);
        let c1 = g.connection(1).unwrap();
        let c2 = g.connection(2).unwrap();
        assert_eq!((c1.from_node, c1.to_node, c1.weight, c1.enabled), (-1, n, 0.5, true));
        assert_eq!((c2.from_node, c2.to_node, c2.weight, c2.enabled), (n, 0, 0.5, true));
        let node = g.node(n).unwrap();
        assert_eq!((node.bias, node.response), (0.0, 1.0));
    }

    #[test]
    fn test_add_node_without_connections() {
        let mut rng = test_rng();
        let (mut g, mut tracker) = genome(3, 2);
        let n = g.add_node(&mut rng, &mut tracker).unwrap();
        assert_eq!(g.connection_genes.len(), 2);
        assert!(g.connection_genes[0].from_node < 0);
        assert_eq!(g.connection_genes[0].to_node, n);
        assert_eq!(g.connection_genes[1].from_node, n);
        assert!(g.is_output(g.connection_genes[1].to_node));
    }

    #[test]
    fn test_mutate_add_connection_inputs_feed_hidden_only() {
        let mut rng = test_rng();
        let (mut g, mut tracker) = genome(2, 1);
        // only the output node gene exists: nothing valid to connect
        for _ in 0..100 {
            assert!(g.mutate_add_connection(&mut rng, &mut tracker).is_none());
        }
        assert!(g.connection_genes.is_empty());

        let (mut g, mut tracker) = genome(3, 2);
        g.add_node(&mut rng, &mut tracker).unwrap();
        g.add_node(&mut rng, &mut tracker).unwrap();
        for _ in 0..300 {
            g.mutate_add_connection(&mut rng, &mut tracker);
        }
        let hidden = g.hidden_keys();
        let from_inputs: Vec<_> = g
            .connection_genes
            .iter()
            .filter(|c| g.is_input(c.from_node))
            .collect();
        assert!(from_inputs.len() > 2);
        for c in from_inputs {
            assert!(!g.is_output(c.to_node), "{} -> {}", c.from_node, c.to_node);
            assert!(hidden.contains(&c.to_node));
        }
        assert!(!GraphTopology::all_edges(&g).has_cycle());
    }

    #[test]
    fn test_delete_connection_single_gene_is_noop() {
        let mut rng = test_rng();
        let (mut g, mut tracker) = genome(2, 1);
        g.add_connection(-1, 0, 1.0, &mut tracker);
        g.mutate_delete_connection(&mut rng);
        assert_eq!(g.connection_genes.len(), 1);

        g.add_connection(-2, 0, 1.0, &mut tracker);
        g.mutate_delete_connection(&mut rng);
        assert_eq!(g.connection_genes.len(), 1);
    }

    #[test]
    fn test_delete_connection_only_removes_enabled() {
        let mut rng = test_rng();
        let (mut g, mut tracker) = genome(2, 1);
        g.add_connection(-1, 0, 1.0, &mut tracker);
        g.add_connection(-2, 0, 1.0, &mut tracker);
        g.connection_genes[0].enabled = false;
        g.mutate_delete_connection(&mut rng);
        assert_eq!(g.connection_genes.len(), 1);
        assert_eq!(g.connection_genes[0].key, 0);
    }

    #[test]
    fn test_delete_node_keeps_outputs() {
        let mut rng = test_rng();
        let (mut g, mut tracker) = genome(2, 2);
        assert!(g.delete_node(&mut rng).is_none());

        g.add_connection(-1, 0, 1.0, &mut tracker);
        let n = g.split_connection(0, &mut tracker).unwrap();
        g.add_connection(n, 1, 1.0, &mut tracker);

        assert_eq!(g.delete_node(&mut rng), Some(n));
        assert!(g.node(n).is_none());
        assert!(g.connection_genes.iter().all(|c| !c.touches(n)));
        assert_eq!(g.node_genes.len(), 2);
    }

    #[test]
    fn test_parametric_mutations() {
        let mut rng = test_rng();
        let (mut g, mut tracker) = genome(1, 1);
        g.add_connection(-1, 0, 1.0, &mut tracker);

        g.mutate_weight(&mut rng);
        assert_ne!(g.connection_genes[0].weight, 1.0);

        g.mutate_bias(&mut rng);
        assert_ne!(g.node_genes[0].bias, 0.0);

        g.mutate_response(&mut rng);
        assert_ne!(g.node_genes[0].response, 1.0);

        g.mutate_enable_disable(&mut rng);
        assert!(!g.connection_genes[0].enabled);
        g.mutate_enable_disable(&mut rng);
        assert!(g.connection_genes[0].enabled);
    }

    #[test]
    fn test_function_mutations_respect_choices() {
        let mut rng = test_rng();
        let (mut g, _) = genome(1, 1);
        g.mutation_rates.activation_choices = 1;
        g.mutation_rates.aggregation_choices = 1;
        for _ in 0..20 {
            g.mutate_activation_function(&mut rng);
            g.mutate_aggregation_function(&mut rng);
        }
        assert_eq!(g.node_genes[0].activation, Activation::Sigmoid);
        assert_eq!(g.node_genes[0].aggregation, Aggregation::Sum);
    }

    #[test]
    fn test_mutate_keeps_feed_forward_genomes_acyclic() {
        let mut rng = test_rng();
        let (mut g, mut tracker) = genome(3, 2);
        for _ in 0..300 {
            g.mutate(&mut rng, &mut tracker);
            assert!(!GraphTopology::all_edges(&g).has_cycle());
            for out in &g.output_pins {
                assert!(g.node(*out).is_some());
            }
        }
        assert!(g.node_genes.len() > 2);
    }

    #[test]
    fn test_frozen_rates_only_run_node_step() {
        let mut rng = test_rng();
        let shape = NetworkShape::new(2, 1);
        let mut g = Genome::new(&shape, MutationRates::frozen(), 0);
        let mut tracker = InnovationTracker::new(1);
        g.add_connection(-1, 0, 1.0, &mut tracker);
        let before = g.clone();
        for _ in 0..10 {
            g.mutate(&mut rng, &mut tracker);
        }
        assert_eq!(g, before);
    }
}
