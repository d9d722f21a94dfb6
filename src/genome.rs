//! NEAT genome: one candidate topology plus its fitness.
//!
//! Genes live in two flat lists and reference each other by key. Input pins
//! (`-1, -2, ...`) have no node gene. Output pins (`0..output_size`) are
//! materialised as node genes at construction so their bias, response and
//! functions evolve like any hidden node; they are never deleted.
//!
//! Copying a genome is a full value copy that keeps every gene key, which is
//! what crossover and the speciation distance match on.

use std::cmp::Ordering;
use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{MutationRates, NetworkShape};
use crate::gene::{ConnectionGene, ConnectionKey, GenomeKey, NodeGene, NodeKey};

/// Fitness of a genome that has not been evaluated yet.
///
/// Lower than any real score.
pub const UNEVALUATED: f64 = f64::NEG_INFINITY;

/// A NEAT genome representing a neural network topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    /// Id unique within a population run.
    pub key: GenomeKey,
    /// Score written back by the fitness evaluator; higher is better.
    #[serde(with = "fitness_serde", default = "unevaluated")]
    pub fitness: f64,
    /// Whether the connection graph may contain cycles.
    pub recurrent_allowed: bool,
    /// Input pin keys: `-1, -2, ...`.
    pub input_pins: Vec<NodeKey>,
    /// Output pin keys: `0, 1, ...`.
    pub output_pins: Vec<NodeKey>,
    pub node_genes: Vec<NodeGene>,
    pub connection_genes: Vec<ConnectionGene>,
    /// Rates used when this genome is mutated.
    #[serde(default)]
    pub mutation_rates: MutationRates,
}

pub(crate) fn unevaluated() -> f64 {
    UNEVALUATED
}

/// JSON has no infinities: unevaluated fitness is stored as `null`.
pub(crate) mod fitness_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(fitness: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if fitness.is_finite() {
            serializer.serialize_f64(*fitness)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(super::UNEVALUATED))
    }
}

impl Genome {
    /// Create a genome with pins for `shape`, one node gene per output pin
    /// and no connections.
    #[must_use]
    pub fn new(shape: &NetworkShape, mutation_rates: MutationRates, key: GenomeKey) -> Self {
        let input_pins: Vec<NodeKey> = (1..=shape.input_size as NodeKey).map(|i| -i).collect();
        let output_pins: Vec<NodeKey> = (0..shape.output_size as NodeKey).collect();
        let node_genes = output_pins.iter().map(|&k| NodeGene::new(k)).collect();

        Self {
            key,
            fitness: UNEVALUATED,
            recurrent_allowed: shape.recurrent,
            input_pins,
            output_pins,
            node_genes,
            connection_genes: Vec::new(),
            mutation_rates,
        }
    }

    /// The shape this genome was built for.
    #[must_use]
    pub fn shape(&self) -> NetworkShape {
        NetworkShape {
            input_size: self.input_pins.len(),
            output_size: self.output_pins.len(),
            recurrent: self.recurrent_allowed,
        }
    }

    /// Whether `key` is one of this genome's input pins.
    #[inline]
    #[must_use]
    pub fn is_input(&self, key: NodeKey) -> bool {
        key < 0 && ((-key) as usize) <= self.input_pins.len()
    }

    /// Whether `key` is one of this genome's output pins.
    #[inline]
    #[must_use]
    pub fn is_output(&self, key: NodeKey) -> bool {
        self.output_pins.contains(&key)
    }

    #[must_use]
    pub fn node(&self, key: NodeKey) -> Option<&NodeGene> {
        self.node_genes.iter().find(|n| n.key == key)
    }

    #[must_use]
    pub fn connection(&self, key: ConnectionKey) -> Option<&ConnectionGene> {
        self.connection_genes.iter().find(|c| c.key == key)
    }

    /// Whether a connection `from -> to` exists, enabled or not.
    #[must_use]
    pub fn has_connection(&self, from: NodeKey, to: NodeKey) -> bool {
        self.connection_genes
            .iter()
            .any(|c| c.from_node == from && c.to_node == to)
    }

    /// Keys of all node genes that are not output pins.
    #[must_use]
    pub fn hidden_keys(&self) -> Vec<NodeKey> {
        self.node_genes
            .iter()
            .map(|n| n.key)
            .filter(|&k| !self.is_output(k))
            .collect()
    }

    /// Number of enabled connections.
    #[must_use]
    pub fn num_enabled_connections(&self) -> usize {
        self.connection_genes.iter().filter(|c| c.enabled).count()
    }

    /// Whether a fitness has been written back since the genome was bred.
    #[inline]
    #[must_use]
    pub fn is_evaluated(&self) -> bool {
        self.fitness != UNEVALUATED
    }

    /// Fitness used to order genomes. NaN ranks with unevaluated genomes,
    /// below every real score.
    #[inline]
    #[must_use]
    pub fn ranking_fitness(&self) -> f64 {
        if self.fitness.is_nan() {
            UNEVALUATED
        } else {
            self.fitness
        }
    }

    /// Total order on [`ranking_fitness`](Self::ranking_fitness).
    #[inline]
    #[must_use]
    pub fn cmp_fitness(&self, other: &Self) -> Ordering {
        self.ranking_fitness().total_cmp(&other.ranking_fitness())
    }

    /// Produce a child by crossing `self` with `other`.
    ///
    /// The fitter parent (ties go to `self`) provides the gene set: a gene
    /// present in both parents takes each mutable field from either parent
    /// with equal probability, a gene only the fitter parent has is copied
    /// as is, and genes only the weaker parent has are dropped. The child is
    /// unevaluated and carries `child_key`.
    #[must_use]
    pub fn crossover<R: Rng>(&self, other: &Self, rng: &mut R, child_key: GenomeKey) -> Self {
        let (g1, g2) = if other.cmp_fitness(self) == Ordering::Greater {
            (other, self)
        } else {
            (self, other)
        };

        let g2_connections: HashMap<ConnectionKey, &ConnectionGene> =
            g2.connection_genes.iter().map(|c| (c.key, c)).collect();
        let g2_nodes: HashMap<NodeKey, &NodeGene> =
            g2.node_genes.iter().map(|n| (n.key, n)).collect();

        let connection_genes = g1
            .connection_genes
            .iter()
            .map(|c1| {
                let mut child = c1.clone();
                if let Some(c2) = g2_connections.get(&c1.key) {
                    if rng.random::<f64>() < 0.5 {
                        child.weight = c2.weight;
                    }
                    if rng.random::<f64>() < 0.5 {
                        child.enabled = c2.enabled;
                    }
                }
                child
            })
            .collect();

        let node_genes = g1
            .node_genes
            .iter()
            .map(|n1| {
                let mut child = n1.clone();
                if let Some(n2) = g2_nodes.get(&n1.key) {
                    if rng.random::<f64>() < 0.5 {
                        child.activation = n2.activation;
                    }
                    if rng.random::<f64>() < 0.5 {
                        child.aggregation = n2.aggregation;
                    }
                    if rng.random::<f64>() < 0.5 {
                        child.bias = n2.bias;
                    }
                    if rng.random::<f64>() < 0.5 {
                        child.response = n2.response;
                    }
                }
                child
            })
            .collect();

        Self {
            key: child_key,
            fitness: UNEVALUATED,
            recurrent_allowed: g1.recurrent_allowed,
            input_pins: g1.input_pins.clone(),
            output_pins: g1.output_pins.clone(),
            node_genes,
            connection_genes,
            mutation_rates: g1.mutation_rates.clone(),
        }
    }

    /// A value copy with a new key and no fitness.
    #[must_use]
    pub fn clone_as(&self, key: GenomeKey) -> Self {
        let mut child = self.clone();
        child.key = key;
        child.fitness = UNEVALUATED;
        child
    }
}
