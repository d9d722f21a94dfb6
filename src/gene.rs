//! Gene types for NEAT genomes.
//!
//! This module defines the fundamental building blocks of a genome:
//! - [`NodeGene`]: a hidden or output neuron
//! - [`ConnectionGene`]: a weighted link between two nodes
//!
//! Genes reference each other by integer key, never by pointer. Input pins
//! are negative keys (`-1, -2, ...`) that have no node gene; output pins are
//! the keys `0..output_size` and hidden nodes take keys from the population's
//! node counter, which starts above the last output pin.

use serde::{Deserialize, Serialize};

use crate::activation::{Activation, Aggregation};

/// Key of a node. Negative for input pins, non-negative otherwise.
pub type NodeKey = i64;

/// Globally unique key ("innovation id") of a connection gene.
pub type ConnectionKey = u64;

/// Unique id of a genome within a population run.
pub type GenomeKey = u64;

/// A node gene representing a hidden or output neuron.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGene {
    /// Key of this node, unique within its genome.
    pub key: NodeKey,
    /// Activation applied to `aggregate * response + bias`.
    pub activation: Activation,
    /// Aggregation folding the weighted inputs.
    pub aggregation: Aggregation,
    /// Bias added after scaling.
    pub bias: f64,
    /// Multiplier applied to the aggregate.
    pub response: f64,
}

impl NodeGene {
    /// Create a node with the neutral parameter set: sigmoid, sum, bias 0,
    /// response 1.
    #[must_use]
    pub fn new(key: NodeKey) -> Self {
        Self {
            key,
            activation: Activation::Sigmoid,
            aggregation: Aggregation::Sum,
            bias: 0.0,
            response: 1.0,
        }
    }

    /// Builder-style override of the bias.
    #[must_use]
    pub fn with_bias(mut self, bias: f64) -> Self {
        self.bias = bias;
        self
    }

    /// Builder-style override of the activation function.
    #[must_use]
    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Builder-style override of the aggregation function.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }
}

/// A connection gene representing a weighted link between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionGene {
    /// Key drawn from the population's connection counter.
    pub key: ConnectionKey,
    /// Source node; negative for an input pin.
    pub from_node: NodeKey,
    /// Target node; always an output pin or hidden node key.
    pub to_node: NodeKey,
    /// The connection weight.
    pub weight: f64,
    /// Whether this connection is expressed.
    /// Disabled connections are skipped by the phenotype compiler but kept
    /// for crossover and distance.
    pub enabled: bool,
}

impl ConnectionGene {
    /// Create a new enabled connection.
    #[must_use]
    pub fn new(key: ConnectionKey, from_node: NodeKey, to_node: NodeKey, weight: f64) -> Self {
        Self {
            key,
            from_node,
            to_node,
            weight,
            enabled: true,
        }
    }

    /// Whether this connection starts or ends at `node`.
    #[inline]
    #[must_use]
    pub fn touches(&self, node: NodeKey) -> bool {
        self.from_node == node || self.to_node == node
    }
}
