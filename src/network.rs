//! Phenotype compiler and activation engine.
//!
//! [`FeedForwardNetwork::from_genome`] turns a genome's enabled connections
//! into a flat evaluation plan: the nodes of every
//! [feed-forward layer](crate::topology::GraphTopology::feed_forward_layers),
//! in layer order, each with its incoming `(source, weight)` pairs. Because
//! every source of a neuron lives in an earlier layer or is an input pin,
//! [`activate`](FeedForwardNetwork::activate) runs the plan in a single
//! pass.
//!
//! Node values live in a dense cache indexed by slot: input pins first,
//! then output pins, then hidden neurons in plan order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::activation::{Activation, Aggregation};
use crate::gene::{NodeGene, NodeKey};
use crate::genome::Genome;
use crate::topology::GraphTopology;

/// Errors raised while compiling or running a network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// The compiler only handles acyclic genomes.
    #[error("genome {0} allows recurrent connections; feed-forward compilation needs an acyclic genome")]
    RecurrentGenome(u64),
    #[error("genome has no input pins")]
    EmptyInputPins,
    #[error("input length mismatch: expected {expected}, got {actual}")]
    InputSizeMismatch { expected: usize, actual: usize },
    #[error("output length mismatch: expected {expected}, got {actual}")]
    OutputSizeMismatch { expected: usize, actual: usize },
    /// A stored plan whose value cache cannot hold its pins or neurons.
    #[error("value cache of {len} slots cannot hold slot {slot}")]
    InvalidSlot { slot: usize, len: usize },
}

/// One weighted input of a [`Neuron`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronInput {
    pub source: NodeKey,
    pub weight: f64,
    /// Cache slot of `source`.
    slot: usize,
}

/// A compiled node of the evaluation plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neuron {
    pub id: NodeKey,
    pub aggregation: Aggregation,
    pub activation: Activation,
    pub bias: f64,
    pub response: f64,
    pub inputs: Vec<NeuronInput>,
    /// Cache slot the result is written to.
    slot: usize,
}

/// A compiled, evaluation-ready representation of a genome.
///
/// Deserialization checks every slot against the value cache, so a stored
/// plan either loads intact or fails with [`NetworkError::InvalidSlot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredNetwork")]
pub struct FeedForwardNetwork {
    input_pins: Vec<NodeKey>,
    output_pins: Vec<NodeKey>,
    /// Node keys of each layer, in evaluation order.
    layers: Vec<Vec<NodeKey>>,
    /// Neurons of every layer, flattened in evaluation order.
    neurons: Vec<Neuron>,
    /// Value cache, one slot per input pin, output pin and hidden neuron.
    values: Vec<f64>,
}

#[derive(Deserialize)]
struct StoredNetwork {
    input_pins: Vec<NodeKey>,
    output_pins: Vec<NodeKey>,
    layers: Vec<Vec<NodeKey>>,
    neurons: Vec<Neuron>,
    values: Vec<f64>,
}

impl TryFrom<StoredNetwork> for FeedForwardNetwork {
    type Error = NetworkError;

    fn try_from(stored: StoredNetwork) -> Result<Self, Self::Error> {
        let len = stored.values.len();
        let check = |slot: usize| {
            if slot < len {
                Ok(())
            } else {
                Err(NetworkError::InvalidSlot { slot, len })
            }
        };

        let pins = stored.input_pins.len() + stored.output_pins.len();
        if pins > 0 {
            check(pins - 1)?;
        }
        for neuron in &stored.neurons {
            check(neuron.slot)?;
            for input in &neuron.inputs {
                check(input.slot)?;
            }
        }

        Ok(Self {
            input_pins: stored.input_pins,
            output_pins: stored.output_pins,
            layers: stored.layers,
            neurons: stored.neurons,
            values: stored.values,
        })
    }
}

impl FeedForwardNetwork {
    /// Compile a genome.
    ///
    /// Disabled connections are ignored. Nodes that cannot influence an
    /// output, or whose feeders can never all be resolved, are left out of
    /// the plan; an output left out reads as 0.0.
    ///
    /// # Errors
    ///
    /// [`NetworkError::RecurrentGenome`] if the genome allows recurrence and
    /// [`NetworkError::EmptyInputPins`] if it has no inputs.
    pub fn from_genome(genome: &Genome) -> Result<Self, NetworkError> {
        if genome.recurrent_allowed {
            return Err(NetworkError::RecurrentGenome(genome.key));
        }
        if genome.input_pins.is_empty() {
            return Err(NetworkError::EmptyInputPins);
        }

        let layers = GraphTopology::enabled(genome)
            .feed_forward_layers(&genome.input_pins, &genome.output_pins);

        let mut slots: HashMap<NodeKey, usize> = HashMap::new();
        for &pin in genome.input_pins.iter().chain(&genome.output_pins) {
            let next = slots.len();
            slots.entry(pin).or_insert(next);
        }

        let mut incoming: HashMap<NodeKey, Vec<(u64, NodeKey, f64)>> = HashMap::new();
        for c in genome.connection_genes.iter().filter(|c| c.enabled) {
            incoming
                .entry(c.to_node)
                .or_default()
                .push((c.key, c.from_node, c.weight));
        }
        let genes: HashMap<NodeKey, &NodeGene> =
            genome.node_genes.iter().map(|n| (n.key, n)).collect();

        let mut neurons = Vec::new();
        for &id in layers.iter().flatten() {
            let next = slots.len();
            let slot = *slots.entry(id).or_insert(next);

            let mut edges = incoming.remove(&id).unwrap_or_default();
            edges.sort_by_key(|&(key, _, _)| key);
            let inputs = edges
                .into_iter()
                .filter_map(|(_, source, weight)| {
                    slots.get(&source).map(|&slot| NeuronInput {
                        source,
                        weight,
                        slot,
                    })
                })
                .collect();

            // an enabled connection may name a node with no gene in a
            // hand-built genome; it evaluates as a default node
            let fallback;
            let gene = match genes.get(&id) {
                Some(gene) => *gene,
                None => {
                    fallback = NodeGene::new(id);
                    &fallback
                }
            };
            neurons.push(Neuron {
                id,
                aggregation: gene.aggregation,
                activation: gene.activation,
                bias: gene.bias,
                response: gene.response,
                inputs,
                slot,
            });
        }

        Ok(Self {
            input_pins: genome.input_pins.clone(),
            output_pins: genome.output_pins.clone(),
            layers,
            neurons,
            values: vec![0.0; slots.len()],
        })
    }

    /// Run the network once.
    ///
    /// Both buffers are checked before anything is written, so on error
    /// `outputs` is left untouched.
    ///
    /// # Errors
    ///
    /// [`NetworkError::InputSizeMismatch`] or
    /// [`NetworkError::OutputSizeMismatch`] when a buffer has the wrong
    /// length.
    pub fn activate(&mut self, inputs: &[f64], outputs: &mut [f64]) -> Result<(), NetworkError> {
        if inputs.len() != self.input_pins.len() {
            return Err(NetworkError::InputSizeMismatch {
                expected: self.input_pins.len(),
                actual: inputs.len(),
            });
        }
        if outputs.len() != self.output_pins.len() {
            return Err(NetworkError::OutputSizeMismatch {
                expected: self.output_pins.len(),
                actual: outputs.len(),
            });
        }

        // input pins occupy the first slots
        self.values[..inputs.len()].copy_from_slice(inputs);

        for neuron in &self.neurons {
            let values = &self.values;
            let aggregate = neuron
                .aggregation
                .apply(neuron.inputs.iter().map(|i| values[i.slot] * i.weight));
            self.values[neuron.slot] = neuron
                .activation
                .apply(aggregate * neuron.response + neuron.bias);
        }

        let offset = self.input_pins.len();
        outputs.copy_from_slice(&self.values[offset..offset + self.output_pins.len()]);
        Ok(())
    }

    /// Run the network once and return a fresh output vector.
    ///
    /// # Errors
    ///
    /// [`NetworkError::InputSizeMismatch`] when `inputs` has the wrong length.
    pub fn activate_vec(&mut self, inputs: &[f64]) -> Result<Vec<f64>, NetworkError> {
        let mut outputs = vec![0.0; self.output_pins.len()];
        self.activate(inputs, &mut outputs)?;
        Ok(outputs)
    }

    #[must_use]
    pub fn num_inputs(&self) -> usize {
        self.input_pins.len()
    }

    #[must_use]
    pub fn num_outputs(&self) -> usize {
        self.output_pins.len()
    }

    /// The evaluation plan.
    #[must_use]
    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    /// Node keys grouped by layer.
    #[must_use]
    pub fn layers(&self) -> &[Vec<NodeKey>] {
        &self.layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MutationRates, NetworkShape};
    use crate::gene::ConnectionGene;
    use crate::innovation::InnovationTracker;

    fn sigmoid(x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }

    fn single_edge(weight: f64) -> Genome {
        let mut g = Genome::new(&NetworkShape::new(2, 1), MutationRates::default(), 0);
        g.connection_genes.push(ConnectionGene::new(0, -1, 0, weight));
        g
    }

    #[test]
    fn test_single_connection() {
        let mut net = FeedForwardNetwork::from_genome(&single_edge(2.0)).unwrap();
        assert_eq!(net.num_inputs(), 2);
        assert_eq!(net.num_outputs(), 1);
        let out = net.activate_vec(&[1.0, 0.0]).unwrap();
        assert!((out[0] - 0.880_797).abs() < 1e-6);
    }

    #[test]
    fn test_split_connection_output() {
        let mut g = single_edge(0.5);
        let mut tracker = InnovationTracker::new(1);
        tracker.observe(&g);
        g.split_connection(0, &mut tracker).unwrap();

        let mut net = FeedForwardNetwork::from_genome(&g).unwrap();
        assert_eq!(net.layers().len(), 2);
        let out = net.activate_vec(&[1.0, 0.0]).unwrap();
        let expected = sigmoid(sigmoid(0.5) * 0.5);
        assert!((out[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_bias_response_and_aggregation() {
        let mut g = Genome::new(&NetworkShape::new(2, 1), MutationRates::default(), 0);
        g.node_genes[0] = NodeGene::new(0)
            .with_aggregation(Aggregation::Product)
            .with_activation(Activation::Tanh)
            .with_bias(0.1);
        g.node_genes[0].response = 2.0;
        g.connection_genes.push(ConnectionGene::new(0, -1, 0, 0.5));
        g.connection_genes.push(ConnectionGene::new(1, -2, 0, 3.0));

        let mut net = FeedForwardNetwork::from_genome(&g).unwrap();
        let out = net.activate_vec(&[2.0, 0.5]).unwrap();
        // (2.0 * 0.5) * (0.5 * 3.0) = 1.5
        assert!((out[0] - (1.5f64 * 2.0 + 0.1).tanh()).abs() < 1e-12);
    }

    #[test]
    fn test_disabled_connections_are_ignored() {
        let mut g = single_edge(2.0);
        g.connection_genes[0].enabled = false;
        let mut net = FeedForwardNetwork::from_genome(&g).unwrap();
        assert!(net.neurons().is_empty());
        assert_eq!(net.activate_vec(&[1.0, 1.0]).unwrap(), vec![0.0]);
    }

    #[test]
    fn test_activation_is_repeatable() {
        let mut g = single_edge(1.5);
        g.connection_genes.push(ConnectionGene::new(1, -2, 0, -0.5));
        let mut net = FeedForwardNetwork::from_genome(&g).unwrap();
        let a = net.activate_vec(&[0.3, 0.9]).unwrap();
        let _ = net.activate_vec(&[-5.0, 5.0]).unwrap();
        let b = net.activate_vec(&[0.3, 0.9]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_size_mismatch_leaves_outputs_untouched() {
        let mut net = FeedForwardNetwork::from_genome(&single_edge(1.0)).unwrap();
        let mut outputs = [42.0];
        let err = net.activate(&[1.0], &mut outputs).unwrap_err();
        assert_eq!(
            err,
            NetworkError::InputSizeMismatch {
                expected: 2,
                actual: 1
            }
        );
        assert_eq!(outputs, [42.0]);

        let mut too_long = [7.0, 7.0];
        let err = net.activate(&[1.0, 1.0], &mut too_long).unwrap_err();
        assert!(matches!(err, NetworkError::OutputSizeMismatch { .. }));
        assert_eq!(too_long, [7.0, 7.0]);
    }

    #[test]
    fn test_structural_preconditions() {
        let mut g = single_edge(1.0);
        g.recurrent_allowed = true;
        assert_eq!(
            FeedForwardNetwork::from_genome(&g),
            Err(NetworkError::RecurrentGenome(0))
        );

        let empty = Genome::new(&NetworkShape::new(0, 1), MutationRates::default(), 0);
        assert_eq!(
            FeedForwardNetwork::from_genome(&empty),
            Err(NetworkError::EmptyInputPins)
        );
        assert!(NetworkError::RecurrentGenome(3).to_string().contains("acyclic"));
    }

    #[test]
    fn test_node_without_gene_uses_defaults() {
        let mut g = Genome::new(&NetworkShape::new(1, 1), MutationRates::default(), 0);
        g.connection_genes.push(ConnectionGene::new(0, -1, 7, 0.5));
        g.connection_genes.push(ConnectionGene::new(1, 7, 0, 2.0));
        assert!(g.node(7).is_none());

        let mut net = FeedForwardNetwork::from_genome(&g).unwrap();
        let hidden = &net.neurons()[0];
        assert_eq!(hidden.id, 7);
        assert_eq!(hidden.activation, Activation::Sigmoid);
        assert_eq!((hidden.bias, hidden.response), (0.0, 1.0));
        let out = net.activate_vec(&[1.0]).unwrap();
        assert!((out[0] - sigmoid(sigmoid(0.5) * 2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_corrupt_plan_is_rejected() {
        let mut g = single_edge(2.0);
        g.connection_genes.push(ConnectionGene::new(1, -2, 0, 1.0));
        let net = FeedForwardNetwork::from_genome(&g).unwrap();
        let json = serde_json::to_value(&net).unwrap();

        let mut short_cache = json.clone();
        short_cache["values"] = serde_json::json!([0.0]);
        let err = serde_json::from_value::<FeedForwardNetwork>(short_cache).unwrap_err();
        assert!(err.to_string().contains("cannot hold slot 2"), "{err}");

        let mut bad_input = json.clone();
        bad_input["neurons"][0]["inputs"][1]["slot"] = serde_json::json!(99);
        assert!(serde_json::from_value::<FeedForwardNetwork>(bad_input).is_err());

        let mut bad_neuron = json;
        bad_neuron["neurons"][0]["slot"] = serde_json::json!(3);
        assert!(serde_json::from_value::<FeedForwardNetwork>(bad_neuron).is_err());

        assert_eq!(
            FeedForwardNetwork::try_from(StoredNetwork {
                input_pins: vec![-1, -2],
                output_pins: vec![0],
                layers: Vec::new(),
                neurons: Vec::new(),
                values: vec![0.0; 2],
            }),
            Err(NetworkError::InvalidSlot { slot: 2, len: 2 })
        );
    }

    #[test]
    fn test_serde_round_trip() {
        let mut net = FeedForwardNetwork::from_genome(&single_edge(2.0)).unwrap();
        let json = serde_json::to_string(&net).unwrap();
        let mut back: FeedForwardNetwork = serde_json::from_str(&json).unwrap();
        assert_eq!(back, net);
        assert_eq!(
            back.activate_vec(&[1.0, 0.0]).unwrap(),
            net.activate_vec(&[1.0, 0.0]).unwrap()
        );
    }
}
