//! Key allocation for structural mutations.
//!
//! Every structural mutation draws a fresh key from one of three
//! monotonically increasing counters owned by the population:
//!
//! - node keys (hidden nodes), starting just above the last output pin
//! - connection keys
//! - genome ids
//!
//! Identical structural changes made to different genomes in the same
//! generation receive different keys. Crossover and the speciation distance
//! therefore match genes by key only, not by structural history.

use serde::{Deserialize, Serialize};

use crate::gene::{ConnectionKey, GenomeKey, NodeKey};
use crate::genome::Genome;

/// The population's key counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnovationTracker {
    /// Next hidden node key.
    innovation_counter: NodeKey,
    /// Next connection key.
    connection_key_counter: ConnectionKey,
    /// Next genome id.
    genome_id_counter: GenomeKey,
}

impl InnovationTracker {
    /// Create counters for networks with `output_size` output pins.
    ///
    /// Output pins occupy node keys `0..output_size`, so hidden node keys
    /// start at `output_size`.
    #[must_use]
    pub fn new(output_size: usize) -> Self {
        Self {
            innovation_counter: output_size as NodeKey,
            connection_key_counter: 0,
            genome_id_counter: 0,
        }
    }

    /// Allocate a fresh hidden node key.
    #[inline]
    pub fn next_node_key(&mut self) -> NodeKey {
        let key = self.innovation_counter;
        self.innovation_counter += 1;
        key
    }

    /// Allocate a fresh connection key.
    #[inline]
    pub fn next_connection_key(&mut self) -> ConnectionKey {
        let key = self.connection_key_counter;
        self.connection_key_counter += 1;
        key
    }

    /// Allocate a fresh genome id.
    #[inline]
    pub fn next_genome_key(&mut self) -> GenomeKey {
        let key = self.genome_id_counter;
        self.genome_id_counter += 1;
        key
    }

    /// Advance every counter past the keys already used by `genome`.
    ///
    /// Needed when a genome built elsewhere (a template, a checkpoint) joins
    /// the population, so later allocations never collide with its genes.
    pub fn observe(&mut self, genome: &Genome) {
        if let Some(max_node) = genome.node_genes.iter().map(|n| n.key).max() {
            self.innovation_counter = self.innovation_counter.max(max_node + 1);
        }
        if let Some(max_conn) = genome.connection_genes.iter().map(|c| c.key).max() {
            self.connection_key_counter = self.connection_key_counter.max(max_conn + 1);
        }
        self.genome_id_counter = self.genome_id_counter.max(genome.key + 1);
    }

    /// Peek at the next node key without allocating it.
    #[must_use]
    pub fn peek_node_key(&self) -> NodeKey {
        self.innovation_counter
    }

    /// Peek at the next connection key without allocating it.
    #[must_use]
    pub fn peek_connection_key(&self) -> ConnectionKey {
        self.connection_key_counter
    }

    /// Peek at the next genome id without allocating it.
    #[must_use]
    pub fn peek_genome_key(&self) -> GenomeKey {
        self.genome_id_counter
    }
}
