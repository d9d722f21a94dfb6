//! Species and the genetic-distance predicate.
//!
//! Two genomes are compared gene by gene on key. For node genes, a key only
//! one genome has is *disjoint*; a shared key adds `delta_weights` for a
//! differing activation and again for a differing aggregation. Connection
//! genes are compared the same way, with the `enabled` flag and the weight
//! as the compared fields. Each part is normalised by the larger gene count
//! and the two parts are summed:
//!
//! ```text
//! d = (mismatch_n + disjoint_n * delta_disjoint) / max(|N1|, |N2|)
//!   + (mismatch_c + disjoint_c * delta_disjoint) / max(|C1|, |C2|)
//! ```
//!
//! Genomes belong to the same species iff `d < delta_threshold`.

use std::collections::HashMap;

use rand::Rng;

use crate::config::SpeciationParams;
use crate::gene::{ConnectionGene, NodeGene};
use crate::genome::{Genome, UNEVALUATED};
use crate::innovation::InnovationTracker;

/// The distance summed by [`same_species`].
#[must_use]
pub fn genetic_distance(g1: &Genome, g2: &Genome, params: &SpeciationParams) -> f64 {
    let node_distance = gene_distance(
        &g1.node_genes,
        &g2.node_genes,
        |n: &NodeGene| n.key,
        |a, b| {
            let mut mismatch = 0.0;
            if a.activation != b.activation {
                mismatch += params.delta_weights;
            }
            if a.aggregation != b.aggregation {
                mismatch += params.delta_weights;
            }
            mismatch
        },
        params.delta_disjoint,
    );

    let connection_distance = gene_distance(
        &g1.connection_genes,
        &g2.connection_genes,
        |c: &ConnectionGene| c.key,
        |a, b| {
            let mut mismatch = 0.0;
            if a.enabled != b.enabled {
                mismatch += params.delta_weights;
            }
            if a.weight != b.weight {
                mismatch += params.delta_weights;
            }
            mismatch
        },
        params.delta_disjoint,
    );

    node_distance + connection_distance
}

/// Whether two genomes are close enough to share a species.
#[inline]
#[must_use]
pub fn same_species(g1: &Genome, g2: &Genome, params: &SpeciationParams) -> bool {
    genetic_distance(g1, g2, params) < params.delta_threshold
}

fn gene_distance<G, K, F, M>(a: &[G], b: &[G], key_of: F, mismatch: M, delta_disjoint: f64) -> f64
where
    K: std::hash::Hash + Eq,
    F: Fn(&G) -> K,
    M: Fn(&G, &G) -> f64,
{
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 0.0;
    }

    let b_by_key: HashMap<K, &G> = b.iter().map(|g| (key_of(g), g)).collect();
    let mut mismatch_sum = 0.0;
    let mut matched = 0usize;
    let mut disjoint = 0usize;
    for gene in a {
        match b_by_key.get(&key_of(gene)) {
            Some(&other) => {
                matched += 1;
                mismatch_sum += mismatch(gene, other);
            }
            None => disjoint += 1,
        }
    }
    disjoint += b.len() - matched;

    (mismatch_sum + disjoint as f64 * delta_disjoint) / longest as f64
}

/// A cluster of genetically similar genomes.
#[derive(Debug, Clone, PartialEq)]
pub struct Species {
    /// Best fitness any member has reached.
    pub top_fitness: f64,
    /// Mean normalised fitness of the members, in [0, 1].
    pub average_fitness: f64,
    /// Generations since `top_fitness` last improved.
    pub staleness: u32,
    pub genomes: Vec<Genome>,
}

impl Species {
    /// A species founded by `genome`.
    #[must_use]
    pub fn new(genome: Genome) -> Self {
        Self {
            top_fitness: UNEVALUATED,
            average_fitness: 0.0,
            staleness: 0,
            genomes: vec![genome],
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.genomes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.genomes.is_empty()
    }

    /// Sort members by fitness, best first. NaN and unevaluated members
    /// go last.
    pub fn sort_by_fitness(&mut self) {
        self.genomes.sort_by(|a, b| b.cmp_fitness(a));
    }

    /// The member with the highest fitness.
    #[must_use]
    pub fn champion(&self) -> Option<&Genome> {
        self.genomes.iter().max_by(|a, b| a.cmp_fitness(b))
    }

    /// Advance staleness by one generation, resetting it if any member beat
    /// `top_fitness`.
    pub fn update_staleness(&mut self) {
        self.staleness = self.staleness.saturating_add(1);
        for genome in &self.genomes {
            if genome.fitness > self.top_fitness {
                self.top_fitness = genome.fitness;
                self.staleness = 0;
            }
        }
    }

    /// Keep the best `ceil(survival_threshold * len)` members, but never
    /// fewer than `min_survivors` nor fewer than one.
    pub fn cull(&mut self, survival_threshold: f64, min_survivors: usize) {
        self.sort_by_fitness();
        let cut = (survival_threshold * self.genomes.len() as f64).ceil() as usize;
        let remaining = cut.max(min_survivors).max(1);
        self.genomes.truncate(remaining);
    }

    /// A uniformly drawn member.
    pub fn random_member<R: Rng>(&self, rng: &mut R) -> Option<&Genome> {
        if self.genomes.is_empty() {
            return None;
        }
        Some(&self.genomes[rng.random_range(0..self.genomes.len())])
    }

    /// Breed one child from the current members.
    ///
    /// With `crossover_chance` two members are drawn and crossed (a clone if
    /// the same member is drawn twice); otherwise one member is cloned. The
    /// child gets a fresh key, no fitness, and one round of mutation.
    pub fn breed_child<R: Rng>(
        &self,
        rng: &mut R,
        tracker: &mut InnovationTracker,
        crossover_chance: f64,
    ) -> Option<Genome> {
        if self.genomes.is_empty() {
            return None;
        }
        let n = self.genomes.len();
        let key = tracker.next_genome_key();

        let mut child = if rng.random::<f64>() < crossover_chance {
            let (i, j) = (rng.random_range(0..n), rng.random_range(0..n));
            if i == j {
                self.genomes[i].clone_as(key)
            } else {
                self.genomes[i].crossover(&self.genomes[j], rng, key)
            }
        } else {
            self.genomes[rng.random_range(0..n)].clone_as(key)
        };

        child.mutate(rng, tracker);
        Some(child)
    }

    /// Top up to `min_survivors` members by cloning and mutating the first
    /// member.
    pub fn pad<R: Rng>(&mut self, min_survivors: usize, rng: &mut R, tracker: &mut InnovationTracker) {
        while !self.genomes.is_empty() && self.genomes.len() < min_survivors {
            let mut clone = self.genomes[0].clone_as(tracker.next_genome_key());
            clone.mutate(rng, tracker);
            self.genomes.push(clone);
        }
    }
}
