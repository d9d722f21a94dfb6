//! Population management and the generation state machine.
//!
//! A [`Population`] owns every species, the key counters and the run
//! configuration. Fitness is written onto its genomes from outside (see
//! [`evaluation`](crate::evaluation)); [`Population::new_generation`] then
//! moves through:
//!
//! 1. **Ranking**: sort each species, record a new global best.
//! 2. **Culling stale species**: drop species that stopped improving,
//!    except the one holding the global best and the last species left.
//! 3. **Averaging fitness**: normalise every fitness into [0, 1] across the
//!    population and average it per species.
//! 4. **Allocating spawn**: share the target population between species
//!    in proportion to their average fitness, damped toward current size.
//! 5. **Breeding**: cull each species to its survivors and breed children.
//! 6. **Respeciating**: insert the shuffled children until the target size
//!    is reached, drop empty species and pad small ones.

use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::checkpoint::GenerationSnapshot;
use crate::config::{ConfigError, PoolConfig, SeedStrategy};
use crate::gene::{GenomeKey, NodeGene};
use crate::genome::{fitness_serde, Genome, UNEVALUATED};
use crate::innovation::InnovationTracker;
use crate::mutation::gaussian;
use crate::species::{same_species, Species};

/// Summary of the best genome seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestGenome {
    /// Generation in which it was ranked.
    pub generation: u64,
    pub key: GenomeKey,
    #[serde(with = "fitness_serde")]
    pub fitness: f64,
    pub node_count: usize,
    pub connection_count: usize,
}

impl BestGenome {
    #[must_use]
    pub fn of(genome: &Genome, generation: u64) -> Self {
        Self {
            generation,
            key: genome.key,
            fitness: genome.fitness,
            node_count: genome.node_genes.len(),
            connection_count: genome.connection_genes.len(),
        }
    }
}

/// Outcome of one [`Population::new_generation`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    /// The generation that was ranked.
    pub generation: u64,
    /// Species alive after respeciation.
    pub species_count: usize,
    /// Genomes alive after respeciation.
    pub genome_count: usize,
    /// Best fitness seen so far.
    pub max_fitness: f64,
    /// Set when the ranked generation produced a new global best.
    pub new_best: Option<GenerationSnapshot>,
    /// Bred children discarded because the population was full.
    pub discarded_children: usize,
}

/// A speciated NEAT population.
#[derive(Debug, Clone)]
pub struct Population {
    config: PoolConfig,
    species: Vec<Species>,
    tracker: InnovationTracker,
    generation_number: u64,
    max_fitness_ever: f64,
    last_improvement_generation: u64,
    best: Option<BestGenome>,
}

impl Population {
    /// Validate `config` and seed the initial population.
    ///
    /// Creates `speciation.population` genomes with the configured seeding
    /// strategy, sorts them into species and pads every species up to
    /// `min_survivors`.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] raised by [`PoolConfig::validate`].
    pub fn new<R: Rng>(config: PoolConfig, rng: &mut R) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut tracker = InnovationTracker::new(config.network.output_size);
        if let Some(template) = &config.template {
            tracker.observe(template);
        }

        let mut population = Self {
            config,
            species: Vec::new(),
            tracker,
            generation_number: 1,
            max_fitness_ever: UNEVALUATED,
            last_improvement_generation: 1,
            best: None,
        };

        for _ in 0..population.config.speciation.population {
            let genome = population.seed_genome(rng)?;
            population.add_to_species(genome, rng);
        }
        population.pad_species(rng);

        info!(
            "seeded {} genomes in {} species ({:?} seeding)",
            population.genome_count(),
            population.species_count(),
            population.config.default_genome.connection_type
        );
        Ok(population)
    }

    fn seed_genome<R: Rng>(&mut self, rng: &mut R) -> Result<Genome, ConfigError> {
        let key = self.tracker.next_genome_key();
        let rates = self.config.mutation.clone();
        let sigma = rates.weight_mutation_rate;
        let shape = self.config.network;
        let recipe = self.config.default_genome.clone();
        let tracker = &mut self.tracker;

        let mut genome = Genome::new(&shape, rates.clone(), key);
        match recipe.connection_type {
            SeedStrategy::Random => {
                for _ in 0..recipe.hidden {
                    genome.add_node(rng, tracker);
                }
                let hidden = genome.hidden_keys();
                for &input in &genome.input_pins.clone() {
                    for &node in &hidden {
                        if rng.random::<f64>() < recipe.connect_chance {
                            genome.add_connection(input, node, gaussian(rng, sigma), tracker);
                        }
                    }
                }
                for &node in &hidden {
                    for &output in &genome.output_pins.clone() {
                        if rng.random::<f64>() < recipe.connect_chance {
                            genome.add_connection(node, output, gaussian(rng, sigma), tracker);
                        }
                    }
                }
            }
            SeedStrategy::Direct => {
                for &output in &genome.output_pins.clone() {
                    for &input in &genome.input_pins.clone() {
                        genome.add_connection(input, output, gaussian(rng, sigma), tracker);
                    }
                }
                for _ in 0..recipe.hidden {
                    genome.node_genes.push(NodeGene::new(tracker.next_node_key()));
                }
            }
            SeedStrategy::Indirect => {
                let inputs = genome.input_pins.clone();
                let hidden: Vec<_> = (0..inputs.len() / 2)
                    .map(|_| tracker.next_node_key())
                    .collect();
                for &node in &hidden {
                    genome.node_genes.push(NodeGene::new(node));
                }
                for (pair, &node) in inputs.chunks_exact(2).zip(&hidden) {
                    for &input in pair {
                        genome.add_connection(input, node, gaussian(rng, sigma), tracker);
                    }
                }
                for &output in &genome.output_pins.clone() {
                    for &node in &hidden {
                        genome.add_connection(node, output, gaussian(rng, sigma), tracker);
                    }
                }
            }
            SeedStrategy::Template => {
                let template = self.config.template.as_ref().ok_or(ConfigError::MissingTemplate)?;
                genome = template.clone_as(key);
                genome.mutation_rates = rates;
                genome.recurrent_allowed = shape.recurrent;
                for _ in 0..recipe.template_mutate {
                    genome.mutate(rng, tracker);
                }
            }
        }
        Ok(genome)
    }

    /// Insert `child` into the first species whose randomly drawn member is
    /// genetically close, or found a new species for it.
    pub fn add_to_species<R: Rng>(&mut self, child: Genome, rng: &mut R) {
        let params = &self.config.speciation;
        for species in &mut self.species {
            let matches = species
                .random_member(rng)
                .is_some_and(|member| same_species(member, &child, params));
            if matches {
                species.genomes.push(child);
                return;
            }
        }
        debug!(
            "genome {} founded species #{}",
            child.key,
            self.species.len()
        );
        self.species.push(Species::new(child));
    }

    /// Advance one generation. Expects fitness to have been written onto
    /// every genome.
    pub fn new_generation<R: Rng>(&mut self, rng: &mut R) -> GenerationReport {
        let ranked = self.generation_number;
        let new_best = self.rank();
        self.remove_stale_species();
        self.average_fitness();
        let spawn = self.compute_spawn();

        // Breeding
        let survival = self.config.speciation.survival_threshold;
        let min_survivors = self.config.speciation.min_survivors;
        let crossover_chance = self.config.mutation.crossover_chance;
        let mut children = Vec::new();
        for (species, &amount) in self.species.iter_mut().zip(&spawn) {
            species.cull(survival, min_survivors);
            for _ in 0..amount {
                if let Some(child) = species.breed_child(rng, &mut self.tracker, crossover_chance) {
                    children.push(child);
                }
            }
        }

        // Respeciating
        children.shuffle(rng);
        let target = self.config.speciation.population;
        let mut count = self.genome_count();
        let mut children = children.into_iter();
        while count < target {
            let Some(child) = children.next() else { break };
            self.add_to_species(child, rng);
            count += 1;
        }
        let discarded_children = children.count();
        if discarded_children > 0 {
            debug!("discarded {discarded_children} surplus children");
        }

        let before = self.species.len();
        self.species.retain(|s| !s.is_empty());
        if self.species.len() < before {
            debug!("removed {} empty species", before - self.species.len());
        }
        self.pad_species(rng);

        self.generation_number += 1;
        let report = GenerationReport {
            generation: ranked,
            species_count: self.species_count(),
            genome_count: self.genome_count(),
            max_fitness: self.max_fitness_ever,
            new_best,
            discarded_children,
        };
        info!(
            "generation {}: {} species, {} genomes, max fitness {}",
            report.generation, report.species_count, report.genome_count, report.max_fitness
        );
        report
    }

    /// Sort every species best-first and record a new global best.
    fn rank(&mut self) -> Option<GenerationSnapshot> {
        let mut new_best = None;
        for species in &mut self.species {
            species.sort_by_fitness();
            let Some(top) = species.genomes.first() else {
                continue;
            };
            if top.ranking_fitness() > self.max_fitness_ever {
                self.max_fitness_ever = top.fitness;
                self.last_improvement_generation = self.generation_number;
                let best = BestGenome::of(top, self.generation_number);
                info!(
                    "new best genome {} in generation {}: fitness {} ({} nodes, {} connections)",
                    best.key, best.generation, best.fitness, best.node_count, best.connection_count
                );
                self.best = Some(best);
                new_best = Some(GenerationSnapshot {
                    best,
                    genome: top.clone(),
                });
            }
        }
        new_best
    }

    /// Bump staleness and drop species that stopped improving, keeping the
    /// species that holds the global best and never dropping the last one.
    fn remove_stale_species(&mut self) {
        let threshold = self.config.speciation.stale_species;
        let max_fitness = self.max_fitness_ever;
        let mut remaining = self.species.len();
        self.species.retain_mut(|species| {
            species.update_staleness();
            let stale = species.staleness > threshold
                && remaining > 1
                && species.top_fitness < max_fitness;
            if stale {
                remaining -= 1;
                debug!(
                    "removed stale species (staleness {}, top fitness {})",
                    species.staleness, species.top_fitness
                );
            }
            !stale
        });
    }

    /// Set every species' `average_fitness` to the mean of its members'
    /// fitness normalised by `(f - min) / max(1, max - min)`.
    ///
    /// Non-finite fitness counts as the population minimum.
    fn average_fitness(&mut self) {
        let finite = || {
            self.species
                .iter()
                .flat_map(|s| &s.genomes)
                .map(|g| g.fitness)
                .filter(|f| f.is_finite())
        };
        let min = finite().fold(f64::INFINITY, f64::min);
        let max = finite().fold(f64::NEG_INFINITY, f64::max);
        if !min.is_finite() {
            for species in &mut self.species {
                species.average_fitness = 0.0;
            }
            return;
        }
        let range = (max - min).max(1.0);

        for species in &mut self.species {
            let total: f64 = species
                .genomes
                .iter()
                .map(|g| {
                    let f = if g.fitness.is_finite() { g.fitness } else { min };
                    (f - min) / range
                })
                .sum();
            species.average_fitness = if species.genomes.is_empty() {
                0.0
            } else {
                total / species.genomes.len() as f64
            };
        }
    }

    /// Number of children each species breeds this generation.
    fn compute_spawn(&self) -> Vec<usize> {
        let population = self.config.speciation.population as f64;
        let min_survivors = self.config.speciation.min_survivors as i64;
        let sum: f64 = self.species.iter().map(|s| s.average_fitness).sum();

        let spawn: Vec<i64> = self
            .species
            .iter()
            .map(|s| {
                let target = if sum > 0.0 {
                    (s.average_fitness / sum * population).max(min_survivors as f64)
                } else {
                    min_survivors as f64
                };
                let size = s.genomes.len() as i64;
                let delta = (target - size as f64) * 0.5;
                let step = delta.round() as i64;
                if step != 0 {
                    size + step
                } else if delta > 0.0 {
                    size + 1
                } else if delta < 0.0 {
                    size - 1
                } else {
                    size
                }
            })
            .collect();

        let total: i64 = spawn.iter().sum();
        if total <= 0 {
            return vec![min_survivors as usize; spawn.len()];
        }
        let norm = population / total as f64;
        spawn
            .into_iter()
            .map(|s| ((s as f64 * norm).round() as i64).max(min_survivors) as usize)
            .collect()
    }

    fn pad_species<R: Rng>(&mut self, rng: &mut R) {
        let min_survivors = self.config.speciation.min_survivors;
        for species in &mut self.species {
            species.pad(min_survivors, rng, &mut self.tracker);
        }
    }

    /// Total number of genomes over all species.
    #[must_use]
    pub fn genome_count(&self) -> usize {
        self.species.iter().map(Species::len).sum()
    }

    #[must_use]
    pub fn species_count(&self) -> usize {
        self.species.len()
    }

    #[must_use]
    pub fn species(&self) -> &[Species] {
        &self.species
    }

    /// The generation currently being evaluated, starting at 1.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation_number
    }

    /// Best fitness ranked so far.
    #[must_use]
    pub fn max_fitness(&self) -> f64 {
        self.max_fitness_ever
    }

    /// Summary of the best genome ranked so far.
    #[must_use]
    pub fn best(&self) -> Option<&BestGenome> {
        self.best.as_ref()
    }

    /// Generations since the global best last improved.
    #[must_use]
    pub fn generations_since_improvement(&self) -> u64 {
        self.generation_number
            .saturating_sub(self.last_improvement_generation)
    }

    /// The fittest genome currently in the population.
    #[must_use]
    pub fn champion(&self) -> Option<&Genome> {
        self.genomes().max_by(|a, b| a.cmp_fitness(b))
    }

    /// Every genome, species by species.
    pub fn genomes(&self) -> impl Iterator<Item = &Genome> {
        self.species.iter().flat_map(|s| &s.genomes)
    }

    /// Every genome, mutably, in the same order as [`genomes`](Self::genomes).
    pub fn genomes_mut(&mut self) -> impl Iterator<Item = &mut Genome> {
        self.species.iter_mut().flat_map(|s| &mut s.genomes)
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[must_use]
    pub fn tracker(&self) -> &InnovationTracker {
        &self.tracker
    }
}
