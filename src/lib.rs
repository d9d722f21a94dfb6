//! # NEAT Pool
//!
//! A NeuroEvolution of Augmenting Topologies (NEAT) engine that evolves the
//! structure and weights of feed-forward networks against a user-supplied
//! fitness function.
//!
//! ## Features
//!
//! - **Topology Evolution**: Node and connection mutations that keep
//!   feed-forward genomes acyclic, plus key-aligned crossover
//! - **Speciation**: Genomes are clustered by genetic distance; stale species
//!   are culled and offspring are shared by normalised average fitness
//! - **Phenotype Compiler**: Genomes compile into layered
//!   [`FeedForwardNetwork`]s evaluated in a single pass
//! - **Parallel Evaluation**: A claim cursor and barrier let several threads
//!   score one generation, each genome exactly once
//! - **Persistence**: JSON configuration, best-genome snapshots and winner
//!   records
//!
//! ## Quick Start
//!
//! ```rust
//! use neat_pool::{FeedForwardNetwork, Genome, NetworkShape, PoolConfig, Population, WorkerCoordinator};
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//!
//! let mut config = PoolConfig::new(NetworkShape::new(2, 1));
//! config.speciation.population = 20;
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//! let mut population = Population::new(config, &mut rng).unwrap();
//!
//! // Reward larger networks, just to have a gradient.
//! let fitness = |genome: &Genome| genome.num_enabled_connections() as f64;
//!
//! let coordinator = WorkerCoordinator::new();
//! for _ in 0..5 {
//!     coordinator.evaluate_population(&mut population, &fitness);
//!     population.new_generation(&mut rng);
//! }
//!
//! coordinator.evaluate_population(&mut population, &fitness);
//! let champion = population.champion().unwrap();
//! let mut network = FeedForwardNetwork::from_genome(champion).unwrap();
//! let output = network.activate_vec(&[1.0, 0.0]).unwrap();
//! assert_eq!(output.len(), 1);
//! ```
//!
//! ## Architecture
//!
//! ### Keys
//!
//! Node, connection and genome keys come from one [`InnovationTracker`] per
//! population. Input pins are the negative keys `-1..=-input_size`, output
//! pins are `0..output_size`, and every structural mutation draws fresh
//! keys above everything seen so far.
//!
//! ### Generation cycle
//!
//! 1. Evaluate: fitness is written onto every genome, either directly or
//!    through [`EvaluationPool`].
//! 2. [`Population::new_generation`] ranks, removes stale species, shares
//!    out offspring, breeds and respeciates.
//! 3. A new global best is handed back in the [`GenerationReport`] and can
//!    be stored with [`Session::write_snapshot`].

pub mod activation;
pub mod checkpoint;
pub mod config;
pub mod evaluation;
pub mod gene;
pub mod genome;
pub mod innovation;
pub mod mutation;
pub mod network;
pub mod population;
pub mod species;
pub mod topology;

// Re-exports for convenience
pub use activation::{Activation, Aggregation};
pub use checkpoint::{GenerationSnapshot, PersistenceError, Session, WinnerRecord};
pub use config::{
    ConfigError, DefaultGenomeConfig, MutationRates, NetworkShape, PoolConfig, SeedStrategy,
    SpeciationParams,
};
pub use evaluation::{
    Claim, EvaluationPool, EvaluationReport, FitnessEvaluator, WorkerCoordinator,
};
pub use gene::{ConnectionGene, ConnectionKey, GenomeKey, NodeGene, NodeKey};
pub use genome::{Genome, UNEVALUATED};
pub use innovation::InnovationTracker;
pub use network::{FeedForwardNetwork, NetworkError, Neuron, NeuronInput};
pub use population::{BestGenome, GenerationReport, Population};
pub use species::{genetic_distance, same_species, Species};
pub use topology::{feed_forward_layers, required_for_output, GraphTopology};
