//! XOR example for neat-pool.
//!
//! Evolves a network solving XOR, a classic benchmark for neuroevolution,
//! scoring each generation on all available cores and recording every new
//! best genome under `./neat-xor/save/run_<N>/`.
//!
//! Run with: `RUST_LOG=info cargo run --example xor`

use std::error::Error;
use std::sync::Arc;

use neat_pool::{
    EvaluationPool, FeedForwardNetwork, Genome, NetworkShape, PoolConfig, Population, Session,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const CASES: [([f64; 2], f64); 4] = [
    ([0.0, 0.0], 0.0),
    ([0.0, 1.0], 1.0),
    ([1.0, 0.0], 1.0),
    ([1.0, 1.0], 0.0),
];

/// XOR fitness: 4 minus the squared error. A perfect network scores 4.0.
fn xor_fitness(genome: &Genome) -> f64 {
    let Ok(mut network) = FeedForwardNetwork::from_genome(genome) else {
        return 0.0;
    };
    let mut total_error = 0.0;
    for (inputs, expected) in &CASES {
        match network.activate_vec(inputs) {
            Ok(output) => total_error += (output[0] - expected).powi(2),
            Err(_) => return 0.0,
        }
    }
    4.0 - total_error
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    println!("NEAT XOR Example");
    println!("================\n");

    let mut config = PoolConfig::new(NetworkShape::new(2, 1));
    config.speciation.population = 150;
    config.default_genome.hidden = 2;
    config.default_genome.connect_chance = 0.5;

    let generations = 100;
    let threads = std::thread::available_parallelism().map_or(1, |n| n.get());
    let seed = 42;

    println!("Population: {}", config.speciation.population);
    println!("Generations: {generations}");
    println!("Threads: {threads}");
    println!();

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut population = Population::new(config, &mut rng)?;
    let pool = EvaluationPool::new(threads, Arc::new(xor_fitness));
    let session = Session::create("neat-xor")?;

    let mut solution_generation = None;
    for _ in 0..generations {
        pool.evaluate(&mut population);

        let avg_fitness = population.genomes().map(|g| g.fitness).sum::<f64>()
            / population.genome_count() as f64;
        let report = population.new_generation(&mut rng);

        if let Some(snapshot) = &report.new_best {
            session.write_snapshot(snapshot)?;
            if snapshot.best.fitness >= 3.9 && solution_generation.is_none() {
                solution_generation = Some(report.generation);
            }
        }

        if report.generation % 10 == 1 || report.generation == generations {
            println!(
                "Gen {:3}: best={:.4}, avg={:.4}, species={}, genomes={}",
                report.generation,
                report.max_fitness,
                avg_fitness,
                report.species_count,
                report.genome_count
            );
        }
        if solution_generation.is_some() {
            break;
        }
    }

    pool.evaluate(&mut population);
    pool.shutdown();

    let champion = population
        .champion()
        .ok_or("population is empty")?
        .clone();
    let record = session.write_winner(&champion, population.generation())?;

    println!();
    println!("Evolution Complete!");
    println!("==================");
    println!("Best fitness: {:.4}", champion.fitness);
    println!("Nodes: {}", champion.node_genes.len());
    println!("Connections: {}", champion.num_enabled_connections());
    println!("Hidden nodes: {}", champion.hidden_keys().len());
    println!("Layers: {}", record.network.layers().len());
    if let Some(gen) = solution_generation {
        println!("Solution found at generation: {gen}");
    }
    println!("Saved to: {}", session.path().display());

    println!("\nChampion XOR outputs:");
    let mut network = record.network;
    for (inputs, expected) in &CASES {
        let output = network.activate_vec(inputs)?[0];
        let rounded = if output > 0.5 { 1.0 } else { 0.0 };
        let status = if (rounded - expected).abs() < 0.1 {
            "✓"
        } else {
            "✗"
        };
        println!(
            "  {} XOR {} = {:.4} (expected {}) {}",
            inputs[0] as i32, inputs[1] as i32, output, *expected as i32, status
        );
    }
    Ok(())
}
