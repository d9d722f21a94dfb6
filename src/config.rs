//! Run configuration: network shape, mutation rates, speciation parameters
//! and the initial-population seeding recipe.
//!
//! All records derive serde with field names matching the on-disk JSON
//! layout. Every field has a default, so partial files are accepted.
//! [`PoolConfig::load`] reads a configuration home directory:
//!
//! ```text
//! <home>/config/default_genome.json
//! <home>/config/default_speciating_parameters.json
//! <home>/config/default_mutation_rates.json
//! <home>/template/template_genome.json   (template seeding only)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::genome::Genome;
use crate::topology::GraphTopology;

/// Errors raised while loading or validating a [`PoolConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("seeding strategy is 'template' but no template genome was supplied")]
    MissingTemplate,
    #[error(
        "template genome has {template_inputs} inputs / {template_outputs} outputs, \
         network expects {inputs} / {outputs}"
    )]
    TemplateShapeMismatch {
        template_inputs: usize,
        template_outputs: usize,
        inputs: usize,
        outputs: usize,
    },
    #[error("template genome contains a cycle but recurrent networks are disabled")]
    CyclicTemplate,
    #[error("network must have at least one input")]
    EmptyInputPins,
    #[error("network must have at least one output")]
    EmptyOutputPins,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Input/output layout shared by every genome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkShape {
    pub input_size: usize,
    pub output_size: usize,
    /// Whether genomes may contain cycles.
    #[serde(default)]
    pub recurrent: bool,
}

impl NetworkShape {
    /// A feed-forward shape.
    #[must_use]
    pub fn new(input_size: usize, output_size: usize) -> Self {
        Self {
            input_size,
            output_size,
            recurrent: false,
        }
    }
}

/// Per-genome mutation probabilities and perturbation scales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationRates {
    pub crossover_chance: f64,
    pub connection_add_chance: f64,
    pub connection_delete_chance: f64,
    /// Persisted only; the toggle operator fires with `enable_mutation_chance`.
    pub disable_mutation_chance: f64,
    pub enable_mutation_chance: f64,
    /// Standard deviation of weight perturbations.
    #[serde(alias = "weight_mutation_Rate")]
    pub weight_mutation_rate: f64,
    pub weight_mutate_chance: f64,
    pub node_delete_chance: f64,
    pub node_add_chance: f64,
    pub aggregation_mutation_chance: f64,
    pub aggregation_choices: u32,
    pub activation_mutation_chance: f64,
    pub activation_choices: u32,
    pub bias_mutation_chance: f64,
    /// Standard deviation of bias perturbations.
    pub bias_mutation_rate: f64,
    pub response_mutation_chance: f64,
    /// Standard deviation of response perturbations.
    pub response_mutation_rate: f64,
}

impl Default for MutationRates {
    fn default() -> Self {
        Self {
            crossover_chance: 0.7,
            connection_add_chance: 0.7,
            connection_delete_chance: 0.5,
            disable_mutation_chance: 0.2,
            enable_mutation_chance: 0.2,
            weight_mutation_rate: 0.5,
            weight_mutate_chance: 0.5,
            node_delete_chance: 0.5,
            node_add_chance: 0.7,
            aggregation_mutation_chance: 0.1,
            aggregation_choices: 3,
            activation_mutation_chance: 0.1,
            activation_choices: 3,
            bias_mutation_chance: 0.5,
            bias_mutation_rate: 0.5,
            response_mutation_chance: 0.5,
            response_mutation_rate: 0.5,
        }
    }
}

impl MutationRates {
    /// Every rate zeroed: `mutate` becomes a no-op. Handy in tests.
    #[must_use]
    pub fn frozen() -> Self {
        Self {
            crossover_chance: 0.0,
            connection_add_chance: 0.0,
            connection_delete_chance: 0.0,
            disable_mutation_chance: 0.0,
            enable_mutation_chance: 0.0,
            weight_mutation_rate: 0.0,
            weight_mutate_chance: 0.0,
            node_delete_chance: 0.0,
            node_add_chance: 0.0,
            aggregation_mutation_chance: 0.0,
            activation_mutation_chance: 0.0,
            bias_mutation_chance: 0.0,
            bias_mutation_rate: 0.0,
            response_mutation_chance: 0.0,
            response_mutation_rate: 0.0,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let chances = [
            ("crossover_chance", self.crossover_chance),
            ("connection_add_chance", self.connection_add_chance),
            ("connection_delete_chance", self.connection_delete_chance),
            ("disable_mutation_chance", self.disable_mutation_chance),
            ("enable_mutation_chance", self.enable_mutation_chance),
            ("weight_mutate_chance", self.weight_mutate_chance),
            ("node_delete_chance", self.node_delete_chance),
            ("node_add_chance", self.node_add_chance),
            ("aggregation_mutation_chance", self.aggregation_mutation_chance),
            ("activation_mutation_chance", self.activation_mutation_chance),
            ("bias_mutation_chance", self.bias_mutation_chance),
            ("response_mutation_chance", self.response_mutation_chance),
        ];
        for (name, p) in chances {
            check_probability(name, p)?;
        }

        let scales = [
            ("weight_mutation_rate", self.weight_mutation_rate),
            ("bias_mutation_rate", self.bias_mutation_rate),
            ("response_mutation_rate", self.response_mutation_rate),
        ];
        for (name, sigma) in scales {
            if !sigma.is_finite() || sigma < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a finite non-negative number, got {sigma}"
                )));
            }
        }
        Ok(())
    }
}

/// Parameters of the speciation and population lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeciationParams {
    /// Target population size.
    pub population: usize,
    pub delta_disjoint: f64,
    pub delta_weights: f64,
    /// Genomes are in the same species iff their distance is below this.
    pub delta_threshold: f64,
    /// Generations without improvement before a species may be removed.
    pub stale_species: u32,
    /// Fraction of each species kept as parents.
    #[serde(alias = "survival_threshhold")]
    pub survival_threshold: f64,
    pub min_survivors: usize,
}

impl Default for SpeciationParams {
    fn default() -> Self {
        Self {
            population: 100,
            delta_disjoint: 1.0,
            delta_weights: 0.7,
            delta_threshold: 3.0,
            stale_species: 20,
            survival_threshold: 0.2,
            min_survivors: 2,
        }
    }
}

impl SpeciationParams {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.population == 0 {
            return Err(ConfigError::Invalid("population must be positive".into()));
        }
        if self.min_survivors == 0 {
            return Err(ConfigError::Invalid("min_survivors must be at least 1".into()));
        }
        if self.delta_threshold.is_nan() || self.delta_threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "delta_threshold must be positive, got {}",
                self.delta_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.survival_threshold) || self.survival_threshold == 0.0 {
            return Err(ConfigError::Invalid(format!(
                "survival_threshold must lie in (0, 1], got {}",
                self.survival_threshold
            )));
        }
        for (name, c) in [
            ("delta_disjoint", self.delta_disjoint),
            ("delta_weights", self.delta_weights),
        ] {
            if !c.is_finite() || c < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a finite non-negative number, got {c}"
                )));
            }
        }
        Ok(())
    }
}

/// How the initial population is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SeedStrategy {
    /// Hidden nodes connected to inputs and outputs with `connect_chance`.
    #[default]
    Random,
    /// Every input wired to every output; hidden nodes left unconnected.
    Direct,
    /// Inputs paired onto `input_size / 2` hidden nodes feeding every output.
    Indirect,
    /// Mutated copies of a template genome.
    Template,
}

/// Recipe for the initial population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultGenomeConfig {
    /// Hidden nodes created by the `random` and `direct` strategies.
    pub hidden: usize,
    pub connection_type: SeedStrategy,
    /// Probability of each candidate edge under the `random` strategy.
    pub connect_chance: f64,
    /// Rounds of `mutate` applied to each template copy.
    pub template_mutate: u32,
}

impl Default for DefaultGenomeConfig {
    fn default() -> Self {
        Self {
            hidden: 20,
            connection_type: SeedStrategy::Random,
            connect_chance: 0.2,
            template_mutate: 3,
        }
    }
}

/// Everything a [`Population`](crate::Population) needs at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub network: NetworkShape,
    #[serde(default)]
    pub mutation: MutationRates,
    #[serde(default)]
    pub speciation: SpeciationParams,
    #[serde(default)]
    pub default_genome: DefaultGenomeConfig,
    /// Seed genome for [`SeedStrategy::Template`].
    #[serde(default)]
    pub template: Option<Genome>,
}

impl PoolConfig {
    /// A configuration with default records for the given shape.
    #[must_use]
    pub fn new(network: NetworkShape) -> Self {
        Self {
            network,
            mutation: MutationRates::default(),
            speciation: SpeciationParams::default(),
            default_genome: DefaultGenomeConfig::default(),
            template: None,
        }
    }

    /// Read the configuration records from a home directory.
    ///
    /// The template genome is only read when the seeding strategy asks for
    /// it. The result is validated before it is returned.
    pub fn load(home: impl AsRef<Path>, network: NetworkShape) -> Result<Self, ConfigError> {
        let home = home.as_ref();
        let config_dir = home.join("config");

        let default_genome: DefaultGenomeConfig =
            read_json(&config_dir.join("default_genome.json"))?;
        let speciation: SpeciationParams =
            read_json(&config_dir.join("default_speciating_parameters.json"))?;
        let mutation: MutationRates = read_json(&config_dir.join("default_mutation_rates.json"))?;

        let template = if default_genome.connection_type == SeedStrategy::Template {
            Some(read_json::<Genome>(
                &home.join("template").join("template_genome.json"),
            )?)
        } else {
            None
        };

        let config = Self {
            network,
            mutation,
            speciation,
            default_genome,
            template,
        };
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration records into a home directory, in the layout
    /// [`PoolConfig::load`] reads.
    pub fn save(&self, home: impl AsRef<Path>) -> Result<(), ConfigError> {
        let home = home.as_ref();
        let config_dir = home.join("config");
        create_dir(&config_dir)?;

        write_json(&config_dir.join("default_genome.json"), &self.default_genome)?;
        write_json(
            &config_dir.join("default_speciating_parameters.json"),
            &self.speciation,
        )?;
        write_json(&config_dir.join("default_mutation_rates.json"), &self.mutation)?;

        if let Some(template) = &self.template {
            let template_dir = home.join("template");
            create_dir(&template_dir)?;
            write_json(&template_dir.join("template_genome.json"), template)?;
        }
        Ok(())
    }

    /// Check every record for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.input_size == 0 {
            return Err(ConfigError::EmptyInputPins);
        }
        if self.network.output_size == 0 {
            return Err(ConfigError::EmptyOutputPins);
        }

        self.mutation.validate()?;
        self.speciation.validate()?;
        check_probability("connect_chance", self.default_genome.connect_chance)?;

        if self.default_genome.connection_type == SeedStrategy::Template {
            let template = self.template.as_ref().ok_or(ConfigError::MissingTemplate)?;
            if template.input_pins.len() != self.network.input_size
                || template.output_pins.len() != self.network.output_size
            {
                return Err(ConfigError::TemplateShapeMismatch {
                    template_inputs: template.input_pins.len(),
                    template_outputs: template.output_pins.len(),
                    inputs: self.network.input_size,
                    outputs: self.network.output_size,
                });
            }
            // disabled genes count: re-enabling one must not close a loop
            if !self.network.recurrent && GraphTopology::all_edges(template).has_cycle() {
                return Err(ConfigError::CyclicTemplate);
            }
        }
        Ok(())
    }
}

fn check_probability(name: &str, p: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be a probability in [0, 1], got {p}"
        )))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn create_dir(path: &Path) -> Result<(), ConfigError> {
    fs::create_dir_all(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gene::ConnectionGene;

    #[test]
    fn test_defaults_match_reference_values() {
        let m = MutationRates::default();
        assert_eq!(m.crossover_chance, 0.7);
        assert_eq!(m.node_add_chance, 0.7);
        assert_eq!(m.aggregation_choices, 3);

        let s = SpeciationParams::default();
        assert_eq!(s.population, 100);
        assert_eq!(s.delta_threshold, 3.0);
        assert_eq!(s.stale_species, 20);
        assert_eq!(s.min_survivors, 2);

        let g = DefaultGenomeConfig::default();
        assert_eq!(g.hidden, 20);
        assert_eq!(g.connection_type, SeedStrategy::Random);
    }

    #[test]
    fn test_legacy_field_spellings() {
        let m: MutationRates = serde_json::from_str(r#"{"weight_mutation_Rate": 0.25}"#).unwrap();
        assert_eq!(m.weight_mutation_rate, 0.25);
        assert_eq!(m.crossover_chance, 0.7);

        let s: SpeciationParams =
            serde_json::from_str(r#"{"survival_threshhold": 0.5, "population": 10}"#).unwrap();
        assert_eq!(s.survival_threshold, 0.5);
        assert_eq!(s.population, 10);
    }

    #[test]
    fn test_seed_strategy_is_lowercase() {
        let g: DefaultGenomeConfig =
            serde_json::from_str(r#"{"connection_type": "indirect"}"#).unwrap();
        assert_eq!(g.connection_type, SeedStrategy::Indirect);
        let json = serde_json::to_string(&SeedStrategy::Template).unwrap();
        assert_eq!(json, "\"template\"");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PoolConfig::new(NetworkShape::new(2, 1));
        assert!(config.validate().is_ok());

        config.mutation.node_add_chance = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.mutation.node_add_chance = 0.5;

        config.speciation.population = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.speciation.population = 10;

        config.speciation.survival_threshold = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.speciation.survival_threshold = 0.3;

        config.network.input_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::EmptyInputPins)));
        config.network = NetworkShape::new(2, 0);
        assert!(matches!(config.validate(), Err(ConfigError::EmptyOutputPins)));
    }

    #[test]
    fn test_validate_template() {
        let shape = NetworkShape::new(2, 1);
        let mut config = PoolConfig::new(shape);
        config.default_genome.connection_type = SeedStrategy::Template;
        assert!(matches!(config.validate(), Err(ConfigError::MissingTemplate)));

        config.template = Some(Genome::new(&NetworkShape::new(3, 1), MutationRates::default(), 0));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TemplateShapeMismatch { .. })
        ));

        let mut cyclic = Genome::new(&shape, MutationRates::default(), 0);
        cyclic.node_genes.push(crate::gene::NodeGene::new(1));
        cyclic.connection_genes.push(ConnectionGene::new(0, 0, 1, 1.0));
        cyclic.connection_genes.push(ConnectionGene::new(1, 1, 0, 1.0));
        config.template = Some(cyclic.clone());
        assert!(matches!(config.validate(), Err(ConfigError::CyclicTemplate)));

        // a disabled back edge still closes the loop
        cyclic.connection_genes[1].enabled = false;
        config.template = Some(cyclic.clone());
        assert!(matches!(config.validate(), Err(ConfigError::CyclicTemplate)));

        config.network.recurrent = true;
        assert!(config.validate().is_ok());

        config.network.recurrent = false;
        cyclic.connection_genes.pop();
        config.template = Some(cyclic);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PoolConfig::load(dir.path(), NetworkShape::new(2, 1)).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = PoolConfig::new(NetworkShape::new(2, 1));
        config.save(dir.path()).unwrap();
        fs::write(
            dir.path().join("config").join("default_mutation_rates.json"),
            "{ not json",
        )
        .unwrap();
        let err = PoolConfig::load(dir.path(), NetworkShape::new(2, 1)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let shape = NetworkShape::new(4, 2);
        let mut config = PoolConfig::new(shape);
        config.speciation.population = 30;
        config.mutation.bias_mutation_rate = 0.125;
        config.default_genome.connection_type = SeedStrategy::Template;
        config.template = Some(Genome::new(&shape, MutationRates::default(), 3));
        config.save(dir.path()).unwrap();

        let loaded = PoolConfig::load(dir.path(), shape).unwrap();
        assert_eq!(loaded, config);
    }
}
