//! Session directories, best-genome snapshots and winner records.
//!
//! A [`Session`] owns one run directory under `<home>/save/`:
//!
//! ```text
//! <home>/save/run_<N>/
//!     genomes/best_gen_<G>.json   one per new global best
//!     winner.json                 final genome + compiled network
//! ```
//!
//! `N` is the first number whose directory does not exist yet. Records are
//! JSON. Write failures are returned to the caller; nothing in memory is
//! rolled back.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::genome::Genome;
use crate::network::{FeedForwardNetwork, NetworkError};
use crate::population::BestGenome;

/// Errors raised while writing or reading session files.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to (de)serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to compile winner network: {0}")]
    Network(#[from] NetworkError),
}

/// The best genome of a generation, as handed out by
/// [`Population::new_generation`](crate::Population::new_generation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSnapshot {
    pub best: BestGenome,
    pub genome: Genome,
}

/// A final winner: the genome and the network compiled from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinnerRecord {
    pub generation: u64,
    pub genome: Genome,
    pub network: FeedForwardNetwork,
}

impl WinnerRecord {
    /// Compile `genome` and bundle it with its network.
    ///
    /// # Errors
    ///
    /// Propagates compiler errors.
    pub fn new(genome: Genome, generation: u64) -> Result<Self, NetworkError> {
        let network = FeedForwardNetwork::from_genome(&genome)?;
        Ok(Self {
            generation,
            genome,
            network,
        })
    }
}

/// One run directory.
#[derive(Debug, Clone)]
pub struct Session {
    root: PathBuf,
}

impl Session {
    /// Create the first free `run_<N>` directory under `<home>/save`, with
    /// its `genomes` subdirectory.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::Io`] if a directory cannot be created.
    pub fn create(home: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let save = home.as_ref().join("save");
        fs::create_dir_all(&save).map_err(|source| io_error(&save, source))?;

        let mut n = 0u32;
        let root = loop {
            let candidate = save.join(format!("run_{n}"));
            match fs::create_dir(&candidate) {
                Ok(()) => break candidate,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
                Err(source) => return Err(io_error(&candidate, source)),
            }
        };

        let genomes = root.join("genomes");
        fs::create_dir(&genomes).map_err(|source| io_error(&genomes, source))?;
        info!("created session directory {}", root.display());
        Ok(Self { root })
    }

    /// Reattach to an existing run directory.
    #[must_use]
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn genomes_dir(&self) -> PathBuf {
        self.root.join("genomes")
    }

    /// Path of the snapshot file for `generation`.
    #[must_use]
    pub fn snapshot_path(&self, generation: u64) -> PathBuf {
        self.genomes_dir().join(format!("best_gen_{generation}.json"))
    }

    #[must_use]
    pub fn winner_path(&self) -> PathBuf {
        self.root.join("winner.json")
    }

    /// Write `genomes/best_gen_<G>.json`.
    ///
    /// # Errors
    ///
    /// [`PersistenceError`] on serialization or write failure.
    pub fn write_snapshot(&self, snapshot: &GenerationSnapshot) -> Result<PathBuf, PersistenceError> {
        let path = self.snapshot_path(snapshot.best.generation);
        write_json(&path, snapshot)?;
        debug!(
            "wrote best genome {} of generation {} to {}",
            snapshot.best.key,
            snapshot.best.generation,
            path.display()
        );
        Ok(path)
    }

    /// Compile `genome` and write it with its network to `winner.json`.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::Network`] if the genome does not compile, other
    /// variants on write failure.
    pub fn write_winner(&self, genome: &Genome, generation: u64) -> Result<WinnerRecord, PersistenceError> {
        let record = WinnerRecord::new(genome.clone(), generation)?;
        let path = self.winner_path();
        write_json(&path, &record)?;
        info!("wrote winner genome {} to {}", genome.key, path.display());
        Ok(record)
    }

    /// Read back the snapshot of `generation`.
    ///
    /// # Errors
    ///
    /// [`PersistenceError`] if the file is missing or malformed.
    pub fn load_snapshot(&self, generation: u64) -> Result<GenerationSnapshot, PersistenceError> {
        read_json(&self.snapshot_path(generation))
    }

    /// Read back `winner.json`.
    ///
    /// # Errors
    ///
    /// [`PersistenceError`] if the file is missing or malformed.
    pub fn load_winner(&self) -> Result<WinnerRecord, PersistenceError> {
        read_json(&self.winner_path())
    }
}

fn io_error(path: &Path, source: io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| PersistenceError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(|source| io_error(path, source))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let text = fs::read_to_string(path).map_err(|source| io_error(path, source))?;
    serde_json::from_str(&text).map_err(|source| PersistenceError::Serialize {
        path: path.to_path_buf(),
        source,
    })
}
