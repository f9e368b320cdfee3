/// Collective write path: a fixed set of cooperating processes appending to
/// one container without the advisory lock.
///
/// Each participant writes under its own group, `<base>/rank-<rank>`. The
/// container tolerates concurrent appenders as long as no two of them write
/// the same dataset path, which disjoint groups guarantee. Sharing one group
/// across ranks is allowed but only safe if the leaf keys never coincide.
use dataset::Dataset;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::key::normalize;
use crate::{save, SaveOptions, SaveOutcome, StoreError};

/// Rank variable set by `benchstore parallel` for its children.
pub const RANK_ENV: &str = "BENCHSTORE_RANK";
/// World size variable set by `benchstore parallel` for its children.
pub const WORLD_SIZE_ENV: &str = "BENCHSTORE_WORLD_SIZE";

/// Rank / size variable pairs, checked in order.
const RANK_SOURCES: [(&str, &str); 3] = [
    (RANK_ENV, WORLD_SIZE_ENV),
    ("OMPI_COMM_WORLD_RANK", "OMPI_COMM_WORLD_SIZE"),
    ("PMI_RANK", "PMI_SIZE"),
];

/// One member of a cooperating set of writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participant {
    pub rank: u32,
    pub size: u32,
}

impl Participant {
    pub fn new(rank: u32, size: u32) -> Result<Self, StoreError> {
        if size == 0 || rank >= size {
            return Err(StoreError::InvalidConfiguration(format!(
                "rank {rank} is outside a world of size {size}"
            )));
        }
        Ok(Self { rank, size })
    }

    /// A world of one.
    pub fn single() -> Self {
        Self { rank: 0, size: 1 }
    }

    /// Reads rank and size from the process environment. A process started
    /// outside any launcher is [`Participant::single`].
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, StoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (rank_key, size_key) in RANK_SOURCES {
            let Some(rank) = lookup(rank_key) else {
                continue;
            };
            let size = lookup(size_key).ok_or_else(|| {
                StoreError::InvalidConfiguration(format!("{rank_key} is set but {size_key} is not"))
            })?;
            return Self::new(parse_u32(rank_key, &rank)?, parse_u32(size_key, &size)?);
        }
        Ok(Self::single())
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, StoreError> {
    value
        .trim()
        .parse()
        .map_err(|_| StoreError::InvalidConfiguration(format!("invalid value {value:?} for {key}")))
}

/// `<base>/rank-<rank>`.
pub fn rank_group(base: &str, rank: u32) -> String {
    hierarchy::join(base, &format!("rank-{rank}"))
}

/// Saves on behalf of one participant.
#[derive(Debug, Clone)]
pub struct CollectiveWriter {
    filename: PathBuf,
    participant: Participant,
    group_path: String,
    options: SaveOptions,
    base_seed: u64,
}

impl CollectiveWriter {
    /// `rank_qualified = false` makes every participant write straight into
    /// `base`, which is logged as a warning for worlds larger than one.
    pub fn new(
        filename: &Path,
        base: &str,
        participant: Participant,
        rank_qualified: bool,
    ) -> Result<Self, StoreError> {
        let participant = Participant::new(participant.rank, participant.size)?;
        hierarchy::segments(base).map_err(|e| StoreError::InvalidConfiguration(e.to_string()))?;

        let group_path = if rank_qualified {
            rank_group(base, participant.rank)
        } else {
            if participant.size > 1 {
                warn!(
                    group = base,
                    size = participant.size,
                    "participants share one group; leaf keys must not coincide"
                );
            }
            normalize(base)
        };
        debug!(rank = participant.rank, size = participant.size, group = %group_path, "collective writer");

        Ok(Self {
            filename: filename.to_path_buf(),
            participant,
            group_path,
            options: SaveOptions::collective(),
            base_seed: config::DEFAULT_SEED,
        })
    }

    pub fn with_base_seed(mut self, seed: u64) -> Self {
        self.base_seed = seed;
        self
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.options = self.options.with_sync(sync);
        self
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn participant(&self) -> Participant {
        self.participant
    }

    pub fn group_path(&self) -> &str {
        &self.group_path
    }

    pub fn options(&self) -> &SaveOptions {
        &self.options
    }

    /// Benchmark seed of this participant: base seed plus rank.
    pub fn seed(&self) -> u64 {
        self.base_seed.wrapping_add(u64::from(self.participant.rank))
    }

    /// Lock-free save of `data` under this participant's group.
    pub fn save(&self, data: &Dataset, leaf_key: &str) -> Result<SaveOutcome, StoreError> {
        save(data, &self.filename, &self.group_path, leaf_key, &self.options)
    }
}
