//! `World`: the handle every operation in `ops.rs` takes as context,
//! binding one communicator to one runtime for the lifetime of the process
//! (§5, §6). Grounded on `original_source`'s `CTF::World`, which owns both
//! the MPI communicator and the `dist_tensor` bookkeeping every tensor it
//! creates is registered against.

use crate::communicator::Communicator;
use crate::error::{CtfError, Result};
use crate::runtime::Runtime;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

pub struct World {
    pub comm: Arc<dyn Communicator>,
    pub runtime: Runtime,
}

/// Explicit configuration for [`World::from_config`], optionally loaded from
/// a TOML file via [`World::from_toml_str`]/[`World::from_toml_file`].
#[derive(Debug, Clone, Deserialize)]
pub struct WorldConfig {
    #[serde(default)]
    pub worker_threads: usize,
    #[serde(default)]
    pub profile: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig {
            worker_threads: 0,
            profile: false,
        }
    }
}

impl World {
    pub fn new(comm: Arc<dyn Communicator>, worker_threads: usize) -> World {
        World {
            comm,
            runtime: Runtime::new(worker_threads),
        }
    }

    /// Build a `World` from an explicit config struct rather than bare
    /// constructor arguments (§2's Configuration component).
    pub fn from_config(comm: Arc<dyn Communicator>, config: WorldConfig) -> World {
        World::new(comm, config.worker_threads)
    }

    pub fn from_toml_str(comm: Arc<dyn Communicator>, toml_str: &str) -> Result<World> {
        let config: WorldConfig = toml::from_str(toml_str)
            .map_err(|e| CtfError::InvalidInput(format!("invalid world config: {}", e)))?;
        Ok(World::from_config(comm, config))
    }

    pub fn from_toml_file(comm: Arc<dyn Communicator>, path: &Path) -> Result<World> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CtfError::InvalidInput(format!("failed to read world config {}: {}", path.display(), e))
        })?;
        World::from_toml_str(comm, &contents)
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }
}
