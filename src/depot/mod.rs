//! sharded, content-addressed store of TorrentGZ files

mod path;

pub use path::{depot_path, depot_path_with_extension, resolve, DEPOT_EXTENSION};

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::archive::gzip::{self, GzArchive, GzWrite};
use crate::archive::WriteOutcome;
use crate::config::Config;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::Sha1;

/// a depot rooted at a directory holding `config.toml`
pub struct Depot {
    path: PathBuf,
    config: Config,
}

impl Depot {
    /// initialize a new depot at the given path
    pub fn init(path: &Path, depth: usize) -> Result<Self> {
        let config_path = path.join("config.toml");
        if config_path.exists() {
            return Err(Error::DepotExists(path.to_path_buf()));
        }

        let config = Config::new(depth)?;
        std::fs::create_dir_all(path.join("tmp")).with_path(path)?;
        config.save(&config_path)?;

        info!(path = %path.display(), depth, "initialized depot");
        Ok(Self {
            path: path.to_path_buf(),
            config,
        })
    }

    /// open an existing depot
    pub fn open(path: &Path) -> Result<Self> {
        let config_path = path.join("config.toml");
        if !config_path.exists() {
            return Err(Error::DepotNotFound(path.to_path_buf()));
        }

        let config = Config::load(&config_path)?;

        Ok(Self {
            path: path.to_path_buf(),
            config,
        })
    }

    /// depot root path
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// save configuration changes
    pub fn save_config(&self) -> Result<()> {
        self.config.save(&self.config_path())
    }

    /// path to config.toml
    pub fn config_path(&self) -> PathBuf {
        self.path.join("config.toml")
    }

    /// path to tmp directory (for atomic writes)
    pub fn tmp_path(&self) -> PathBuf {
        self.path.join("tmp")
    }

    /// absolute location of the TorrentGZ for a sha1
    pub fn path_for(&self, sha1: &Sha1) -> Result<PathBuf> {
        Ok(self.path.join(depot_path(sha1, self.config.depth)?))
    }

    pub fn contains(&self, sha1: &Sha1) -> Result<bool> {
        Ok(self.path_for(sha1)?.is_file())
    }

    /// store a payload; a payload already present is left as is
    pub fn add<R: Read>(&self, source: R) -> Result<GzWrite> {
        let written = gzip::write_to_depot(
            &self.path,
            &self.tmp_path(),
            self.config.depth,
            source,
            self.config.hash_kinds(),
        )?;
        match written.outcome {
            WriteOutcome::Written => {
                info!(sha1 = %written.sha1, size = written.size, "stored object")
            }
            WriteOutcome::Unchanged => debug!(sha1 = %written.sha1, "object already present"),
        }
        Ok(written)
    }

    /// store the contents of a file
    pub fn add_file(&self, path: &Path) -> Result<GzWrite> {
        let file = File::open(path).with_path(path)?;
        self.add(file)
    }

    /// open a stored object
    pub fn open_object(&self, sha1: &Sha1) -> Result<GzArchive> {
        let path = self.path_for(sha1)?;
        if !path.is_file() {
            return Err(Error::ObjectNotFound(sha1.to_hex()));
        }
        GzArchive::open(&path)
    }
}
