//! Vessel identity cache file
//!
//! JSON object keyed by MMSI, value = identity block. Read once at startup
//! to seed the registry, rewritten periodically. Positions are never
//! persisted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{
    errors::CacheIoError,
    models::{Mmsi, VesselIdentity},
    registry::VesselRegistry,
};

/// Write-behind identity cache
pub struct IdentityCache {
    path: PathBuf,
    flush_interval: Duration,
    last_flush: Instant,
}

impl IdentityCache {
    pub fn new(path: PathBuf, flush_interval: Duration) -> Self {
        info!(
            "Initializing IdentityCache: path={}, flush_interval={:?}",
            path.display(),
            flush_interval
        );
        Self {
            path,
            flush_interval,
            last_flush: Instant::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read cached identities. A missing file is an empty cache.
    pub async fn load(&self) -> Result<Vec<(Mmsi, VesselIdentity)>, CacheIoError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No identity cache at {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(origin) => {
                return Err(CacheIoError::Io {
                    path: self.path.clone(),
                    origin,
                })
            }
        };

        let entries: BTreeMap<u64, VesselIdentity> =
            serde_json::from_slice(&contents).map_err(|origin| CacheIoError::Format {
                path: self.path.clone(),
                origin,
            })?;

        let identities = entries
            .into_iter()
            .filter_map(|(raw, identity)| match Mmsi::try_from(raw) {
                Ok(mmsi) => Some((mmsi, identity)),
                Err(e) => {
                    warn!("Skipping cached identity: {}", e);
                    None
                }
            })
            .collect::<Vec<_>>();

        info!(
            "Loaded {} cached identities from {}",
            identities.len(),
            self.path.display()
        );
        Ok(identities)
    }

    /// Conditionally flush based on time interval
    pub async fn maybe_flush(&mut self, registry: &VesselRegistry) -> Result<bool, CacheIoError> {
        if self.last_flush.elapsed() < self.flush_interval {
            return Ok(false);
        }
        debug!("Performing periodic identity cache flush");
        self.flush(registry).await?;
        Ok(true)
    }

    /// Rewrite the cache file from the registry's identities
    pub async fn flush(&mut self, registry: &VesselRegistry) -> Result<(), CacheIoError> {
        self.last_flush = Instant::now();

        let entries = registry
            .identities()
            .map(|(mmsi, identity)| (mmsi.value(), identity))
            .collect::<BTreeMap<u32, &VesselIdentity>>();
        let json = serde_json::to_vec_pretty(&entries).map_err(|origin| CacheIoError::Format {
            path: self.path.clone(),
            origin,
        })?;

        // Replace atomically so a crash never leaves a truncated cache.
        let staging = staging_path(&self.path);
        let io_error = |origin: std::io::Error| CacheIoError::Io {
            path: self.path.clone(),
            origin,
        };
        tokio::fs::write(&staging, json).await.map_err(io_error)?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(io_error)?;

        debug!(
            "Flushed {} identities to {}",
            entries.len(),
            self.path.display()
        );
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Builder for IdentityCache with simplified configuration
pub struct IdentityCacheBuilder {
    path: Option<PathBuf>,
    flush_interval: Option<Duration>,
}

impl Default for IdentityCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityCacheBuilder {
    pub fn new() -> Self {
        Self {
            path: None,
            flush_interval: None,
        }
    }

    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    pub fn build(self) -> IdentityCache {
        let path = self
            .path
            .unwrap_or_else(|| PathBuf::from("ais-cot-identities.json"));
        let flush_interval = self.flush_interval.unwrap_or(Duration::from_secs(60));

        IdentityCache::new(path, flush_interval)
    }
}
