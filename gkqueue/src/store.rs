//! Durable snapshot storage: one JSON file per guild.

use crate::error::{QueueError, Result};
use crate::snapshot::{QueueSnapshot, SNAPSHOT_SCHEMA};
use gktrack::GuildId;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File-backed store under `<data_dir>/queues/`.
///
/// `save` is atomic with respect to crashes: the document is written to a
/// `.tmp` sibling, fsynced, then renamed over the canonical path. `load`
/// only ever reads the canonical path, so a half-written sibling from a
/// crash is ignored. Corrupt or unknown-schema files are logged and treated
/// as absent — a damaged guild starts empty instead of wedging the engine.
///
/// The store knows nothing about track identity; it round-trips descriptor
/// fields as bytes.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    queues_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let queues_dir = data_dir.join("queues");
        fs::create_dir_all(&queues_dir)?;
        Ok(Self { queues_dir })
    }

    fn queue_path(&self, guild_id: &GuildId) -> PathBuf {
        self.queues_dir.join(format!("{guild_id}.json"))
    }

    /// Persists a snapshot atomically.
    pub async fn save(&self, snapshot: &QueueSnapshot) -> Result<()> {
        let path = self.queue_path(&GuildId(snapshot.guild_id.clone()));
        let bytes = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| QueueError::CorruptSnapshot(e.to_string()))?;

        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| QueueError::CorruptSnapshot(format!("save task failed: {e}")))??;

        debug!(guild = %snapshot.guild_id, entries = snapshot.pending.len(), "Saved queue snapshot");
        Ok(())
    }

    /// Loads a guild's snapshot, or `None` when there is nothing usable.
    pub async fn load(&self, guild_id: &GuildId) -> Result<Option<QueueSnapshot>> {
        let path = self.queue_path(guild_id);
        let bytes = match tokio::task::spawn_blocking(move || fs::read(&path))
            .await
            .map_err(|e| QueueError::CorruptSnapshot(format!("load task failed: {e}")))?
        {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let snapshot: QueueSnapshot = match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(guild = %guild_id, error = %err, "Corrupt queue snapshot, starting empty");
                return Ok(None);
            }
        };

        if snapshot.schema != SNAPSHOT_SCHEMA {
            warn!(
                guild = %guild_id,
                schema = snapshot.schema,
                "Unknown snapshot schema, starting empty"
            );
            return Ok(None);
        }

        Ok(Some(snapshot))
    }

    /// Guilds with a snapshot on disk.
    pub fn list_guilds(&self) -> Vec<GuildId> {
        let Ok(dir) = fs::read_dir(&self.queues_dir) else {
            return Vec::new();
        };
        dir.filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                if path.extension().and_then(|x| x.to_str()) != Some("json") {
                    return None;
                }
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| GuildId(s.to_string()))
            })
            .collect()
    }

    /// Removes a guild's snapshot; absent files are not an error.
    pub fn clear(&self, guild_id: &GuildId) -> Result<()> {
        let path = self.queue_path(guild_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}
