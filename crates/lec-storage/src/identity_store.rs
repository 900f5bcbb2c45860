//! Persistence backends for the identity map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lec_core::{EntityKind, IdentityMap, IdentitySnapshot};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

#[async_trait]
pub trait IdentityBackend: Send + Sync {
    async fn load(&self) -> Result<IdentitySnapshot>;
    async fn save(&self, snapshot: &IdentitySnapshot) -> Result<()>;

    async fn load_map(&self) -> Result<IdentityMap> {
        Ok(IdentityMap::from_snapshot(self.load().await?))
    }

    /// Persist the map if it minted new entries.
    async fn flush(&self, map: &mut IdentityMap) -> Result<bool> {
        if !map.is_dirty() {
            return Ok(false);
        }
        self.save(map.snapshot()).await?;
        map.mark_flushed();
        Ok(true)
    }
}

/// One JSON object per entity kind (`team_ids.json`, `player_ids.json`, `game_ids.json`).
#[derive(Debug, Clone)]
pub struct JsonFileIdentityBackend {
    dir: PathBuf,
}

impl JsonFileIdentityBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, kind: EntityKind) -> PathBuf {
        self.dir.join(format!("{}_ids.json", kind.as_str()))
    }
}

#[async_trait]
impl IdentityBackend for JsonFileIdentityBackend {
    async fn load(&self) -> Result<IdentitySnapshot> {
        let mut snapshot = IdentitySnapshot::default();
        for kind in EntityKind::ALL {
            let path = self.path_for(kind);
            let text = match fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
            };
            let entries: BTreeMap<String, Uuid> = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            info!(kind = %kind, entries = entries.len(), path = %path.display(), "loaded identity map");
            snapshot.entries.insert(kind, entries);
        }
        Ok(snapshot)
    }

    async fn save(&self, snapshot: &IdentitySnapshot) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        for kind in EntityKind::ALL {
            let empty = BTreeMap::new();
            let entries = snapshot.entries.get(&kind).unwrap_or(&empty);
            let bytes = serde_json::to_vec_pretty(entries)
                .with_context(|| format!("serializing {kind} identities"))?;
            write_atomically(&self.path_for(kind), &bytes).await?;
        }
        Ok(())
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("identity path {} has no parent", path.display()))?;
    let temp = parent.join(format!(".{}.tmp", Uuid::new_v4()));
    crate::write_new_file(&temp, bytes).await?;
    if let Err(err) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(err).with_context(|| format!("renaming {} -> {}", temp.display(), path.display()));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryIdentityBackend {
    snapshot: Mutex<IdentitySnapshot>,
}

impl MemoryIdentityBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityBackend for MemoryIdentityBackend {
    async fn load(&self) -> Result<IdentitySnapshot> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn save(&self, snapshot: &IdentitySnapshot) -> Result<()> {
        *self.snapshot.lock().await = snapshot.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const HASH: &str = "ffeeddccbbaa99887766554433221100";

    #[tokio::test]
    async fn ids_survive_a_persist_and_reload_cycle() {
        let dir = tempdir().expect("tempdir");
        let backend = JsonFileIdentityBackend::new(dir.path().join("ids"));

        let mut map = backend.load_map().await.expect("empty load");
        let team = map.resolve(EntityKind::Team, &format!("oe:team:{HASH}"));
        let game = map.resolve(EntityKind::Game, "ESPORTSTMNT01_1");
        assert!(backend.flush(&mut map).await.expect("flush"));
        assert!(!backend.flush(&mut map).await.expect("clean flush is a no-op"));

        let mut reloaded = backend.load_map().await.expect("reload");
        assert_eq!(reloaded.resolve(EntityKind::Team, HASH), team);
        assert_eq!(reloaded.resolve(EntityKind::Game, "ESPORTSTMNT01_1"), game);
        assert!(!reloaded.is_dirty());
        assert!(backend.path_for(EntityKind::Player).exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let backend = JsonFileIdentityBackend::new(dir.path());
        std::fs::write(backend.path_for(EntityKind::Team), "{not json").expect("write");
        assert!(backend.load().await.is_err());
    }

    #[tokio::test]
    async fn memory_backend_round_trips() {
        let backend = MemoryIdentityBackend::new();
        let mut map = backend.load_map().await.expect("load");
        let id = map.resolve(EntityKind::Player, HASH);
        backend.flush(&mut map).await.expect("flush");
        let reloaded = backend.load_map().await.expect("reload");
        assert_eq!(reloaded.lookup(EntityKind::Player, HASH), Some(id));
    }
}
