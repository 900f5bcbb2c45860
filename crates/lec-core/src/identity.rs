//! Stable mapping from source identifiers to internal UUIDs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Team,
    Player,
    Game,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Team, EntityKind::Player, EntityKind::Game];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Team => "team",
            EntityKind::Player => "player",
            EntityKind::Game => "game",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted form of the identity map: canonical key -> UUID per entity kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    #[serde(default)]
    pub entries: BTreeMap<EntityKind, BTreeMap<String, Uuid>>,
}

impl IdentitySnapshot {
    pub fn len(&self, kind: EntityKind) -> usize {
        self.entries.get(&kind).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(BTreeMap::is_empty)
    }
}

/// Resolves raw source keys to UUIDs, minting new ones on first sight.
///
/// Raw keys already in canonical hyphenated UUID form pass through unchanged.
/// Otherwise the key is reduced to its canonical hash (32 hex characters, either the
/// whole key or its last `:` segment) so that differently prefixed spellings of the
/// same entity map to one UUID. Keys without a recognizable hash are used verbatim.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    snapshot: IdentitySnapshot,
    minted: usize,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: IdentitySnapshot) -> Self {
        Self {
            snapshot,
            minted: 0,
        }
    }

    pub fn resolve(&mut self, kind: EntityKind, raw: &str) -> Uuid {
        if let Some(existing) = as_hyphenated_uuid(raw) {
            return existing;
        }
        let key = canonical_key(raw);
        let map = self.snapshot.entries.entry(kind).or_default();
        if let Some(id) = map.get(&key) {
            return *id;
        }
        let id = Uuid::new_v4();
        map.insert(key, id);
        self.minted += 1;
        id
    }

    pub fn lookup(&self, kind: EntityKind, raw: &str) -> Option<Uuid> {
        if let Some(existing) = as_hyphenated_uuid(raw) {
            return Some(existing);
        }
        self.snapshot
            .entries
            .get(&kind)
            .and_then(|m| m.get(&canonical_key(raw)))
            .copied()
    }

    /// Entries minted since construction or the last [`IdentityMap::mark_flushed`].
    pub fn minted(&self) -> usize {
        self.minted
    }

    pub fn is_dirty(&self) -> bool {
        self.minted > 0
    }

    pub fn mark_flushed(&mut self) {
        self.minted = 0;
    }

    pub fn snapshot(&self) -> &IdentitySnapshot {
        &self.snapshot
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.snapshot.len(kind)
    }
}

fn as_hyphenated_uuid(raw: &str) -> Option<Uuid> {
    let trimmed = raw.trim();
    if trimmed.len() != 36 || trimmed.matches('-').count() != 4 {
        return None;
    }
    Uuid::try_parse(trimmed).ok()
}

fn is_hash(segment: &str) -> bool {
    segment.len() == 32 && segment.chars().all(|c| c.is_ascii_hexdigit())
}

/// Canonical identity key for a raw source identifier.
pub fn canonical_key(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(last) = trimmed.rsplit(':').next().filter(|_| trimmed.contains(':')) {
        if is_hash(last) {
            return last.to_ascii_lowercase();
        }
    }
    if is_hash(trimmed) {
        return trimmed.to_ascii_lowercase();
    }
    trimmed.to_string()
}
