//! In-memory bounded store with TTL and LRU eviction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::errors::{AgentError, Result};

/// Default number of entries returned by [`MemoryStore::relevant`].
pub const DEFAULT_RELEVANT_LIMIT: usize = 5;

/// Default interval of the periodic TTL sweep (10 minutes).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

// ---------------------------------------------------------------------------
// MemoryKind
// ---------------------------------------------------------------------------

/// The fixed set of entry kinds the store accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A user or assistant conversation turn.
    Conversation,
    /// A full reasoning trace from one engine call.
    Reasoning,
    /// A task description or task-level record.
    Task,
    /// One tool invocation and its result.
    ToolUsage,
    /// Inter-agent collaboration traffic.
    Collaboration,
    /// Runtime-internal bookkeeping.
    System,
}

impl MemoryKind {
    /// Parse a kind string; anything outside the fixed set is rejected.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "conversation" => Ok(MemoryKind::Conversation),
            "reasoning" => Ok(MemoryKind::Reasoning),
            "task" => Ok(MemoryKind::Task),
            "tool_usage" => Ok(MemoryKind::ToolUsage),
            "collaboration" => Ok(MemoryKind::Collaboration),
            "system" => Ok(MemoryKind::System),
            other => Err(AgentError::UnknownKind(other.to_string())),
        }
    }

    /// The canonical string form of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Conversation => "conversation",
            MemoryKind::Reasoning => "reasoning",
            MemoryKind::Task => "task",
            MemoryKind::ToolUsage => "tool_usage",
            MemoryKind::Collaboration => "collaboration",
            MemoryKind::System => "system",
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// MemoryEntry
// ---------------------------------------------------------------------------

/// One stored memory entry.
///
/// `payload` is opaque to the store and typed only by `kind`. It is
/// immutable after insertion; reads update `access_count` and
/// `last_accessed` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique id within the store.
    pub id: Uuid,
    /// Entry kind.
    pub kind: MemoryKind,
    /// Opaque payload.
    pub payload: Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Number of times the entry has been read via `get`.
    pub access_count: u64,
    /// Timestamp of the latest read (or creation).
    pub last_accessed: DateTime<Utc>,
}

impl MemoryEntry {
    /// Project the payload to a textual view for relevance matching.
    ///
    /// Prefers the `input`, `text`, `content`, and `message` fields in that
    /// order, falling back to the JSON serialization of the whole payload.
    fn text_view(&self) -> String {
        for field in ["input", "text", "content", "message"] {
            if let Some(s) = self.payload.get(field).and_then(|v| v.as_str()) {
                return s.to_string();
            }
        }
        self.payload.to_string()
    }
}

// ---------------------------------------------------------------------------
// Search types
// ---------------------------------------------------------------------------

/// Options for [`MemoryStore::search`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Restrict the search to one kind.
    pub kind: Option<MemoryKind>,
    /// Maximum number of results.
    pub limit: usize,
    /// Minimum score for inclusion.
    pub min_score: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            kind: None,
            limit: DEFAULT_RELEVANT_LIMIT,
            min_score: 0.0,
        }
    }
}

/// One search hit with its relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredEntry {
    /// The matched entry.
    pub entry: MemoryEntry,
    /// Substring-match score with time decay applied.
    pub score: f64,
}

/// Aggregate store statistics.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    /// Total live entries.
    pub total: usize,
    /// Entry count per kind.
    pub by_kind: HashMap<String, usize>,
    /// Average entry age in seconds.
    pub avg_age_secs: f64,
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Bounded TTL keyed store with typed entries and relevance search.
///
/// Entries are evicted when their age exceeds the TTL (checked on access and
/// by the periodic sweep) or when the store exceeds `max_size`, in which
/// case the entry with the oldest `last_accessed` is dropped eagerly on
/// insertion.
pub struct MemoryStore {
    entries: RwLock<HashMap<Uuid, MemoryEntry>>,
    ttl: Duration,
    max_size: usize,
}

impl MemoryStore {
    /// Create a store with the given TTL and size cap.
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_size: max_size.max(1),
        }
    }

    /// Insert an entry, evicting the least-recently-used one if the store
    /// is at capacity. Returns the new entry's id.
    pub async fn add(&self, kind: MemoryKind, payload: Value) -> Uuid {
        let now = Utc::now();
        let entry = MemoryEntry {
            id: Uuid::new_v4(),
            kind,
            payload,
            created_at: now,
            access_count: 0,
            last_accessed: now,
        };
        let id = entry.id;

        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_size {
            let victim = entries
                .values()
                .min_by_key(|e| e.last_accessed)
                .map(|e| e.id);
            if let Some(victim) = victim {
                log::debug!("memory at capacity, evicting {}", victim);
                entries.remove(&victim);
            }
        }
        entries.insert(id, entry);
        id
    }

    /// Insert with a kind given as a string. Fails on unknown kinds.
    pub async fn add_raw(&self, kind: &str, payload: Value) -> Result<Uuid> {
        let kind = MemoryKind::parse(kind)?;
        Ok(self.add(kind, payload).await)
    }

    /// Read an entry by id, bumping its access counters.
    ///
    /// An expired entry is evicted on the spot and reported as missing.
    pub async fn get(&self, id: Uuid) -> Result<MemoryEntry> {
        let mut entries = self.entries.write().await;
        let expired = match entries.get(&id) {
            Some(entry) => self.is_expired(entry),
            None => return Err(AgentError::NotFound(format!("memory entry {}", id))),
        };
        if expired {
            entries.remove(&id);
            return Err(AgentError::NotFound(format!("memory entry {}", id)));
        }
        let entry = entries.get_mut(&id).unwrap();
        entry.access_count += 1;
        entry.last_accessed = Utc::now();
        Ok(entry.clone())
    }

    /// All live entries of one kind, oldest first.
    pub async fn get_by_kind(&self, kind: MemoryKind) -> Vec<MemoryEntry> {
        let entries = self.entries.read().await;
        let mut hits: Vec<MemoryEntry> = entries
            .values()
            .filter(|e| e.kind == kind && !self.is_expired(e))
            .cloned()
            .collect();
        hits.sort_by_key(|e| e.created_at);
        hits
    }

    /// The top `limit` entries relevant to `query` (score strictly positive).
    pub async fn relevant(&self, query: &str, limit: usize) -> Vec<MemoryEntry> {
        self.search(
            query,
            SearchOptions {
                kind: None,
                limit,
                min_score: f64::MIN_POSITIVE,
            },
        )
        .await
        .into_iter()
        .map(|s| s.entry)
        .collect()
    }

    /// Score every live entry against `query` and return the ranked hits.
    ///
    /// Scoring: the query is tokenized on whitespace (tokens shorter than
    /// two characters dropped); an entry's raw score is the count of
    /// distinct tokens occurring as substrings of its textual view,
    /// multiplied by a store-wide time-decay factor
    /// `max(0.1, 1 - (avg_age / 24h) * 0.5)`. Ties break by recency.
    pub async fn search(&self, query: &str, opts: SearchOptions) -> Vec<ScoredEntry> {
        let tokens: Vec<String> = query
            .split_whitespace()
            .filter(|t| t.chars().count() >= 2)
            .map(|t| t.to_lowercase())
            .collect();
        if tokens.is_empty() {
            return Vec::new();
        }

        let entries = self.entries.read().await;
        let live: Vec<&MemoryEntry> = entries
            .values()
            .filter(|e| !self.is_expired(e))
            .collect();
        if live.is_empty() {
            return Vec::new();
        }

        let decay = Self::decay_factor(&live);

        let mut scored: Vec<ScoredEntry> = live
            .into_iter()
            .filter(|e| opts.kind.map_or(true, |k| e.kind == k))
            .filter_map(|e| {
                let view = e.text_view().to_lowercase();
                let matched = tokens.iter().filter(|t| view.contains(t.as_str())).count();
                if matched == 0 {
                    return None;
                }
                let score = matched as f64 * decay;
                (score >= opts.min_score).then(|| ScoredEntry {
                    entry: e.clone(),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.entry.created_at.cmp(&a.entry.created_at))
        });
        scored.truncate(opts.limit);
        scored
    }

    /// Remove an entry by id.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AgentError::NotFound(format!("memory entry {}", id)))
    }

    /// Drop every entry, or only those of one kind.
    pub async fn clear(&self, kind: Option<MemoryKind>) {
        let mut entries = self.entries.write().await;
        match kind {
            Some(k) => entries.retain(|_, e| e.kind != k),
            None => entries.clear(),
        }
    }

    /// Number of live entries (expired entries still awaiting a sweep count).
    pub async fn size(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Aggregate statistics over the live entries.
    pub async fn stats(&self) -> MemoryStats {
        let entries = self.entries.read().await;
        let now = Utc::now();
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        let mut age_sum = 0.0;
        for e in entries.values() {
            *by_kind.entry(e.kind.as_str().to_string()).or_insert(0) += 1;
            age_sum += (now - e.created_at).num_milliseconds() as f64 / 1000.0;
        }
        let total = entries.len();
        MemoryStats {
            total,
            by_kind,
            avg_age_secs: if total == 0 { 0.0 } else { age_sum / total as f64 },
        }
    }

    /// Evict every expired entry. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let ttl = self.ttl;
        let now = Utc::now();
        entries.retain(|_, e| {
            (now - e.created_at).to_std().unwrap_or_default() < ttl
        });
        let removed = before - entries.len();
        if removed > 0 {
            log::debug!("memory sweep removed {} expired entries", removed);
        }
        removed
    }

    /// Spawn a background task sweeping expired entries at `interval`.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.sweep().await;
            }
        })
    }

    fn is_expired(&self, entry: &MemoryEntry) -> bool {
        (Utc::now() - entry.created_at).to_std().unwrap_or_default() >= self.ttl
    }

    /// Store-wide decay factor computed from the average entry age.
    fn decay_factor(live: &[&MemoryEntry]) -> f64 {
        let now = Utc::now();
        let avg_age_secs = live
            .iter()
            .map(|e| (now - e.created_at).num_milliseconds() as f64 / 1000.0)
            .sum::<f64>()
            / live.len() as f64;
        let day_fraction = avg_age_secs / 86_400.0;
        (1.0 - day_fraction * 0.5).max(0.1)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
