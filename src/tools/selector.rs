//! Tool selection: rank candidate tools against a task description.
//!
//! Matching is keyword overlap between the task text and the tool's name,
//! description, and category, with domain bonuses for a small table of
//! bilingual trigger phrases. Ranking folds in historical success rate,
//! a recency penalty for tools used within the last minute, and a large
//! penalty for tools whose server is currently failed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;

use crate::tools::registry::ToolDescriptor;

/// Default cap on selected tools.
pub const DEFAULT_MAX_SELECTED: usize = 5;

/// Records older than this are evicted by [`ToolSelector::cleanup`].
const STATS_RETENTION: Duration = Duration::from_secs(24 * 3600);

/// Priority penalty applied when a tool was used within the last minute.
const RECENCY_PENALTY: f64 = 0.1;

/// Priority penalty applied when the tool's server is failed.
const FAILED_SERVER_PENALTY: f64 = 10.0;

/// Neutral success rate assumed for tools with no history.
const DEFAULT_SUCCESS_RATE: f64 = 0.5;

/// Stop words dropped during keyword extraction.
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "with", "that", "this", "what", "when", "where", "how", "who",
        "which", "can", "could", "would", "should", "please", "about", "into", "from", "are",
        "was", "were", "will", "get", "use", "using", "need", "want", "help", "me", "my", "of",
        "to", "in", "on", "at", "is", "it", "an", "as", "be", "by", "or", "do", "does",
    ]
    .into_iter()
    .collect()
});

/// Domain bonus table: `(trigger phrases in the task, tool-name fragment, bonus)`.
///
/// Trigger phrases are checked as substrings of the raw lowercased task so
/// that both English and CJK phrases (which are not whitespace-separated)
/// fire correctly.
static DOMAIN_BONUSES: Lazy<Vec<(&'static [&'static str], &'static [&'static str], f64)>> =
    Lazy::new(|| {
        vec![
            (
                &["驾车", "开车", "drive", "driving", "route"][..],
                &["driving", "direction", "route"][..],
                2.0,
            ),
            (
                &["股票", "炒股", "invest", "stock", "share price"][..],
                &["stock", "quote", "finance", "invest"][..],
                3.0,
            ),
            (
                &["天气", "weather", "forecast"][..],
                &["weather", "forecast"][..],
                2.0,
            ),
        ]
    });

// ---------------------------------------------------------------------------
// Usage stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ToolUsageStats {
    success_count: u64,
    total_count: u64,
    total_latency_ms: u64,
    last_used: Instant,
}

impl ToolUsageStats {
    fn success_rate(&self) -> f64 {
        if self.total_count == 0 {
            DEFAULT_SUCCESS_RATE
        } else {
            self.success_count as f64 / self.total_count as f64
        }
    }
}

#[derive(Debug, Clone)]
struct TaskPatternRecord {
    count: u64,
    last_seen: Instant,
}

/// One ranked candidate.
#[derive(Clone)]
pub struct RankedTool {
    /// The candidate descriptor.
    pub tool: Arc<ToolDescriptor>,
    /// Keyword-overlap score plus domain bonuses.
    pub match_score: f64,
    /// History-derived priority (success rate minus penalties).
    pub priority: f64,
}

impl std::fmt::Debug for RankedTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RankedTool")
            .field("tool", &self.tool.id)
            .field("match_score", &self.match_score)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Selector statistics surface.
#[derive(Debug, Clone, Serialize)]
pub struct SelectorStats {
    /// Number of tools with usage history.
    pub tracked_tools: usize,
    /// Total recorded tool invocations.
    pub total_invocations: u64,
    /// Mean recorded tool latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Number of remembered task keyword patterns.
    pub task_patterns: usize,
    /// Total select() calls recorded against those patterns.
    pub pattern_hits: u64,
    /// Servers currently marked failed.
    pub failed_servers: Vec<String>,
}

// ---------------------------------------------------------------------------
// ToolSelector
// ---------------------------------------------------------------------------

struct SelectorInner {
    usage: HashMap<String, ToolUsageStats>,
    task_patterns: HashMap<String, TaskPatternRecord>,
    failed_servers: HashSet<String>,
}

/// Scores and ranks tools against a task description.
pub struct ToolSelector {
    inner: Mutex<SelectorInner>,
    max_selected: usize,
}

impl Default for ToolSelector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SELECTED)
    }
}

impl ToolSelector {
    /// Create a selector returning at most `max_selected` candidates.
    pub fn new(max_selected: usize) -> Self {
        Self {
            inner: Mutex::new(SelectorInner {
                usage: HashMap::new(),
                task_patterns: HashMap::new(),
                failed_servers: HashSet::new(),
            }),
            max_selected: max_selected.max(1),
        }
    }

    /// Rank `candidates` against `task`, best first.
    ///
    /// Ordering is priority descending, then match score descending. Tools
    /// with no keyword overlap and no domain bonus are omitted.
    pub fn select(&self, task: &str, candidates: &[Arc<ToolDescriptor>]) -> Vec<RankedTool> {
        let task_lower = task.to_lowercase();
        let keywords = extract_keywords(&task_lower);

        {
            let mut inner = self.inner.lock();
            let pattern = keywords.join(" ");
            if !pattern.is_empty() {
                let record = inner
                    .task_patterns
                    .entry(pattern)
                    .or_insert(TaskPatternRecord {
                        count: 0,
                        last_seen: Instant::now(),
                    });
                record.count += 1;
                record.last_seen = Instant::now();
            }
        }

        let mut ranked: Vec<RankedTool> = candidates
            .iter()
            .filter_map(|tool| {
                let haystack = format!(
                    "{} {} {}",
                    tool.display_name.to_lowercase(),
                    tool.description.to_lowercase(),
                    tool.category.to_lowercase()
                );
                let matched = keywords
                    .iter()
                    .filter(|k| haystack.contains(k.as_str()))
                    .count();
                let base = if keywords.is_empty() {
                    0.0
                } else {
                    matched as f64 / keywords.len() as f64
                };
                let bonus = domain_bonus(&task_lower, &tool.id.to_lowercase(), &haystack);
                let match_score = base + bonus;
                if match_score <= 0.0 {
                    return None;
                }
                Some(RankedTool {
                    priority: self.priority_of(tool),
                    tool: tool.clone(),
                    match_score,
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.match_score
                        .partial_cmp(&a.match_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        ranked.truncate(self.max_selected);
        ranked
    }

    /// Record the outcome of one tool invocation.
    pub fn record_tool_usage(&self, id: &str, success: bool, latency_ms: u64) {
        let mut inner = self.inner.lock();
        let stats = inner
            .usage
            .entry(id.to_string())
            .or_insert(ToolUsageStats {
                success_count: 0,
                total_count: 0,
                total_latency_ms: 0,
                last_used: Instant::now(),
            });
        stats.total_count += 1;
        if success {
            stats.success_count += 1;
        }
        stats.total_latency_ms += latency_ms;
        stats.last_used = Instant::now();
    }

    /// Mark or clear the failed state of a server; tools whose id carries
    /// the `server:` prefix take the penalty while the mark is set.
    pub fn set_server_failed(&self, server_id: &str, failed: bool) {
        let mut inner = self.inner.lock();
        if failed {
            inner.failed_servers.insert(server_id.to_string());
        } else {
            inner.failed_servers.remove(server_id);
        }
    }

    /// Evict usage stats and task-pattern records not touched within 24h.
    pub fn cleanup(&self) {
        let mut inner = self.inner.lock();
        inner
            .usage
            .retain(|_, s| s.last_used.elapsed() < STATS_RETENTION);
        inner
            .task_patterns
            .retain(|_, r| r.last_seen.elapsed() < STATS_RETENTION);
    }

    /// Current statistics.
    pub fn stats(&self) -> SelectorStats {
        let inner = self.inner.lock();
        let mut failed: Vec<String> = inner.failed_servers.iter().cloned().collect();
        failed.sort();
        let total_invocations: u64 = inner.usage.values().map(|s| s.total_count).sum();
        let total_latency: u64 = inner.usage.values().map(|s| s.total_latency_ms).sum();
        SelectorStats {
            tracked_tools: inner.usage.len(),
            total_invocations,
            avg_latency_ms: if total_invocations == 0 {
                0.0
            } else {
                total_latency as f64 / total_invocations as f64
            },
            task_patterns: inner.task_patterns.len(),
            pattern_hits: inner.task_patterns.values().map(|r| r.count).sum(),
            failed_servers: failed,
        }
    }

    fn priority_of(&self, tool: &ToolDescriptor) -> f64 {
        let inner = self.inner.lock();
        let mut priority = inner
            .usage
            .get(&tool.id)
            .map(|s| s.success_rate())
            .unwrap_or(DEFAULT_SUCCESS_RATE);

        if let Some(stats) = inner.usage.get(&tool.id) {
            if stats.last_used.elapsed() < Duration::from_secs(60) {
                priority -= RECENCY_PENALTY;
            }
        }

        if let Some(mcp) = &tool.mcp {
            if inner.failed_servers.contains(&mcp.server_id) {
                priority -= FAILED_SERVER_PENALTY;
            }
        }
        priority
    }
}

/// Extract matching keywords from an already lowercased task string.
///
/// Punctuation is stripped, the remainder split on whitespace, and stop
/// words and single-character tokens dropped.
fn extract_keywords(task_lower: &str) -> Vec<String> {
    let cleaned: String = task_lower
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    let mut seen = HashSet::new();
    cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() > 1 && !STOP_WORDS.contains(t))
        .filter(|t| seen.insert(t.to_string()))
        .map(|t| t.to_string())
        .collect()
}

/// Sum of domain bonuses firing for this task/tool pair.
fn domain_bonus(task_lower: &str, tool_id_lower: &str, haystack: &str) -> f64 {
    DOMAIN_BONUSES
        .iter()
        .filter(|(triggers, fragments, _)| {
            triggers.iter().any(|t| task_lower.contains(t))
                && fragments
                    .iter()
                    .any(|f| tool_id_lower.contains(f) || haystack.contains(f))
        })
        .map(|(_, _, bonus)| *bonus)
        .sum()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
