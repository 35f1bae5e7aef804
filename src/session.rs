//! Session state shared by the CLI and web front ends.
//!
//! A [`SessionState`] is an explicit context object: whoever drives an
//! optimization owns (or locks) one and passes it around. Every optimization
//! is tagged with a generation number; progress or results from an older
//! generation are dropped, so a superseded request can never overwrite the
//! state of a newer one.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, ScribeError};
use crate::modes::OptimizationMode;
use crate::store::KvStore;
use crate::Progress;

/// Storage key holding the JSON-serialized history array.
pub const HISTORY_KEY: &str = "contentHistory";

/// One piece of advisory feedback about a rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextModification {
    pub original: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// A persisted pair of original and rewritten text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub original: String,
    pub optimized: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub mode: OptimizationMode,
}

impl HistoryEntry {
    /// `None` unless both texts are non-empty.
    pub fn new(original: &str, optimized: &str, mode: OptimizationMode) -> Option<Self> {
        if original.is_empty() || optimized.is_empty() {
            return None;
        }
        Some(HistoryEntry {
            id: Uuid::now_v7().to_string(),
            original: original.to_string(),
            optimized: optimized.to_string(),
            timestamp: now_millis(),
            mode,
        })
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Serializable view of the session for presentation layers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub original: String,
    pub optimized: String,
    pub is_processing: bool,
    pub is_streaming: bool,
    pub mode: OptimizationMode,
    pub custom_prompt: String,
    pub modifications: Vec<TextModification>,
    pub history_len: usize,
    pub generation: u64,
}

pub struct SessionState {
    original: String,
    optimized: String,
    is_processing: bool,
    is_streaming: bool,
    mode: OptimizationMode,
    custom_prompt: String,
    modifications: Vec<TextModification>,
    history: Vec<HistoryEntry>,
    generation: u64,
    store: Box<dyn KvStore>,
}

impl SessionState {
    /// Build a session over `store`, rehydrating any saved history.
    ///
    /// An unreadable or corrupt history value is removed from the store and
    /// the session starts with an empty history.
    pub fn load(store: Box<dyn KvStore>) -> Self {
        let history = match store.get(HISTORY_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<HistoryEntry>>(&raw) {
                Ok(entries) => {
                    debug!(entries = entries.len(), "history restored");
                    entries
                }
                Err(e) => {
                    warn!(error = %e, "saved history is corrupt; discarding it");
                    if let Err(e) = store.remove(HISTORY_KEY) {
                        error!(error = %e, "failed to remove corrupt history");
                    }
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                error!(error = %e, "failed to read saved history");
                Vec::new()
            }
        };

        SessionState {
            original: String::new(),
            optimized: String::new(),
            is_processing: false,
            is_streaming: false,
            mode: OptimizationMode::default(),
            custom_prompt: String::new(),
            modifications: Vec::new(),
            history,
            generation: 0,
            store,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn optimized(&self) -> &str {
        &self.optimized
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn mode(&self) -> OptimizationMode {
        self.mode
    }

    pub fn custom_prompt(&self) -> &str {
        &self.custom_prompt
    }

    pub fn modifications(&self) -> &[TextModification] {
        &self.modifications
    }

    /// Newest first.
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            original: self.original.clone(),
            optimized: self.optimized.clone(),
            is_processing: self.is_processing,
            is_streaming: self.is_streaming,
            mode: self.mode,
            custom_prompt: self.custom_prompt.clone(),
            modifications: self.modifications.clone(),
            history_len: self.history.len(),
            generation: self.generation,
        }
    }

    // -----------------------------------------------------------------------
    // Editing
    // -----------------------------------------------------------------------

    pub fn set_original(&mut self, text: impl Into<String>) {
        self.original = text.into();
    }

    pub fn set_optimized(&mut self, text: impl Into<String>) {
        self.optimized = text.into();
    }

    /// Select a mode. The custom prompt only changes when switching to
    /// `Custom` with `Some(text)`; otherwise the previous one is kept.
    pub fn set_mode(&mut self, mode: OptimizationMode, custom: Option<String>) {
        self.mode = mode;
        if let (OptimizationMode::Custom, Some(text)) = (mode, custom) {
            self.custom_prompt = text;
        }
    }

    /// The custom prompt to send, if the current mode uses one.
    pub fn custom_for_request(&self) -> Option<&str> {
        (self.mode == OptimizationMode::Custom && !self.custom_prompt.is_empty())
            .then_some(self.custom_prompt.as_str())
    }

    // -----------------------------------------------------------------------
    // Optimization lifecycle
    // -----------------------------------------------------------------------

    /// Start a new optimization of `content` and return its generation.
    pub fn begin_optimization(&mut self, content: &str) -> u64 {
        self.generation += 1;
        self.original = content.to_string();
        self.optimized.clear();
        self.modifications.clear();
        self.is_processing = true;
        self.is_streaming = false;
        debug!(generation = self.generation, mode = %self.mode, "optimization started");
        self.generation
    }

    fn is_current(&self, generation: u64) -> bool {
        if generation != self.generation {
            debug!(generation, current = self.generation, "dropping stale update");
            return false;
        }
        true
    }

    /// Apply a progress update. Returns `false` if it was stale.
    pub fn apply_progress(&mut self, generation: u64, progress: &Progress) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        match progress {
            Progress::Reasoning(mods) => {
                self.modifications = mods.clone();
                // Reasoning arrives right before the rewrite stream opens.
                self.is_streaming = true;
            }
            Progress::Text(text) => {
                self.is_streaming = true;
                self.optimized = text.clone();
            }
            Progress::Complete { text, modifications } => {
                self.optimized = text.clone();
                self.modifications = modifications.clone();
            }
        }
        true
    }

    /// Close out an optimization. On success the final text is installed; on
    /// failure any partial text is discarded and history is left untouched.
    pub fn finish_optimization(
        &mut self,
        generation: u64,
        outcome: std::result::Result<&crate::Optimization, &ScribeError>,
    ) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.is_processing = false;
        self.is_streaming = false;
        match outcome {
            Ok(done) => {
                self.optimized = done.optimized_content.clone();
                self.modifications = done.modifications.clone();
            }
            Err(e) => {
                warn!(error = %e, generation, "optimization failed");
                self.optimized.clear();
            }
        }
        true
    }

    /// Accept the current rewrite: it becomes the new original, a history
    /// entry is recorded, and the feedback list is cleared.
    ///
    /// Does nothing and returns `Ok(None)` when there is no rewrite or an
    /// optimization is still running. Nothing changes if the store write fails.
    pub fn accept_optimization(&mut self) -> Result<Option<HistoryEntry>> {
        if self.is_processing {
            debug!(generation = self.generation, "accept refused while optimizing");
            return Ok(None);
        }
        let Some(entry) = HistoryEntry::new(&self.original, &self.optimized, self.mode) else {
            return Ok(None);
        };
        self.commit_history(with_front(&self.history, &entry))?;
        self.original = std::mem::take(&mut self.optimized);
        self.modifications.clear();
        info!(id = %entry.id, mode = %entry.mode, "optimization accepted");
        Ok(Some(entry))
    }

    /// Record the current original/optimized pair without accepting it.
    pub fn save_to_history(&mut self) -> Result<Option<HistoryEntry>> {
        let Some(entry) = HistoryEntry::new(&self.original, &self.optimized, self.mode) else {
            return Ok(None);
        };
        self.commit_history(with_front(&self.history, &entry))?;
        Ok(Some(entry))
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    pub fn find_history(&self, id: &str) -> Option<&HistoryEntry> {
        self.history.iter().find(|e| e.id == id)
    }

    /// Returns `true` if an entry was removed.
    pub fn delete_history_item(&mut self, id: &str) -> Result<bool> {
        let kept: Vec<HistoryEntry> = self.history.iter().filter(|e| e.id != id).cloned().collect();
        if kept.len() == self.history.len() {
            return Ok(false);
        }
        self.commit_history(kept)?;
        Ok(true)
    }

    /// Remove every entry; returns how many were removed.
    pub fn clear_history(&mut self) -> Result<usize> {
        let removed = self.history.len();
        self.commit_history(Vec::new())?;
        Ok(removed)
    }

    /// Reopen a stored entry in the editor.
    pub fn load_from_history(&mut self, id: &str) -> Option<&HistoryEntry> {
        let entry = self.history.iter().find(|e| e.id == id)?;
        self.original = entry.original.clone();
        self.optimized = entry.optimized.clone();
        self.mode = entry.mode;
        self.modifications.clear();
        Some(entry)
    }

    /// Write `next` to the store, then install it. On error the in-memory
    /// history is left as it was.
    fn commit_history(&mut self, next: Vec<HistoryEntry>) -> Result<()> {
        let json = serde_json::to_string(&next)?;
        self.store.set(HISTORY_KEY, &json).inspect_err(|e| {
            error!(error = %e, "failed to persist history");
        })?;
        self.history = next;
        Ok(())
    }
}

fn with_front(history: &[HistoryEntry], entry: &HistoryEntry) -> Vec<HistoryEntry> {
    let mut next = Vec::with_capacity(history.len() + 1);
    next.push(entry.clone());
    next.extend_from_slice(history);
    next
}
