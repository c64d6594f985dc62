//! Bounded conversation history with a token-budget truncation policy.
//!
//! A [`HistoryBuffer`] holds the turns of one conversation in insertion order,
//! plus the designated system prompt, which is kept outside `entries` and is
//! always rendered first. Two independent counters drive its upkeep:
//!
//! - the short-period counter triggers an in-memory truncation pass every
//!   `capacity_count` inserts;
//! - the long-period counter stages every inserted turn and hands the staged
//!   batch to the archive every `archive_threshold` inserts. Archival never
//!   touches `entries`.

use dalibot_types::{ChatMessage, WireMessage};

use crate::archive::ArchiveBatch;
use crate::token_counter::TokenCounter;

pub const DEFAULT_CAPACITY_COUNT: usize = 20;
pub const DEFAULT_CAPACITY_TOKENS: u32 = 2048;
pub const DEFAULT_ARCHIVE_THRESHOLD: usize = 50;

/// Budgets and thresholds of a history buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistorySettings {
    capacity_count: usize,
    capacity_tokens: u32,
    archive_threshold: usize,
}

impl HistorySettings {
    /// Zero thresholds are raised to 1 so the counters always make progress.
    #[must_use]
    pub fn new(capacity_count: usize, capacity_tokens: u32, archive_threshold: usize) -> Self {
        Self {
            capacity_count: capacity_count.max(1),
            capacity_tokens,
            archive_threshold: archive_threshold.max(1),
        }
    }

    /// Inserts between truncation passes; a pass keeps at most
    /// `capacity_count - 1` non-system turns.
    #[must_use]
    pub const fn capacity_count(&self) -> usize {
        self.capacity_count
    }

    #[must_use]
    pub const fn capacity_tokens(&self) -> u32 {
        self.capacity_tokens
    }

    #[must_use]
    pub const fn archive_threshold(&self) -> usize {
        self.archive_threshold
    }
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self::new(
            DEFAULT_CAPACITY_COUNT,
            DEFAULT_CAPACITY_TOKENS,
            DEFAULT_ARCHIVE_THRESHOLD,
        )
    }
}

/// What an insert did besides appending.
#[derive(Debug, Default)]
#[must_use]
pub struct InsertOutcome {
    /// A truncation pass ran because the short-period counter filled up.
    pub truncated: bool,
    /// The long-period counter filled up; this batch must go to the archive.
    pub archive: Option<ArchiveBatch>,
}

#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    system_prompt: ChatMessage,
    entries: Vec<ChatMessage>,
    settings: HistorySettings,
    since_truncate: usize,
    since_archive: usize,
    staged: Vec<ChatMessage>,
}

impl HistoryBuffer {
    #[must_use]
    pub fn new(system_prompt: impl Into<String>, settings: HistorySettings) -> Self {
        Self {
            system_prompt: ChatMessage::system(system_prompt),
            entries: Vec::new(),
            settings,
            since_truncate: 0,
            since_archive: 0,
            staged: Vec::new(),
        }
    }

    #[must_use]
    pub fn system_prompt(&self) -> &ChatMessage {
        &self.system_prompt
    }

    /// Replaces the designated system prompt wholesale. Entries are untouched.
    pub fn replace_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = ChatMessage::system(prompt);
    }

    #[must_use]
    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn settings(&self) -> HistorySettings {
        self.settings
    }

    /// Turns inserted since the last archive hand-off.
    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Appends a turn.
    ///
    /// The token cost is memoized on the message here so later passes do not
    /// re-tokenize it.
    pub fn insert(&mut self, message: ChatMessage, counter: &TokenCounter) -> InsertOutcome {
        let _ = counter.count_message(&message);

        self.staged.push(message.clone());
        self.entries.push(message);

        let mut outcome = InsertOutcome::default();

        self.since_truncate += 1;
        if self.since_truncate >= self.settings.capacity_count {
            self.since_truncate = 0;
            let _ = self.truncate(self.settings.capacity_tokens, counter);
            outcome.truncated = true;
        }

        self.since_archive += 1;
        if self.since_archive >= self.settings.archive_threshold {
            self.since_archive = 0;
            outcome.archive = Some(ArchiveBatch::new(std::mem::take(&mut self.staged)));
        }

        outcome
    }

    /// Rebuilds `entries` to fit `max_tokens` and returns the window to send upstream.
    ///
    /// Scans newest to oldest and stops at the first turn that would push the
    /// running total past `max_tokens` or the kept count to `capacity_count`.
    /// System-role turns are neither counted nor dropped. The designated system
    /// prompt always comes first; survivors keep their chronological order.
    pub fn truncate(&mut self, max_tokens: u32, counter: &TokenCounter) -> Vec<WireMessage> {
        let mut keep = vec![false; self.entries.len()];
        let mut total_tokens: u32 = 0;
        let mut kept: usize = 0;

        for (idx, message) in self.entries.iter().enumerate().rev() {
            if message.is_system() {
                continue;
            }

            total_tokens = total_tokens.saturating_add(counter.count_message(message));
            if total_tokens > max_tokens || kept + 1 >= self.settings.capacity_count {
                break;
            }
            keep[idx] = true;
            kept += 1;
        }

        let before = self.entries.len();
        let mut flags = keep.into_iter();
        self.entries
            .retain(|message| flags.next().unwrap_or(false) || message.is_system());

        let dropped = before - self.entries.len();
        if dropped > 0 {
            tracing::debug!(
                dropped,
                kept,
                max_tokens,
                scheme = counter.scheme(),
                "Truncated conversation history"
            );
        }

        self.window()
    }

    /// Current window without running a truncation pass.
    #[must_use]
    pub fn window(&self) -> Vec<WireMessage> {
        std::iter::once(&self.system_prompt)
            .chain(self.entries.iter())
            .map(ChatMessage::to_wire)
            .collect()
    }

    /// Discards all turns and resets both counters.
    ///
    /// Returns the turns staged since the last archive hand-off, if any, so
    /// the caller can flush them before they are lost.
    pub fn reset(&mut self) -> Option<ArchiveBatch> {
        self.entries.clear();
        self.since_truncate = 0;
        self.since_archive = 0;

        let staged = std::mem::take(&mut self.staged);
        if staged.is_empty() {
            None
        } else {
            Some(ArchiveBatch::new(staged))
        }
    }
}
