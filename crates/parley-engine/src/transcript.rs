//! Per-turn transcript state: the primary text accumulator, the words split
//! from it, and the words revealed so far.
//!
//! This type does no timing of its own. The engine decides when a word is
//! due and calls [`TranscriptScheduler::reveal`]; the scheduler only keeps
//! the bookkeeping consistent (ids increase, reveals happen in index order,
//! nothing is scheduled twice).

use std::ops::Range;
use std::time::Instant;

use parley_types::StreamedWord;

#[derive(Debug)]
pub struct TranscriptScheduler {
    window: usize,
    /// Primary-source text accumulated for the current turn.
    source: String,
    /// Every word ingested this turn, indexed by turn-local position.
    words: Vec<String>,
    /// Revealed words, oldest first. The display window is a suffix.
    shown: Vec<StreamedWord>,
    /// Number of words already handed to the engine for scheduling.
    processed: usize,
    anchor: Option<Instant>,
    fallback: bool,
    primary_seen: bool,
    updated_at: Option<Instant>,
    /// Set once the bot stops speaking. Primary text that arrives while the
    /// turn is closed belongs to the next turn and is held in `next_source`.
    closed: bool,
    next_source: String,
}

impl TranscriptScheduler {
    pub(crate) fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            source: String::new(),
            words: Vec::new(),
            shown: Vec::new(),
            processed: 0,
            anchor: None,
            fallback: false,
            primary_seen: false,
            updated_at: None,
            closed: false,
            next_source: String::new(),
        }
    }

    /// The trailing display window.
    pub fn display(&self) -> &[StreamedWord] {
        let start = self.shown.len().saturating_sub(self.window);
        &self.shown[start..]
    }

    /// Every word revealed this turn, joined by spaces, or `None` if nothing
    /// has been revealed.
    pub fn text(&self) -> Option<String> {
        if self.shown.is_empty() {
            return None;
        }
        let words: Vec<&str> = self.shown.iter().map(|w| w.word.as_str()).collect();
        Some(words.join(" "))
    }

    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }

    pub fn revealed(&self) -> usize {
        self.shown.len()
    }

    /// Number of words scheduled this turn.
    pub fn scheduled(&self) -> usize {
        self.processed
    }

    pub fn anchor(&self) -> Option<Instant> {
        self.anchor
    }

    pub fn in_fallback(&self) -> bool {
        self.fallback
    }

    pub fn primary_seen(&self) -> bool {
        self.primary_seen
    }

    pub fn updated_at(&self) -> Option<Instant> {
        self.updated_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Merges a primary-source callback into the accumulator.
    ///
    /// A callback that extends the accumulated text replaces it; anything
    /// else is appended as a continuation. Returns `false` for blank input.
    ///
    /// Once the turn is closed the text goes to the next turn's buffer and
    /// leaves the words on screen alone.
    pub(crate) fn merge_primary(&mut self, text: &str, now: Instant) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        if self.closed {
            accumulate(&mut self.next_source, text);
            return true;
        }
        accumulate(&mut self.source, text);
        self.words = split_words(&self.source);
        self.primary_seen = true;
        self.updated_at = Some(now);
        true
    }

    /// Indices of words that have been ingested but not yet scheduled.
    pub(crate) fn unscheduled(&self) -> Range<usize> {
        self.processed.min(self.words.len())..self.words.len()
    }

    pub(crate) fn mark_scheduled(&mut self, upto: usize) {
        self.processed = self.processed.max(upto.min(self.words.len()));
    }

    /// Appends the word at `index` to the revealed list. The word's id is
    /// its turn-local index.
    ///
    /// Reveals must arrive in index order; a stale or out-of-range index is
    /// ignored.
    pub(crate) fn reveal(&mut self, index: usize, now: Instant) -> Option<StreamedWord> {
        if index != self.shown.len() {
            return None;
        }
        let word = self.words.get(index)?.clone();
        let streamed = StreamedWord::new(word, index as u64);
        self.shown.push(streamed.clone());
        self.updated_at = Some(now);
        Some(streamed)
    }

    /// Appends fallback fragments, revealing each word immediately.
    pub(crate) fn push_fragment(&mut self, text: &str, now: Instant) -> Vec<StreamedWord> {
        let mut added = Vec::new();
        for word in text.split_whitespace() {
            self.words.push(word.to_string());
            let index = self.words.len() - 1;
            if let Some(streamed) = self.reveal(index, now) {
                added.push(streamed);
            }
        }
        self.processed = self.words.len();
        added
    }

    pub(crate) fn enter_fallback(&mut self) {
        self.fallback = true;
    }

    /// Ends the running turn when the bot stops speaking. The revealed words
    /// stay visible and fallback fragments are no longer accepted. Has no
    /// effect when no turn is running.
    pub(crate) fn close_turn(&mut self) {
        if self.anchor.is_none() {
            return;
        }
        self.closed = true;
        self.fallback = false;
    }

    /// Starts a new bot turn anchored at `anchor`.
    ///
    /// Text that was already scheduled belongs to the previous turn and is
    /// dropped. Text buffered before the turn started, either before any bot
    /// speech or after the previous turn closed, is kept so it can be
    /// scheduled against the new anchor. Returns the number of revealed
    /// words discarded.
    pub(crate) fn begin_turn(&mut self, anchor: Instant) -> usize {
        let dropped = self.shown.len();
        if self.closed {
            self.source = std::mem::take(&mut self.next_source);
        } else if self.processed > 0 || self.fallback {
            self.source.clear();
        }
        self.words = split_words(&self.source);
        self.closed = false;
        self.shown.clear();
        self.processed = 0;
        self.fallback = false;
        self.primary_seen = !self.source.is_empty();
        self.anchor = Some(anchor);
        dropped
    }

    /// Drops fallback words when primary text shows up late. The primary
    /// text is re-anchored at `anchor`. Returns the number of words dropped.
    pub(crate) fn abandon_fallback(&mut self, anchor: Instant) -> usize {
        let dropped = self.shown.len();
        self.source.clear();
        self.words.clear();
        self.shown.clear();
        self.processed = 0;
        self.fallback = false;
        self.anchor = Some(anchor);
        dropped
    }

    /// Empties the display and ends the turn. Text already buffered for the
    /// next turn survives. Returns `true` if any word had been revealed.
    pub(crate) fn clear(&mut self) -> bool {
        let had_words = !self.shown.is_empty();
        self.source = std::mem::take(&mut self.next_source);
        self.words = split_words(&self.source);
        self.shown.clear();
        self.processed = 0;
        self.anchor = None;
        self.fallback = false;
        self.closed = false;
        self.primary_seen = !self.source.is_empty();
        self.updated_at = None;
        had_words
    }

    /// Empties everything, buffered text included.
    pub(crate) fn reset(&mut self) -> bool {
        self.next_source.clear();
        self.source.clear();
        self.clear()
    }
}

fn accumulate(buffer: &mut String, text: &str) {
    if buffer.is_empty() || text.starts_with(buffer.as_str()) {
        *buffer = text.to_string();
    } else {
        buffer.push(' ');
        buffer.push_str(text);
    }
}

fn split_words(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}
