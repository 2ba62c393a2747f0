//! Post-processing of the character's raw LLM output.
//!
//! `ReplyShaper` consumes raw deltas and emits shaped deltas: whole words only, cut
//! at the first format leak (`Gast:` or `<name>:`), capped at `MAX_REPLY_WORDS`
//! words with a trailing `...`, and closed with a `.` when the reply lacks final
//! punctuation. The concatenation of everything it emits is the persisted reply,
//! so the blocking and the streaming turn produce the same text.

use crate::error::{CoreError, CoreResult};

pub const MAX_REPLY_WORDS: usize = 20;
const GUEST_MARKER: &str = "Gast:";
const OVERFLOW_SUFFIX: &str = "...";

pub struct ReplyShaper {
    markers: Vec<String>,
    raw: String,
    /// A leak marker was found; later input is ignored.
    cut: bool,
    /// The word cap was hit and `...` emitted.
    overflowed: bool,
    words_emitted: usize,
    reply: String,
}

impl ReplyShaper {
    pub fn new(character_name: &str) -> Self {
        let mut markers = vec![GUEST_MARKER.to_string()];
        let name = character_name.trim();
        if !name.is_empty() {
            markers.push(format!("{name}:"));
        }
        Self {
            markers,
            raw: String::new(),
            cut: false,
            overflowed: false,
            words_emitted: 0,
            reply: String::new(),
        }
    }

    /// True once no further input can change the reply.
    pub fn is_done(&self) -> bool {
        self.cut || self.overflowed
    }

    /// Feeds one raw delta and returns the shaped deltas it releases.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        if self.is_done() {
            return Vec::new();
        }
        self.raw.push_str(delta);
        if let Some(pos) = self.earliest_marker() {
            self.raw.truncate(pos);
            self.cut = true;
        }

        let safe_end = if self.cut {
            self.raw.len()
        } else {
            self.raw.len() - self.pending_marker_len()
        };
        let safe = &self.raw[..safe_end];
        let total_tokens = safe.split_whitespace().count();
        let mut complete = total_tokens;
        if !safe.ends_with(char::is_whitespace) && !self.cut {
            complete = complete.saturating_sub(1);
        }

        if total_tokens > MAX_REPLY_WORDS {
            let mut out = self.release(MAX_REPLY_WORDS);
            out.push(self.overflow());
            return out;
        }
        self.release(complete)
    }

    /// Flushes the remaining words and the closing punctuation.
    pub fn finish(&mut self) -> CoreResult<Vec<String>> {
        let total_tokens = self.raw.split_whitespace().count();
        let mut out = if self.overflowed {
            Vec::new()
        } else if total_tokens > MAX_REPLY_WORDS {
            let mut out = self.release(MAX_REPLY_WORDS);
            out.push(self.overflow());
            out
        } else {
            self.release(total_tokens)
        };
        if self.reply.is_empty() {
            return Err(CoreError::LlmInvalidResponse("empty reply".into()));
        }
        if !self.overflowed && !self.reply.ends_with(['.', '!', '?']) {
            self.reply.push('.');
            out.push(".".to_string());
        }
        Ok(out)
    }

    pub fn into_reply(self) -> String {
        self.reply
    }

    /// Emits words up to index `upto` (exclusive) that were not emitted yet.
    fn release(&mut self, upto: usize) -> Vec<String> {
        let words: Vec<String> = self
            .raw
            .split_whitespace()
            .skip(self.words_emitted)
            .take(upto.saturating_sub(self.words_emitted))
            .map(str::to_string)
            .collect();
        let mut out = Vec::with_capacity(words.len());
        for word in words {
            let delta = if self.words_emitted == 0 {
                word
            } else {
                format!(" {word}")
            };
            self.reply.push_str(&delta);
            self.words_emitted += 1;
            out.push(delta);
        }
        out
    }

    fn overflow(&mut self) -> String {
        self.overflowed = true;
        self.reply.push_str(OVERFLOW_SUFFIX);
        OVERFLOW_SUFFIX.to_string()
    }

    fn earliest_marker(&self) -> Option<usize> {
        self.markers
            .iter()
            .filter_map(|marker| self.raw.find(marker.as_str()))
            .min()
    }

    /// Length of the longest tail of the raw text that could still grow into a marker.
    fn pending_marker_len(&self) -> usize {
        self.markers
            .iter()
            .flat_map(|marker| {
                marker
                    .char_indices()
                    .skip(1)
                    .map(move |(end, _)| &marker[..end])
            })
            .filter(|prefix| self.raw.ends_with(*prefix))
            .map(str::len)
            .max()
            .unwrap_or(0)
    }
}

/// Shapes a complete raw reply in one go.
pub fn shape_reply(raw: &str, character_name: &str) -> CoreResult<String> {
    let mut shaper = ReplyShaper::new(character_name);
    shaper.push(raw);
    shaper.finish()?;
    Ok(shaper.into_reply())
}
