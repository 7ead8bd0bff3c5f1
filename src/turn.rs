//! Conversation-history accumulation: one user utterance in, one turn out
//!
//! The whole conversation lives in a flat token history where every
//! utterance, user or bot, ends with the same turn marker. Speakers are
//! recovered from parity alone: even segments are the user's, odd segments
//! the bot's.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::engine::Generator;
use crate::error::{ChatError, ChatResult};
use crate::tokenizer::TokenCodec;

/// One (user, bot) pair read back from the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub bot: String,
}

impl Exchange {
    pub fn new(user: impl Into<String>, bot: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            bot: bot.into(),
        }
    }
}

/// Result of advancing a conversation by one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// Every exchange in the conversation so far, oldest first.
    pub exchanges: Vec<Exchange>,
    /// Full token history to pass into the next `advance`.
    pub history: Vec<u32>,
}

/// Splits decoded text on the marker. Adjacent markers give empty segments.
pub fn split_segments(decoded: &str, marker: &str) -> Vec<String> {
    decoded.split(marker).map(str::to_string).collect()
}

/// Pairs segment 0 with 1, 2 with 3, and so on. An odd trailing segment is
/// dropped.
pub fn pair_segments(segments: Vec<String>) -> Vec<Exchange> {
    let mut exchanges = Vec::with_capacity(segments.len() / 2);
    let mut iter = segments.into_iter();
    while let (Some(user), Some(bot)) = (iter.next(), iter.next()) {
        exchanges.push(Exchange { user, bot });
    }
    exchanges
}

/// Advances a conversation one turn at a time. Holds its collaborators and
/// the token budget, never the history.
pub struct TurnAccumulator<C, G> {
    codec: C,
    generator: G,
    max_total_length: usize,
}

impl<C: TokenCodec, G: Generator> TurnAccumulator<C, G> {
    pub fn new(codec: C, generator: G, max_total_length: usize) -> Self {
        info!("TurnAccumulator: max_total_length={}", max_total_length);
        Self {
            codec,
            generator,
            max_total_length,
        }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn max_total_length(&self) -> usize {
        self.max_total_length
    }

    /// Configured ceiling, lowered to what the generator can hold.
    pub fn effective_length(&self) -> usize {
        match self.generator.max_sequence_length() {
            Some(limit) => self.max_total_length.min(limit),
            None => self.max_total_length,
        }
    }

    /// Encodes `utterance` plus a marker after `history`, generates, and
    /// reads the whole conversation back as exchanges.
    ///
    /// `history` must be empty or a history returned by an earlier call.
    pub fn advance(&self, utterance: &str, history: &[u32]) -> ChatResult<Turn> {
        if utterance.is_empty() {
            return Err(ChatError::EmptyUtterance);
        }

        let marker_id = self.codec.end_marker_token_id();
        let mut prompt = Vec::with_capacity(history.len() + utterance.len() + 1);
        prompt.extend_from_slice(history);
        prompt.extend(self.codec.encode(utterance)?);
        prompt.push(marker_id);

        let ceiling = self.effective_length();
        if prompt.len() >= ceiling {
            return Err(ChatError::LengthExceeded {
                prompt_len: prompt.len(),
                max_total_length: ceiling,
            });
        }
        debug!(
            "advance: history={} prompt={} tokens",
            history.len(),
            prompt.len()
        );

        let candidates =
            self.generator
                .generate(&prompt, ceiling, marker_id, marker_id)?;
        let history = candidates
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::Generator("generator returned no candidates".to_string()))?;

        if !history.starts_with(&prompt) {
            return Err(ChatError::Generator(
                "candidate does not extend the prompt".to_string(),
            ));
        }
        if history.len() == prompt.len() {
            return Err(ChatError::Generator(
                "generator appended no tokens".to_string(),
            ));
        }

        let decoded = self.codec.decode(&history)?;
        let segments = split_segments(&decoded, self.codec.end_marker_text());
        debug!(
            "advance: {} new tokens, {} segments",
            history.len() - prompt.len(),
            segments.len()
        );

        Ok(Turn {
            exchanges: pair_segments(segments),
            history,
        })
    }
}
