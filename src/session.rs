//! One chat session: the owner of a history between turns

use log::{info, warn};

use crate::engine::Generator;
use crate::error::ChatResult;
use crate::tokenizer::TokenCodec;
use crate::turn::{Exchange, TurnAccumulator};

#[derive(Debug, Default, Clone)]
pub struct ChatSession {
    history: Vec<u32>,
    transcript: Vec<Exchange>,
    turns: usize,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[u32] {
        &self.history
    }

    pub fn transcript(&self) -> &[Exchange] {
        &self.transcript
    }

    pub fn turns(&self) -> usize {
        self.turns
    }

    /// Runs one turn. History and transcript only change on success.
    pub fn submit<C: TokenCodec, G: Generator>(
        &mut self,
        accumulator: &TurnAccumulator<C, G>,
        utterance: &str,
    ) -> ChatResult<&[Exchange]> {
        match accumulator.advance(utterance, &self.history) {
            Ok(turn) => {
                self.history = turn.history;
                self.transcript = turn.exchanges;
                self.turns += 1;
                info!(
                    "Session: turn {} done, history={} tokens",
                    self.turns,
                    self.history.len()
                );
                Ok(&self.transcript)
            }
            Err(e) => {
                warn!("Session: turn {} failed: {}", self.turns + 1, e);
                Err(e)
            }
        }
    }

    pub fn reset(&mut self) {
        info!("Session: reset after {} turns", self.turns);
        *self = Self::default();
    }
}

/// Formats exchanges as alternating `You:` / `Bot:` lines.
pub fn render_transcript(exchanges: &[Exchange]) -> String {
    let mut out = String::new();
    for exchange in exchanges {
        out.push_str("You: ");
        out.push_str(&exchange.user);
        out.push('\n');
        out.push_str("Bot: ");
        out.push_str(&exchange.bot);
        out.push('\n');
    }
    out
}
