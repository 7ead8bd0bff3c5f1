//! Error taxonomy for a single chat turn

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    /// History plus the new utterance already fills the token budget.
    #[error("token budget exhausted: prompt is {prompt_len} tokens, limit is {max_total_length}")]
    LengthExceeded {
        prompt_len: usize,
        max_total_length: usize,
    },

    #[error("utterance is empty")]
    EmptyUtterance,

    #[error("cannot encode utterance: {0}")]
    Encoding(String),

    #[error("generation failed: {0}")]
    Generator(String),
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;
