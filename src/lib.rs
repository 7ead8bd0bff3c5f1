//! dialochat: turn-based chat over a DialoGPT-style transformer
//!
//! The conversation is a flat token history threaded explicitly through
//! [`turn::TurnAccumulator::advance`]; the tokenizer and the generation
//! engine are injected collaborators.

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod gpt;
pub mod sampling;
pub mod session;
pub mod tokenizer;
pub mod turn;

#[cfg(test)]
mod tests;

pub use backend::{get_device, print_backend_info, AutoBackend};

pub mod prelude {
    pub use crate::backend::{get_device, print_backend_info, AutoBackend};
    pub use crate::config::{ChatConfig, GenerationSettings, GptConfig};
    pub use crate::engine::{Engine, Generator};
    pub use crate::error::{ChatError, ChatResult};
    pub use crate::gpt::GptModel;
    pub use crate::sampling::SamplingPolicy;
    pub use crate::session::{render_transcript, ChatSession};
    pub use crate::tokenizer::{ByteTokenizer, DialogTokenizer, TokenCodec};
    pub use crate::turn::{Exchange, Turn, TurnAccumulator};
}

#[cfg(test)]
pub(crate) fn init() {
    // Tests share one process; later calls find the logger already set.
    let _ = env_logger::builder().is_test(true).try_init();
}
