//! Configuration structures for the dialogue model and the chat host

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::sampling::SamplingPolicy;

/// GPT-2 architecture parameters.
///
/// Field names follow the GPT-2 `config.json` layout, so a pretrained
/// checkpoint's config deserializes directly; extra keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GptConfig {
    pub vocab_size: usize,
    pub n_positions: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f64,
}

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

impl Default for GptConfig {
    fn default() -> Self {
        Self::small()
    }
}

impl GptConfig {
    pub fn small() -> Self {
        Self {
            vocab_size: 50257,
            n_positions: 1024,
            n_embd: 768,
            n_layer: 12,
            n_head: 12,
            layer_norm_epsilon: 1e-5,
        }
    }

    pub fn medium() -> Self {
        Self {
            n_embd: 1024,
            n_layer: 24,
            n_head: 16,
            ..Self::small()
        }
    }

    pub fn large() -> Self {
        Self {
            n_embd: 1280,
            n_layer: 36,
            n_head: 20,
            ..Self::small()
        }
    }

    /// Byte-level toy model sized for `ByteTokenizer`; random weights unless
    /// a record is loaded.
    pub fn byte_level() -> Self {
        Self {
            vocab_size: 257,
            n_positions: 512,
            n_embd: 64,
            n_layer: 2,
            n_head: 4,
            layer_norm_epsilon: 1e-5,
        }
    }

    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    /// Load from JSON file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Save to JSON file
    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub policy: SamplingPolicy,
    /// Candidates generated per call; the turn protocol reads the first.
    pub num_candidates: usize,
    pub seed: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            policy: SamplingPolicy::Greedy,
            num_candidates: 1,
            seed: 42,
        }
    }
}

/// Everything the chat host needs to start a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub title: String,
    pub description: String,
    pub examples: Vec<String>,
    /// Hard ceiling on tokens across the whole conversation.
    pub max_total_length: usize,
    /// `tokenizer.json` (or a directory holding one). Falls back to the
    /// byte-level tokenizer when unset.
    pub tokenizer_path: Option<PathBuf>,
    /// burn record with model weights. Random init when unset.
    pub weights_path: Option<PathBuf>,
    pub end_marker: String,
    pub model: GptConfig,
    pub generation: GenerationSettings,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            title: "🤖ChatBot de IA".to_string(),
            description: "Construir chatbots de domínio aberto é uma área desafiadora para a pesquisa em aprendizado de máquina.".to_string(),
            examples: vec!["Como você está?".to_string()],
            max_total_length: 4000,
            tokenizer_path: None,
            weights_path: None,
            end_marker: "<|endoftext|>".to_string(),
            model: GptConfig::byte_level(),
            generation: GenerationSettings::default(),
        }
    }
}

impl ChatConfig {
    /// Load from JSON file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Save to JSON file
    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
