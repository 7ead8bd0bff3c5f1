use std::sync::Mutex;

use anyhow::{anyhow, Result};
use burn::tensor::{backend::Backend, Int, Tensor};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::GenerationSettings;
use crate::error::{ChatError, ChatResult};
use crate::gpt::GptModel;
use crate::sampling::{extract_last_logits, sample_with_policy, SamplingPolicy};

/// Sequence-to-sequence collaborator of the turn protocol.
///
/// Returns one or more candidate full sequences, each starting with
/// `prompt` and never longer than `max_total_length`. A candidate that
/// emits `stop_token_id` ends there; shorter candidates are padded with
/// `pad_token_id` to the length of the longest one.
pub trait Generator {
    fn generate(
        &self,
        prompt: &[u32],
        max_total_length: usize,
        stop_token_id: u32,
        pad_token_id: u32,
    ) -> ChatResult<Vec<Vec<u32>>>;

    /// Longest sequence the generator can hold, if it has its own limit.
    fn max_sequence_length(&self) -> Option<usize> {
        None
    }
}

impl<T: Generator + ?Sized> Generator for &T {
    fn generate(
        &self,
        prompt: &[u32],
        max_total_length: usize,
        stop_token_id: u32,
        pad_token_id: u32,
    ) -> ChatResult<Vec<Vec<u32>>> {
        (**self).generate(prompt, max_total_length, stop_token_id, pad_token_id)
    }

    fn max_sequence_length(&self) -> Option<usize> {
        (**self).max_sequence_length()
    }
}

// Simple per-layer KV cache.
// Shapes:
//   K: [B, H, T_total, D]
//   V: [B, H, T_total, D]
pub struct KVCache<B: Backend> {
    pub(crate) store: Vec<Option<(Tensor<B, 4>, Tensor<B, 4>)>>,
    t_pos: usize,
}

impl<B: Backend> KVCache<B> {
    pub fn new(n_layer: usize) -> Self {
        debug!("KVCache: initializing with {} layers", n_layer);
        Self {
            store: vec![None; n_layer],
            t_pos: 0,
        }
    }

    pub fn clear(&mut self) {
        debug!("KVCache: clearing all layers and resetting position");
        for slot in self.store.iter_mut() {
            *slot = None;
        }
        self.t_pos = 0;
    }

    /// Number of positions already cached.
    pub fn position(&self) -> usize {
        self.t_pos
    }

    pub fn advance(&mut self, steps: usize) {
        self.t_pos += steps;
        debug!("KVCache: advanced position to t_pos={}", self.t_pos);
    }
}

// Inference engine: prefill the prompt once, then decode one column per step.
pub struct Engine<B: Backend> {
    model: GptModel<B>,
    device: B::Device,
    settings: GenerationSettings,
    rng: Mutex<StdRng>,
}

impl<B: Backend> Engine<B> {
    pub fn new(model: GptModel<B>, device: B::Device, settings: GenerationSettings) -> Result<Self> {
        settings.policy.validate()?;
        if settings.num_candidates == 0 {
            return Err(anyhow!("num_candidates must be at least 1"));
        }
        info!(
            "Engine: new with {} layers, policy={:?}, candidates={}, seed={}",
            model.num_layers(),
            settings.policy,
            settings.num_candidates,
            settings.seed
        );
        Ok(Self {
            model,
            device,
            rng: Mutex::new(StdRng::seed_from_u64(settings.seed)),
            settings,
        })
    }

    pub fn model(&self) -> &GptModel<B> {
        &self.model
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    fn ids_tensor(&self, rows: &[Vec<u32>]) -> Tensor<B, 2, Int> {
        let b = rows.len();
        let t = rows.first().map_or(0, Vec::len);
        let data: Vec<i64> = rows.iter().flatten().map(|&id| id as i64).collect();
        Tensor::<B, 1, Int>::from_ints(data.as_slice(), &self.device).reshape([b, t])
    }

    /// Start decoding `num_candidates` copies of `prompt`. Each item is one
    /// token column (one id per candidate).
    ///
    /// The stream ends early once the position table is full.
    pub fn stream(&self, prompt: &[u32], max_new_tokens: usize) -> ChatResult<Streamer<'_, B>> {
        if prompt.is_empty() {
            return Err(ChatError::Generator("empty prompt".to_string()));
        }
        let n_positions = self.model.n_positions();
        if prompt.len() >= n_positions {
            return Err(ChatError::Generator(format!(
                "prompt of {} tokens leaves no room in {} positions",
                prompt.len(),
                n_positions
            )));
        }
        let steps = max_new_tokens.min(n_positions - prompt.len());
        let batch = vec![prompt.to_vec(); self.settings.num_candidates];
        info!(
            "Engine: streaming start [B={},T0={}] max_new_tokens={}",
            batch.len(),
            prompt.len(),
            steps
        );
        // Each stream gets its own RNG drawn from the engine's seeded one.
        let seed: u64 = self
            .rng
            .lock()
            .map_err(|_| ChatError::Generator("sampler lock poisoned".to_string()))?
            .gen();
        Ok(Streamer {
            engine: self,
            pending: Some(self.ids_tensor(&batch)),
            cache: KVCache::new(self.model.num_layers()),
            policy: self.settings.policy,
            rng: StdRng::seed_from_u64(seed),
            steps_left: steps,
            finished: false,
        })
    }
}

impl<B: Backend> Generator for Engine<B> {
    fn max_sequence_length(&self) -> Option<usize> {
        Some(self.model.n_positions())
    }

    fn generate(
        &self,
        prompt: &[u32],
        max_total_length: usize,
        stop_token_id: u32,
        pad_token_id: u32,
    ) -> ChatResult<Vec<Vec<u32>>> {
        if prompt.is_empty() {
            return Err(ChatError::Generator("empty prompt".to_string()));
        }
        let ceiling = max_total_length.min(self.model.n_positions());
        if prompt.len() >= ceiling {
            return Err(ChatError::Generator(format!(
                "prompt of {} tokens leaves no room under the ceiling of {}",
                prompt.len(),
                ceiling
            )));
        }
        let vocab = self.model.vocab_size();
        if let Some(&bad) = prompt.iter().find(|&&id| id as usize >= vocab) {
            return Err(ChatError::Generator(format!(
                "token id {bad} is outside the model vocabulary of {vocab}"
            )));
        }
        if stop_token_id as usize >= vocab {
            warn!("Engine: stop token {} can never be sampled", stop_token_id);
        }

        let n = self.settings.num_candidates;
        let mut rows = vec![prompt.to_vec(); n];
        let mut done = vec![false; n];

        for column in self.stream(prompt, ceiling - prompt.len())? {
            for ((row, finished), &token) in rows.iter_mut().zip(done.iter_mut()).zip(&column) {
                if *finished {
                    row.push(pad_token_id);
                } else {
                    row.push(token);
                    *finished = token == stop_token_id;
                }
            }
            if done.iter().all(|&d| d) {
                break;
            }
        }

        info!(
            "Engine: generation complete, prompt_len={}, final_len={}",
            prompt.len(),
            rows[0].len()
        );
        Ok(rows)
    }
}

// Streaming iterator that yields one token column each step.
pub struct Streamer<'a, B: Backend> {
    engine: &'a Engine<B>,
    pending: Option<Tensor<B, 2, Int>>,
    cache: KVCache<B>,
    policy: SamplingPolicy,
    rng: StdRng,
    steps_left: usize,
    finished: bool,
}

impl<B: Backend> Iterator for Streamer<'_, B> {
    type Item = Vec<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.steps_left == 0 {
            self.finished = true;
            return None;
        }
        // First step feeds the whole prompt, later steps the last column.
        let input = self.pending.take()?;
        let [b, t] = input.dims();
        debug!(
            "Streamer: step [B={},T_in={}] t_pos={}",
            b,
            t,
            self.cache.position()
        );

        let logits = self.engine.model.forward_cached(input, &mut self.cache);
        let next = sample_with_policy(extract_last_logits(logits), self.policy, &mut self.rng);

        let column: Vec<Vec<u32>> = next.iter().map(|&id| vec![id]).collect();
        self.pending = Some(self.engine.ids_tensor(&column));
        self.steps_left -= 1;

        debug!("Streamer: emitted {:?}, steps_left={}", next, self.steps_left);
        Some(next)
    }
}
