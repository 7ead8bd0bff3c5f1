//! GPT-2 style decoder used as the dialogue model
//!
//! Layout matches DialoGPT / GPT-2 checkpoints:
//! - learned token (`wte`) and position (`wpe`) embeddings
//! - pre-norm blocks with fused QKV attention and a GELU MLP
//! - final LayerNorm and an untied `lm_head`
//!
//! Every pass goes through the KV cache; a full forward is a cached forward
//! over an empty cache.

use std::path::PathBuf;

use anyhow::anyhow;
use burn::{
    module::Module,
    nn::{Embedding, EmbeddingConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig},
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{activation, backend::Backend, Int, Tensor},
};
use log::{debug, info};

use crate::config::GptConfig;
use crate::engine::KVCache;

type LayerCache<B> = Option<(Tensor<B, 4>, Tensor<B, 4>)>;

// ─────────────────────────────────────────────────────────────────────────────
// Causal mask
// ─────────────────────────────────────────────────────────────────────────────

// Additive bias [1, 1, Tq, Tk]: query i sits at absolute position past + i and
// may attend to keys 0..=past + i.
fn causal_bias<B: Backend>(t_q: usize, past: usize, device: &B::Device) -> Tensor<B, 4> {
    let t_k = past + t_q;
    let mut bias = Vec::with_capacity(t_q * t_k);
    for i in 0..t_q {
        for j in 0..t_k {
            bias.push(if j > past + i { -1.0e9_f32 } else { 0.0 });
        }
    }
    Tensor::<B, 1>::from_floats(bias.as_slice(), device).reshape([1, 1, t_q, t_k])
}

// ─────────────────────────────────────────────────────────────────────────────
// Attention
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct CausalSelfAttention<B: Backend> {
    layer_idx: usize,
    n_head: usize,
    head_dim: usize,
    c_attn: Linear<B>,
    c_proj: Linear<B>,
}

impl<B: Backend> CausalSelfAttention<B> {
    pub fn new(config: &GptConfig, layer_idx: usize, device: &B::Device) -> Self {
        let n_embd = config.n_embd;
        assert_eq!(n_embd % config.n_head, 0, "n_embd must be divisible by n_head");

        debug!(
            "Layer {}: attn n_head={}, head_dim={}",
            layer_idx,
            config.n_head,
            config.head_dim()
        );

        Self {
            layer_idx,
            n_head: config.n_head,
            head_dim: config.head_dim(),
            c_attn: LinearConfig::new(n_embd, 3 * n_embd).init(device),
            c_proj: LinearConfig::new(n_embd, n_embd).init(device),
        }
    }

    pub fn forward(
        &self,
        x: Tensor<B, 3>,                 // [B, T, C]
        cache_layer: &mut LayerCache<B>, // K/V for positions 0..past
        past: usize,
    ) -> Tensor<B, 3> {
        let [b, t, c] = x.dims();
        debug!(
            "Layer {} attn forward: [B={}, T={}, C={}] past={}",
            self.layer_idx, b, t, c, past
        );

        let qkv = self.c_attn.forward(x);
        let split = |lo: usize| {
            qkv.clone()
                .slice([0..b, 0..t, lo..(lo + c)])
                .reshape([b, t, self.n_head, self.head_dim])
                .swap_dims(1, 2) // [B, H, T, D]
        };
        let q = split(0);
        let k_new = split(c);
        let v_new = split(2 * c);

        // Append to the cache on the time axis
        let (k, v) = match cache_layer.take() {
            Some((k_all, v_all)) => {
                debug_assert_eq!(k_all.dims()[2], past, "cache length out of sync");
                (
                    Tensor::cat(vec![k_all, k_new], 2),
                    Tensor::cat(vec![v_all, v_new], 2),
                )
            }
            None => (k_new, v_new),
        };
        *cache_layer = Some((k.clone(), v.clone()));

        let t_k = k.dims()[2];
        let scale = (self.head_dim as f32).sqrt();
        let scores = q.matmul(k.swap_dims(2, 3)).div_scalar(scale); // [B, H, Tq, Tk]
        let bias = causal_bias::<B>(t, past, &scores.device()).expand([b, self.n_head, t, t_k]);
        let att = activation::softmax(scores + bias, 3);

        let y = att.matmul(v).swap_dims(1, 2).reshape([b, t, c]);
        self.c_proj.forward(y)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MLP (GELU) and Block (pre-norm)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    c_fc: Linear<B>,
    c_proj: Linear<B>,
}

impl<B: Backend> Mlp<B> {
    pub fn new(cfg: &GptConfig, device: &B::Device) -> Self {
        let n = cfg.n_embd;
        Self {
            c_fc: LinearConfig::new(n, 4 * n).init(device),
            c_proj: LinearConfig::new(4 * n, n).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.c_fc.forward(x);
        self.c_proj.forward(activation::gelu(x))
    }
}

#[derive(Module, Debug)]
pub struct Block<B: Backend> {
    ln_1: LayerNorm<B>,
    attn: CausalSelfAttention<B>,
    ln_2: LayerNorm<B>,
    mlp: Mlp<B>,
}

impl<B: Backend> Block<B> {
    pub fn new(cfg: &GptConfig, layer_idx: usize, device: &B::Device) -> Self {
        Self {
            ln_1: LayerNormConfig::new(cfg.n_embd)
                .with_epsilon(cfg.layer_norm_epsilon)
                .init(device),
            attn: CausalSelfAttention::new(cfg, layer_idx, device),
            ln_2: LayerNormConfig::new(cfg.n_embd)
                .with_epsilon(cfg.layer_norm_epsilon)
                .init(device),
            mlp: Mlp::new(cfg, device),
        }
    }

    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        cache_layer: &mut LayerCache<B>,
        past: usize,
    ) -> Tensor<B, 3> {
        let x = x.clone() + self.attn.forward(self.ln_1.forward(x), cache_layer, past);
        x.clone() + self.mlp.forward(self.ln_2.forward(x))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GPT
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct GptModel<B: Backend> {
    wte: Embedding<B>,
    wpe: Embedding<B>,
    blocks: Vec<Block<B>>,
    ln_f: LayerNorm<B>,
    lm_head: Linear<B>,
    vocab_size: usize,
    n_positions: usize,
    n_embd: usize,
}

impl<B: Backend> GptModel<B> {
    pub fn new(cfg: &GptConfig, device: &B::Device) -> Self {
        info!("═══════════════════════════════════════");
        info!("Initializing GptModel");
        info!("  vocab_size: {}", cfg.vocab_size);
        info!("  n_positions: {}", cfg.n_positions);
        info!("  n_layer: {}", cfg.n_layer);
        info!("  n_head: {}", cfg.n_head);
        info!("  n_embd: {}", cfg.n_embd);
        info!("═══════════════════════════════════════");

        let blocks = (0..cfg.n_layer)
            .map(|i| Block::new(cfg, i, device))
            .collect();

        Self {
            wte: EmbeddingConfig::new(cfg.vocab_size, cfg.n_embd).init(device),
            wpe: EmbeddingConfig::new(cfg.n_positions, cfg.n_embd).init(device),
            blocks,
            ln_f: LayerNormConfig::new(cfg.n_embd)
                .with_epsilon(cfg.layer_norm_epsilon)
                .init(device),
            lm_head: LinearConfig::new(cfg.n_embd, cfg.vocab_size)
                .with_bias(false)
                .init(device),
            vocab_size: cfg.vocab_size,
            n_positions: cfg.n_positions,
            n_embd: cfg.n_embd,
        }
    }

    /// Load weights saved with `save_record` (burn named MessagePack).
    pub fn load_record(self, path: impl Into<PathBuf>, device: &B::Device) -> anyhow::Result<Self> {
        let path = path.into();
        info!("Loading weights from {}", path.display());
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.load_file(path.clone(), &recorder, device)
            .map_err(|e| anyhow!("Failed to load weights from {}: {e:?}", path.display()))
    }

    pub fn save_record(self, path: impl Into<PathBuf>) -> anyhow::Result<()> {
        let path = path.into();
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.save_file(path.clone(), &recorder)
            .map_err(|e| anyhow!("Failed to save weights to {}: {e:?}", path.display()))
    }

    pub fn num_layers(&self) -> usize {
        self.blocks.len()
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Longest sequence the position table covers.
    pub fn n_positions(&self) -> usize {
        self.n_positions
    }

    /// Full causal pass: [B, T] ids → [B, T, V] logits.
    pub fn forward(&self, idx: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let mut cache = KVCache::new(self.num_layers());
        self.forward_cached(idx, &mut cache)
    }

    /// Pass over `idx` placed after everything already in `cache`. Appends
    /// the new keys/values and advances the cache position by T.
    pub fn forward_cached(&self, idx: Tensor<B, 2, Int>, cache: &mut KVCache<B>) -> Tensor<B, 3> {
        let [b, t] = idx.dims();
        assert!(t > 0, "Sequence length must be > 0");
        let past = cache.position();
        assert!(
            past + t <= self.n_positions,
            "Sequence of {} tokens exceeds n_positions={}",
            past + t,
            self.n_positions
        );
        debug!("GptModel.forward_cached: [B={}, T={}] past={}", b, t, past);

        let device = idx.device();
        let positions = Tensor::<B, 1, Int>::arange(past as i64..(past + t) as i64, &device)
            .reshape([1, t]);
        let pos_emb = self.wpe.forward(positions).expand([b, t, self.n_embd]);

        let mut x = self.wte.forward(idx) + pos_emb;
        for (i, block) in self.blocks.iter().enumerate() {
            x = block.forward(x, &mut cache.store[i], past);
        }
        cache.advance(t);

        let logits = self.lm_head.forward(self.ln_f.forward(x));
        debug!("GptModel logits shape {:?}", logits.dims());
        logits
    }

    pub fn check_logits_health(logits: &Tensor<B, 3>) -> bool {
        let is_healthy = logits.to_data().iter::<f32>().all(|x| x.is_finite());
        if !is_healthy {
            debug!("⚠️  Logits contain NaN or Inf!");
        }
        is_healthy
    }
}
