// src/sampling.rs

//! Next-token selection for generation
//!
//! Temperature and top-k run on the tensor; top-p and the final draw run on
//! host rows, one row per candidate.

use anyhow::{anyhow, Result};
use burn::tensor::{activation, backend::Backend, Int, Tensor};
use log::debug;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};

// ═════════════════════════════════════════════════════════════════════════════
// Sampling policy enum
// ═════════════════════════════════════════════════════════════════════════════

/// Sampling policy to inject into the engine
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SamplingPolicy {
    Greedy,
    Temperature { t: f64 },
    TopK { k: usize },
    TopP { p: f64 },
    TempTopK { t: f64, k: usize },
    TempTopP { t: f64, p: f64 },
    TempTopKTopP { t: f64, k: usize, p: f64 },
}

impl SamplingPolicy {
    /// Temperature 0 means greedy; otherwise combine whatever filters are set.
    pub fn from_params(temperature: f64, top_k: Option<usize>, top_p: Option<f64>) -> Self {
        use SamplingPolicy::*;
        if temperature == 0.0 {
            return Greedy;
        }
        match (top_k, top_p) {
            (None, None) => Temperature { t: temperature },
            (Some(k), None) => TempTopK { t: temperature, k },
            (None, Some(p)) => TempTopP { t: temperature, p },
            (Some(k), Some(p)) => TempTopKTopP { t: temperature, k, p },
        }
    }

    fn parts(&self) -> (Option<f64>, Option<usize>, Option<f64>) {
        use SamplingPolicy::*;
        match *self {
            Greedy => (None, None, None),
            Temperature { t } => (Some(t), None, None),
            TopK { k } => (None, Some(k), None),
            TopP { p } => (None, None, Some(p)),
            TempTopK { t, k } => (Some(t), Some(k), None),
            TempTopP { t, p } => (Some(t), None, Some(p)),
            TempTopKTopP { t, k, p } => (Some(t), Some(k), Some(p)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let (t, _, p) = self.parts();
        if let Some(t) = t {
            if !(t > 0.0) {
                return Err(anyhow!("Temperature must be positive, got {t}"));
            }
        }
        if let Some(p) = p {
            if !(p > 0.0 && p <= 1.0) {
                return Err(anyhow!("top_p must be in (0, 1], got {p}"));
            }
        }
        Ok(())
    }
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        SamplingPolicy::Greedy
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Temperature scaling
// ═════════════════════════════════════════════════════════════════════════════

pub fn apply_temperature<B: Backend>(logits: Tensor<B, 2>, temperature: f64) -> Tensor<B, 2> {
    if temperature == 1.0 {
        return logits;
    }
    assert!(
        temperature > 0.0,
        "Temperature must be positive, got {}",
        temperature
    );
    debug!("Applying temperature scaling: {}", temperature);
    logits / temperature
}

// ═════════════════════════════════════════════════════════════════════════════
// Top-k filtering
// ═════════════════════════════════════════════════════════════════════════════

pub fn top_k_filter<B: Backend>(logits: Tensor<B, 2>, k: usize) -> Tensor<B, 2> {
    let [batch, vocab] = logits.dims();

    if k == 0 || k >= vocab {
        return logits;
    }

    debug!("Applying top-k filter: k={}, vocab={}", k, vocab);

    let sorted = logits.clone().sort(1);
    let kth_val = sorted.narrow(1, vocab - k, 1);
    let mask = logits.clone().greater_equal(kth_val.expand([batch, vocab]));

    logits.mask_fill(mask.bool_not(), f64::NEG_INFINITY)
}

// ═════════════════════════════════════════════════════════════════════════════
// Top-p (nucleus) filtering on one probability row
// ═════════════════════════════════════════════════════════════════════════════

/// Zeroes every probability outside the smallest high-probability set whose
/// mass reaches `p`. The row is left unnormalized.
pub fn top_p_filter(probs: &mut [f32], p: f64) {
    assert!(p > 0.0 && p <= 1.0, "top_p must be in (0, 1]");
    if p >= 0.9999 {
        return;
    }

    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let mut cum = 0.0f32;
    let mut keep = vec![false; probs.len()];
    for idx in order {
        if cum >= p as f32 {
            break;
        }
        keep[idx] = true;
        cum += probs[idx];
    }
    for (prob, kept) in probs.iter_mut().zip(keep) {
        if !kept {
            *prob = 0.0;
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Sampling functions
// ═════════════════════════════════════════════════════════════════════════════

/// Greedy sampling: argmax on vocab dimension
/// Input: [B, V], Output: [B, 1] Int
pub fn sample_greedy<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 2, Int> {
    let indices = logits.argmax(1);
    debug!("Greedy sample output shape: {:?}", indices.dims());
    indices
}

// First index wins on ties, matching tensor argmax.
fn argmax_row(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Draw one index from an unnormalized probability row. Degenerate rows
/// (all zero or non-finite) fall back to argmax.
pub fn draw_from_row<R: Rng + ?Sized>(row: &[f32], rng: &mut R) -> usize {
    match WeightedIndex::new(row) {
        Ok(dist) => dist.sample(rng),
        Err(e) => {
            debug!("Degenerate distribution ({e}), falling back to argmax");
            argmax_row(row)
        }
    }
}

/// Pick one token per row of `logits_last` ([B, V]) under `policy`.
pub fn sample_with_policy<B: Backend, R: Rng + ?Sized>(
    logits_last: Tensor<B, 2>,
    policy: SamplingPolicy,
    rng: &mut R,
) -> Vec<u32> {
    debug!("Sampling with policy: {:?}", policy);

    if policy == SamplingPolicy::Greedy {
        return sample_greedy(logits_last)
            .to_data()
            .iter::<i64>()
            .map(|id| id as u32)
            .collect();
    }

    let (temperature, top_k, top_p) = policy.parts();
    let mut logits = logits_last;
    if let Some(t) = temperature {
        logits = apply_temperature(logits, t);
    }
    if let Some(k) = top_k {
        logits = top_k_filter(logits, k);
    }

    let [_, vocab] = logits.dims();
    let probs: Vec<f32> = activation::softmax(logits, 1).to_data().iter::<f32>().collect();

    probs
        .chunks(vocab)
        .map(|row| {
            let mut row = row.to_vec();
            if let Some(p) = top_p {
                top_p_filter(&mut row, p);
            }
            draw_from_row(&row, rng) as u32
        })
        .collect()
}

// ═════════════════════════════════════════════════════════════════════════════
// Utility functions
// ═════════════════════════════════════════════════════════════════════════════

/// Extract last timestep logits from [B, T, V] -> [B, V]
pub fn extract_last_logits<B: Backend>(logits: Tensor<B, 3>) -> Tensor<B, 2> {
    let [b, t, v] = logits.dims();
    logits.slice([0..b, (t - 1)..t, 0..v]).reshape([b, v])
}
