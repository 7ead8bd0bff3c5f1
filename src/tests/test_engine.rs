//! Engine tests: ceiling, stop/pad handling, candidates, input validation.
//!
//! The model is randomly initialized, so assertions are structural.

use crate::{
    backend::AutoBackend,
    config::{GenerationSettings, GptConfig},
    engine::{Engine, Generator},
    error::ChatError,
    gpt::GptModel,
    sampling::SamplingPolicy,
};

type TestBackend = AutoBackend;

const STOP: u32 = 15;
const PAD: u32 = 14;

fn tiny_config() -> GptConfig {
    GptConfig {
        vocab_size: 16,
        n_positions: 24,
        n_embd: 16,
        n_layer: 2,
        n_head: 2,
        layer_norm_epsilon: 1e-5,
    }
}

fn engine_with(settings: GenerationSettings) -> Engine<TestBackend> {
    let device = Default::default();
    let model = GptModel::<TestBackend>::new(&tiny_config(), &device);
    Engine::new(model, device, settings).unwrap()
}

fn greedy_engine() -> Engine<TestBackend> {
    engine_with(GenerationSettings::default())
}

fn sampled_settings(num_candidates: usize) -> GenerationSettings {
    GenerationSettings {
        policy: SamplingPolicy::TempTopK { t: 1.2, k: 8 },
        num_candidates,
        seed: 5,
    }
}

#[test]
fn test_generate_respects_ceiling_and_keeps_prompt() {
    crate::init();
    let engine = greedy_engine();
    let prompt = [1, 2, 3];

    let out = engine.generate(&prompt, 8, STOP, STOP).unwrap();
    assert_eq!(out.len(), 1);

    let seq = &out[0];
    assert!(seq.starts_with(&prompt));
    assert!(seq.len() > prompt.len());
    assert!(seq.len() <= 8);
    if seq.len() < 8 {
        assert_eq!(*seq.last().unwrap(), STOP, "early exit only on the stop token");
    }
}

#[test]
fn test_ceiling_is_clipped_to_position_table() {
    let engine = greedy_engine();
    // stop id outside the vocabulary: generation always runs to the ceiling
    let out = engine.generate(&[1, 2], 4000, 99, 99).unwrap();
    assert_eq!(out[0].len(), tiny_config().n_positions);
}

#[test]
fn test_greedy_generation_is_deterministic() {
    let engine = greedy_engine();
    let a = engine.generate(&[4, 5, 6], 12, STOP, STOP).unwrap();
    let b = engine.generate(&[4, 5, 6], 12, STOP, STOP).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_generation_halts_at_first_stop_token() {
    let engine = greedy_engine();
    let prompt = [7, 8];

    // Greedy: whatever comes first becomes the stop token.
    let first = engine.stream(&prompt, 1).unwrap().next().unwrap()[0];
    let out = engine.generate(&prompt, 20, first, first).unwrap();

    assert_eq!(out[0], vec![7, 8, first]);
}

#[test]
fn test_candidates_are_padded_after_stop() {
    let engine = engine_with(sampled_settings(3));
    let prompt = [1, 2, 3];

    let out = engine.generate(&prompt, 16, STOP, PAD).unwrap();
    assert_eq!(out.len(), 3);

    let len = out[0].len();
    for seq in &out {
        assert_eq!(seq.len(), len, "candidates share one length");
        assert!(seq.starts_with(&prompt));
        if let Some(stop_at) = seq[prompt.len()..].iter().position(|&id| id == STOP) {
            let tail = &seq[prompt.len() + stop_at + 1..];
            assert!(tail.iter().all(|&id| id == PAD), "tail after stop: {tail:?}");
        }
    }
}

#[test]
fn test_stream_yields_one_column_per_step() {
    let engine = engine_with(sampled_settings(2));
    let columns: Vec<Vec<u32>> = engine.stream(&[1, 2], 5).unwrap().collect();

    assert_eq!(columns.len(), 5);
    for column in columns {
        assert_eq!(column.len(), 2);
        assert!(column.iter().all(|&id| (id as usize) < tiny_config().vocab_size));
    }
}

#[test]
fn test_stream_stops_at_position_table() {
    let engine = greedy_engine();
    let columns: Vec<Vec<u32>> = engine.stream(&[1; 20], 100).unwrap().collect();
    assert_eq!(columns.len(), tiny_config().n_positions - 20);
}

#[test]
fn test_stream_rejects_prompt_filling_position_table() {
    let engine = greedy_engine();
    assert!(matches!(engine.stream(&[1; 24], 1), Err(ChatError::Generator(_))));
    assert!(matches!(engine.stream(&[], 1), Err(ChatError::Generator(_))));
}

#[test]
fn test_engine_reports_position_limit() {
    assert_eq!(greedy_engine().max_sequence_length(), Some(24));
}

#[test]
fn test_prompt_at_ceiling_is_rejected() {
    let engine = greedy_engine();
    let err = engine.generate(&[1, 2, 3, 4], 4, STOP, STOP).unwrap_err();
    assert!(matches!(err, ChatError::Generator(_)));
}

#[test]
fn test_empty_prompt_is_rejected() {
    let engine = greedy_engine();
    let err = engine.generate(&[], 10, STOP, STOP).unwrap_err();
    assert!(matches!(err, ChatError::Generator(_)));
}

#[test]
fn test_out_of_vocab_prompt_is_rejected() {
    let engine = greedy_engine();
    let err = engine.generate(&[1, 300], 10, STOP, STOP).unwrap_err();
    match err {
        ChatError::Generator(msg) => assert!(msg.contains("300")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_engine_rejects_invalid_settings() {
    let device = Default::default();

    let model = GptModel::<TestBackend>::new(&tiny_config(), &device);
    let zero = GenerationSettings {
        num_candidates: 0,
        ..GenerationSettings::default()
    };
    assert!(Engine::new(model, device.clone(), zero).is_err());

    let model = GptModel::<TestBackend>::new(&tiny_config(), &device);
    let cold = GenerationSettings {
        policy: SamplingPolicy::Temperature { t: 0.0 },
        ..GenerationSettings::default()
    };
    assert!(Engine::new(model, device, cold).is_err());
}
