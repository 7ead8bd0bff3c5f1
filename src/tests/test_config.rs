use crate::config::{ChatConfig, GenerationSettings, GptConfig};
use crate::sampling::SamplingPolicy;

#[test]
fn test_chat_config_defaults() {
    let config = ChatConfig::default();
    assert_eq!(config.max_total_length, 4000);
    assert_eq!(config.end_marker, "<|endoftext|>");
    assert_eq!(config.examples, vec!["Como você está?".to_string()]);
    assert!(config.tokenizer_path.is_none());
    assert_eq!(config.model, GptConfig::byte_level());
    assert_eq!(config.generation.policy, SamplingPolicy::Greedy);
}

#[test]
fn test_gpt_presets() {
    let small = GptConfig::small();
    assert_eq!((small.n_layer, small.n_embd, small.head_dim()), (12, 768, 64));

    let medium = GptConfig::medium();
    assert_eq!((medium.n_layer, medium.n_embd, medium.head_dim()), (24, 1024, 64));

    let large = GptConfig::large();
    assert_eq!((large.n_layer, large.n_embd, large.head_dim()), (36, 1280, 64));
    assert_eq!(large.vocab_size, 50257);
}

#[test]
fn test_chat_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chat.json");
    let path = path.to_str().unwrap();

    let config = ChatConfig {
        max_total_length: 512,
        generation: GenerationSettings {
            policy: SamplingPolicy::TempTopP { t: 0.8, p: 0.9 },
            num_candidates: 2,
            seed: 7,
        },
        ..ChatConfig::default()
    };
    config.to_file(path).unwrap();

    assert_eq!(ChatConfig::from_file(path).unwrap(), config);
}

#[test]
fn test_partial_chat_config_uses_defaults() {
    let config: ChatConfig = serde_json::from_str(r#"{ "max_total_length": 256 }"#).unwrap();
    assert_eq!(config.max_total_length, 256);
    assert_eq!(config.title, ChatConfig::default().title);
    assert_eq!(config.generation, GenerationSettings::default());
}

#[test]
fn test_gpt2_config_json_is_accepted() {
    // Trimmed HF config.json; unknown keys are ignored
    let json = r#"{
        "activation_function": "gelu_new",
        "architectures": ["GPT2LMHeadModel"],
        "n_ctx": 1024,
        "n_embd": 1280,
        "n_head": 20,
        "n_layer": 36,
        "n_positions": 1024,
        "vocab_size": 50257
    }"#;
    let config: GptConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config, GptConfig::large());
}

#[test]
fn test_gpt_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    let path = path.to_str().unwrap();

    GptConfig::medium().to_file(path).unwrap();
    assert_eq!(GptConfig::from_file(path).unwrap(), GptConfig::medium());
}

#[test]
fn test_missing_config_file_is_an_error() {
    assert!(ChatConfig::from_file("/definitely/not/here.json").is_err());
}
