// src/main.rs
// Terminal chat host: explicit initialization, then one session per run

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{info, warn};

use dialochat::{
    backend::{get_device, print_backend_info, AutoBackend},
    config::ChatConfig,
    engine::Engine,
    gpt::GptModel,
    sampling::SamplingPolicy,
    session::{render_transcript, ChatSession},
    tokenizer::{ByteTokenizer, DialogTokenizer, TokenCodec},
    turn::TurnAccumulator,
};

#[derive(Parser, Debug)]
#[command(name = "dialochat", about = "Chat with a DialoGPT-style model in the terminal")]
struct Args {
    /// JSON chat config; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// tokenizer.json or a directory containing it
    #[arg(long)]
    tokenizer: Option<PathBuf>,

    /// Model weights (burn .mpk record)
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Token ceiling for the whole conversation
    #[arg(long)]
    max_total_length: Option<usize>,

    /// Sampling temperature; 0 selects greedy decoding
    #[arg(long)]
    temperature: Option<f64>,

    #[arg(long)]
    top_k: Option<usize>,

    #[arg(long)]
    top_p: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,
}

fn load_config(args: &Args) -> Result<ChatConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let path = path.to_str().ok_or_else(|| anyhow!("Config path is not UTF-8"))?;
            ChatConfig::from_file(path).with_context(|| format!("Failed to read config {path}"))?
        }
        None => ChatConfig::default(),
    };
    if let Some(path) = &args.tokenizer {
        config.tokenizer_path = Some(path.clone());
    }
    if let Some(path) = &args.weights {
        config.weights_path = Some(path.clone());
    }
    if let Some(n) = args.max_total_length {
        config.max_total_length = n;
    }
    if let Some(t) = args.temperature {
        config.generation.policy = SamplingPolicy::from_params(t, args.top_k, args.top_p);
    }
    if let Some(seed) = args.seed {
        config.generation.seed = seed;
    }
    Ok(config)
}

fn load_codec(config: &ChatConfig) -> Result<Box<dyn TokenCodec>> {
    Ok(match &config.tokenizer_path {
        Some(path) => Box::new(DialogTokenizer::from_path(path, &config.end_marker)?),
        None => {
            info!("No tokenizer configured, using byte-level tokenizer");
            Box::new(ByteTokenizer::new(config.end_marker.clone()))
        }
    })
}

fn print_banner(config: &ChatConfig) {
    println!("\n{}", config.title);
    println!("{}\n", config.description);
    print_examples(config);
    println!("Commands: /examples, /reset, quit\n");
}

fn print_examples(config: &ChatConfig) {
    if config.examples.is_empty() {
        return;
    }
    println!("Examples:");
    for example in &config.examples {
        println!("  - {example}");
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = load_config(&args)?;

    print_backend_info();
    let device = get_device();

    let codec = load_codec(&config)?;
    let mut model = GptModel::<AutoBackend>::new(&config.model, &device);
    if let Some(path) = &config.weights_path {
        model = model.load_record(path.clone(), &device)?;
    } else {
        info!("No weights configured, model is randomly initialized");
    }
    if codec.vocab_size() > model.vocab_size() {
        return Err(anyhow!(
            "Tokenizer vocabulary ({}) does not fit the model vocabulary ({})",
            codec.vocab_size(),
            model.vocab_size()
        ));
    }

    let engine = Engine::new(model, device, config.generation.clone())?;
    let accumulator = TurnAccumulator::new(codec.as_ref(), engine, config.max_total_length);
    if accumulator.effective_length() < config.max_total_length {
        warn!(
            "max_total_length {} exceeds the model's {} positions, conversations end at {}",
            config.max_total_length,
            accumulator.effective_length(),
            accumulator.effective_length()
        );
    }
    let mut session = ChatSession::new();

    print_banner(&config);
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else { break };
        let input = line?;
        let input = input.trim_end_matches(['\r', '\n']);

        match input.trim() {
            "quit" | "exit" => break,
            "" => continue,
            "/reset" => {
                session.reset();
                println!("(new conversation)\n");
                continue;
            }
            "/examples" => {
                print_examples(&config);
                continue;
            }
            _ => {}
        }

        match session.submit(&accumulator, input) {
            Ok(exchanges) => println!("\n{}", render_transcript(exchanges)),
            Err(e) => eprintln!("error: {e}\n"),
        }
    }

    println!("Goodbye!");
    Ok(())
}
