//! CLI for smc-oxidized: constrained generation and mask inspection.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use smc_oxidized::model::DEMO_TOKENS;
use smc_oxidized::{
    spawn_batcher, BigramModel, CachedModel, ConstraintMasks, EmptyMaskPolicy, Execution,
    PromptTokenizer, ResamplingScheme, SequenceModel, ShortWordGenerator, SmcConfig,
    Vocabulary, WordBoundary,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "smc-oxidized")]
#[command(about = "Short-word constrained generation with sequential Monte Carlo")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Word-boundary rule for the length bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BoundaryArg {
    /// Bound every token that does not start with whitespace; no word ever exceeds the limit
    Strict,
    /// Bound only tokens starting with a letter; punctuation- and digit-led tokens may lengthen words
    Alphabetic,
}

impl From<BoundaryArg> for WordBoundary {
    fn from(arg: BoundaryArg) -> Self {
        match arg {
            BoundaryArg::Strict => WordBoundary::Whitespace,
            BoundaryArg::Alphabetic => WordBoundary::Alphabetic,
        }
    }
}

/// Flag first, then the config file; the CLI defaults to the strict rule.
fn resolve_boundary(arg: Option<BoundaryArg>, from_file: Option<WordBoundary>) -> WordBoundary {
    match (arg, from_file) {
        (Some(arg), _) => arg.into(),
        (None, Some(file)) => file,
        (None, None) => WordBoundary::Whitespace,
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate completions whose words are at most --max-word-len characters
    Generate {
        #[arg(long)]
        prompt: String,
        /// Population size (overrides config)
        #[arg(short = 'n', long)]
        particles: Option<usize>,
        /// Per-particle token budget (overrides config)
        #[arg(long)]
        max_tokens: Option<usize>,
        #[arg(long)]
        max_word_len: Option<usize>,
        /// Seed for the SMC run
        #[arg(long)]
        seed: Option<u64>,
        /// Seed for the demo bigram model
        #[arg(long, default_value = "0")]
        model_seed: u64,
        /// tokenizer.json whose vocabulary the demo model runs over
        #[arg(long)]
        tokenizer: Option<PathBuf>,
        #[arg(long, default_value = "</s>")]
        eos: String,
        /// JSON file with SmcConfig fields
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        sequential: bool,
        #[arg(long)]
        systematic: bool,
        /// Resample only when ESS / N falls below this value
        #[arg(long)]
        ess_threshold: Option<f64>,
        /// Route model queries through a dynamic batcher of this size
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long, default_value = "2")]
        batch_timeout_ms: u64,
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Finish a particle instead of failing when its mask is empty
        #[arg(long)]
        finish_on_empty_mask: bool,
        /// Word-boundary rule [default: strict, or the config file's value]
        #[arg(long, value_enum)]
        word_boundary: Option<BoundaryArg>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show eligible-token counts per word-length bucket
    Masks {
        #[arg(long)]
        tokenizer: Option<PathBuf>,
        #[arg(long, default_value = "</s>")]
        eos: String,
        #[arg(long, default_value = "5")]
        max_word_len: usize,
        #[arg(long, value_enum, default_value = "strict")]
        word_boundary: BoundaryArg,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Generate {
            prompt,
            particles,
            max_tokens,
            max_word_len,
            seed,
            model_seed,
            tokenizer,
            eos,
            config,
            sequential,
            systematic,
            ess_threshold,
            batch_size,
            batch_timeout_ms,
            timeout_ms,
            finish_on_empty_mask,
            word_boundary,
            json,
        } => {
            let (mut cfg, file_boundary) = match config {
                Some(path) => {
                    let cfg = SmcConfig::from_json_file(&path)
                        .with_context(|| format!("loading config {:?}", path))?;
                    let boundary = cfg.word_boundary;
                    (cfg, Some(boundary))
                }
                None => (SmcConfig::default(), None),
            };
            cfg.word_boundary = resolve_boundary(word_boundary, file_boundary);
            if let Some(n) = particles {
                cfg.num_particles = n;
            }
            if let Some(t) = max_tokens {
                cfg.max_tokens = t;
            }
            if let Some(l) = max_word_len {
                cfg.max_word_len = l;
            }
            if seed.is_some() {
                cfg.seed = seed;
            }
            if sequential {
                cfg.execution = Execution::Sequential;
            }
            if systematic {
                cfg.resampling = ResamplingScheme::Systematic;
            }
            if ess_threshold.is_some() {
                cfg.ess_threshold = ess_threshold;
            }
            if timeout_ms.is_some() {
                cfg.timeout_ms = timeout_ms;
            }
            if finish_on_empty_mask {
                cfg.empty_mask = EmptyMaskPolicy::Finish;
            }
            cfg.validate()?;

            let (vocab, tok) = load_vocabulary(tokenizer.as_deref(), &eos)?;
            let prompt_ids = match &tok {
                Some(t) => t.encode(&prompt)?,
                None => vocab.encode_greedy(&prompt)?,
            };
            info!(prompt_tokens = prompt_ids.len(), vocab_size = vocab.len(), "prompt encoded");

            let model = CachedModel::new(BigramModel::new(vocab, model_seed, 1.0), 1 << 16);
            match batch_size {
                Some(size) => {
                    let (client, handle) = spawn_batcher(model, size, batch_timeout_ms)?;
                    run_generate(Arc::new(client), &prompt_ids, cfg, json)?;
                    handle
                        .join()
                        .map_err(|_| anyhow::anyhow!("batcher thread panicked"))?;
                }
                None => run_generate(Arc::new(model), &prompt_ids, cfg, json)?,
            }
        }
        Commands::Masks {
            tokenizer,
            eos,
            max_word_len,
            word_boundary,
        } => {
            let (vocab, _) = load_vocabulary(tokenizer.as_deref(), &eos)?;
            let masks = ConstraintMasks::build(&vocab, max_word_len, word_boundary.into());
            println!("vocab_size: {}", vocab.len());
            for i in 0..masks.num_buckets() {
                println!("bucket {}: {} eligible tokens", i, masks.bucket(i).len());
            }
            let empty = masks.empty_buckets();
            if !empty.is_empty() {
                println!("empty buckets: {:?}", empty);
            }
        }
    }
    Ok(())
}

fn load_vocabulary(
    tokenizer: Option<&Path>,
    eos: &str,
) -> Result<(Vocabulary, Option<PromptTokenizer>)> {
    match tokenizer {
        Some(path) => {
            info!("Loading tokenizer from {:?}...", path);
            let tok = PromptTokenizer::from_file(path)?;
            let vocab = tok.vocabulary(eos)?;
            Ok((vocab, Some(tok)))
        }
        None => {
            info!("No tokenizer given, using the built-in demo vocabulary");
            Ok((Vocabulary::from_tokens(DEMO_TOKENS, "<eos>")?, None))
        }
    }
}

fn run_generate<M: SequenceModel>(
    model: Arc<M>,
    prompt_ids: &[usize],
    config: SmcConfig,
    json: bool,
) -> Result<()> {
    let generator = ShortWordGenerator::new(model, config)?;
    let out = generator.generate(prompt_ids)?;
    // The generator holds the model (and any batch client) until here.
    drop(generator);

    if json {
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    for p in &out.particles {
        println!("{:.4}\t{}", p.weight, p.completion.trim());
    }
    let posterior = out.posterior();
    println!("distinct completions: {}", posterior.len());
    for (completion, weight) in posterior.iter().take(3) {
        println!("  {:.4}\t{}", weight, completion.trim());
    }
    if let Some(best) = out.best() {
        println!("best: {}", best.text);
    }
    println!(
        "rounds: {}  log_evidence: {:.4}  cancelled: {}  {:.1} tok/s",
        out.rounds, out.log_evidence, out.cancelled, out.metrics.tokens_per_second
    );
    Ok(())
}
