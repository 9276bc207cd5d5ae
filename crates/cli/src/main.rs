//! CLI tool for preparing transcript corpora for language-model training.
//!
//! Every dataset directory under the source path is augmented, tokenized with
//! the checkpoint's HuggingFace tokenizer, cut into turn-aware segments and
//! packed into binary shards in the destination directory.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde_json::Value;
use tokenizers::Tokenizer as HfTokenizer;
use tracing::{info, warn};

use transcript_prep_core::{
    dataset::DatasetFileNames, process_all_datasets, MetadataTable, PrepError, PrepareConfig,
    Tokenizer, DEFAULT_AUGMENTATION_SEED, DEFAULT_LOOKAHEAD, DEFAULT_MIN_TAIL_TOKENS,
    DEFAULT_MULTIPLE_OF, DEFAULT_SPONTANEOUS_LEVEL,
};

/// Prepare transcript datasets into packed token shards.
#[derive(Parser, Debug)]
#[command(name = "transcript-prep")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Root directory searched for dataset directories
    #[arg(long)]
    source_path: PathBuf,

    /// Checkpoint directory holding lit_config.json and the tokenizer files
    #[arg(long)]
    checkpoint_dir: PathBuf,

    /// Output directory for shards and metadata
    #[arg(long)]
    destination_path: PathBuf,

    /// HuggingFace hub tokenizer to use instead of the checkpoint tokenizer.json
    #[arg(long)]
    tokenizer: Option<String>,

    /// Segment length in tokens (default: block_size of lit_config.json plus one)
    #[arg(long)]
    block_size: Option<usize>,

    /// Shards hold a multiple of this many segments
    #[arg(long, default_value_t = DEFAULT_MULTIPLE_OF)]
    multiple_of: usize,

    /// Add a beginning-of-sequence token (default: add_bos_token of tokenizer_config.json)
    #[arg(long)]
    bos: Option<bool>,

    /// Add an end-of-sequence token (default: only without padding)
    #[arg(long)]
    eos: Option<bool>,

    /// Do not pad short segments
    #[arg(long)]
    no_padding: bool,

    /// Cut at fixed windows instead of around speaker turns
    #[arg(long)]
    naive_cut: bool,

    /// Rebuild datasets whose shards already exist
    #[arg(long)]
    overwrite: bool,

    /// CSV with dataset, conversations and spontaneous columns
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// CSV to merge per-dataset statistics into
    #[arg(long)]
    stats_csv: Option<PathBuf>,

    /// Augmentation level of spontaneous datasets
    #[arg(long, default_value_t = DEFAULT_SPONTANEOUS_LEVEL)]
    spontaneous_level: usize,

    /// Seed of the augmentation random stream
    #[arg(long, default_value_t = DEFAULT_AUGMENTATION_SEED)]
    seed: u64,

    /// Keep annotation markers as bracketed words
    #[arg(long)]
    keep_specials: bool,

    /// Tokens scanned past a window for a closing turn tag
    #[arg(long, default_value_t = DEFAULT_LOOKAHEAD)]
    lookahead: usize,

    /// With --naive-cut, final fragments this short are dropped
    #[arg(long, default_value_t = DEFAULT_MIN_TAIL_TOKENS)]
    min_tail_tokens: usize,

    #[arg(long, default_value = "full.txt")]
    filename_full: String,

    #[arg(long, default_value = "train.txt")]
    filename_train: String,

    #[arg(long, default_value = "dev.txt")]
    filename_dev: String,
}

/// Wrapper around HuggingFace tokenizers with the checkpoint's special tokens.
///
/// This uses the Rust-native tokenizers library, which is `Send + Sync`
/// and enables parallel processing of datasets.
struct CheckpointTokenizer {
    inner: HfTokenizer,
    bos_id: Option<u32>,
    eos_id: Option<u32>,
    add_bos_token: bool,
}

impl CheckpointTokenizer {
    /// Load `tokenizer.json` from the checkpoint, or `name` from the hub.
    fn load(checkpoint_dir: &Path, name: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let local = checkpoint_dir.join("tokenizer.json");
        let inner = match name {
            Some(name) => HfTokenizer::from_pretrained(name, None),
            None if local.is_file() => HfTokenizer::from_file(&local),
            None => {
                return Err(format!(
                    "no tokenizer.json in {}, pass --tokenizer",
                    checkpoint_dir.display()
                )
                .into())
            }
        }
        .map_err(|e| e as Box<dyn std::error::Error>)?;

        let config = read_json(&checkpoint_dir.join("tokenizer_config.json"))?;
        let lookup = |key: &str| {
            config
                .as_ref()
                .and_then(|c| special_token(c, key))
                .and_then(|token| inner.token_to_id(&token))
        };
        let bos_id = lookup("bos_token");
        let eos_id = lookup("eos_token");
        let add_bos_token = config
            .as_ref()
            .and_then(|c| c.get("add_bos_token"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Self {
            inner,
            bos_id,
            eos_id,
            add_bos_token,
        })
    }
}

impl Tokenizer for CheckpointTokenizer {
    fn encode(&self, text: &str, bos: bool, eos: bool) -> transcript_prep_core::Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| PrepError::Tokenizer(e.to_string()))?;
        let mut ids = Vec::with_capacity(encoding.len() + 2);
        if let (true, Some(bos_id)) = (bos, self.bos_id) {
            ids.push(bos_id);
        }
        ids.extend_from_slice(encoding.get_ids());
        if let (true, Some(eos_id)) = (eos, self.eos_id) {
            ids.push(eos_id);
        }
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> transcript_prep_core::Result<String> {
        self.inner
            .decode(ids, false)
            .map_err(|e| PrepError::Tokenizer(e.to_string()))
    }

    fn eos_id(&self) -> Option<u32> {
        self.eos_id
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    // Decoding a lone token drops its leading space with SentencePiece
    // decoders; the piece itself still carries the word-start mark.
    fn starts_word(&self, id: u32) -> transcript_prep_core::Result<bool> {
        match self.inner.id_to_token(id) {
            Some(piece) => Ok(piece.starts_with(['▁', 'Ġ', ' '])),
            None => Ok(self.decode(&[id])?.starts_with(' ')),
        }
    }
}

/// Special token string of a tokenizer config, plain or `{"content": ...}`.
fn special_token(config: &Value, key: &str) -> Option<String> {
    match config.get(key)? {
        Value::String(token) => Some(token.clone()),
        Value::Object(token) => token.get("content")?.as_str().map(str::to_string),
        _ => None,
    }
}

fn read_json(path: &Path) -> Result<Option<Value>, Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&std::fs::read_to_string(path)?)?))
}

/// Segment length: the model block size plus one target token.
fn effective_block_size(lit_config: Option<&Value>) -> Option<usize> {
    let block_size = lit_config?.get("block_size")?.as_u64()?;
    usize::try_from(block_size).ok().map(|b| b + 1)
}

/// Initialize tracing according to RUST_LOG (default `info`), on stderr.
fn init_tracing() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    std::fs::create_dir_all(&args.destination_path)?;

    let lit_config_path = args.checkpoint_dir.join("lit_config.json");
    let lit_config = read_json(&lit_config_path)?;
    let block_size = args
        .block_size
        .or_else(|| effective_block_size(lit_config.as_ref()))
        .ok_or("no block size: pass --block-size or provide lit_config.json")?;
    for name in ["lit_config.json", "tokenizer_config.json"] {
        let path = args.checkpoint_dir.join(name);
        if path.is_file() {
            std::fs::copy(&path, args.destination_path.join(name))?;
        }
    }

    info!(checkpoint = %args.checkpoint_dir.display(), "loading tokenizer");
    let tokenizer = CheckpointTokenizer::load(&args.checkpoint_dir, args.tokenizer.as_deref())?;
    if tokenizer.eos_id.is_none() {
        warn!("tokenizer_config.json defines no end-of-sequence token");
    }

    let metadata = match &args.metadata {
        Some(path) => MetadataTable::from_csv(path)?,
        None => MetadataTable::default(),
    };

    let config = PrepareConfig {
        block_size,
        multiple_of: args.multiple_of,
        bos: args.bos.unwrap_or(tokenizer.add_bos_token),
        eos: args.eos,
        padding: !args.no_padding,
        cut_around_turns: !args.naive_cut,
        skip_if_exists: !args.overwrite,
        spontaneous_level: args.spontaneous_level,
        seed: args.seed,
        keep_specials: args.keep_specials,
        lookahead: args.lookahead,
        min_tail_tokens: args.min_tail_tokens,
        file_names: DatasetFileNames {
            full: args.filename_full,
            train: args.filename_train,
            dev: args.filename_dev,
        },
        stats_csv: args.stats_csv,
    };

    let result = process_all_datasets(
        &args.source_path,
        &args.destination_path,
        &tokenizer,
        &metadata,
        &config,
    )?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
