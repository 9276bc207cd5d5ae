//! Pipeline turning a corpus of transcripts into packed token shards.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::augment::{AugmentationConfig, AugmentationLevel, TextAugmenter};
use crate::boundary::TagBoundary;
use crate::chunker::{ChunkerConfig, TurnAwareChunker};
use crate::dataset::{discover_datasets, read_conversations, DatasetFile, DatasetFileNames, DatasetMetadata, MetadataTable};
use crate::error::{PrepError, Result};
use crate::shard::{NullShardWriter, PackedShardWriter, ShardDtype, ShardWriter};
use crate::{
    Tokenizer, DEFAULT_AUGMENTATION_SEED, DEFAULT_LOOKAHEAD, DEFAULT_MIN_TAIL_TOKENS,
    DEFAULT_MULTIPLE_OF, DEFAULT_SPONTANEOUS_LEVEL, MAX_SEGMENTS_PER_FILE, TAG_EXEMPLARS,
};

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PrepareConfig {
    /// Segment length in tokens (model block size plus one).
    pub block_size: usize,
    /// Shards hold a multiple of this many segments.
    pub multiple_of: usize,
    pub bos: bool,
    /// `None`: add end-of-sequence tokens unless padding.
    pub eos: Option<bool>,
    /// Pad short segments with the end-of-sequence id.
    pub padding: bool,
    pub cut_around_turns: bool,
    /// Leave datasets with existing shards alone instead of rebuilding them.
    pub skip_if_exists: bool,
    pub spontaneous_level: usize,
    pub seed: u64,
    pub keep_specials: bool,
    pub lookahead: usize,
    pub min_tail_tokens: usize,
    pub file_names: DatasetFileNames,
    /// CSV merging the run reports of every dataset.
    pub stats_csv: Option<PathBuf>,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            block_size: 2049,
            multiple_of: DEFAULT_MULTIPLE_OF,
            bos: false,
            eos: None,
            padding: true,
            cut_around_turns: true,
            skip_if_exists: true,
            spontaneous_level: DEFAULT_SPONTANEOUS_LEVEL,
            seed: DEFAULT_AUGMENTATION_SEED,
            keep_specials: false,
            lookahead: DEFAULT_LOOKAHEAD,
            min_tail_tokens: DEFAULT_MIN_TAIL_TOKENS,
            file_names: DatasetFileNames::default(),
            stats_csv: None,
        }
    }
}

/// How the segments of one dataset are spread over shard files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShardLayout {
    pub num_samples: usize,
    pub num_samples_rounded: usize,
    pub num_samples_per_file: usize,
    pub num_files: usize,
    pub num_padded: usize,
    pub block_size: usize,
}

impl ShardLayout {
    /// Layout for `num_samples` segments; `None` when there is nothing to
    /// write.
    pub fn compute(num_samples: usize, block_size: usize, multiple_of: usize) -> Option<Self> {
        if num_samples == 0 || multiple_of == 0 {
            return None;
        }
        let mut per_file = num_samples.div_ceil(multiple_of);
        let mut k = 1;
        while per_file > MAX_SEGMENTS_PER_FILE {
            k += 1;
            per_file = num_samples.div_ceil(multiple_of * k);
        }
        let num_files = num_samples.div_ceil(per_file);
        Some(Self {
            num_samples,
            num_samples_rounded: per_file * num_files,
            num_samples_per_file: per_file,
            num_files,
            num_padded: per_file * num_files - num_samples,
            block_size,
        })
    }

    /// Tokens per shard file.
    pub fn chunk_size(&self) -> usize {
        self.block_size * self.num_samples_per_file
    }
}

/// Counts reported for one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetReport {
    pub dataset: String,
    pub block_size: usize,
    pub conversations: usize,
    /// Texts produced by augmentation, originals included.
    pub conversations_augmented: usize,
    /// Segments of the first variant of each conversation.
    pub segments: usize,
    pub segments_augmented: usize,
    /// Texts cut into several segments.
    pub multi_chunk: usize,
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
}

/// Result of processing all datasets.
#[derive(Debug, Default, Serialize)]
pub struct PrepareResult {
    pub datasets: Vec<DatasetReport>,
    /// Datasets left alone because their shards already exist.
    pub skipped: Vec<String>,
}

/// Everything a pass needs, shared by the counting and writing passes.
struct PassContext<'a, T> {
    tokenizer: &'a T,
    augmenter: TextAugmenter,
    chunker: TurnAwareChunker,
    level: AugmentationLevel,
    force_augmentation: bool,
    bos: bool,
    eos: bool,
    seed: u64,
}

impl<T: Tokenizer> PassContext<'_, T> {
    fn run<W: ShardWriter>(
        &self,
        dataset: &str,
        conversations: &[String],
        writer: &mut W,
    ) -> Result<DatasetReport> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut report = DatasetReport {
            dataset: dataset.to_string(),
            block_size: self.chunker.config().block_size,
            ..DatasetReport::default()
        };

        for text in conversations {
            let variants =
                self.augmenter
                    .generate(text, Some(self.level), self.force_augmentation, &mut rng);
            for (ivariant, variant) in variants.enumerate() {
                let ids = self.tokenizer.encode(&variant, self.bos, self.eos)?;
                if ids.len() > self.chunker.config().block_size {
                    report.multi_chunk += 1;
                }
                for segment in self.chunker.chunks(&ids, self.tokenizer) {
                    let segment = segment?;
                    let len = segment.len();
                    report.min_len = Some(report.min_len.map_or(len, |m| m.min(len)));
                    report.max_len = Some(report.max_len.map_or(len, |m| m.max(len)));
                    writer.add_array(&segment.tokens)?;
                    if ivariant == 0 {
                        report.segments += 1;
                    }
                    report.segments_augmented += 1;
                }
                report.conversations_augmented += 1;
            }
            report.conversations += 1;
        }
        Ok(report)
    }
}

/// Shards and metadata file of `prefix` in `destination`.
fn existing_outputs(destination: &Path, prefix: &str) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut shards = Vec::new();
    let mut others = Vec::new();
    let shard_start = format!("{prefix}_");
    let metadata_name = format!("{prefix}_metadata.json");
    for entry in std::fs::read_dir(destination)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_shard = name
            .strip_prefix(&shard_start)
            .and_then(|rest| rest.strip_suffix(".bin"))
            .is_some_and(|counter| !counter.is_empty() && counter.bytes().all(|b| b.is_ascii_digit()));
        if is_shard {
            shards.push(entry.path());
        } else if name == metadata_name {
            others.push(entry.path());
        }
    }
    Ok((shards, others))
}

/// Process one dataset file: count its segments, then write its shards.
///
/// Returns `None` when the dataset is skipped because its shards exist.
pub fn process_dataset<T: Tokenizer>(
    file: &DatasetFile,
    metadata: &DatasetMetadata,
    tokenizer: &T,
    tags: Option<TagBoundary>,
    destination: &Path,
    config: &PrepareConfig,
) -> Result<Option<DatasetReport>> {
    let name = file.name();
    let prefix = file.prefix();
    let sep_token = tokenizer.eos_id().ok_or_else(|| {
        PrepError::Config("tokenizer has no end-of-sequence id to separate shards".to_string())
    })?;

    let (shards, others) = existing_outputs(destination, &prefix)?;
    let placeholder = destination.join(format!("{prefix}_{:010}.bin", 0));
    if !shards.is_empty() {
        if config.skip_if_exists {
            info!(dataset = %name, "skipping dataset, shards already exist");
            return Ok(None);
        }
        for path in shards.iter().chain(&others) {
            std::fs::remove_file(path)?;
        }
    } else if config.skip_if_exists {
        // Claim the dataset for concurrent runs.
        File::create(&placeholder)?;
    }

    let (level, force_augmentation) = if metadata.is_dev {
        (AugmentationLevel::CANONICAL, false)
    } else if metadata.spontaneous {
        (AugmentationLevel::new(config.spontaneous_level), true)
    } else {
        (AugmentationLevel::CANONICAL, true)
    };
    info!(
        dataset = %name,
        path = %file.path.display(),
        level = level.get(),
        force_augmentation,
        "processing dataset"
    );

    let conversations = read_conversations(&file.path)?;
    if let Some(expected) = metadata.conversations {
        if expected != conversations.len() {
            warn!(dataset = %name, expected, found = conversations.len(), "conversation count differs from metadata");
        }
    }

    let chunker_config = ChunkerConfig {
        block_size: config.block_size,
        lookahead: config.lookahead,
        min_tail_tokens: config.min_tail_tokens,
        pad_value: config.padding.then_some(sep_token),
    };
    let context = PassContext {
        tokenizer,
        augmenter: TextAugmenter::new(AugmentationConfig {
            keep_specials: config.keep_specials,
        }),
        chunker: TurnAwareChunker::new(chunker_config, tags)?,
        level,
        force_augmentation,
        bos: config.bos,
        eos: config.eos.unwrap_or(!config.padding),
        seed: config.seed,
    };

    let counted = context.run(&name, &conversations, &mut NullShardWriter)?;
    let Some(layout) =
        ShardLayout::compute(counted.segments_augmented, config.block_size, config.multiple_of)
    else {
        warn!(dataset = %name, "dataset produced no segment, nothing written");
        if config.skip_if_exists && placeholder.exists() {
            std::fs::remove_file(&placeholder)?;
        }
        return Ok(Some(counted));
    };
    info!(
        dataset = %name,
        num_files = layout.num_files,
        per_file = layout.num_samples_per_file,
        num_samples = layout.num_samples,
        num_padded = layout.num_padded,
        "shard layout"
    );

    #[derive(Serialize)]
    struct MetadataFile<'a> {
        #[serde(flatten)]
        metadata: &'a DatasetMetadata,
        #[serde(flatten)]
        layout: ShardLayout,
    }
    let metadata_path = destination.join(format!("{prefix}_metadata.json"));
    serde_json::to_writer_pretty(
        BufWriter::new(File::create(&metadata_path)?),
        &MetadataFile { metadata, layout },
    )?;

    let mut writer = PackedShardWriter::new(
        destination,
        &prefix,
        layout.chunk_size(),
        sep_token,
        ShardDtype::for_vocab(tokenizer.vocab_size()),
    )?;
    let report = context.run(&name, &conversations, &mut writer)?;
    writer.flush()?;
    debug!(dataset = %name, files = writer.filenames().len(), "shards written");

    info!(
        dataset = %name,
        conversations = report.conversations,
        conversations_augmented = report.conversations_augmented,
        segments = report.segments,
        segments_augmented = report.segments_augmented,
        multi_chunk = report.multi_chunk,
        min_len = ?report.min_len,
        max_len = ?report.max_len,
        "dataset done"
    );
    Ok(Some(report))
}

/// Process every dataset under `source` in parallel.
///
/// Uses rayon across datasets; each dataset runs sequentially with its own
/// seeded random stream. Any dataset failure aborts the run.
pub fn process_all_datasets<T>(
    source: &Path,
    destination: &Path,
    tokenizer: &T,
    metadata: &MetadataTable,
    config: &PrepareConfig,
) -> Result<PrepareResult>
where
    T: Tokenizer + Sync,
{
    if config.padding && tokenizer.eos_id().is_none() {
        return Err(PrepError::Config(
            "padding requires a tokenizer with an end-of-sequence id".to_string(),
        ));
    }
    std::fs::create_dir_all(destination)?;

    let files = discover_datasets(source, &config.file_names)?;
    let tags = if config.cut_around_turns {
        Some(TagBoundary::resolve(tokenizer, &TAG_EXEMPLARS)?)
    } else {
        None
    };
    info!(
        datasets = files.len(),
        bos = config.bos,
        eos = config.eos.unwrap_or(!config.padding),
        block_size = config.block_size,
        "found datasets"
    );

    let total_files = files.len();
    let processed_count = AtomicUsize::new(0);

    let outcomes: Vec<(String, Option<DatasetReport>)> = files
        .par_iter()
        .map(|file| -> Result<(String, Option<DatasetReport>)> {
            let dataset_metadata = metadata.lookup(file);
            let report =
                process_dataset(file, &dataset_metadata, tokenizer, tags, destination, config)?;
            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
            info!("Processed {}/{} datasets", count, total_files);
            Ok((file.name(), report))
        })
        .collect::<Result<_>>()?;

    let mut result = PrepareResult::default();
    for (name, report) in outcomes {
        match report {
            Some(report) => result.datasets.push(report),
            None => result.skipped.push(name),
        }
    }

    if let Some(stats_csv) = &config.stats_csv {
        merge_stats(stats_csv, &result.datasets)?;
    }
    Ok(result)
}

/// Merge `reports` into the stats CSV, one row per dataset sorted by name.
pub fn merge_stats(path: &Path, reports: &[DatasetReport]) -> Result<()> {
    let mut rows: BTreeMap<String, DatasetReport> = BTreeMap::new();
    if path.is_file() {
        let mut reader = csv::Reader::from_path(path)?;
        for row in reader.deserialize() {
            let row: DatasetReport = row?;
            rows.insert(row.dataset.clone(), row);
        }
    }
    for report in reports {
        rows.insert(report.dataset.clone(), report.clone());
    }

    let mut writer = csv::Writer::from_path(path)?;
    for row in rows.values() {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::tests::read_shard;
    use std::fs;
    use tempfile::TempDir;

    const CLOSING_TAG: u32 = 1;

    /// Character tokenizer where `:]` is one token and 0 ends a sequence.
    struct CharTokenizer;

    impl Tokenizer for CharTokenizer {
        fn encode(&self, text: &str, bos: bool, eos: bool) -> Result<Vec<u32>> {
            let mut ids = Vec::new();
            if bos {
                ids.push(2);
            }
            let mut rest = text;
            while let Some(ch) = rest.chars().next() {
                if rest.starts_with(":]") {
                    ids.push(CLOSING_TAG);
                    rest = &rest[2..];
                } else {
                    ids.push(ch as u32);
                    rest = &rest[ch.len_utf8()..];
                }
            }
            if eos {
                ids.push(0);
            }
            Ok(ids)
        }

        fn decode(&self, ids: &[u32]) -> Result<String> {
            Ok(ids
                .iter()
                .filter_map(|&id| match id {
                    0 | 2 => None,
                    CLOSING_TAG => Some(":]".to_string()),
                    other => char::from_u32(other).map(String::from),
                })
                .collect())
        }

        fn eos_id(&self) -> Option<u32> {
            Some(0)
        }

        fn vocab_size(&self) -> usize {
            65_000
        }
    }

    const CORPUS: &str = "\
[speaker001:] Bonjour, comment allez-vous aujourd'hui ? [speaker002:] Très bien, merci. Et vous ?
[speaker001:] Ça va, je reviens de chez [PII] et il pleuvait [LAUGHTER].

[A:] Une conversation courte. [B:] Oui.

[Dr. House:] Un long monologue sans interruption qui continue encore et encore jusqu'à dépasser largement la taille d'un bloc.";

    fn setup(spontaneous: bool) -> (TempDir, PathBuf, PathBuf, MetadataTable) {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        let destination = dir.path().join("prepared");
        fs::create_dir_all(source.join("fr/talk")).unwrap();
        fs::write(source.join("fr/talk/full.txt"), CORPUS).unwrap();
        let csv_path = dir.path().join("metadata.csv");
        fs::write(
            &csv_path,
            format!("dataset,conversations,spontaneous\nfr/talk,3,{spontaneous}\n"),
        )
        .unwrap();
        let table = MetadataTable::from_csv(&csv_path).unwrap();
        (dir, source, destination, table)
    }

    fn config() -> PrepareConfig {
        PrepareConfig {
            block_size: 48,
            multiple_of: 2,
            ..PrepareConfig::default()
        }
    }

    fn shard_paths(destination: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = fs::read_dir(destination)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "bin"))
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_shard_layout() {
        let layout = ShardLayout::compute(100, 10, 8).unwrap();
        assert_eq!(layout.num_samples_per_file, 13);
        assert_eq!(layout.num_files, 8);
        assert_eq!(layout.num_padded, 4);
        assert_eq!(layout.num_samples_rounded, 104);
        assert_eq!(layout.chunk_size(), 130);

        let layout = ShardLayout::compute(10_000, 8, 8).unwrap();
        assert_eq!(layout.num_samples_per_file, 417);
        assert_eq!(layout.num_files, 24);
        assert_eq!(layout.num_padded, 8);

        assert!(ShardLayout::compute(0, 8, 8).is_none());
    }

    #[test]
    fn test_process_all_datasets() {
        let (_dir, source, destination, table) = setup(false);
        let result =
            process_all_datasets(&source, &destination, &CharTokenizer, &table, &config()).unwrap();
        assert!(result.skipped.is_empty());
        assert_eq!(result.datasets.len(), 1);

        let report = &result.datasets[0];
        assert_eq!(report.dataset, "fr/talk");
        assert_eq!(report.conversations, 3);
        // Forced augmentation replaces each text by a single variant.
        assert_eq!(report.conversations_augmented, 3);
        assert!(report.multi_chunk >= 2);
        assert_eq!(report.min_len, Some(48));
        assert_eq!(report.max_len, Some(48));

        let metadata: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(destination.join("fr--talk_metadata.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(metadata["dataset"], "fr/talk");
        assert_eq!(metadata["num_samples"], report.segments_augmented);
        assert_eq!(metadata["block_size"], 48);

        let shards = shard_paths(&destination);
        assert_eq!(Some(shards.len() as u64), metadata["num_files"].as_u64());
        let per_file = metadata["num_samples_per_file"].as_u64().unwrap() as usize;
        let (code, tokens) = read_shard(&shards[0]);
        assert_eq!(code, 8);
        assert_eq!(tokens.len(), 48 * per_file);
        let first = CharTokenizer.decode(&tokens[..48]).unwrap();
        assert!(first.starts_with('['), "{first}");
    }

    #[test]
    fn test_skip_if_exists() {
        let (_dir, source, destination, table) = setup(true);
        let first = process_all_datasets(&source, &destination, &CharTokenizer, &table, &config()).unwrap();
        assert_eq!(first.datasets.len(), 1);
        let shards = shard_paths(&destination);

        let second =
            process_all_datasets(&source, &destination, &CharTokenizer, &table, &config()).unwrap();
        assert!(second.datasets.is_empty());
        assert_eq!(second.skipped, vec!["fr/talk".to_string()]);
        assert_eq!(shard_paths(&destination), shards);
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let (_dir, source, destination, table) = setup(true);
        let config = PrepareConfig {
            skip_if_exists: false,
            ..config()
        };
        let first = process_all_datasets(&source, &destination, &CharTokenizer, &table, &config).unwrap();
        let bytes: Vec<Vec<u8>> = shard_paths(&destination).iter().map(|p| fs::read(p).unwrap()).collect();

        let second = process_all_datasets(&source, &destination, &CharTokenizer, &table, &config).unwrap();
        let again: Vec<Vec<u8>> = shard_paths(&destination).iter().map(|p| fs::read(p).unwrap()).collect();
        assert_eq!(first.datasets, second.datasets);
        assert_eq!(bytes, again);
    }

    #[test]
    fn test_dev_split_is_not_augmented() {
        let (_dir, source, destination, table) = setup(true);
        fs::write(source.join("fr/talk/dev.txt"), CORPUS).unwrap();
        let result =
            process_all_datasets(&source, &destination, &CharTokenizer, &table, &config()).unwrap();
        assert_eq!(result.datasets.len(), 1);
        let report = &result.datasets[0];
        assert_eq!(report.dataset, "fr/talk/dev");
        assert_eq!(report.conversations_augmented, report.conversations);
        assert_eq!(report.segments, report.segments_augmented);
        assert!(destination.join("fr--talk--dev_metadata.json").is_file());
    }

    #[test]
    fn test_naive_cutting_without_padding() {
        let (_dir, source, destination, table) = setup(false);
        let config = PrepareConfig {
            padding: false,
            cut_around_turns: false,
            ..config()
        };
        let result = process_all_datasets(&source, &destination, &CharTokenizer, &table, &config).unwrap();
        let report = &result.datasets[0];
        assert_eq!(report.max_len, Some(48));
        assert!(report.min_len.unwrap() > DEFAULT_MIN_TAIL_TOKENS);
    }

    #[test]
    fn test_merge_stats() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.csv");
        let report = |dataset: &str, segments| DatasetReport {
            dataset: dataset.to_string(),
            block_size: 8,
            segments,
            min_len: Some(8),
            ..DatasetReport::default()
        };
        merge_stats(&path, &[report("fr/b", 1), report("fr/a", 2)]).unwrap();
        merge_stats(&path, &[report("fr/b", 5), report("en/c", 3)]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<DatasetReport> = reader.deserialize().map(|r| r.unwrap()).collect();
        let summary: Vec<(&str, usize)> = rows.iter().map(|r| (r.dataset.as_str(), r.segments)).collect();
        assert_eq!(summary, vec![("en/c", 3), ("fr/a", 2), ("fr/b", 5)]);
        assert_eq!(rows[0].min_len, Some(8));
        assert_eq!(rows[0].max_len, None);
    }
}
