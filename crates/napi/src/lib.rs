//! Node.js bindings for transcript normalization and augmentation.
//!
//! Inference services format prompts with these functions so that they match
//! the text the model was trained on.

use napi::bindgen_prelude::*;
use napi_derive::napi;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Mutex;

use transcript_prep_core::{
    AugmentationConfig, AugmentationLevel, TextAugmenter as CoreAugmenter,
    DEFAULT_AUGMENTATION_SEED,
};

/// Options for augmentation. All fields are optional.
#[napi(object)]
pub struct AugmentationOptions {
    /// Highest augmentation level (default: every level).
    pub level: Option<i64>,
    /// Seed of the random stream (default: 51).
    pub seed: Option<u32>,
    /// Return one random variant instead of the canonical text first.
    pub force_augmentation: Option<bool>,
    /// Keep annotation markers as bracketed words.
    pub keep_specials: Option<bool>,
}

fn seeded(seed: Option<u32>) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed.map_or(DEFAULT_AUGMENTATION_SEED, u64::from))
}

fn to_level(level: Option<i64>) -> Result<Option<AugmentationLevel>> {
    level
        .map(AugmentationLevel::try_from)
        .transpose()
        .map_err(|e| Error::from_reason(e.to_string()))
}

/// Canonical normalization of a transcript.
///
/// @param text - Raw transcript with `[speaker:]` tags.
/// @param seed - Seed used for names replacing `[PII]` markers.
#[napi]
pub fn normalize_text(text: String, seed: Option<u32>) -> String {
    CoreAugmenter::default().normalize(&text, &mut seeded(seed))
}

/// Distinct variants of a transcript, canonical normalization first.
///
/// @param text - Raw transcript with `[speaker:]` tags.
/// @param options - Optional augmentation options.
#[napi]
pub fn augment_texts(text: String, options: Option<AugmentationOptions>) -> Result<Vec<String>> {
    let options = options.unwrap_or(AugmentationOptions {
        level: None,
        seed: None,
        force_augmentation: None,
        keep_specials: None,
    });
    let augmenter = CoreAugmenter::new(AugmentationConfig {
        keep_specials: options.keep_specials.unwrap_or(false),
    });
    let level = to_level(options.level)?;
    let mut rng = seeded(options.seed);
    Ok(augmenter
        .generate(&text, level, options.force_augmentation.unwrap_or(false), &mut rng)
        .collect())
}

/// Augmenter holding its own random stream across calls.
#[napi]
pub struct TextAugmenter {
    augmenter: CoreAugmenter,
    rng: Mutex<ChaCha8Rng>,
}

#[napi]
impl TextAugmenter {
    /// @param seed - Seed of the random stream (default: 51).
    /// @param keepSpecials - Keep annotation markers as bracketed words.
    #[napi(constructor)]
    pub fn new(seed: Option<u32>, keep_specials: Option<bool>) -> Self {
        Self {
            augmenter: CoreAugmenter::new(AugmentationConfig {
                keep_specials: keep_specials.unwrap_or(false),
            }),
            rng: Mutex::new(seeded(seed)),
        }
    }

    /// Restart the random stream.
    #[napi]
    pub fn reseed(&self, seed: u32) -> Result<()> {
        let mut rng = self.rng.lock().map_err(|_| Error::from_reason("Lock poisoned"))?;
        *rng = seeded(Some(seed));
        Ok(())
    }

    /// Highest level that can yield a new variant.
    #[napi]
    pub fn max_level(&self) -> u32 {
        self.augmenter.max_level() as u32
    }

    #[napi]
    pub fn normalize(&self, text: String) -> Result<String> {
        let mut rng = self.rng.lock().map_err(|_| Error::from_reason("Lock poisoned"))?;
        Ok(self.augmenter.normalize(&text, &mut *rng))
    }

    /// @param text - Raw transcript with `[speaker:]` tags.
    /// @param level - Highest augmentation level (default: every level).
    /// @param forceAugmentation - Return one random variant.
    #[napi]
    pub fn generate(
        &self,
        text: String,
        level: Option<i64>,
        force_augmentation: Option<bool>,
    ) -> Result<Vec<String>> {
        let level = to_level(level)?;
        let mut rng = self.rng.lock().map_err(|_| Error::from_reason("Lock poisoned"))?;
        Ok(self
            .augmenter
            .generate(&text, level, force_augmentation.unwrap_or(false), &mut *rng)
            .collect())
    }

    /// Number of distinct variants beyond the canonical one.
    #[napi]
    pub fn max_variants(&self, text: String) -> Result<u32> {
        let mut rng = self.rng.lock().map_err(|_| Error::from_reason("Lock poisoned"))?;
        Ok(self.augmenter.max_variants(&text, &mut *rng) as u32)
    }
}
