//! Leveled text augmentation of transcripts.
//!
//! A call to [`TextAugmenter::generate`] renders one conversation through a
//! fixed staircase of candidate transformations, from the canonical
//! normalization (level 0) to the most degraded rendering (lower-case,
//! no punctuation, anonymous speakers). Candidates producing a string that
//! was already emitted are skipped, so the number of variants is bounded by
//! what the text actually supports.
//!
//! All randomness (substitute names, forced picks) comes from the caller's
//! random stream; seeding it identically reproduces the same variants.

use std::collections::{HashMap, HashSet};

use rand::Rng;

use crate::conversation::{anonymous_label, Conversation, Marker, Piece, SpeakerId};
use crate::error::{PrepError, Result};
use crate::helpers::{has_words, strip_punctuation, tidy_content};
use crate::names;

/// Requested degradation strength. Level 0 is the canonical normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AugmentationLevel(usize);

impl AugmentationLevel {
    pub const CANONICAL: AugmentationLevel = AugmentationLevel(0);

    pub fn new(level: usize) -> Self {
        Self(level)
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl TryFrom<i64> for AugmentationLevel {
    type Error = PrepError;

    fn try_from(level: i64) -> Result<Self> {
        usize::try_from(level)
            .map(AugmentationLevel)
            .map_err(|_| PrepError::NegativeLevel(level))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpeakerStyle {
    /// Anonymous ids as `Intervenant N`, names kept.
    Canonical,
    /// Every speaker as `Intervenant N`.
    Anonymized,
    /// Every speaker replaced by a generated name.
    Substituted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerStyle {
    /// Events as localized words in brackets, asides verbatim.
    Localized,
    /// PII replaced by a generated name, everything else removed.
    Resolved,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    speakers: SpeakerStyle,
    lowercase: bool,
    strip_punctuation: bool,
    markers: MarkerStyle,
}

const fn candidate(
    speakers: SpeakerStyle,
    lowercase: bool,
    strip_punctuation: bool,
    markers: MarkerStyle,
) -> Candidate {
    Candidate {
        speakers,
        lowercase,
        strip_punctuation,
        markers,
    }
}

use MarkerStyle::{Localized, Resolved};
use SpeakerStyle::{Anonymized, Canonical, Substituted};

const STAIRCASE: [Candidate; 6] = [
    candidate(Canonical, false, false, Resolved),
    candidate(Substituted, false, false, Resolved),
    candidate(Canonical, true, false, Resolved),
    candidate(Substituted, true, false, Resolved),
    candidate(Substituted, false, true, Resolved),
    candidate(Anonymized, true, true, Resolved),
];

const STAIRCASE_KEEP_SPECIALS: [Candidate; 7] = [
    candidate(Canonical, false, false, Localized),
    candidate(Substituted, false, false, Localized),
    candidate(Canonical, true, false, Localized),
    candidate(Substituted, true, false, Localized),
    candidate(Substituted, false, true, Localized),
    candidate(Canonical, false, false, Resolved),
    candidate(Anonymized, true, true, Resolved),
];

/// Configuration of the augmentation generator.
#[derive(Debug, Clone, Default)]
pub struct AugmentationConfig {
    /// Keep annotation markers as localized bracketed words in every
    /// variant but the last ones.
    pub keep_specials: bool,
}

/// Generates ordered, pairwise-distinct textual variants of a conversation.
#[derive(Debug, Clone, Default)]
pub struct TextAugmenter {
    config: AugmentationConfig,
}

impl TextAugmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    /// Highest level that can yield a new variant for some text.
    pub fn max_level(&self) -> usize {
        self.staircase().len() - 1
    }

    fn staircase(&self) -> &'static [Candidate] {
        if self.config.keep_specials {
            &STAIRCASE_KEEP_SPECIALS
        } else {
            &STAIRCASE
        }
    }

    /// Generate the variants of `text` up to `level` (`None`: all levels).
    ///
    /// The first variant is always the canonical normalization, unless
    /// `force_augmentation` asks for a single random variant instead.
    pub fn generate<R: Rng>(
        &self,
        text: &str,
        level: Option<AugmentationLevel>,
        force_augmentation: bool,
        rng: &mut R,
    ) -> Variants {
        let renderer = Renderer::new(Conversation::parse(text), rng);
        let plan = self.staircase();
        let limit = level.map_or(plan.len(), |l| l.get().saturating_add(1));

        if force_augmentation && limit == 1 {
            let mut all: Vec<String> = Variants::staircase(renderer, plan, usize::MAX).collect();
            let pick = rng.gen_range(0..all.len());
            return Variants::single(all.swap_remove(pick));
        }
        Variants::staircase(renderer, plan, limit)
    }

    /// Canonical (level 0) normalization of `text`.
    pub fn normalize<R: Rng>(&self, text: &str, rng: &mut R) -> String {
        Renderer::new(Conversation::parse(text), rng).render(&self.staircase()[0])
    }

    /// Number of distinct variants beyond the canonical one that `text`
    /// supports.
    pub fn max_variants<R: Rng>(&self, text: &str, rng: &mut R) -> usize {
        self.generate(text, None, false, rng).count().saturating_sub(1)
    }
}

/// Lazily rendered variants of one conversation.
pub struct Variants {
    state: VariantsState,
}

enum VariantsState {
    Staircase {
        renderer: Renderer,
        plan: std::slice::Iter<'static, Candidate>,
        emitted: HashSet<String>,
        remaining: usize,
    },
    Single(Option<String>),
}

impl Variants {
    fn staircase(renderer: Renderer, plan: &'static [Candidate], limit: usize) -> Self {
        Self {
            state: VariantsState::Staircase {
                renderer,
                plan: plan.iter(),
                emitted: HashSet::new(),
                remaining: limit,
            },
        }
    }

    fn single(text: String) -> Self {
        Self {
            state: VariantsState::Single(Some(text)),
        }
    }
}

impl Iterator for Variants {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        match &mut self.state {
            VariantsState::Single(text) => text.take(),
            VariantsState::Staircase {
                renderer,
                plan,
                emitted,
                remaining,
            } => {
                if *remaining == 0 {
                    return None;
                }
                for candidate in plan.by_ref() {
                    let text = renderer.render(candidate);
                    if emitted.insert(text.clone()) {
                        *remaining -= 1;
                        return Some(text);
                    }
                }
                None
            }
        }
    }
}

/// Per-call assignment of generated names and anonymous numbers to speakers.
#[derive(Debug, Clone)]
pub struct SpeakerIdentityMap {
    names: HashMap<SpeakerId, String>,
    numbers: HashMap<SpeakerId, u32>,
}

impl SpeakerIdentityMap {
    /// Draw one name per speaker, in order of first appearance. A single coin
    /// decides whether the whole conversation uses full names or first names.
    pub fn build<R: Rng>(speakers: &[&SpeakerId], rng: &mut R) -> Self {
        let full_names = rng.gen_bool(0.5);
        let names = speakers
            .iter()
            .map(|&speaker| {
                let name = if full_names {
                    names::full_name(&mut *rng)
                } else {
                    names::first_name(&mut *rng).to_string()
                };
                (speaker.clone(), name)
            })
            .collect();

        let used: HashSet<u32> = speakers
            .iter()
            .filter_map(|s| match s {
                SpeakerId::Anonymous(n) => Some(*n),
                SpeakerId::Named(_) => None,
            })
            .collect();
        let mut next = 1;
        let mut numbers = HashMap::new();
        for &speaker in speakers {
            let number = match speaker {
                SpeakerId::Anonymous(n) => *n,
                SpeakerId::Named(_) => {
                    while used.contains(&next) {
                        next += 1;
                    }
                    let number = next;
                    next += 1;
                    number
                }
            };
            numbers.insert(speaker.clone(), number);
        }

        Self { names, numbers }
    }

    pub fn name(&self, speaker: &SpeakerId) -> Option<&str> {
        self.names.get(speaker).map(String::as_str)
    }

    pub fn number(&self, speaker: &SpeakerId) -> Option<u32> {
        self.numbers.get(speaker).copied()
    }
}

struct RenderedTurn<'a> {
    speaker: Option<&'a SpeakerId>,
    label: Option<String>,
    content: String,
    separator: &'a str,
}

/// A parsed conversation together with every random draw a call needs.
struct Renderer {
    conversation: Conversation,
    identities: SpeakerIdentityMap,
    pii_names: Vec<String>,
}

impl Renderer {
    fn new<R: Rng>(conversation: Conversation, rng: &mut R) -> Self {
        let pii_names = (0..conversation.pii_count())
            .map(|_| names::first_name(&mut *rng).to_string())
            .collect();
        let identities = SpeakerIdentityMap::build(&conversation.speakers(), rng);
        Self {
            conversation,
            identities,
            pii_names,
        }
    }

    fn label(&self, speaker: &SpeakerId, style: SpeakerStyle) -> String {
        match style {
            SpeakerStyle::Canonical => speaker.canonical_label(),
            SpeakerStyle::Anonymized => match self.identities.number(speaker) {
                Some(n) => anonymous_label(n),
                None => speaker.canonical_label(),
            },
            SpeakerStyle::Substituted => match self.identities.name(speaker) {
                Some(name) => name.to_string(),
                None => speaker.canonical_label(),
            },
        }
    }

    fn render(&self, candidate: &Candidate) -> String {
        let mut pii_names = self.pii_names.iter();
        let mut turns: Vec<RenderedTurn> = Vec::with_capacity(self.conversation.turns.len());

        for turn in &self.conversation.turns {
            let mut raw = String::new();
            for piece in &turn.pieces {
                match piece {
                    Piece::Text(text) => raw.push_str(text),
                    Piece::Marker(marker) => {
                        let pii_name = if *marker == Marker::Pii {
                            pii_names.next().map(String::as_str)
                        } else {
                            None
                        };
                        raw.push_str(&render_marker(marker, candidate.markers, pii_name));
                    }
                }
            }

            let mut content = tidy_content(&raw);
            if candidate.lowercase {
                content = content.to_lowercase();
            }
            if candidate.strip_punctuation {
                content = strip_punctuation(&content);
            }

            turns.push(RenderedTurn {
                speaker: turn.speaker.as_ref(),
                label: turn
                    .speaker
                    .as_ref()
                    .map(|s| self.label(s, candidate.speakers)),
                content,
                separator: &turn.separator,
            });
        }

        join_turns(drop_empty_turns(turns))
    }
}

fn render_marker(marker: &Marker, style: MarkerStyle, pii_name: Option<&str>) -> String {
    match (style, marker) {
        (MarkerStyle::Localized, Marker::Laughter) => "[rire]".to_string(),
        (MarkerStyle::Localized, Marker::Noise) => "[bruit]".to_string(),
        (MarkerStyle::Localized, Marker::Pii) => "[Nom]".to_string(),
        (MarkerStyle::Localized, Marker::Aside(aside)) => format!("[{aside}]"),
        (MarkerStyle::Resolved, Marker::Pii) => pii_name.unwrap_or_default().to_string(),
        (_, Marker::Singing) | (MarkerStyle::Resolved, _) => String::new(),
    }
}

/// Drop turns without lexical content (a non-empty final turn is kept), then
/// merge consecutive turns of the same speaker.
fn drop_empty_turns(turns: Vec<RenderedTurn<'_>>) -> Vec<RenderedTurn<'_>> {
    let last = turns.len().saturating_sub(1);
    let mut kept: Vec<RenderedTurn> = Vec::with_capacity(turns.len());

    for (i, turn) in turns.into_iter().enumerate() {
        let keep = has_words(&turn.content) || (i == last && !turn.content.is_empty());
        if !keep {
            continue;
        }
        match kept.last_mut() {
            Some(prev) if prev.speaker.is_some() && prev.speaker == turn.speaker => {
                prev.content = tidy_content(&format!("{} {}", prev.content, turn.content));
                prev.separator = turn.separator;
            }
            _ => kept.push(turn),
        }
    }
    kept
}

fn join_turns(turns: Vec<RenderedTurn<'_>>) -> String {
    let mut out = String::new();
    for turn in turns {
        if let Some(label) = turn.label {
            out.push('[');
            out.push_str(&label);
            out.push_str(":] ");
        }
        out.push_str(&turn.content);
        out.push_str(turn.separator);
    }
    out.trim_end().to_string()
}
