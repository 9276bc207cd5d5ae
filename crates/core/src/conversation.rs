//! Parsing of raw transcripts into speaker turns and annotation markers.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::helpers::{capitalize, collapse_whitespace};

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\[\]\n]+?):\]").unwrap());
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\[\]]*)\]").unwrap());
static SPEAKER_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i:speaker)\s*0*(\d+)$").unwrap());
static INTERVENANT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i:intervenant)\s+(\d+)$").unwrap());
static LETTER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z]$").unwrap());

/// Identity of the speaker owning a turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SpeakerId {
    /// Numbered anonymous speaker (`speaker001`, `Intervenant 1`, `A`).
    Anonymous(u32),
    /// Real-looking name or title, already capitalized.
    Named(String),
}

impl SpeakerId {
    /// Resolve the label found inside a `[<label>:]` tag.
    pub fn from_label(label: &str) -> Self {
        let label = collapse_whitespace(label);
        let number = SPEAKER_ID_RE
            .captures(&label)
            .or_else(|| INTERVENANT_RE.captures(&label))
            .and_then(|caps| caps[1].parse::<u32>().ok());
        if let Some(n) = number {
            return SpeakerId::Anonymous(n);
        }
        if LETTER_RE.is_match(&label) {
            let letter = label.as_bytes()[0];
            return SpeakerId::Anonymous(u32::from(letter - b'A') + 1);
        }
        SpeakerId::Named(capitalize(&label))
    }

    /// Canonical label: anonymous speakers as `Intervenant N`, names as-is.
    pub fn canonical_label(&self) -> String {
        match self {
            SpeakerId::Anonymous(n) => anonymous_label(*n),
            SpeakerId::Named(name) => name.clone(),
        }
    }
}

pub fn anonymous_label(n: u32) -> String {
    format!("Intervenant {n}")
}

/// A non-lexical event or aside embedded in turn content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    Laughter,
    Singing,
    Noise,
    Pii,
    Aside(String),
}

impl Marker {
    fn parse(inner: &str) -> Self {
        match inner.trim() {
            "LAUGHTER" => Marker::Laughter,
            "SINGING" => Marker::Singing,
            "NOISE" => Marker::Noise,
            "PII" => Marker::Pii,
            other => Marker::Aside(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Text(String),
    Marker(Marker),
}

/// One turn: an optional speaker tag, its content, and the whitespace
/// separating it from the next tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// `None` for text preceding the first tag.
    pub speaker: Option<SpeakerId>,
    pub pieces: Vec<Piece>,
    pub separator: String,
}

impl Turn {
    fn parse(speaker: Option<SpeakerId>, body: &str) -> Self {
        let content = body.trim_end();
        let separator = normalize_separator(&body[content.len()..]);
        let content = content.trim_start();

        let mut pieces = Vec::new();
        let mut last = 0;
        for caps in MARKER_RE.captures_iter(content) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > last {
                pieces.push(Piece::Text(content[last..whole.start()].to_string()));
            }
            pieces.push(Piece::Marker(Marker::parse(&caps[1])));
            last = whole.end();
        }
        if last < content.len() {
            pieces.push(Piece::Text(content[last..].to_string()));
        }

        Self {
            speaker,
            pieces,
            separator,
        }
    }

    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.pieces.iter().filter_map(|p| match p {
            Piece::Marker(m) => Some(m),
            Piece::Text(_) => None,
        })
    }
}

fn normalize_separator(whitespace: &str) -> String {
    let newlines: String = whitespace.chars().filter(|&c| c == '\n').collect();
    if newlines.is_empty() {
        " ".to_string()
    } else {
        newlines
    }
}

/// A transcript split into turns. Parsing never fails: text without tags is a
/// single speaker-less turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub turns: Vec<Turn>,
}

impl Conversation {
    pub fn parse(text: &str) -> Self {
        let mut turns = Vec::new();
        let mut speaker: Option<SpeakerId> = None;
        let mut last = 0;

        for caps in TAG_RE.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            let body = &text[last..whole.start()];
            if speaker.is_some() || !body.trim().is_empty() {
                turns.push(Turn::parse(speaker.take(), body));
            }
            speaker = Some(SpeakerId::from_label(&caps[1]));
            last = whole.end();
        }
        let body = &text[last..];
        if speaker.is_some() || !body.trim().is_empty() {
            turns.push(Turn::parse(speaker, body));
        }

        Self { turns }
    }

    /// Distinct speakers in order of first appearance.
    pub fn speakers(&self) -> Vec<&SpeakerId> {
        let mut seen = HashSet::new();
        self.turns
            .iter()
            .filter_map(|t| t.speaker.as_ref())
            .filter(|s| seen.insert(*s))
            .collect()
    }

    pub fn pii_count(&self) -> usize {
        self.turns
            .iter()
            .flat_map(Turn::markers)
            .filter(|m| **m == Marker::Pii)
            .count()
    }
}
