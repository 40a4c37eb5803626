//! Text-analysis collaborator: turns free text (policy proposals, news
//! stories) into structured categories and impacts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sim_core::{DemographicSlice, Impact, SimError};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Structured reading of a title and description.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Analysis {
    pub category: String,
    /// In [0, 1].
    pub severity: f64,
    /// Expected effect length in turns.
    pub duration: u64,
    /// Demographic attribute values the text is about (occupations, provinces, ...).
    pub affected_entities: Vec<String>,
    /// Tone toward the subject, in [-1, 1].
    pub sentiment: f64,
    /// Non-reputation impacts read directly from the text.
    pub impacts: Vec<Impact>,
}

#[derive(Debug, Error, PartialEq)]
pub enum AnalysisError {
    #[error("analysis timed out after {0} ms")]
    Timeout(u64),
    #[error("analysis failed: {0}")]
    Failed(String),
}

impl From<AnalysisError> for SimError {
    fn from(e: AnalysisError) -> Self {
        SimError::External(e.to_string())
    }
}

/// External analyzer. Implementations may be slow or fail; callers bound
/// them with [`analyze_with_timeout`].
#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    async fn analyze(&self, title: &str, description: &str) -> Result<Analysis, AnalysisError>;
}

/// Run `analyzer` with an upper bound on its duration.
pub async fn analyze_with_timeout(
    analyzer: &dyn TextAnalyzer,
    title: &str,
    description: &str,
    timeout: Duration,
) -> Result<Analysis, AnalysisError> {
    match tokio::time::timeout(timeout, analyzer.analyze(title, description)).await {
        Ok(result) => result,
        Err(_) => {
            let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(title, timeout_ms = ms, "text analysis timed out");
            Err(AnalysisError::Timeout(ms))
        }
    }
}

/// Map an analysis onto the registry: every slice with an attribute named in
/// `affected_entities` receives `sentiment * severity * scale`.
pub fn reputation_impacts(
    analysis: &Analysis,
    slices: &[DemographicSlice],
    scale: f64,
) -> Vec<Impact> {
    let delta = analysis.sentiment * analysis.severity * scale;
    if delta == 0.0 || !delta.is_finite() {
        return Vec::new();
    }
    let wanted: BTreeSet<String> = analysis
        .affected_entities
        .iter()
        .map(|e| e.to_lowercase())
        .collect();
    slices
        .iter()
        .filter(|s| {
            [
                &s.occupation,
                &s.class,
                &s.ethnicity,
                &s.religion,
                &s.province,
                &s.settlement,
            ]
            .iter()
            .any(|attr| wanted.contains(&attr.to_lowercase()))
        })
        .map(|s| Impact::Reputation { slice: s.id, delta })
        .collect()
}

const CATEGORIES: &[(&str, &[&str])] = &[
    ("taxation", &["tax", "levy", "tariff"]),
    ("education", &["school", "education", "university"]),
    ("health", &["health", "hospital", "clinic"]),
    ("agriculture", &["farm", "harvest", "agricultur"]),
    ("resources", &["oil", "mine", "mining", "ore", "resource"]),
    ("security", &["police", "crime", "army"]),
    ("economy", &["wage", "growth", "trade", "industry"]),
];
const POSITIVE: &[&str] = &["reform", "growth", "support", "praise", "success", "win", "boost"];
const NEGATIVE: &[&str] = &["scandal", "corrupt", "crisis", "fail", "strike", "collapse", "cut"];
const INTENSIFIERS: &[&str] = &["major", "record", "massive", "historic", "crisis", "scandal"];

/// Offline, deterministic keyword analyzer. Recognizes entities from a fixed
/// vocabulary, usually the attribute values of a session's registry.
#[derive(Clone, Debug, Default)]
pub struct KeywordAnalyzer {
    vocabulary: BTreeSet<String>,
}

impl KeywordAnalyzer {
    pub fn with_vocabulary<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            vocabulary: words
                .into_iter()
                .map(|w| w.as_ref().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    pub fn from_registry(slices: &[DemographicSlice]) -> Self {
        Self::with_vocabulary(slices.iter().flat_map(|s| {
            [
                s.occupation.clone(),
                s.class.clone(),
                s.ethnicity.clone(),
                s.religion.clone(),
                s.province.clone(),
                s.settlement.clone(),
            ]
        }))
    }

    fn read(&self, text: &str) -> Analysis {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let hits = |list: &[&str]| {
            words
                .iter()
                .filter(|w| list.iter().any(|k| w.starts_with(k)))
                .count()
        };

        let category = CATEGORIES
            .iter()
            .map(|(name, keys)| (*name, hits(keys)))
            .filter(|(_, n)| *n > 0)
            .max_by_key(|(_, n)| *n)
            .map(|(name, _)| name.to_string())
            .unwrap_or_else(|| "general".to_string());

        let pos = hits(POSITIVE) as f64;
        let neg = hits(NEGATIVE) as f64;
        let sentiment = if pos + neg == 0.0 {
            0.0
        } else {
            (pos - neg) / (pos + neg)
        };
        let severity = (0.2 + 0.2 * hits(INTENSIFIERS) as f64).min(1.0);
        let affected_entities: Vec<String> = words
            .iter()
            .filter(|w| self.vocabulary.contains(**w))
            .map(|w| w.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut impacts = Vec::new();
        if category == "economy" && sentiment != 0.0 {
            impacts.push(Impact::Gdp {
                percent: sentiment * severity,
            });
        }

        Analysis {
            category,
            severity,
            duration: 1 + (severity * 4.0).round() as u64,
            affected_entities,
            sentiment,
            impacts,
        }
    }
}

#[async_trait]
impl TextAnalyzer for KeywordAnalyzer {
    async fn analyze(&self, title: &str, description: &str) -> Result<Analysis, AnalysisError> {
        if title.trim().is_empty() && description.trim().is_empty() {
            return Err(AnalysisError::Failed("empty text".to_string()));
        }
        Ok(self.read(&format!("{title}. {description}")))
    }
}
