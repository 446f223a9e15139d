//! Text splitting and light extraction for ingestion

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

/// Most surface forms kept per chunk
const MAX_SURFACE_FORMS: usize = 10;

/// A window of a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Character offsets into the whitespace-normalized document
    pub start: i64,
    pub end: i64,
    pub index: usize,
}

/// Split `content` into overlapping word windows
///
/// Windows hold `chunk_size` words and advance by `chunk_size - overlap`.
/// Windows shorter than `min_chars` are skipped without consuming an index;
/// longer than `max_chars` are cut. Spans are offsets into the document
/// with every run of whitespace collapsed to one space, so they are only
/// approximate for the raw file. Walking stops once a window reaches the
/// last word.
pub fn chunk_document(
    content: &str,
    chunk_size: usize,
    overlap: usize,
    min_chars: usize,
    max_chars: usize,
) -> Vec<Chunk> {
    let content = content.trim();
    if content.chars().count() < min_chars || chunk_size == 0 {
        return Vec::new();
    }

    let words: Vec<&str> = content.split_whitespace().collect();
    let step = chunk_size.saturating_sub(overlap).max(1);

    // offsets[i] = character offset of word i in the normalized text
    let mut offsets = Vec::with_capacity(words.len());
    let mut offset = 0usize;
    for word in &words {
        offsets.push(offset);
        offset += word.chars().count() + 1;
    }

    let mut chunks = Vec::new();
    let mut first = 0;
    while first < words.len() {
        let last = (first + chunk_size).min(words.len());
        let text = words[first..last].join(" ");
        let length = text.chars().count();

        if length >= min_chars {
            let text = if length > max_chars {
                text.chars().take(max_chars).collect()
            } else {
                text
            };
            let start = offsets[first] as i64;
            let end = start + text.chars().count() as i64;
            chunks.push(Chunk {
                text,
                start,
                end,
                index: chunks.len(),
            });
        }

        if last == words.len() {
            break;
        }
        first += step;
    }

    chunks
}

/// Capitalized words longer than two characters, first ten distinct
///
/// Returns them comma-separated, or `None` when there are none.
pub fn surface_forms(text: &str) -> Option<String> {
    let mut forms: Vec<&str> = Vec::new();
    for word in text.split_whitespace() {
        let capitalized = word.chars().next().is_some_and(char::is_uppercase);
        if capitalized && word.chars().count() > 2 && !forms.contains(&word) {
            forms.push(word);
            if forms.len() == MAX_SURFACE_FORMS {
                break;
            }
        }
    }

    if forms.is_empty() {
        None
    } else {
        Some(forms.join(", "))
    }
}

#[derive(Debug, Clone, Copy)]
enum DateShape {
    /// 03/15/2021
    Slashed,
    /// 2021-03-15
    Iso,
    /// March 15, 2021
    Written,
}

/// Finds the first date mentioned in a document
pub struct DateExtractor {
    patterns: Vec<(Regex, DateShape)>,
}

impl DateExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            patterns: vec![
                (Regex::new(r"\b\d{1,2}/\d{1,2}/\d{4}\b")?, DateShape::Slashed),
                (Regex::new(r"\b\d{4}-\d{2}-\d{2}\b")?, DateShape::Iso),
                (
                    Regex::new(r"\b[A-Z][a-z]+ \d{1,2},? \d{4}\b")?,
                    DateShape::Written,
                ),
            ],
        })
    }

    /// Date of the first match of the first shape that parses, at midnight UTC
    ///
    /// Shapes are tried in order: slashed, ISO, written out.
    pub fn extract(&self, content: &str) -> Option<DateTime<Utc>> {
        self.patterns.iter().find_map(|(pattern, shape)| {
            pattern
                .find_iter(content)
                .find_map(|m| parse_date(m.as_str(), *shape))
        })
    }
}

fn parse_date(raw: &str, shape: DateShape) -> Option<DateTime<Utc>> {
    let date = match shape {
        DateShape::Slashed => NaiveDate::parse_from_str(raw, "%m/%d/%Y").ok(),
        DateShape::Iso => NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok(),
        DateShape::Written => {
            let normalized = raw.replace(',', "");
            NaiveDate::parse_from_str(&normalized, "%B %d %Y")
                .or_else(|_| NaiveDate::parse_from_str(&normalized, "%b %d %Y"))
                .ok()
        }
    }?;

    date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
}
