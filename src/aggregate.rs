use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::formats::{CandidateRecord, QuestionRecord};
use crate::taxonomy;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(candidate: &CandidateRecord) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(candidate.content.as_bytes());
        for option in &candidate.options {
            hasher.update([0x1f]);
            hasher.update(option.label.as_bytes());
            hasher.update([0x1e]);
            hasher.update(option.text.as_bytes());
        }
        let hash = hasher.finalize();
        Self(hex::encode(&hash[..16]))
    }
}

/// Owns the seen-set and the ordered record list. Exactly one task holds it, so
/// every [`Aggregator::add`] is serialized.
#[derive(Debug)]
pub struct Aggregator {
    default_chapter: String,
    seen: HashSet<Fingerprint>,
    records: Vec<QuestionRecord>,
    duplicates: usize,
}

impl Aggregator {
    pub fn new(default_chapter: impl Into<String>) -> Self {
        Self {
            default_chapter: default_chapter.into(),
            seen: HashSet::new(),
            records: Vec::new(),
            duplicates: 0,
        }
    }

    /// First writer wins: a candidate whose fingerprint was already accepted is
    /// discarded.
    pub fn add(&mut self, candidate: CandidateRecord) -> bool {
        let fingerprint = Fingerprint::of(&candidate);
        if !self.seen.insert(fingerprint) {
            self.duplicates += 1;
            return false;
        }

        let chapter = candidate
            .chapter
            .unwrap_or_else(|| self.default_chapter.clone());
        self.records.push(QuestionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            number: self.records.len() + 1,
            chapter,
            category: candidate.category,
            kind: candidate.kind,
            content: candidate.content,
            options: candidate.options,
            answer: candidate.answer,
            analysis: candidate.analysis,
        });
        true
    }

    pub fn add_all(&mut self, candidates: impl IntoIterator<Item = CandidateRecord>) -> usize {
        candidates
            .into_iter()
            .map(|candidate| self.add(candidate))
            .filter(|accepted| *accepted)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Rewrites every category to its canonical form and hands out the records.
    pub fn finish(self) -> Vec<QuestionRecord> {
        let mut records = self.records;
        for record in &mut records {
            record.category = taxonomy::normalize(&record.category);
        }
        records
    }
}
