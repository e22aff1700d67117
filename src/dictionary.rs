//! Sorted word -> count table.
//!
//! Built once from the lexicographically sorted background words by
//! collapsing runs of equal words. Lookups are binary searches. The table
//! can grow afterwards through ordered insertion, which keeps it sorted
//! without a full re-sort.

use std::cmp::Ordering;

use tracing::{debug, info};

use crate::error::{try_grow, Result, ScanError};
use crate::quantization::Word;

/// What an entry's count means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountKind {
    /// Number of background occurrences of the word.
    Occurrences,
    /// Size of the fuzzy match set discovered for the word.
    MatchSetSize,
}

/// One `(word, count)` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryEntry {
    pub word: Word,
    pub count: u64,
}

/// Sorted, de-duplicated word table.
#[derive(Debug, Clone)]
pub struct WordDictionary {
    entries: Vec<DictionaryEntry>,
    word_len: Option<usize>,
    kind: CountKind,
    learned: usize,
}

impl WordDictionary {
    /// Empty table whose counts have the given meaning.
    pub fn new(kind: CountKind) -> Self {
        Self {
            entries: Vec::new(),
            word_len: None,
            kind,
            learned: 0,
        }
    }

    /// Collapse runs of equal words from an ascending sequence.
    ///
    /// Fails if the input is not sorted or words differ in length.
    pub fn from_sorted<I>(words: I) -> Result<Self>
    where
        I: IntoIterator<Item = Word>,
    {
        let mut dict = Self::new(CountKind::Occurrences);
        for word in words {
            dict.check_len(&word)?;
            match dict.entries.last_mut() {
                Some(last) => match last.word.cmp(&word) {
                    Ordering::Equal => {
                        last.count += 1;
                        continue;
                    }
                    Ordering::Greater => {
                        return Err(ScanError::InvalidParameter(format!(
                            "words not sorted: {} precedes {word}",
                            last.word
                        )));
                    }
                    Ordering::Less => {}
                },
                None => {}
            }
            if dict.entries.len() == dict.entries.capacity() {
                let additional = dict.entries.len().max(64);
                try_grow(&mut dict.entries, additional, "word dictionary")?;
            }
            dict.entries.push(DictionaryEntry { word, count: 1 });
        }
        info!(
            distinct = dict.entries.len(),
            total = dict.total_count(),
            "built word dictionary"
        );
        Ok(dict)
    }

    /// Sort `words` and build the table.
    pub fn from_words(mut words: Vec<Word>) -> Result<Self> {
        words.sort_unstable();
        Self::from_sorted(words)
    }

    fn check_len(&mut self, word: &Word) -> Result<()> {
        if word.is_empty() {
            return Err(ScanError::InvalidParameter(
                "dictionary words need at least one bin".into(),
            ));
        }
        match self.word_len {
            None => {
                self.word_len = Some(word.len());
                Ok(())
            }
            Some(len) if len == word.len() => Ok(()),
            Some(len) => Err(ScanError::DimensionMismatch {
                expected: len,
                actual: word.len(),
            }),
        }
    }

    pub fn kind(&self) -> CountKind {
        self.kind
    }

    /// Number of distinct words.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Word length shared by every entry, once known.
    pub fn word_len(&self) -> Option<usize> {
        self.word_len
    }

    /// Sum of all counts. For an occurrence table this is the corpus size.
    pub fn total_count(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }

    /// Entries inserted after the initial build.
    pub fn learned(&self) -> usize {
        self.learned
    }

    pub fn entries(&self) -> &[DictionaryEntry] {
        &self.entries
    }

    /// Binary search; `Err` carries the insertion point.
    pub fn position(&self, word: &Word) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|e| e.word.cmp(word))
    }

    /// Count stored for `word`, or 0 if it is absent.
    pub fn lookup_exact(&self, word: &Word) -> u64 {
        self.position(word).map_or(0, |i| self.entries[i].count)
    }

    /// Count stored for `word`, distinguishing absence from zero.
    pub fn get(&self, word: &Word) -> Option<u64> {
        self.position(word).ok().map(|i| self.entries[i].count)
    }

    /// Insert `word` at its sorted position.
    ///
    /// For an existing word, occurrence tables add `count`; match-set tables
    /// overwrite it. Returns whether the word was new.
    pub fn insert_and_learn(&mut self, word: Word, count: u64) -> Result<bool> {
        self.check_len(&word)?;
        match self.position(&word) {
            Ok(i) => {
                let entry = &mut self.entries[i];
                match self.kind {
                    CountKind::Occurrences => entry.count += count,
                    CountKind::MatchSetSize => entry.count = count,
                }
                Ok(false)
            }
            Err(i) => {
                if self.entries.len() == self.entries.capacity() {
                    let additional = self.entries.len().max(16);
                    try_grow(&mut self.entries, additional, "word dictionary")?;
                }
                debug!(%word, count, at = i, "learned dictionary word");
                self.entries.insert(i, DictionaryEntry { word, count });
                self.learned += 1;
                Ok(true)
            }
        }
    }

    /// Drop learned state but keep the allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.word_len = None;
        self.learned = 0;
    }
}
