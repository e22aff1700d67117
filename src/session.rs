//! Build-background / score-query session.
//!
//! A session owns everything derived from one background corpus: the
//! normalization, the quantization scheme, the word dictionary, the fuzzy
//! match cache and the background score distribution(s). Query batches are
//! scored with [`ScanSession::run`], emitted with [`ScanSession::emit`] and
//! cleared with [`ScanSession::reset`] so the next batch reuses the corpus.
//!
//! The session performs no I/O: records come in through iterators and rows
//! leave through a [`RowSink`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::calibration::BackgroundDistribution;
use crate::config::{ScanConfig, ScoringMode};
use crate::dictionary::WordDictionary;
use crate::error::{try_grow, Result, ScanError};
use crate::invariant::StructureRecord;
use crate::matcher::{FuzzyMatcher, MatchParams};
use crate::quantization::{Normalizer, QuantizationScheme, Word};
use crate::results::{ResultTable, RowSink, ScoredQuery, TableSummary};
use crate::scoring::{ExtremeValues, ItemFilter, RarityScorer, WordSource};

/// Cooperative cancellation flag, checked between queries.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Sizes of the loaded background.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackgroundSummary {
    pub structures: usize,
    pub skipped: usize,
    /// Qualifying items, i.e. the dictionary's total count.
    pub items: u64,
    pub distinct_words: usize,
}

/// Outcome of one [`ScanSession::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
enum Calibration {
    Average(BackgroundDistribution),
    Extreme {
        combined: BackgroundDistribution,
        positive: Option<BackgroundDistribution>,
        negative: Option<BackgroundDistribution>,
    },
}

/// One background corpus plus the current query batch.
#[derive(Debug)]
pub struct ScanSession {
    config: ScanConfig,
    normalizer: Normalizer,
    scheme: QuantizationScheme,
    dictionary: WordDictionary,
    scorer: RarityScorer,
    matcher: FuzzyMatcher,
    calibration: Calibration,
    background: BackgroundSummary,
    results: ResultTable,
    processed: usize,
}

impl ScanSession {
    /// Load the background corpus and derive every calibration artifact.
    ///
    /// Malformed background structures are skipped with a warning. Resource
    /// and configuration errors abort the build.
    pub fn build<I>(config: ScanConfig, background: I) -> Result<Self>
    where
        I: IntoIterator<Item = StructureRecord>,
    {
        config.validate()?;
        let required = config.required_dimensions();
        let filter = ItemFilter::from_config(&config);

        let mut records: Vec<StructureRecord> = Vec::new();
        let mut skipped = 0;
        for record in background {
            if let Err(e) = record.validate(required) {
                warn!(structure = %record.structure_id, error = %e, "skipping background structure");
                skipped += 1;
                continue;
            }
            if records.len() == records.capacity() {
                let additional = records.len().max(64);
                try_grow(&mut records, additional, "background corpus")
                    .map_err(|e| e.for_structure(&record.structure_id))?;
            }
            records.push(record);
        }
        if records.is_empty() {
            return Err(ScanError::EmptyCorpus(format!(
                "no usable background structures ({skipped} skipped)"
            )));
        }

        let normalizer = if config.normalize {
            Normalizer::fit(
                records.iter().flat_map(|r| r.items().map(|i| i.values)),
                required,
            )?
        } else {
            Normalizer::identity(required)
        };

        // qualifying background items, normalized, in one flat buffer
        let mut flat: Vec<f64> = Vec::new();
        for record in &records {
            for item in record.items() {
                let values = normalizer.apply(item.values);
                if filter.qualifies(&item, &values) {
                    try_grow(&mut flat, config.matched_dimensions, "background items")
                        .map_err(|e| e.for_structure(&record.structure_id))?;
                    flat.extend_from_slice(&values[..config.matched_dimensions]);
                }
            }
        }
        if flat.is_empty() {
            return Err(ScanError::EmptyCorpus(
                "no background item passes the item filter".into(),
            ));
        }

        let scheme = QuantizationScheme::build(
            flat.chunks_exact(config.matched_dimensions),
            config.matched_dimensions,
            config.nr_of_bins,
            &config.binning,
            config.rounding_compensation,
        )?;

        let mut words: Vec<Word> = Vec::new();
        try_grow(
            &mut words,
            flat.len() / config.matched_dimensions,
            "background words",
        )?;
        for v in flat.chunks_exact(config.matched_dimensions) {
            words.push(scheme.quantize(v)?);
        }
        drop(flat);
        let dictionary = WordDictionary::from_words(words)?;

        let scorer = RarityScorer::new(filter, dictionary.total_count(), config.evidence_items);
        let mut matcher = FuzzyMatcher::new(MatchParams {
            max_mismatches: config.max_mismatches,
            max_bin_offset: config.max_bin_offset,
        });

        let calibration = match config.scoring {
            ScoringMode::Average => {
                let source = WordSource {
                    normalizer: &normalizer,
                    scheme: &scheme,
                    dictionary: &dictionary,
                };
                let mut scores = Vec::new();
                try_grow(&mut scores, records.len(), "background scores")?;
                for record in &records {
                    scores.push(scorer.score_average(record, source, &mut matcher)?.score());
                }
                Calibration::Average(BackgroundDistribution::build(scores, config.p_value)?)
            }
            ScoringMode::Extreme { split_sign } => {
                let extremes: Vec<ExtremeValues> = records
                    .iter()
                    .map(|r| scorer.track_extremes(r, &normalizer))
                    .collect();
                let combined = BackgroundDistribution::build(
                    extremes
                        .iter()
                        .filter_map(|e| e.most_extreme().map(|x| x.value.abs())),
                    config.p_value,
                )?;
                let (positive, negative) = if split_sign {
                    (
                        side_distribution(&extremes, true, &config)?,
                        side_distribution(&extremes, false, &config)?,
                    )
                } else {
                    (None, None)
                };
                Calibration::Extreme {
                    combined,
                    positive,
                    negative,
                }
            }
        };

        let background = BackgroundSummary {
            structures: records.len(),
            skipped,
            items: dictionary.total_count(),
            distinct_words: dictionary.len(),
        };
        info!(
            structures = background.structures,
            skipped = background.skipped,
            items = background.items,
            distinct = background.distinct_words,
            "background corpus loaded"
        );

        Ok(Self {
            config,
            normalizer,
            scheme,
            dictionary,
            scorer,
            matcher,
            calibration,
            background,
            results: ResultTable::new(),
            processed: 0,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn scheme(&self) -> &QuantizationScheme {
        &self.scheme
    }

    pub fn dictionary(&self) -> &WordDictionary {
        &self.dictionary
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn matcher(&self) -> &FuzzyMatcher {
        &self.matcher
    }

    pub fn background(&self) -> BackgroundSummary {
        self.background
    }

    /// Background score distribution used for p-values (the combined one
    /// in extreme mode).
    pub fn distribution(&self) -> &BackgroundDistribution {
        match &self.calibration {
            Calibration::Average(d) => d,
            Calibration::Extreme { combined, .. } => combined,
        }
    }

    pub fn results(&self) -> &ResultTable {
        &self.results
    }

    /// Score one structure without recording it.
    pub fn score(&mut self, record: &StructureRecord) -> Result<ScoredQuery> {
        record.validate(self.config.required_dimensions())?;
        match &self.calibration {
            Calibration::Average(distribution) => {
                let source = WordSource {
                    normalizer: &self.normalizer,
                    scheme: &self.scheme,
                    dictionary: &self.dictionary,
                };
                let scored = self.scorer.score_average(record, source, &mut self.matcher)?;
                let score = scored.score();
                Ok(ScoredQuery {
                    structure_id: record.structure_id.clone(),
                    chain_id: record.chain_id.clone(),
                    score,
                    p_value: Some(distribution.rank(score)),
                    evidence: scored.evidence(),
                    aux: Some(scored.aggregate.qualifying as f64),
                })
            }
            Calibration::Extreme {
                combined,
                positive,
                negative,
            } => {
                let extremes = self.scorer.track_extremes(record, &self.normalizer);
                let split = match (positive, negative) {
                    (None, None) => None,
                    _ => Some((positive.as_ref(), negative.as_ref())),
                };
                Ok(extreme_row(record, &extremes, combined, split))
            }
        }
    }

    /// Score `queries` in input order into the result table.
    ///
    /// Malformed structures are skipped and counted. The token is checked
    /// before each query; on cancellation the rows scored so far stay in
    /// the table and [`ScanError::Cancelled`] is returned.
    pub fn run<I>(&mut self, queries: I, cancel: &CancellationToken) -> Result<RunSummary>
    where
        I: IntoIterator<Item = StructureRecord>,
    {
        let mut summary = RunSummary::default();
        for record in queries {
            if cancel.is_cancelled() {
                info!(processed = summary.processed, "query run cancelled");
                return Err(ScanError::Cancelled {
                    processed: summary.processed,
                });
            }
            match self.score(&record) {
                Ok(row) => {
                    self.results.collect(row);
                    summary.processed += 1;
                    self.processed += 1;
                }
                Err(e) if e.is_recoverable() => {
                    warn!(structure = %record.structure_id, error = %e, "skipping query structure");
                    self.results.note_skipped();
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        let stats = self.matcher.stats();
        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            lookups = stats.lookups,
            cache_hits = stats.cache_hits,
            "query run finished"
        );
        Ok(summary)
    }

    /// Sort the collected rows.
    pub fn finalize(&mut self) -> &[ScoredQuery] {
        self.results.finalize();
        self.results.rows()
    }

    /// Finalize and push ranked rows into `sink`.
    pub fn emit<S: RowSink + ?Sized>(&mut self, sink: &mut S) -> Result<TableSummary> {
        self.results.emit(sink)?;
        Ok(self.results.summary())
    }

    /// Clear the query batch. The corpus and learned match counts stay.
    pub fn reset(&mut self) {
        self.results.reset();
        self.processed = 0;
    }

    /// Queries scored since the last reset.
    pub fn processed(&self) -> usize {
        self.processed
    }
}

fn side_distribution(
    extremes: &[ExtremeValues],
    positive: bool,
    config: &ScanConfig,
) -> Result<Option<BackgroundDistribution>> {
    let values: Vec<f64> = extremes
        .iter()
        .filter_map(|e| if positive { e.positive.as_ref() } else { e.negative.as_ref() })
        .map(|x| x.value.abs())
        .collect();
    if values.is_empty() {
        warn!(positive, "no background extremes on this side; using combined distribution");
        return Ok(None);
    }
    BackgroundDistribution::build(values, config.p_value).map(Some)
}

fn extreme_row(
    record: &StructureRecord,
    extremes: &ExtremeValues,
    combined: &BackgroundDistribution,
    split: Option<(Option<&BackgroundDistribution>, Option<&BackgroundDistribution>)>,
) -> ScoredQuery {
    let base = |score: f64, p_value: f64, evidence: String, aux: Option<f64>| ScoredQuery {
        structure_id: record.structure_id.clone(),
        chain_id: record.chain_id.clone(),
        score,
        p_value: Some(p_value),
        evidence,
        aux,
    };
    match split {
        None => match extremes.most_extreme() {
            Some(x) => base(
                x.value.abs(),
                combined.rank(x.value.abs()),
                format!("{}={:.3}", x.label, x.value),
                Some(x.value),
            ),
            None => base(0.0, 1.0, String::new(), None),
        },
        Some((pos_dist, neg_dist)) => {
            let sides = [
                (extremes.positive.as_ref(), pos_dist.unwrap_or(combined), '+'),
                (extremes.negative.as_ref(), neg_dist.unwrap_or(combined), '-'),
            ];
            let mut best: Option<(f64, f64)> = None;
            let mut evidence = Vec::new();
            for (extreme, dist, sign) in sides {
                let Some(x) = extreme else { continue };
                let p = dist.rank(x.value.abs());
                evidence.push(format!("{sign}{}={:.3} p={p:.3e}", x.label, x.value));
                if best.map_or(true, |(bp, _)| p < bp) {
                    best = Some((p, x.value));
                }
            }
            // the two sides live on different scales, so rank by significance
            match best {
                Some((p, value)) => base(p.log10().abs(), p, evidence.join("; "), Some(value)),
                None => base(0.0, 1.0, String::new(), None),
            }
        }
    }
}
