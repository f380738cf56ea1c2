//! Reference-frame selection for motion correction.
//!
//! Scores every unordered pair of time frames with a [`FrameScorer`], takes
//! column means of the resulting symmetric matrix, and picks the frame with
//! the minimum mean score: the volume least different on average from all
//! others. The result is persisted in a cross-run JSON cache keyed by scan
//! identity, because the all-pairs search is the dominant cost of the whole
//! pipeline.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::error::PipelineError;
use crate::registration::FrameScorer;
use crate::volume::Scan;

const CACHE_FILE_NAME: &str = "best_frames.json";

/// Persistent map from scan key (`subject/session/filename`) to the best
/// reference frame index. One cache file per derivatives root.
pub struct ReferenceFrameCache {
    path: PathBuf,
    entries: BTreeMap<String, usize>,
}

impl ReferenceFrameCache {
    /// Open (or initialize) the cache under `derivatives_dir`.
    ///
    /// An existing but unparseable cache file is a fatal configuration error,
    /// never silently repaired.
    pub fn open(derivatives_dir: &Path) -> Result<Self, PipelineError> {
        let path = derivatives_dir.join(CACHE_FILE_NAME);
        let entries = if path.exists() {
            let text = fs::read_to_string(&path)?;
            serde_json::from_str(&text).map_err(|e| PipelineError::CacheCorruption {
                path: path.clone(),
                detail: e.to_string(),
            })?
        } else {
            log::info!("no reference-frame cache at {}; starting empty", path.display());
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    pub fn get(&self, key: &str) -> Option<usize> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry and persist the whole cache.
    ///
    /// The file is replaced via a temporary sibling and an atomic rename, so
    /// a concurrent first-time writer can never observe a half-written cache.
    pub fn insert(&mut self, key: String, index: usize) -> Result<(), PipelineError> {
        self.entries.insert(key, index);
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&self.entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Outcome of an all-pairs reference search.
pub struct ReferenceSelection {
    /// Index of the most representative frame (minimum column mean, first
    /// index on ties).
    pub best_frame: usize,
    /// Full `n x n` symmetric score matrix, row-major; diagonal is 0.
    pub score_matrix: Vec<f64>,
    /// Column means of the score matrix.
    pub column_means: Vec<f64>,
}

/// All-pairs reference-frame search over a scan's time frames.
pub struct ReferenceFrameSelector<S: FrameScorer> {
    scorer: S,
}

impl<S: FrameScorer> ReferenceFrameSelector<S> {
    pub fn new(scorer: S) -> Self {
        Self { scorer }
    }

    /// Score every unordered frame pair and pick the minimum-mean column.
    ///
    /// The pair batch is evaluated in parallel; the mean + argmin reduction
    /// is sequential and deterministic.
    pub fn select(&self, scan: &Scan) -> Result<ReferenceSelection, PipelineError> {
        let n = scan.num_frames();
        let frames: Vec<_> = (0..n)
            .map(|i| scan.extract_frame(i, None))
            .collect::<Result<_, _>>()?;

        let pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .collect();
        let scores: Vec<f64> = pairs
            .par_iter()
            .map(|&(i, j)| self.scorer.score(&frames[i], &frames[j]))
            .collect();

        let mut matrix = vec![0.0; n * n];
        for (&(i, j), &s) in pairs.iter().zip(scores.iter()) {
            matrix[i * n + j] = s;
            matrix[j * n + i] = s;
        }

        let column_means: Vec<f64> = (0..n)
            .map(|j| (0..n).map(|i| matrix[i * n + j]).sum::<f64>() / n as f64)
            .collect();

        // First index achieving the minimum: stable, deterministic tie-break.
        let mut best_frame = 0;
        for (j, &m) in column_means.iter().enumerate() {
            if m < column_means[best_frame] {
                best_frame = j;
            }
        }

        log::info!(
            "{}: frame {} selected as motion-correction reference",
            scan.path().display(),
            best_frame
        );
        Ok(ReferenceSelection {
            best_frame,
            score_matrix: matrix,
            column_means,
        })
    }

    /// Cache-aware selection: a hit returns without invoking the scorer; a
    /// miss computes, persists, then returns.
    pub fn select_cached(
        &self,
        scan: &Scan,
        cache: &mut ReferenceFrameCache,
    ) -> Result<usize, PipelineError> {
        let key = scan.scan_key();
        if let Some(index) = cache.get(&key) {
            log::info!("{key}: reference frame {index} served from cache");
            return Ok(index);
        }
        let selection = self.select(scan)?;
        cache.insert(key, selection.best_frame)?;
        Ok(selection.best_frame)
    }
}
