use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};

use crate::config::SplitSettings;
use crate::error::{Result, ScoringError};
use crate::types::InvestmentLabel;

/// Row indices of a hold-out split, both ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Stratified hold-out split over class indices in `0..n_classes`.
///
/// Each class keeps its proportion in both halves: `round(count * test_ratio)`
/// of its rows, clamped to `[1, count - 1]`, go to the test set.
pub fn stratified_split(labels: &[usize], n_classes: usize, settings: &SplitSettings) -> Result<SplitIndices> {
    let rows = labels.len();
    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
    for (i, &c) in labels.iter().enumerate() {
        if c >= n_classes {
            return Err(ScoringError::InsufficientData {
                reason: format!("label index {} outside {} classes", c, n_classes),
                rows,
            });
        }
        by_class[c].push(i);
    }

    let present = by_class.iter().filter(|rows| !rows.is_empty()).count();
    if present < n_classes {
        if !settings.allow_missing_classes {
            return Err(ScoringError::InsufficientData {
                reason: format!(
                    "only {} of {} investment labels present; set split.allow_missing_classes to train anyway",
                    present, n_classes
                ),
                rows,
            });
        }
        if present < 2 {
            return Err(ScoringError::InsufficientData {
                reason: format!("need at least 2 labels to train, found {}", present),
                rows,
            });
        }
        warn!("Training with {} of {} labels present", present, n_classes);
    }

    for (class, members) in by_class.iter().enumerate() {
        if members.len() == 1 {
            let name = InvestmentLabel::from_rank(class).map_or("unknown", |l| l.as_str());
            return Err(ScoringError::InsufficientData {
                reason: format!("label {} has a single region, cannot stratify", name),
                rows,
            });
        }
    }

    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
    let mut train = Vec::with_capacity(rows);
    let mut test = Vec::new();

    for members in by_class.iter_mut().filter(|m| !m.is_empty()) {
        members.shuffle(&mut rng);
        let count = members.len();
        let n_test = ((count as f64 * settings.test_ratio).round() as usize).clamp(1, count - 1);
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();

    debug!("Stratified split: {} train / {} test", train.len(), test.len());

    Ok(SplitIndices { train, test })
}
