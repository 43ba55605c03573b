//! Time-step selection by an index score

/// Which end of the score range to select
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremum {
    Max,
    Min,
}

/// Position of the best score. Ties go to the earliest position; NaN scores
/// never win. `None` when every score is NaN.
pub fn select_extreme(scores: &[f64], extremum: Extremum) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &s) in scores.iter().enumerate() {
        if s.is_nan() {
            continue;
        }
        let better = match (best, extremum) {
            (None, _) => true,
            (Some((_, b)), Extremum::Max) => s > b,
            (Some((_, b)), Extremum::Min) => s < b,
        };
        if better {
            best = Some((i, s));
        }
    }
    best.map(|(i, _)| i)
}
