//! Estimator accuracy against a labeled test set.

use core::fmt;

use serde::Serialize;

use crate::vision::Side;

/// Goodness-of-fit summary for `(ground_truth, estimate)` pairs in uL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AccuracyReport {
    pub count: usize,
    /// Coefficient of determination. `None` when the ground truth has no
    /// spread.
    pub r_squared: Option<f64>,
    pub rmse_ul: f64,
    pub mae_ul: f64,
    /// Mean absolute percentage error; zero-volume samples contribute 0.
    pub mape_percent: f64,
}

impl AccuracyReport {
    /// `None` for an empty set.
    pub fn compute(pairs: &[(f64, f64)]) -> Option<Self> {
        if pairs.is_empty() {
            return None;
        }
        let n = pairs.len() as f64;
        let mean_gt = pairs.iter().map(|p| p.0).sum::<f64>() / n;

        let mut sst = 0.0;
        let mut ssr = 0.0;
        let mut abs_sum = 0.0;
        let mut pct_sum = 0.0;
        for &(gt, est) in pairs {
            let err = gt - est;
            sst += (gt - mean_gt).powi(2);
            ssr += err * err;
            abs_sum += err.abs();
            if gt != 0.0 {
                pct_sum += (err / gt).abs() * 100.0;
            }
        }

        Some(Self {
            count: pairs.len(),
            r_squared: (sst > 0.0).then(|| 1.0 - ssr / sst),
            rmse_ul: (ssr / n).sqrt(),
            mae_ul: abs_sum / n,
            mape_percent: pct_sum / n,
        })
    }
}

impl fmt::Display for AccuracyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.r_squared {
            Some(r2) => write!(f, "n={} R2={r2:.4}", self.count)?,
            None => write!(f, "n={} R2=n/a", self.count)?,
        }
        write!(
            f,
            " RMSE={:.1}uL MAE={:.1}uL MAPE={:.2}%",
            self.rmse_ul, self.mae_ul, self.mape_percent
        )
    }
}

/// Per-side and overall accuracy of an evaluation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationReport {
    pub left: Option<AccuracyReport>,
    pub right: Option<AccuracyReport>,
    pub overall: Option<AccuracyReport>,
}

impl EvaluationReport {
    pub fn from_samples(samples: &[(Side, f64, f64)]) -> Self {
        let pick = |side: Option<Side>| -> Vec<(f64, f64)> {
            samples
                .iter()
                .filter(|(s, _, _)| side.is_none_or(|want| *s == want))
                .map(|&(_, gt, est)| (gt, est))
                .collect()
        };
        Self {
            left: AccuracyReport::compute(&pick(Some(Side::Left))),
            right: AccuracyReport::compute(&pick(Some(Side::Right))),
            overall: AccuracyReport::compute(&pick(None)),
        }
    }
}
