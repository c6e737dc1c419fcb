use log::{debug, info};

use crate::config::*;
use crate::groups::group_indices;

/// Derives the outlier weight of the totals from the weights of their components.
///
/// When the components were not winsorised (their mean weight is exactly 1), the
/// weight of the total is 1. Otherwise it is the weighted sum of the components
/// divided by the total:
///
/// `(q201 * w201 + q202 * w202 + ...) / q290`
///
/// Groups without component weights, or with a zero or missing total, keep the
/// weight of their total.
pub fn derive_total_outlier_weights(mut obs: Vec<Observation>) -> Vec<Observation> {
    let groups = group_indices(&obs);
    let mut num_derived = 0;
    for (key, indices) in groups.iter() {
        let mut num_weights = 0;
        let mut sum_weights = 0.0;
        let mut weighted_sum = 0.0;
        for idx in indices.iter() {
            let o = &obs[*idx];
            if o.is_total() {
                continue;
            }
            if let Some(w) = o.outlier_weight {
                num_weights += 1;
                sum_weights += w;
                weighted_sum += w * o.value.unwrap_or(0.0);
            }
        }
        if num_weights == 0 {
            continue;
        }
        let non_winsorised = sum_weights / (num_weights as f64) == 1.0;
        for idx in indices.iter() {
            let o = &mut obs[*idx];
            if !o.is_total() {
                continue;
            }
            if non_winsorised {
                o.outlier_weight = Some(1.0);
                num_derived += 1;
            } else if let Some(total) = o.value.filter(|t| *t != 0.0) {
                let w = weighted_sum / total;
                debug!("derive_total_outlier_weights: {} weight: {}", key, w);
                o.outlier_weight = Some(w);
                num_derived += 1;
            }
        }
    }
    info!(
        "derive_total_outlier_weights: {} total weights derived",
        num_derived
    );
    obs
}
