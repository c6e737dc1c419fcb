use log::{debug, info, warn};

use crate::config::*;
use crate::groups::{group_indices, group_sums};

/// Rescales the components of the 290 special cases so that they sum to the
/// reported total.
///
/// The ratio is `total / sum of components`, and every component is multiplied
/// by it. The total itself is not changed. When the components sum to zero, the
/// group cannot be rescaled: it is marked with `failed_rescale` and left as-is.
///
/// The values before rescaling are kept in `value_pre_rescale` for every row.
pub fn rescale_290_case(mut obs: Vec<Observation>) -> Vec<Observation> {
    for o in obs.iter_mut() {
        o.value_pre_rescale = o.value;
        o.failed_rescale = false;
    }

    let groups = group_indices(&obs);
    let mut num_rescaled = 0;
    let mut failed: Vec<GroupKey> = Vec::new();
    for (key, indices) in groups.iter() {
        let flagged = indices.iter().any(|idx| obs[*idx].is_total_flagged);
        if !flagged {
            continue;
        }
        let sums = group_sums(&obs, indices);
        let (total, components) = match (sums.total, sums.components) {
            (Some(t), Some(c)) => (t, c),
            // Nothing to rescale.
            _ => continue,
        };
        if components == 0.0 {
            if total != 0.0 {
                failed.push(*key);
                for idx in indices.iter() {
                    obs[*idx].failed_rescale = true;
                }
            }
            continue;
        }
        let ratio = total / components;
        debug!("rescale_290_case: {} ratio: {}", key, ratio);
        for idx in indices.iter() {
            let o = &mut obs[*idx];
            if !o.is_total() {
                o.value = o.value.map(|v| v * ratio);
            }
        }
        num_rescaled += 1;
    }

    info!(
        "rescale_290_case: {} groups rescaled, {} failed",
        num_rescaled,
        failed.len()
    );
    if !failed.is_empty() {
        warn!(
            "rescale_290_case: {} groups have components summing to zero and could not be rescaled. The first 5 (or less) of these are: {:?}",
            failed.len(),
            failed.iter().take(5).collect::<Vec<_>>()
        );
    }
    obs
}
