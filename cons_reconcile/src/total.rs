use log::{debug, info};

use crate::config::*;
use crate::groups::group_indices;

/// Adds a total row to the groups that do not have one.
///
/// The new row has a value of zero and the transient `d_create` marker. Its status,
/// imputation class and `contributor_columns` attributes are taken from the
/// first row of the group that has them.
pub fn create_missing_total(
    mut obs: Vec<Observation>,
    contributor_columns: &[String],
) -> Vec<Observation> {
    let groups = group_indices(&obs);
    let mut created: Vec<Observation> = Vec::new();
    for (key, indices) in groups.iter() {
        if indices.iter().any(|idx| obs[*idx].is_total()) {
            continue;
        }
        let rows: Vec<&Observation> = indices.iter().map(|idx| &obs[*idx]).collect();
        let mut o = Observation::new(key.reference, key.period, TOTAL_QUESTION);
        o.value = Some(0.0);
        o.marker = Some(ImputationMarker::DerivedCreate);
        o.is_total_flagged = false;
        o.status = rows.iter().find_map(|r| r.status.clone());
        o.imputation_class = rows.iter().find_map(|r| r.imputation_class.clone());
        for col in contributor_columns.iter() {
            if let Some(v) = rows.iter().find_map(|r| r.attributes.get(col)) {
                o.attributes.insert(col.clone(), v.clone());
            }
        }
        created.push(o);
    }
    info!("create_missing_total: created {} totals", created.len());
    obs.extend(created);
    obs
}

/// (Re)derives the totals that are not genuine responses, as the sum of their
/// components.
///
/// Every non-null component counts in the sum, responses included, so that a
/// derived total always reconciles with its components.
/// The 290 special cases are left out of the sum: their total is the trusted
/// value, and their components were rescaled to it instead.
/// Missing totals take the sum. Totals that are neither responses nor manual
/// constructions are overwritten with the sum and marked as derived.
pub fn derive_total(mut obs: Vec<Observation>) -> Vec<Observation> {
    let groups = group_indices(&obs);
    let mut num_derived = 0;
    for (key, indices) in groups.iter() {
        let mut derived_sum: Option<f64> = None;
        for idx in indices.iter() {
            let o = &obs[*idx];
            if !o.is_total() && !o.is_total_flagged {
                derived_sum = Some(derived_sum.unwrap_or(0.0) + o.value.unwrap_or(0.0));
            }
        }
        for idx in indices.iter() {
            let o = &mut obs[*idx];
            if !o.is_total() {
                continue;
            }
            if o.value.is_none() {
                o.value = derived_sum;
            }
            let authoritative = o
                .marker
                .as_ref()
                .map(|m| m.is_authoritative())
                .unwrap_or(false);
            if !authoritative {
                debug!(
                    "derive_total: {} {:?} -> {:?} (marker {:?})",
                    key, o.value, derived_sum, o.marker
                );
                if derived_sum.is_some() {
                    o.value = derived_sum;
                }
                o.marker = Some(ImputationMarker::Derived);
                num_derived += 1;
            }
        }
    }
    info!("derive_total: {} totals derived", num_derived);
    obs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total_of(obs: &[Observation], reference: Reference) -> &Observation {
        obs.iter()
            .find(|o| o.reference == reference && o.is_total())
            .unwrap()
    }

    #[test]
    fn missing_totals_are_created() {
        let mut first = Observation::response(1, 202201, 201, 4.0);
        first.status = Some("Clear".to_string());
        first
            .attributes
            .insert("froempment".to_string(), "12".to_string());
        first
            .attributes
            .insert("questiontext".to_string(), "x".to_string());
        let obs = vec![
            first,
            Observation::response(1, 202201, 202, 5.0),
            Observation::response(2, 202201, 290, 1.0),
            Observation::response(2, 202201, 201, 1.0),
        ];
        let res = create_missing_total(obs, &["froempment".to_string()]);
        assert_eq!(res.len(), 5);
        let created = &res[4];
        assert_eq!(created.key(), GroupKey::new(1, 202201));
        assert_eq!(created.question_code, 290);
        assert_eq!(created.value, Some(0.0));
        assert_eq!(created.marker, Some(ImputationMarker::DerivedCreate));
        assert_eq!(created.status, Some("Clear".to_string()));
        assert_eq!(created.attributes.get("froempment"), Some(&"12".to_string()));
        assert_eq!(created.attributes.get("questiontext"), None);
    }

    #[test]
    fn created_totals_are_derived() {
        let obs = vec![
            Observation::response(1, 202201, 201, 4.0),
            Observation::response(1, 202201, 202, 5.0),
        ];
        let res = derive_total(create_missing_total(obs, &[]));
        let total = total_of(&res, 1);
        assert_eq!(total.value, Some(9.0));
        assert_eq!(total.marker, Some(ImputationMarker::Derived));
    }

    #[test]
    fn responses_are_never_overwritten() {
        let obs = vec![
            Observation::response(1, 202201, 290, 100.0),
            Observation::response(1, 202201, 201, 4.0),
        ];
        let res = derive_total(obs);
        let total = total_of(&res, 1);
        assert_eq!(total.value, Some(100.0));
        assert_eq!(total.marker, Some(ImputationMarker::Response));
    }

    #[test]
    fn imputed_totals_are_replaced() {
        let mut total = Observation::new(1, 202201, 290);
        total.value = Some(50.0);
        total.marker = Some(ImputationMarker::ForwardImputedResponse);
        let mut c1 = Observation::new(1, 202201, 201);
        c1.value = Some(20.0);
        c1.marker = Some(ImputationMarker::ForwardImputedResponse);
        let mut c2 = Observation::new(1, 202201, 202);
        c2.value = Some(25.0);
        c2.marker = Some(ImputationMarker::ForwardImputedResponse);
        let res = derive_total(vec![total, c1, c2]);
        let total = total_of(&res, 1);
        assert_eq!(total.value, Some(45.0));
        assert_eq!(total.marker, Some(ImputationMarker::Derived));
    }

    #[test]
    fn flagged_groups_keep_their_total() {
        let mut total = Observation::new(1, 202201, 290);
        total.value = Some(150.0);
        total.marker = Some(ImputationMarker::Constructed);
        total.is_total_flagged = true;
        let mut c1 = Observation::response(1, 202201, 201, 75.0);
        c1.is_total_flagged = true;
        let res = derive_total(vec![total, c1]);
        let total = total_of(&res, 1);
        assert_eq!(total.value, Some(150.0));
        assert_eq!(total.marker, Some(ImputationMarker::Derived));
    }

    #[test]
    fn null_totals_take_the_sum() {
        let mut total = Observation::new(1, 202201, 290);
        total.marker = Some(ImputationMarker::Response);
        let res = derive_total(vec![total, Observation::response(1, 202201, 201, 3.0)]);
        assert_eq!(total_of(&res, 1).value, Some(3.0));
    }

    #[test]
    fn derivation_is_idempotent() {
        let mut c1 = Observation::new(1, 202201, 201);
        c1.value = Some(1.25);
        c1.marker = Some(ImputationMarker::BackwardImputedResponse);
        let obs = vec![c1, Observation::response(1, 202201, 202, 2.5)];
        let once = derive_total(create_missing_total(obs, &[]));
        let twice = derive_total(once.clone());
        assert_eq!(once, twice);
        assert_eq!(total_of(&twice, 1).value, Some(3.75));
    }

    #[test]
    fn manual_constructions_are_not_overwritten() {
        let mut total = Observation::new(1, 202201, 290);
        total.value = Some(12.0);
        total.marker = Some(ImputationMarker::ManualConstruction);
        let res = derive_total(vec![total, Observation::response(1, 202201, 201, 3.0)]);
        assert_eq!(total_of(&res, 1).value, Some(12.0));
    }
}
