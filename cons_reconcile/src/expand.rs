use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::*;

/// The state carried from one period to the next, for a single reference.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
struct CarryState {
    reference: Option<Reference>,
    /// The last known set of expected components.
    questions: Option<BTreeSet<QuestionCode>>,
}

impl CarryState {
    fn reset_if_new(&mut self, reference: Reference) {
        if self.reference != Some(reference) {
            self.reference = Some(reference);
            self.questions = None;
        }
    }
}

/// The question codes a group is expected to have.
///
/// Arguments:
/// * `reported` the codes the reference answered in this period
/// * `manual` the codes that are manually constructed for this period
/// * `total_only` the group is a 290 special case or a zero total without components
fn expected_questions(
    state: &mut CarryState,
    reported: &BTreeSet<QuestionCode>,
    manual: &BTreeSet<QuestionCode>,
    total_only: bool,
    components_questions: &[QuestionCode],
) -> BTreeSet<QuestionCode> {
    if total_only {
        // Components are not expected this period. The carried set is left as-is.
        let mut res: BTreeSet<QuestionCode> = BTreeSet::from([TOTAL_QUESTION]);
        res.extend(manual.iter().cloned());
        return res;
    }

    let mut res: BTreeSet<QuestionCode> = manual.clone();
    if !reported.is_empty() {
        res.extend(reported.iter().cloned());
        if let Some(carried) = &state.questions {
            res.extend(carried.iter().cloned());
        }
    } else if let Some(carried) = &state.questions {
        res.extend(carried.iter().cloned());
    } else {
        // Nothing known yet about this reference: all the questions are expected,
        // but this default is not carried forward.
        res.extend(components_questions.iter().cloned());
        return res;
    }

    let components: BTreeSet<QuestionCode> = res
        .iter()
        .filter(|q| components_questions.contains(q))
        .cloned()
        .collect();
    if !components.is_empty() {
        state.questions = Some(components);
    }
    res
}

/// Produces the full set of expected (reference, period, question) rows.
///
/// Only the (reference, period) keys of the contributors are expanded. The
/// responses and manual constructions of other keys are dropped. Rows that have
/// neither a response nor a manual construction have no value and no marker.
///
/// The rows are returned sorted by reference, period and question code.
pub fn expand_panel(
    responses: &[Observation],
    contributors: &[ContributorRecord],
    manual_constructions: Option<&[ManualConstruction]>,
    total_only: &BTreeSet<GroupKey>,
    components_questions: &[QuestionCode],
) -> Vec<Observation> {
    let mut contributors_by_key: BTreeMap<GroupKey, &ContributorRecord> = BTreeMap::new();
    for c in contributors.iter() {
        contributors_by_key.entry(c.key()).or_insert(c);
    }

    let mut responses_by_key: BTreeMap<GroupKey, BTreeMap<QuestionCode, &Observation>> =
        BTreeMap::new();
    let mut num_dropped = 0;
    for r in responses.iter() {
        if contributors_by_key.contains_key(&r.key()) {
            responses_by_key
                .entry(r.key())
                .or_default()
                .insert(r.question_code, r);
        } else {
            num_dropped += 1;
        }
    }
    if num_dropped > 0 {
        info!(
            "expand_panel: dropping {} responses without a contributor",
            num_dropped
        );
    }

    let mut manual_by_key: BTreeMap<GroupKey, BTreeMap<QuestionCode, Option<f64>>> =
        BTreeMap::new();
    for mc in manual_constructions.unwrap_or(&[]).iter() {
        let key = GroupKey::new(mc.reference, mc.period);
        if contributors_by_key.contains_key(&key) {
            manual_by_key
                .entry(key)
                .or_default()
                .insert(mc.question_code, mc.value);
        } else {
            debug!(
                "expand_panel: dropping manual construction without contributor: {:?}",
                mc
            );
        }
    }

    let empty_responses: BTreeMap<QuestionCode, &Observation> = BTreeMap::new();
    let empty_manual: BTreeMap<QuestionCode, Option<f64>> = BTreeMap::new();
    let mut state = CarryState::default();
    let mut res: Vec<Observation> = Vec::new();

    // The map iterates by reference, then by ascending period.
    for (key, contributor) in contributors_by_key.iter() {
        state.reset_if_new(key.reference);
        let reported_rows = responses_by_key.get(key).unwrap_or(&empty_responses);
        let manual_rows = manual_by_key.get(key).unwrap_or(&empty_manual);
        let reported: BTreeSet<QuestionCode> = reported_rows.keys().cloned().collect();
        let manual: BTreeSet<QuestionCode> = manual_rows.keys().cloned().collect();

        let expected = expected_questions(
            &mut state,
            &reported,
            &manual,
            total_only.contains(key),
            components_questions,
        );
        debug!("expand_panel: {} expected questions: {:?}", key, expected);

        for q in expected.iter() {
            let mut o = match reported_rows.get(q) {
                Some(r) => {
                    let mut o = (*r).clone();
                    if o.marker.is_none() {
                        o.marker = Some(ImputationMarker::Response);
                    }
                    o
                }
                None => Observation::new(key.reference, key.period, *q),
            };
            if let Some(v) = manual_rows.get(q) {
                o.value = *v;
                o.marker = Some(ImputationMarker::ManualConstruction);
            }
            o.status = contributor.status.clone();
            for (k, v) in contributor.attributes.iter() {
                o.attributes.entry(k.clone()).or_insert_with(|| v.clone());
            }
            res.push(o);
        }
    }
    info!(
        "expand_panel: {} responses expanded to {} rows over {} groups",
        responses.len(),
        res.len(),
        contributors_by_key.len()
    );
    res
}
