pub use crate::config::*;
use crate::{run_reconciliation, Imputer};

/// A builder for assembling the inputs of a reconciliation.
///
/// ```
/// pub use cons_reconcile::builder::Builder;
/// pub use cons_reconcile::{NoImputation, ReconcileRules};
/// # use cons_reconcile::ReconcileErrors;
///
/// let mut builder = Builder::new(&ReconcileRules::with_components(&[201, 202]))?;
/// builder.add_contributor(1, 202201, Some("Clear"))?;
/// builder.add_response(1, 202201, 201, Some(4.0))?;
/// builder.add_response(1, 202201, 202, Some(5.0))?;
///
/// let result = builder.run(&NoImputation)?;
/// assert_eq!(result.observations.len(), 3);
///
/// # Ok::<(), ReconcileErrors>(())
/// ```
pub struct Builder {
    pub(crate) _rules: ReconcileRules,
    pub(crate) _inputs: ReconcileInputs,
}

impl Builder {
    /// Fails if the rules are not valid.
    pub fn new(rules: &ReconcileRules) -> Result<Builder, ReconcileErrors> {
        rules.validate()?;
        Ok(Builder {
            _rules: rules.clone(),
            _inputs: ReconcileInputs::default(),
        })
    }

    /// Adds a genuine response. A missing value is kept as missing.
    pub fn add_response(
        &mut self,
        reference: Reference,
        period: Period,
        question_code: QuestionCode,
        value: Option<f64>,
    ) -> Result<(), ReconcileErrors> {
        let mut o = Observation::new(reference, period, question_code);
        o.value = value;
        o.marker = Some(ImputationMarker::Response);
        self.add_observation(o)
    }

    /// Adds a response, with its marker and attributes.
    pub fn add_observation(&mut self, obs: Observation) -> Result<(), ReconcileErrors> {
        if self._inputs.responses.iter().any(|o| {
            o.reference == obs.reference
                && o.period == obs.period
                && o.question_code == obs.question_code
        }) {
            return Err(ReconcileErrors::DuplicateObservation(
                obs.reference,
                obs.period,
                obs.question_code,
            ));
        }
        self._inputs.responses.push(obs);
        Ok(())
    }

    pub fn add_contributor(
        &mut self,
        reference: Reference,
        period: Period,
        status: Option<&str>,
    ) -> Result<(), ReconcileErrors> {
        self._inputs
            .contributors
            .push(ContributorRecord::new(reference, period, status));
        Ok(())
    }

    pub fn add_manual_construction(
        &mut self,
        reference: Reference,
        period: Period,
        question_code: QuestionCode,
        value: Option<f64>,
    ) -> Result<(), ReconcileErrors> {
        self._inputs
            .manual_constructions
            .get_or_insert_with(Vec::new)
            .push(ManualConstruction {
                reference,
                period,
                question_code,
                value,
            });
        Ok(())
    }

    pub fn run(&self, imputer: &dyn Imputer) -> Result<ReconcileResult, ReconcileErrors> {
        run_reconciliation(&self._inputs, &self._rules, imputer)
    }
}
