// ********* Input data structures ***********

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Display;

pub type Reference = u64;
/// A reporting month, encoded as YYYYMM so that the natural ordering is chronological.
pub type Period = u32;
pub type QuestionCode = u32;

/// The question code of the survey total.
pub const TOTAL_QUESTION: QuestionCode = 290;

/// The provenance of a value.
///
/// Markers that are not known to this crate (for example the ones produced by an
/// external imputation method) are kept verbatim in `Other`.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub enum ImputationMarker {
    /// `r`: a genuine response.
    Response,
    /// `d`: derived from other values (totals, derived zeros).
    Derived,
    /// `c`: constructed.
    Constructed,
    /// `mc`: manually constructed by an analyst.
    ManualConstruction,
    /// `fir`: forward imputation from a response.
    ForwardImputedResponse,
    /// `bir`: backward imputation from a response.
    BackwardImputedResponse,
    /// `fic`: forward imputation from a construction.
    ForwardImputedConstruction,
    /// `fimc`: forward imputation from a manual construction.
    ForwardImputedManualConstruction,
    /// `d_create`: a total that was just created. It must not survive the derivation.
    DerivedCreate,
    Other(String),
}

impl ImputationMarker {
    pub fn parse(s: &str) -> ImputationMarker {
        match s.trim() {
            "r" => ImputationMarker::Response,
            "d" => ImputationMarker::Derived,
            "c" => ImputationMarker::Constructed,
            "mc" => ImputationMarker::ManualConstruction,
            "fir" => ImputationMarker::ForwardImputedResponse,
            "bir" => ImputationMarker::BackwardImputedResponse,
            "fic" => ImputationMarker::ForwardImputedConstruction,
            "fimc" => ImputationMarker::ForwardImputedManualConstruction,
            "d_create" => ImputationMarker::DerivedCreate,
            x => ImputationMarker::Other(x.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ImputationMarker::Response => "r",
            ImputationMarker::Derived => "d",
            ImputationMarker::Constructed => "c",
            ImputationMarker::ManualConstruction => "mc",
            ImputationMarker::ForwardImputedResponse => "fir",
            ImputationMarker::BackwardImputedResponse => "bir",
            ImputationMarker::ForwardImputedConstruction => "fic",
            ImputationMarker::ForwardImputedManualConstruction => "fimc",
            ImputationMarker::DerivedCreate => "d_create",
            ImputationMarker::Other(s) => s.as_str(),
        }
    }

    /// Values carrying these markers are never overwritten by a derivation.
    pub fn is_authoritative(&self) -> bool {
        matches!(
            self,
            ImputationMarker::Response | ImputationMarker::ManualConstruction
        )
    }
}

impl Display for ImputationMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The key of a reference-period group.
///
/// The ordering (reference first, then period) is the one required by all the
/// forward-fill passes.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct GroupKey {
    pub reference: Reference,
    pub period: Period,
}

impl GroupKey {
    pub fn new(reference: Reference, period: Period) -> GroupKey {
        GroupKey { reference, period }
    }
}

impl Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(reference={}, period={})", self.reference, self.period)
    }
}

/// One (reference, period, question) value, with its audit trail.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct Observation {
    pub reference: Reference,
    pub period: Period,
    pub question_code: QuestionCode,
    pub value: Option<f64>,
    pub marker: Option<ImputationMarker>,
    /// The group is a 290 special case: total reported without usable components.
    pub is_total_flagged: bool,
    /// The group only has a total, and it is zero.
    pub is_total_only_and_zero: bool,
    /// Created as a zero for a skipped question.
    pub is_skipped: bool,
    /// Created as a derived zero.
    pub is_derived_zero: bool,
    /// The group is flagged but its components sum to zero, so it could not be rescaled.
    pub failed_rescale: bool,
    pub value_pre_rescale: Option<f64>,
    /// In frozen state, the value of a response whose contributor was in error.
    pub live_value: Option<f64>,
    pub status: Option<String>,
    pub imputation_class: Option<String>,
    pub outlier_weight: Option<f64>,
    /// Contributor, response and sample columns carried along as business metadata.
    pub attributes: BTreeMap<String, String>,
}

impl Observation {
    /// An observation without value or marker.
    pub fn new(reference: Reference, period: Period, question_code: QuestionCode) -> Observation {
        Observation {
            reference,
            period,
            question_code,
            ..Default::default()
        }
    }

    /// A genuine response.
    pub fn response(
        reference: Reference,
        period: Period,
        question_code: QuestionCode,
        value: f64,
    ) -> Observation {
        Observation {
            value: Some(value),
            marker: Some(ImputationMarker::Response),
            ..Observation::new(reference, period, question_code)
        }
    }

    pub fn key(&self) -> GroupKey {
        GroupKey::new(self.reference, self.period)
    }

    pub fn is_total(&self) -> bool {
        self.question_code == TOTAL_QUESTION
    }

    pub fn has_marker(&self, marker: &ImputationMarker) -> bool {
        self.marker.as_ref() == Some(marker)
    }
}

/// Sampling and business metadata for a reference in a period.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct ContributorRecord {
    pub reference: Reference,
    pub period: Period,
    pub status: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl ContributorRecord {
    pub fn new(reference: Reference, period: Period, status: Option<&str>) -> ContributorRecord {
        ContributorRecord {
            reference,
            period,
            status: status.map(|s| s.to_string()),
            attributes: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> GroupKey {
        GroupKey::new(self.reference, self.period)
    }
}

/// An analyst override of a value.
#[derive(PartialEq, Debug, Clone)]
pub struct ManualConstruction {
    pub reference: Reference,
    pub period: Period,
    pub question_code: QuestionCode,
    pub value: Option<f64>,
}

/// All the tables consumed by the reconciliation.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct ReconcileInputs {
    pub responses: Vec<Observation>,
    pub contributors: Vec<ContributorRecord>,
    pub manual_constructions: Option<Vec<ManualConstruction>>,
}

// ******** Output data structures *********

/// A group whose total does not match the sum of its components.
#[derive(PartialEq, Debug, Clone)]
pub struct TotalMismatch {
    pub period: Period,
    pub reference: Reference,
    pub total_value: Option<f64>,
    pub component_sum: f64,
    pub failed_rescale: bool,
}

/// A component series where a derived value appears before any response.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct MarkerAnomaly {
    pub reference: Reference,
    pub question_code: QuestionCode,
    /// The first period carrying a derived marker without a preceding response.
    pub period: Period,
}

/// Everything that went wrong without stopping the processing.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct Diagnostics {
    /// Groups with a non-response status that still have responses.
    pub snapshot_anomalies: Vec<GroupKey>,
    pub failed_rescales: Vec<GroupKey>,
    pub mismatches: Vec<TotalMismatch>,
    pub marker_anomalies: Vec<MarkerAnomaly>,
}

impl Diagnostics {
    pub fn is_clean(&self) -> bool {
        self.snapshot_anomalies.is_empty()
            && self.failed_rescales.is_empty()
            && self.mismatches.is_empty()
            && self.marker_anomalies.is_empty()
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct ReconcileResult {
    /// Sorted by reference, period and question code.
    pub observations: Vec<Observation>,
    pub diagnostics: Diagnostics,
}

/// Errors that prevent the reconciliation from completing.
#[derive(PartialEq, Debug, Clone)]
pub enum ReconcileErrors {
    EmptyComponents,
    TotalInComponents,
    InvalidTolerance(f64),
    DuplicateObservation(Reference, Period, QuestionCode),
    InvalidSizeband(i64, i64),
    UnbinnedValue {
        reference: Reference,
        period: Period,
        column: String,
        value: Option<String>,
    },
    Imputation(String),
}

impl Error for ReconcileErrors {}

impl Display for ReconcileErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileErrors::EmptyComponents => {
                write!(f, "the list of component questions is empty")
            }
            ReconcileErrors::TotalInComponents => write!(
                f,
                "question {} cannot be one of the component questions",
                TOTAL_QUESTION
            ),
            ReconcileErrors::InvalidTolerance(t) => {
                write!(f, "the tolerance must be positive and finite, got {}", t)
            }
            ReconcileErrors::DuplicateObservation(r, p, q) => write!(
                f,
                "duplicate observation for reference {} period {} question {}",
                r, p, q
            ),
            ReconcileErrors::InvalidSizeband(l, u) => {
                write!(f, "sizeband [{}, {}] is not properly defined", l, u)
            }
            ReconcileErrors::UnbinnedValue {
                reference,
                period,
                column,
                value,
            } => write!(
                f,
                "value {:?} of column {} (reference {} period {}) is not covered by the sizebands",
                value, column, reference, period
            ),
            ReconcileErrors::Imputation(msg) => write!(f, "imputation failed: {}", msg),
        }
    }
}

// ********* Configuration **********

/// Whether contributors in an error status are kept (live) or treated as
/// non-response (frozen).
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum ProcessingState {
    Live,
    Frozen,
}

/// The flag raised on the rows created by the skipped question materializer.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum SkipFlag {
    /// A question left blank on a cleared form. Created with a response marker.
    Skipped,
    /// A zero derived for a non-responding contributor. Created with a derived marker.
    DerivedZero,
}

/// A closed `[lower, upper]` interval used to bin contributors into imputation classes.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct Sizeband {
    pub lower: i64,
    pub upper: i64,
}

impl Sizeband {
    pub fn contains(&self, x: i64) -> bool {
        self.lower <= x && x <= self.upper
    }

    pub fn label(&self) -> String {
        format!("{}-{}", self.lower, self.upper)
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct ReconcileRules {
    /// All the question codes summing to the total.
    pub components_questions: Vec<QuestionCode>,
    /// Attributes forward-filled into the rows created for skipped questions.
    pub fill_columns: Vec<String>,
    /// Attributes copied onto created totals.
    pub contributor_columns: Vec<String>,
    pub skip_statuses: Vec<String>,
    pub derived_zero_statuses: Vec<String>,
    /// Nil returns. Their questions are skipped, their missing component
    /// values are zeros, and they count as non-response in the snapshot check.
    pub nil_statuses: Vec<String>,
    /// Only groups with one of these statuses can be 290 special cases.
    /// When empty, every group can be.
    pub total_case_statuses: Vec<String>,
    pub non_response_statuses: Vec<String>,
    pub state: ProcessingState,
    pub error_statuses: Vec<String>,
    pub sizebands: Option<Vec<Sizeband>>,
    /// The attribute binned with the sizebands.
    pub imputation_class_column: Option<String>,
    pub tolerance: f64,
}

impl ReconcileRules {
    pub const DEFAULT_TOLERANCE: f64 = 1e-3;

    /// The default rules for the given component questions.
    pub fn with_components(components_questions: &[QuestionCode]) -> ReconcileRules {
        ReconcileRules {
            components_questions: components_questions.to_vec(),
            fill_columns: Vec::new(),
            contributor_columns: Vec::new(),
            skip_statuses: vec!["Clear".to_string(), "Clear - overridden".to_string()],
            derived_zero_statuses: Vec::new(),
            nil_statuses: Vec::new(),
            total_case_statuses: vec!["Clear".to_string(), "Clear - overridden".to_string()],
            non_response_statuses: Vec::new(),
            state: ProcessingState::Live,
            error_statuses: vec!["Check needed".to_string()],
            sizebands: None,
            imputation_class_column: None,
            tolerance: ReconcileRules::DEFAULT_TOLERANCE,
        }
    }

    /// Checks the rules once, before any processing.
    pub fn validate(&self) -> Result<(), ReconcileErrors> {
        if self.components_questions.is_empty() {
            return Err(ReconcileErrors::EmptyComponents);
        }
        if self.components_questions.contains(&TOTAL_QUESTION) {
            return Err(ReconcileErrors::TotalInComponents);
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(ReconcileErrors::InvalidTolerance(self.tolerance));
        }
        if let Some(bands) = &self.sizebands {
            for b in bands.iter() {
                if b.lower > b.upper {
                    return Err(ReconcileErrors::InvalidSizeband(b.lower, b.upper));
                }
            }
        }
        Ok(())
    }
}
