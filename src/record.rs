use crate::calc;
use crate::policy::{Component, SubjectCategory, WeightDefaults, WeightingPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const WW_SLOTS: usize = 10;
pub const PT_SLOTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quarter {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl Quarter {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "q1" | "1" | "1st" | "first" => Some(Self::Q1),
            "q2" | "2" | "2nd" | "second" => Some(Self::Q2),
            "q3" | "3" | "3rd" | "third" => Some(Self::Q3),
            "q4" | "4" | "4th" | "fourth" => Some(Self::Q4),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Q1 => "Q1",
            Self::Q2 => "Q2",
            Self::Q3 => "Q3",
            Self::Q4 => "Q4",
        }
    }
}

/// Roster grouping only. Variant order is the roster order (male first).
/// `Unspecified` only comes from stored rows that lack a usable gender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[serde(alias = "m", alias = "M", alias = "Male", alias = "MALE")]
    Male,
    #[serde(alias = "f", alias = "F", alias = "Female", alias = "FEMALE")]
    Female,
    Unspecified,
}

impl Gender {
    /// Lenient reading of a stored value; anything unrecognized is kept as
    /// `Unspecified` instead of failing the whole record.
    pub fn from_stored(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("m" | "male") => Self::Male,
            Some("f" | "female") => Self::Female,
            _ => Self::Unspecified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKey {
    pub class_id: String,
    pub subject_id: String,
    pub quarter: Quarter,
    pub school_year: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledStudent {
    pub student_id: String,
    pub last_name: String,
    pub first_name: String,
    pub gender: Gender,
}

/// Addresses one raw input cell (or one HPS cell) of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    WrittenWork(usize),
    PerformanceTask(usize),
    QuarterlyAssessment,
}

impl Slot {
    pub fn new(component: Component, index: Option<usize>) -> Result<Self, EditError> {
        let slot = match component {
            Component::WrittenWorks => {
                Self::WrittenWork(index.ok_or(EditError::MissingSlot(component))?)
            }
            Component::PerformanceTasks => {
                Self::PerformanceTask(index.ok_or(EditError::MissingSlot(component))?)
            }
            Component::QuarterlyAssessment => Self::QuarterlyAssessment,
        };
        slot.check()?;
        Ok(slot)
    }

    fn check(self) -> Result<(), EditError> {
        match self {
            Self::WrittenWork(i) if i >= WW_SLOTS => Err(EditError::SlotOutOfRange {
                component: Component::WrittenWorks,
                index: i,
                slots: WW_SLOTS,
            }),
            Self::PerformanceTask(i) if i >= PT_SLOTS => Err(EditError::SlotOutOfRange {
                component: Component::PerformanceTasks,
                index: i,
                slots: PT_SLOTS,
            }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditError {
    MissingSlot(Component),
    SlotOutOfRange {
        component: Component,
        index: usize,
        slots: usize,
    },
    StudentNotFound(String),
}

impl EditError {
    pub fn code(&self) -> &'static str {
        match self {
            EditError::MissingSlot(_) | EditError::SlotOutOfRange { .. } => "bad_params",
            EditError::StudentNotFound(_) => "not_found",
        }
    }
}

impl fmt::Display for EditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditError::MissingSlot(c) => write!(f, "{} edits require a slot index", c.code()),
            EditError::SlotOutOfRange {
                component,
                index,
                slots,
            } => write!(
                f,
                "{} slot {} out of range (0..{})",
                component.code(),
                index,
                slots
            ),
            EditError::StudentNotFound(id) => write!(f, "student {} is not on this record", id),
        }
    }
}

impl std::error::Error for EditError {}

/// Highest possible scores. Totals are derived and rebuilt on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HpsConfig {
    #[serde(rename = "hpsWW")]
    ww: Vec<u32>,
    #[serde(rename = "hpsPT")]
    pt: Vec<u32>,
    #[serde(rename = "hpsQA")]
    qa: u32,
    #[serde(rename = "hpsWWTotal")]
    ww_total: u64,
    #[serde(rename = "hpsPTTotal")]
    pt_total: u64,
}

impl Default for HpsConfig {
    fn default() -> Self {
        Self::from_slots(Vec::new(), Vec::new(), 0)
    }
}

impl HpsConfig {
    pub fn from_slots(ww: Vec<u32>, pt: Vec<u32>, qa: u32) -> Self {
        let ww = fit(ww, WW_SLOTS);
        let pt = fit(pt, PT_SLOTS);
        let ww_total = ww.iter().map(|v| u64::from(*v)).sum();
        let pt_total = pt.iter().map(|v| u64::from(*v)).sum();
        Self {
            ww,
            pt,
            qa,
            ww_total,
            pt_total,
        }
    }

    pub fn ww(&self) -> &[u32] {
        &self.ww
    }

    pub fn pt(&self) -> &[u32] {
        &self.pt
    }

    pub fn qa(&self) -> u32 {
        self.qa
    }

    pub fn ww_total(&self) -> u64 {
        self.ww_total
    }

    pub fn pt_total(&self) -> u64 {
        self.pt_total
    }

    pub fn with_slot(&self, slot: Slot, value: u32) -> Result<Self, EditError> {
        slot.check()?;
        let mut ww = self.ww.clone();
        let mut pt = self.pt.clone();
        let mut qa = self.qa;
        match slot {
            Slot::WrittenWork(i) => ww[i] = value,
            Slot::PerformanceTask(i) => pt[i] = value,
            Slot::QuarterlyAssessment => qa = value,
        }
        Ok(Self::from_slots(ww, pt, qa))
    }
}

/// Derived per-row values. Only ever produced by [`calc::grade_row`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RowGrades {
    #[serde(rename = "wwTotal")]
    pub ww_total: f64,
    #[serde(rename = "wwPS")]
    pub ww_percent: f64,
    #[serde(rename = "wwWS")]
    pub ww_weighted: f64,
    #[serde(rename = "ptTotal")]
    pub pt_total: f64,
    #[serde(rename = "ptPS")]
    pub pt_percent: f64,
    #[serde(rename = "ptWS")]
    pub pt_weighted: f64,
    #[serde(rename = "qaPS")]
    pub qa_percent: f64,
    #[serde(rename = "qaWS")]
    pub qa_weighted: f64,
    #[serde(rename = "initialGrade")]
    pub initial_grade: f64,
    #[serde(rename = "quarterlyGrade")]
    pub quarterly_grade: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGradeRow {
    pub student_id: String,
    pub student_name: String,
    pub gender: Gender,
    ww: Vec<f64>,
    pt: Vec<f64>,
    qa: f64,
    #[serde(flatten)]
    grades: RowGrades,
}

impl StudentGradeRow {
    fn ungraded(
        student_id: String,
        student_name: String,
        gender: Gender,
        ww: Vec<f64>,
        pt: Vec<f64>,
        qa: f64,
    ) -> Self {
        Self {
            student_id,
            student_name,
            gender,
            ww: fit(ww, WW_SLOTS),
            pt: fit(pt, PT_SLOTS),
            qa,
            grades: RowGrades::default(),
        }
    }

    pub fn ww(&self) -> &[f64] {
        &self.ww
    }

    pub fn pt(&self) -> &[f64] {
        &self.pt
    }

    pub fn qa(&self) -> f64 {
        self.qa
    }

    pub fn grades(&self) -> &RowGrades {
        &self.grades
    }

    pub(crate) fn with_grades(mut self, grades: RowGrades) -> Self {
        self.grades = grades;
        self
    }

    fn with_raw(&self, slot: Slot, value: f64) -> Result<Self, EditError> {
        slot.check()?;
        let mut next = self.clone();
        match slot {
            Slot::WrittenWork(i) => next.ww[i] = value,
            Slot::PerformanceTask(i) => next.pt[i] = value,
            Slot::QuarterlyAssessment => next.qa = value,
        }
        Ok(next)
    }
}

/// One class/subject/quarter grading sheet.
///
/// Weights, HPS and rows are private: every way of changing them goes through
/// a method that recomputes the affected rows before returning, so a value of
/// this type is always internally consistent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(flatten)]
    key: RecordKey,
    subject_category: SubjectCategory,
    weights: WeightingPolicy,
    #[serde(flatten)]
    hps: HpsConfig,
    rows: Vec<StudentGradeRow>,
}

impl ClassroomRecord {
    pub fn create_new(
        key: RecordKey,
        category: SubjectCategory,
        enrolled: &[EnrolledStudent],
        defaults: &WeightDefaults,
    ) -> Self {
        let mut roster: Vec<&EnrolledStudent> = enrolled.iter().collect();
        roster.sort_by(|a, b| {
            a.gender
                .cmp(&b.gender)
                .then_with(|| {
                    a.last_name
                        .to_lowercase()
                        .cmp(&b.last_name.to_lowercase())
                })
                .then_with(|| {
                    a.first_name
                        .to_lowercase()
                        .cmp(&b.first_name.to_lowercase())
                })
        });

        let rows = roster
            .into_iter()
            .map(|s| {
                StudentGradeRow::ungraded(
                    s.student_id.clone(),
                    format!("{}, {}", s.last_name.trim(), s.first_name.trim()),
                    s.gender,
                    Vec::new(),
                    Vec::new(),
                    0.0,
                )
            })
            .collect();

        calc::recalculate_all(&Self {
            id: None,
            key,
            subject_category: category,
            weights: defaults.for_category(category),
            hps: HpsConfig::default(),
            rows,
        })
    }

    /// Normalizes a stored record of any schema age into a fully populated,
    /// recomputed record. Stored derived fields are discarded.
    pub fn rehydrate(
        persisted: PersistedRecord,
        fallback_category: SubjectCategory,
        defaults: &WeightDefaults,
    ) -> Self {
        let category = persisted.subject_category.unwrap_or(fallback_category);
        let default_weights = defaults.for_category(category);
        let weights = match persisted.weights {
            Some(w) => WeightingPolicy::new(
                w.ww.unwrap_or(default_weights.ww),
                w.pt.unwrap_or(default_weights.pt),
                w.qa.unwrap_or(default_weights.qa),
            ),
            None => default_weights,
        };
        let hps = HpsConfig::from_slots(
            flatten_cells(persisted.hps_ww),
            flatten_cells(persisted.hps_pt),
            persisted.hps_qa.unwrap_or(0),
        );
        let rows = persisted
            .rows
            .into_iter()
            .map(|r| {
                let gender = Gender::from_stored(r.gender.as_ref().and_then(|v| v.as_str()));
                // A row without a name still shows up under its id.
                let name = r
                    .student_name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| r.student_id.clone());
                StudentGradeRow::ungraded(
                    r.student_id,
                    name,
                    gender,
                    flatten_cells(r.ww),
                    flatten_cells(r.pt),
                    r.qa.unwrap_or(0.0),
                )
            })
            .collect();

        calc::recalculate_all(&Self {
            id: persisted.id,
            key: RecordKey {
                class_id: persisted.class_id,
                subject_id: persisted.subject_id,
                quarter: persisted.quarter,
                school_year: persisted.school_year,
            },
            subject_category: category,
            weights,
            hps,
            rows,
        })
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn subject_category(&self) -> SubjectCategory {
        self.subject_category
    }

    pub fn weights(&self) -> &WeightingPolicy {
        &self.weights
    }

    pub fn hps(&self) -> &HpsConfig {
        &self.hps
    }

    pub fn rows(&self) -> &[StudentGradeRow] {
        &self.rows
    }

    pub fn row(&self, student_id: &str) -> Option<&StudentGradeRow> {
        self.rows.iter().find(|r| r.student_id == student_id)
    }

    pub fn with_id(&self, id: String) -> Self {
        Self {
            id: Some(id),
            ..self.clone()
        }
    }

    pub(crate) fn with_rows(&self, rows: Vec<StudentGradeRow>) -> Self {
        Self {
            rows,
            ..self.clone()
        }
    }

    /// Weight edits touch every row.
    pub fn with_weight(&self, component: Component, value: i64) -> Self {
        calc::recalculate_all(&Self {
            weights: self.weights.with(component, value),
            ..self.clone()
        })
    }

    /// HPS edits touch every row.
    pub fn with_hps(&self, slot: Slot, value: u32) -> Result<Self, EditError> {
        let hps = self.hps.with_slot(slot, value)?;
        Ok(calc::recalculate_all(&Self {
            hps,
            ..self.clone()
        }))
    }

    /// Score edits only recompute the one row they touch.
    pub fn with_score(&self, student_id: &str, slot: Slot, value: f64) -> Result<Self, EditError> {
        let idx = self
            .rows
            .iter()
            .position(|r| r.student_id == student_id)
            .ok_or_else(|| EditError::StudentNotFound(student_id.to_string()))?;
        let edited = self.rows[idx].with_raw(slot, value)?;
        let mut rows = self.rows.clone();
        rows[idx] = calc::compute_row(&edited, &self.hps, &self.weights);
        Ok(self.with_rows(rows))
    }
}

/// Stored record shape as read back from persistence; any field added after
/// the first schema is optional here.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub class_id: String,
    pub subject_id: String,
    pub quarter: Quarter,
    pub school_year: String,
    #[serde(default)]
    pub subject_category: Option<SubjectCategory>,
    #[serde(default)]
    pub weights: Option<PersistedWeights>,
    #[serde(default, rename = "hpsWW")]
    pub hps_ww: Option<Vec<Option<u32>>>,
    #[serde(default, rename = "hpsPT")]
    pub hps_pt: Option<Vec<Option<u32>>>,
    #[serde(default, rename = "hpsQA")]
    pub hps_qa: Option<u32>,
    #[serde(default)]
    pub rows: Vec<PersistedRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistedWeights {
    #[serde(default)]
    pub ww: Option<i64>,
    #[serde(default)]
    pub pt: Option<i64>,
    #[serde(default)]
    pub qa: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRow {
    pub student_id: String,
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub gender: Option<serde_json::Value>,
    #[serde(default)]
    pub ww: Option<Vec<Option<f64>>>,
    #[serde(default)]
    pub pt: Option<Vec<Option<f64>>>,
    #[serde(default)]
    pub qa: Option<f64>,
}

/// Missing arrays become empty and empty cells become zero.
fn flatten_cells<T: Default>(cells: Option<Vec<Option<T>>>) -> Vec<T> {
    cells
        .unwrap_or_default()
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect()
}

fn fit<T: Clone + Default>(mut values: Vec<T>, len: usize) -> Vec<T> {
    values.resize(len, T::default());
    values
}
