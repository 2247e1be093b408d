use crate::policy::WeightingPolicy;
use crate::record::{ClassroomRecord, HpsConfig, RowGrades, StudentGradeRow};
use serde::Serialize;

pub const PASSING_GRADE: i64 = 75;

/// Lower-bound-inclusive thresholds, highest first. Anything below the last
/// entry transmutes to 60.
const TRANSMUTATION_TABLE: [(f64, i64); 40] = [
    (100.0, 100),
    (98.40, 99),
    (96.80, 98),
    (95.20, 97),
    (93.60, 96),
    (92.00, 95),
    (90.40, 94),
    (88.80, 93),
    (87.20, 92),
    (85.60, 91),
    (84.00, 90),
    (82.40, 89),
    (80.80, 88),
    (79.20, 87),
    (77.60, 86),
    (76.00, 85),
    (74.40, 84),
    (72.80, 83),
    (71.20, 82),
    (69.60, 81),
    (68.00, 80),
    (66.40, 79),
    (64.80, 78),
    (63.20, 77),
    (61.60, 76),
    (60.00, 75),
    (56.00, 74),
    (52.00, 73),
    (48.00, 72),
    (44.00, 71),
    (40.00, 70),
    (36.00, 69),
    (32.00, 68),
    (28.00, 67),
    (24.00, 66),
    (20.00, 65),
    (16.00, 64),
    (12.00, 63),
    (8.00, 62),
    (4.00, 61),
];
const TRANSMUTATION_FLOOR: i64 = 60;

/// Initial grade -> quarterly grade.
///
/// Inputs above 100 are clamped first. Negative and NaN inputs land on the
/// floor of 60 like any other value under 4.00; a negative initial grade only
/// happens with misconfigured weights or scores and is not flagged here.
pub fn transmute(initial_grade: f64) -> i64 {
    let pct = if initial_grade > 100.0 {
        100.0
    } else {
        initial_grade
    };
    TRANSMUTATION_TABLE
        .iter()
        .find(|(threshold, _)| pct >= *threshold)
        .map(|(_, grade)| *grade)
        .unwrap_or(TRANSMUTATION_FLOOR)
}

/// `100 * raw / hps_total`, or 0 when there is nothing to divide by.
pub fn percent_score(raw: f64, hps_total: f64) -> f64 {
    if hps_total > 0.0 {
        100.0 * raw / hps_total
    } else {
        0.0
    }
}

pub fn weighted_score(percent: f64, weight: i64) -> f64 {
    percent * (weight as f64) / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentScore {
    pub total: f64,
    pub percent_score: f64,
    pub weighted_score: f64,
}

/// Sums the scores that line up with an HPS slot; score cells past the last
/// HPS slot are ignored.
pub fn aggregate_component(scores: &[f64], hps: &[u32], weight: i64) -> ComponentScore {
    let total: f64 = scores.iter().take(hps.len()).sum();
    let hps_total: f64 = hps.iter().map(|v| f64::from(*v)).sum();
    let percent = percent_score(total, hps_total);
    ComponentScore {
        total,
        percent_score: percent,
        weighted_score: weighted_score(percent, weight),
    }
}

pub fn grade_row(
    ww: &[f64],
    pt: &[f64],
    qa: f64,
    hps: &HpsConfig,
    weights: &WeightingPolicy,
) -> RowGrades {
    let ww_score = aggregate_component(ww, hps.ww(), weights.ww);
    let pt_score = aggregate_component(pt, hps.pt(), weights.pt);
    let qa_percent = percent_score(qa, f64::from(hps.qa()));
    let qa_weighted = weighted_score(qa_percent, weights.qa);

    let initial_grade = ww_score.weighted_score + pt_score.weighted_score + qa_weighted;
    RowGrades {
        ww_total: ww_score.total,
        ww_percent: ww_score.percent_score,
        ww_weighted: ww_score.weighted_score,
        pt_total: pt_score.total,
        pt_percent: pt_score.percent_score,
        pt_weighted: pt_score.weighted_score,
        qa_percent,
        qa_weighted,
        initial_grade,
        quarterly_grade: transmute(initial_grade),
    }
}

pub fn compute_row(
    row: &StudentGradeRow,
    hps: &HpsConfig,
    weights: &WeightingPolicy,
) -> StudentGradeRow {
    let grades = grade_row(row.ww(), row.pt(), row.qa(), hps, weights);
    row.clone().with_grades(grades)
}

/// Re-grades every row against the record's current weights and HPS.
pub fn recalculate_all(record: &ClassroomRecord) -> ClassroomRecord {
    let rows = record
        .rows()
        .iter()
        .map(|r| compute_row(r, record.hps(), record.weights()))
        .collect();
    record.with_rows(rows)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Descriptor {
    Outstanding,
    VerySatisfactory,
    Satisfactory,
    FairlySatisfactory,
    DidNotMeetExpectations,
}

impl Descriptor {
    pub fn label(self) -> &'static str {
        match self {
            Self::Outstanding => "Outstanding",
            Self::VerySatisfactory => "Very Satisfactory",
            Self::Satisfactory => "Satisfactory",
            Self::FairlySatisfactory => "Fairly Satisfactory",
            Self::DidNotMeetExpectations => "Did Not Meet Expectations",
        }
    }
}

pub fn descriptor(quarterly_grade: i64) -> Descriptor {
    match quarterly_grade {
        g if g >= 90 => Descriptor::Outstanding,
        g if g >= 85 => Descriptor::VerySatisfactory,
        g if g >= 80 => Descriptor::Satisfactory,
        g if g >= PASSING_GRADE => Descriptor::FairlySatisfactory,
        _ => Descriptor::DidNotMeetExpectations,
    }
}

/// Two-decimal display rounding for summary figures only.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorCount {
    pub descriptor: Descriptor,
    pub label: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub student_count: usize,
    pub weights_total: i64,
    pub weights_valid: bool,
    pub mean_initial_grade: f64,
    pub mean_quarterly_grade: f64,
    pub highest_quarterly_grade: Option<i64>,
    pub lowest_quarterly_grade: Option<i64>,
    pub passing_count: usize,
    pub descriptors: Vec<DescriptorCount>,
}

pub fn summarize(record: &ClassroomRecord) -> RecordSummary {
    let grades: Vec<&RowGrades> = record.rows().iter().map(|r| r.grades()).collect();
    let n = grades.len();

    let (mean_initial, mean_quarterly) = if n > 0 {
        let sum_initial: f64 = grades.iter().map(|g| g.initial_grade).sum();
        let sum_quarterly: f64 = grades.iter().map(|g| g.quarterly_grade as f64).sum();
        (sum_initial / n as f64, sum_quarterly / n as f64)
    } else {
        (0.0, 0.0)
    };

    let descriptors = [
        Descriptor::Outstanding,
        Descriptor::VerySatisfactory,
        Descriptor::Satisfactory,
        Descriptor::FairlySatisfactory,
        Descriptor::DidNotMeetExpectations,
    ]
    .into_iter()
    .map(|d| DescriptorCount {
        descriptor: d,
        label: d.label(),
        count: grades
            .iter()
            .filter(|g| descriptor(g.quarterly_grade) == d)
            .count(),
    })
    .collect();

    RecordSummary {
        student_count: n,
        weights_total: record.weights().total(),
        weights_valid: record.weights().is_valid(),
        mean_initial_grade: round_off_2_decimals(mean_initial),
        mean_quarterly_grade: round_off_2_decimals(mean_quarterly),
        highest_quarterly_grade: grades.iter().map(|g| g.quarterly_grade).max(),
        lowest_quarterly_grade: grades.iter().map(|g| g.quarterly_grade).min(),
        passing_count: grades
            .iter()
            .filter(|g| g.quarterly_grade >= PASSING_GRADE)
            .count(),
        descriptors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{SubjectCategory, WeightDefaults};
    use crate::record::{EnrolledStudent, Gender, Quarter, RecordKey, Slot};

    fn hps_100_100_50() -> HpsConfig {
        HpsConfig::from_slots(vec![50, 50], vec![60, 40], 50)
    }

    fn ww_80() -> Vec<f64> {
        vec![40.0, 40.0]
    }

    fn pt_90() -> Vec<f64> {
        vec![55.0, 35.0]
    }

    #[test]
    fn transmutation_boundaries() {
        assert_eq!(transmute(100.0), 100);
        assert_eq!(transmute(99.99), 99);
        assert_eq!(transmute(98.40), 99);
        assert_eq!(transmute(84.0), 90);
        assert_eq!(transmute(60.00), 75);
        assert_eq!(transmute(59.999), 74);
        assert_eq!(transmute(4.00), 61);
        assert_eq!(transmute(3.999), 60);
        assert_eq!(transmute(0.0), 60);
    }

    #[test]
    fn transmutation_out_of_domain_inputs() {
        assert_eq!(transmute(130.0), 100);
        assert_eq!(transmute(-12.5), 60);
        assert_eq!(transmute(f64::NAN), 60);
    }

    #[test]
    fn transmutation_is_monotonic_and_covers_60_to_100() {
        let mut prev = transmute(0.0);
        let mut seen = std::collections::BTreeSet::new();
        for i in 0..=10_000 {
            let pct = i as f64 / 100.0;
            let g = transmute(pct);
            assert!(g >= prev, "transmute({}) = {} < {}", pct, g, prev);
            assert!((60..=100).contains(&g));
            seen.insert(g);
            prev = g;
        }
        assert_eq!(seen.len(), 41);
    }

    #[test]
    fn zero_hps_yields_zero_percent() {
        let s = aggregate_component(&[10.0, 25.0, 3.0], &[0, 0, 0], 40);
        assert_eq!(s.total, 38.0);
        assert_eq!(s.percent_score, 0.0);
        assert_eq!(s.weighted_score, 0.0);
        assert_eq!(percent_score(7.0, 0.0), 0.0);
    }

    #[test]
    fn mismatched_lengths_are_ignored() {
        let s = aggregate_component(&[5.0, 5.0, 5.0], &[10, 10], 50);
        assert_eq!(s.total, 10.0);
        assert_eq!(s.percent_score, 50.0);
        assert_eq!(s.weighted_score, 25.0);
    }

    #[test]
    fn negative_and_oversized_scores_pass_through() {
        let s = aggregate_component(&[-5.0, 30.0], &[10, 10], 100);
        assert_eq!(s.total, 25.0);
        assert_eq!(s.percent_score, 125.0);
    }

    #[test]
    fn math_scenario_grades_to_90() {
        let g = grade_row(
            &ww_80(),
            &pt_90(),
            40.0,
            &hps_100_100_50(),
            &WeightingPolicy::new(40, 40, 20),
        );
        assert_eq!(g.ww_total, 80.0);
        assert_eq!(g.ww_percent, 80.0);
        assert_eq!(g.ww_weighted, 32.0);
        assert_eq!(g.pt_total, 90.0);
        assert_eq!(g.pt_percent, 90.0);
        assert_eq!(g.pt_weighted, 36.0);
        assert_eq!(g.qa_percent, 80.0);
        assert_eq!(g.qa_weighted, 16.0);
        assert_eq!(g.initial_grade, 84.0);
        assert_eq!(g.quarterly_grade, 90);
    }

    #[test]
    fn zero_qa_hps_drops_qa_component() {
        let hps = HpsConfig::from_slots(vec![50, 50], vec![60, 40], 0);
        let g = grade_row(
            &ww_80(),
            &pt_90(),
            40.0,
            &hps,
            &WeightingPolicy::new(40, 40, 20),
        );
        assert_eq!(g.qa_percent, 0.0);
        assert_eq!(g.qa_weighted, 0.0);
        assert_eq!(g.initial_grade, g.ww_weighted + g.pt_weighted);
        assert_eq!(g.initial_grade, 68.0);
        assert_eq!(g.quarterly_grade, 80);
    }

    fn sample_record() -> ClassroomRecord {
        let enrolled: Vec<EnrolledStudent> = (0..6)
            .map(|i| EnrolledStudent {
                student_id: format!("s{}", i),
                last_name: format!("Last{}", i),
                first_name: "First".to_string(),
                gender: if i % 2 == 0 { Gender::Male } else { Gender::Female },
            })
            .collect();
        let key = RecordKey {
            class_id: "c1".to_string(),
            subject_id: "sci".to_string(),
            quarter: Quarter::Q2,
            school_year: "2025-2026".to_string(),
        };
        let mut rec = ClassroomRecord::create_new(
            key,
            SubjectCategory::MathScience,
            &enrolled,
            &WeightDefaults::default(),
        );
        rec = rec
            .with_hps(Slot::WrittenWork(0), 30)
            .and_then(|r| r.with_hps(Slot::PerformanceTask(0), 40))
            .and_then(|r| r.with_hps(Slot::QuarterlyAssessment, 60))
            .expect("hps");
        for i in 0..6 {
            let id = format!("s{}", i);
            let f = i as f64;
            rec = rec
                .with_score(&id, Slot::WrittenWork(0), 30.0 - 3.0 * f)
                .and_then(|r| r.with_score(&id, Slot::PerformanceTask(0), 40.0 - 5.0 * f))
                .and_then(|r| r.with_score(&id, Slot::QuarterlyAssessment, 60.0 - 7.0 * f))
                .expect("scores");
        }
        rec
    }

    #[test]
    fn weighted_sum_identity_holds_after_recompute() {
        let rec = recalculate_all(&sample_record());
        for row in rec.rows() {
            let g = row.grades();
            let sum = g.ww_weighted + g.pt_weighted + g.qa_weighted;
            assert!((g.initial_grade - sum).abs() < 1e-9);
            assert_eq!(g.quarterly_grade, transmute(g.initial_grade));
        }
    }

    #[test]
    fn recalculate_all_is_idempotent() {
        let rec = sample_record();
        let once = recalculate_all(&rec);
        let twice = recalculate_all(&once);
        assert_eq!(once, twice);
        assert_eq!(once, rec);
    }

    #[test]
    fn descriptors_follow_bands() {
        assert_eq!(descriptor(100), Descriptor::Outstanding);
        assert_eq!(descriptor(90), Descriptor::Outstanding);
        assert_eq!(descriptor(89), Descriptor::VerySatisfactory);
        assert_eq!(descriptor(80), Descriptor::Satisfactory);
        assert_eq!(descriptor(75), Descriptor::FairlySatisfactory);
        assert_eq!(descriptor(74), Descriptor::DidNotMeetExpectations);
    }

    #[test]
    fn summary_counts_rows() {
        let rec = sample_record();
        let summary = summarize(&rec);
        assert_eq!(summary.student_count, 6);
        assert!(summary.weights_valid);
        assert_eq!(summary.highest_quarterly_grade, Some(100));
        let histogram_total: usize = summary.descriptors.iter().map(|d| d.count).sum();
        assert_eq!(histogram_total, 6);
        let passing = rec
            .rows()
            .iter()
            .filter(|r| r.grades().quarterly_grade >= PASSING_GRADE)
            .count();
        assert_eq!(summary.passing_count, passing);
    }

    #[test]
    fn summary_of_empty_roster() {
        let key = RecordKey {
            class_id: "c".to_string(),
            subject_id: "s".to_string(),
            quarter: Quarter::Q4,
            school_year: "2025-2026".to_string(),
        };
        let rec = ClassroomRecord::create_new(
            key,
            SubjectCategory::Other,
            &[],
            &WeightDefaults::default(),
        );
        let summary = summarize(&rec);
        assert_eq!(summary.student_count, 0);
        assert_eq!(summary.mean_initial_grade, 0.0);
        assert_eq!(summary.highest_quarterly_grade, None);
    }
}
