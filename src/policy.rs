use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Percentage split across the three grading components.
///
/// The three values are expected to total 100, but nothing here enforces it:
/// callers check [`WeightingPolicy::is_valid`] before persisting or exporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightingPolicy {
    pub ww: i64,
    pub pt: i64,
    pub qa: i64,
}

impl WeightingPolicy {
    pub const fn new(ww: i64, pt: i64, qa: i64) -> Self {
        Self { ww, pt, qa }
    }

    pub fn total(&self) -> i64 {
        self.ww + self.pt + self.qa
    }

    pub fn is_valid(&self) -> bool {
        self.total() == 100
    }

    /// Replaces one component, clamping the new value to 0..=100.
    pub fn with(self, component: Component, value: i64) -> Self {
        let value = value.clamp(0, 100);
        let mut next = self;
        match component {
            Component::WrittenWorks => next.ww = value,
            Component::PerformanceTasks => next.pt = value,
            Component::QuarterlyAssessment => next.qa = value,
        }
        next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    WrittenWorks,
    PerformanceTasks,
    QuarterlyAssessment,
}

impl Component {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ww" | "writtenworks" | "written_works" => Some(Self::WrittenWorks),
            "pt" | "performancetasks" | "performance_tasks" => Some(Self::PerformanceTasks),
            "qa" | "quarterlyassessment" | "quarterly_assessment" => {
                Some(Self::QuarterlyAssessment)
            }
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::WrittenWorks => "ww",
            Self::PerformanceTasks => "pt",
            Self::QuarterlyAssessment => "qa",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubjectCategory {
    Languages,
    MathScience,
    Mapeh,
    TechVoc,
    Other,
}

impl SubjectCategory {
    pub const ALL: [SubjectCategory; 5] = [
        Self::Languages,
        Self::MathScience,
        Self::Mapeh,
        Self::TechVoc,
        Self::Other,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "languages" => Some(Self::Languages),
            "mathScience" => Some(Self::MathScience),
            "mapeh" => Some(Self::Mapeh),
            "techVoc" => Some(Self::TechVoc),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Languages => "languages",
            Self::MathScience => "mathScience",
            Self::Mapeh => "mapeh",
            Self::TechVoc => "techVoc",
            Self::Other => "other",
        }
    }

    /// Best-effort mapping from a free-form subject name.
    pub fn from_subject_label(label: &str) -> Self {
        let lower = label.to_ascii_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has = |needles: &[&str]| words.iter().any(|w| needles.contains(w));

        if has(&["tle", "epp", "ict", "livelihood"]) {
            Self::TechVoc
        } else if has(&[
            "english",
            "filipino",
            "language",
            "reading",
            "mother",
            "araling",
            "ap",
            "esp",
            "edukasyon",
        ]) {
            Self::Languages
        } else if has(&[
            "math",
            "mathematics",
            "science",
            "physics",
            "chemistry",
            "biology",
            "algebra",
            "geometry",
            "statistics",
        ]) {
            Self::MathScience
        } else if has(&["mapeh", "music", "arts", "pe", "health", "physical"]) {
            Self::Mapeh
        } else {
            Self::Other
        }
    }
}

/// Category to default policy lookup. Built-in values follow the DepEd K-12
/// table; a workspace can replace any entry through its grading setup.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightDefaults {
    by_category: HashMap<SubjectCategory, WeightingPolicy>,
}

impl Default for WeightDefaults {
    fn default() -> Self {
        let by_category = SubjectCategory::ALL
            .iter()
            .map(|c| (*c, builtin_default(*c)))
            .collect();
        Self { by_category }
    }
}

impl WeightDefaults {
    pub fn for_category(&self, category: SubjectCategory) -> WeightingPolicy {
        self.by_category
            .get(&category)
            .copied()
            .unwrap_or_else(|| builtin_default(category))
    }

    pub fn with_override(mut self, category: SubjectCategory, policy: WeightingPolicy) -> Self {
        self.by_category.insert(category, policy);
        self
    }
}

fn builtin_default(category: SubjectCategory) -> WeightingPolicy {
    match category {
        SubjectCategory::Languages => WeightingPolicy::new(30, 50, 20),
        SubjectCategory::MathScience => WeightingPolicy::new(40, 40, 20),
        SubjectCategory::Mapeh | SubjectCategory::TechVoc => WeightingPolicy::new(20, 60, 20),
        SubjectCategory::Other => WeightingPolicy::new(40, 40, 20),
    }
}
