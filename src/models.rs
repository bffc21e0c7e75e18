use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Control,
    Treatment,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Control, Variant::Treatment];

    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Control => "control",
            Variant::Treatment => "treatment",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Variant::Control => "Control",
            Variant::Treatment => "Treatment",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Student,
    Professional,
    CareerChanger,
}

impl Segment {
    pub const ALL: [Segment; 3] = [Segment::Student, Segment::Professional, Segment::CareerChanger];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionType {
    Technical,
    Behavioral,
    CaseStudy,
}

impl CompetitionType {
    pub const ALL: [CompetitionType; 3] = [
        CompetitionType::Technical,
        CompetitionType::Behavioral,
        CompetitionType::CaseStudy,
    ];
}

/// Funnel stage of an activity. Declaration order is the funnel order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Signup,
    StartInterview,
    CompleteInterview,
    ViewFeedback,
    ShareResult,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Signup,
        Stage::StartInterview,
        Stage::CompleteInterview,
        Stage::ViewFeedback,
        Stage::ShareResult,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn previous(self) -> Option<Stage> {
        self.index().checked_sub(1).map(|i| Stage::ALL[i])
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Signup => "signup",
            Stage::StartInterview => "start_interview",
            Stage::CompleteInterview => "complete_interview",
            Stage::ViewFeedback => "view_feedback",
            Stage::ShareResult => "share_result",
        }
    }

    /// Human label, e.g. `Start Interview`.
    pub fn title(self) -> &'static str {
        match self {
            Stage::Signup => "Signup",
            Stage::StartInterview => "Start Interview",
            Stage::CompleteInterview => "Complete Interview",
            Stage::ViewFeedback => "View Feedback",
            Stage::ShareResult => "Share Result",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: u32,
    pub signup_date: NaiveDate,
    pub user_segment: Segment,
    pub variant_group: Variant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competition {
    pub competition_id: u32,
    pub competition_date: NaiveDate,
    pub competition_type: CompetitionType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub activity_id: u64,
    pub user_id: u32,
    pub competition_id: u32,
    pub activity_timestamp: NaiveDateTime,
    pub activity_type: Stage,
    pub session_duration: u32,
}

/// The three tables exchanged between generation and analysis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub users: Vec<User>,
    pub competitions: Vec<Competition>,
    pub activities: Vec<Activity>,
}

impl Dataset {
    pub fn variant_size(&self, variant: Variant) -> usize {
        self.users
            .iter()
            .filter(|user| user.variant_group == variant)
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetOverview {
    pub total_users: usize,
    pub control_users: usize,
    pub treatment_users: usize,
    pub competitions: usize,
    pub activities: usize,
    pub first_competition: Option<NaiveDate>,
    pub last_activity: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantEngagement {
    pub variant: Variant,
    pub engaged_users: usize,
    pub total_users: usize,
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignificanceTest {
    pub pooled_proportion: f64,
    pub standard_error: f64,
    pub z_statistic: f64,
    pub p_value: f64,
    pub alpha: f64,
    pub significant: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngagementSummary {
    pub control: VariantEngagement,
    pub treatment: VariantEngagement,
    /// Treatment minus control, in rate units (0.0..=1.0).
    pub absolute_lift: f64,
    /// Relative change over control, as a fraction. `None` when control never engaged.
    pub relative_lift: Option<f64>,
    pub test: SignificanceTest,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunnelStep {
    pub stage: Stage,
    pub users: usize,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantFunnel {
    pub variant: Variant,
    pub population: usize,
    pub steps: Vec<FunnelStep>,
}

impl VariantFunnel {
    pub fn step(&self, stage: Stage) -> &FunnelStep {
        &self.steps[stage.index()]
    }

    /// Share of users lost moving into `stage` from the stage before it.
    pub fn drop_off(&self, stage: Stage) -> f64 {
        1.0 - self.step(stage).conversion_rate
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CohortRetention {
    pub cohort_week: NaiveDate,
    pub variant: Variant,
    pub weeks_after: u32,
    pub cohort_size: usize,
    pub active_users: usize,
    pub retention_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetentionCurve {
    pub variant: Variant,
    /// Mean retention over cohorts, indexed by weeks after signup.
    pub rates: Vec<f64>,
}

impl RetentionCurve {
    pub fn at_week(&self, week: usize) -> Option<f64> {
        self.rates.get(week).copied()
    }
}
