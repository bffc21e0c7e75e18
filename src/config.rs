use chrono::NaiveDate;
use serde::Serialize;

use crate::models::Variant;

/// Per-stage Bernoulli probabilities of the simulated funnel.
#[derive(Debug, Clone, Serialize)]
pub struct FunnelModel {
    pub signup_control: f64,
    pub signup_treatment: f64,
    pub start_given_signup: f64,
    pub complete_control: f64,
    pub complete_treatment: f64,
    pub feedback_given_complete: f64,
    pub share_given_feedback: f64,
}

impl FunnelModel {
    pub fn signup(&self, variant: Variant) -> f64 {
        match variant {
            Variant::Control => self.signup_control,
            Variant::Treatment => self.signup_treatment,
        }
    }

    pub fn complete(&self, variant: Variant) -> f64 {
        match variant {
            Variant::Control => self.complete_control,
            Variant::Treatment => self.complete_treatment,
        }
    }
}

impl Default for FunnelModel {
    fn default() -> Self {
        Self {
            signup_control: 0.23,
            signup_treatment: 0.425,
            start_given_signup: 0.75,
            complete_control: 0.60,
            complete_treatment: 0.68,
            feedback_given_complete: 0.85,
            share_given_feedback: 0.35,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratorConfig {
    pub seed: u64,
    pub num_users: u32,
    pub num_competitions: u32,
    pub start_date: NaiveDate,
    /// Signup dates fall in `start_date ..= start_date + signup_window_days`.
    pub signup_window_days: i64,
    /// Student, professional, career changer.
    pub segment_weights: [f64; 3],
    pub treatment_share: f64,
    pub funnel: FunnelModel,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_users: 5000,
            num_competitions: 16,
            start_date: NaiveDate::from_ymd_opt(2025, 9, 1).expect("valid start date"),
            signup_window_days: 30,
            segment_weights: [0.5, 0.3, 0.2],
            treatment_share: 0.5,
            funnel: FunnelModel::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisConfig {
    pub alpha: f64,
    pub retention_weeks: u32,
    /// Week whose retention is quoted in the summary.
    pub headline_week: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            retention_weeks: 16,
            headline_week: 4,
        }
    }
}
