use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{bail, ensure, Context};
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::AnalysisConfig;
use crate::models::{
    CohortRetention, Dataset, DatasetOverview, EngagementSummary, FunnelStep, RetentionCurve,
    Stage, Variant, VariantEngagement, VariantFunnel,
};
use crate::stats;

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub overview: DatasetOverview,
    pub engagement: EngagementSummary,
    pub funnels: Vec<VariantFunnel>,
    pub cohorts: Vec<CohortRetention>,
    pub retention: Vec<RetentionCurve>,
}

impl Analysis {
    pub fn funnel(&self, variant: Variant) -> Option<&VariantFunnel> {
        self.funnels.iter().find(|f| f.variant == variant)
    }

    pub fn retention_curve(&self, variant: Variant) -> Option<&RetentionCurve> {
        self.retention.iter().find(|c| c.variant == variant)
    }
}

pub fn analyze(dataset: &Dataset, config: &AnalysisConfig) -> anyhow::Result<Analysis> {
    let variants = variant_index(dataset)?;
    let overview = overview(dataset);
    let engagement = engagement(dataset, config.alpha).context("engagement analysis failed")?;
    let funnels = funnel(dataset, &variants).context("funnel analysis failed")?;
    let cohorts = cohort_retention(dataset, config.retention_weeks);
    let retention = average_retention(&cohorts, config.retention_weeks)?;

    info!(
        control_rate = engagement.control.rate,
        treatment_rate = engagement.treatment.rate,
        z = engagement.test.z_statistic,
        p_value = engagement.test.p_value,
        cohorts = cohorts.len() / config.retention_weeks.max(1) as usize,
        "Analysis complete"
    );

    Ok(Analysis {
        overview,
        engagement,
        funnels,
        cohorts,
        retention,
    })
}

pub fn variant_index(dataset: &Dataset) -> anyhow::Result<HashMap<u32, Variant>> {
    let mut variants = HashMap::with_capacity(dataset.users.len());
    for user in &dataset.users {
        if variants.insert(user.user_id, user.variant_group).is_some() {
            bail!("duplicate user_id {}", user.user_id);
        }
    }

    for activity in &dataset.activities {
        if !variants.contains_key(&activity.user_id) {
            bail!(
                "activity {} references unknown user {}",
                activity.activity_id,
                activity.user_id
            );
        }
    }

    Ok(variants)
}

pub fn overview(dataset: &Dataset) -> DatasetOverview {
    DatasetOverview {
        total_users: dataset.users.len(),
        control_users: dataset.variant_size(Variant::Control),
        treatment_users: dataset.variant_size(Variant::Treatment),
        competitions: dataset.competitions.len(),
        activities: dataset.activities.len(),
        first_competition: dataset.competitions.iter().map(|c| c.competition_date).min(),
        last_activity: dataset
            .activities
            .iter()
            .map(|a| a.activity_timestamp.date())
            .max(),
    }
}

/// Users who signed up for at least one competition.
fn engaged_users(dataset: &Dataset) -> HashSet<u32> {
    dataset
        .activities
        .iter()
        .filter(|a| a.activity_type == Stage::Signup)
        .map(|a| a.user_id)
        .collect()
}

pub fn engagement(dataset: &Dataset, alpha: f64) -> anyhow::Result<EngagementSummary> {
    let engaged = engaged_users(dataset);

    let per_variant = |variant: Variant| -> anyhow::Result<VariantEngagement> {
        let members = dataset.users.iter().filter(|u| u.variant_group == variant);
        let (total_users, engaged_users) = members.fold((0usize, 0usize), |(total, hit), u| {
            (total + 1, hit + usize::from(engaged.contains(&u.user_id)))
        });
        ensure!(total_users > 0, "variant {variant} has no users");

        Ok(VariantEngagement {
            variant,
            engaged_users,
            total_users,
            rate: engaged_users as f64 / total_users as f64,
        })
    };

    let control = per_variant(Variant::Control)?;
    let treatment = per_variant(Variant::Treatment)?;

    let test = stats::two_proportion_z_test(
        control.engaged_users,
        control.total_users,
        treatment.engaged_users,
        treatment.total_users,
        alpha,
    )?;

    let absolute_lift = treatment.rate - control.rate;
    let relative_lift = (control.rate > 0.0).then(|| absolute_lift / control.rate);

    Ok(EngagementSummary {
        control,
        treatment,
        absolute_lift,
        relative_lift,
        test,
    })
}

pub fn funnel(
    dataset: &Dataset,
    variants: &HashMap<u32, Variant>,
) -> anyhow::Result<Vec<VariantFunnel>> {
    let mut reached: HashMap<(Variant, Stage), HashSet<u32>> = HashMap::new();
    for activity in &dataset.activities {
        let variant = variants
            .get(&activity.user_id)
            .with_context(|| format!("unknown user {}", activity.user_id))?;
        reached
            .entry((*variant, activity.activity_type))
            .or_default()
            .insert(activity.user_id);
    }

    let mut funnels = Vec::with_capacity(Variant::ALL.len());
    for variant in Variant::ALL {
        let population = dataset.variant_size(variant);
        ensure!(population > 0, "variant {variant} has no users");

        let mut steps: Vec<FunnelStep> = Vec::with_capacity(Stage::ALL.len());
        let mut previous = population;
        for stage in Stage::ALL {
            let users = reached.get(&(variant, stage)).map_or(0, HashSet::len);
            let conversion_rate = if previous == 0 {
                0.0
            } else {
                users as f64 / previous as f64
            };
            debug!(%variant, %stage, users, conversion_rate, "Funnel step");
            steps.push(FunnelStep {
                stage,
                users,
                conversion_rate,
            });
            previous = users;
        }

        funnels.push(VariantFunnel {
            variant,
            population,
            steps,
        });
    }

    Ok(funnels)
}

/// Monday that starts the calendar week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Retention of every (signup week, variant) cohort for `weeks` weeks.
///
/// Activity is bucketed once per user into week offsets from the user's
/// cohort start.
pub fn cohort_retention(dataset: &Dataset, weeks: u32) -> Vec<CohortRetention> {
    let cohort_of: HashMap<u32, NaiveDate> = dataset
        .users
        .iter()
        .map(|u| (u.user_id, week_start(u.signup_date)))
        .collect();

    let mut active_weeks: HashMap<u32, HashSet<i64>> = HashMap::new();
    for activity in &dataset.activities {
        let Some(cohort_week) = cohort_of.get(&activity.user_id) else {
            continue;
        };
        let days = (activity.activity_timestamp.date() - *cohort_week).num_days();
        if days >= 0 {
            active_weeks
                .entry(activity.user_id)
                .or_default()
                .insert(days / 7);
        }
    }

    let mut cohorts: BTreeMap<(NaiveDate, Variant), Vec<u32>> = BTreeMap::new();
    for user in &dataset.users {
        cohorts
            .entry((cohort_of[&user.user_id], user.variant_group))
            .or_default()
            .push(user.user_id);
    }

    let mut rows = Vec::with_capacity(cohorts.len() * weeks as usize);
    for ((cohort_week, variant), members) in &cohorts {
        for weeks_after in 0..weeks {
            let active_users = members
                .iter()
                .filter(|id| {
                    active_weeks
                        .get(*id)
                        .is_some_and(|w| w.contains(&i64::from(weeks_after)))
                })
                .count();

            rows.push(CohortRetention {
                cohort_week: *cohort_week,
                variant: *variant,
                weeks_after,
                cohort_size: members.len(),
                active_users,
                retention_rate: active_users as f64 / members.len() as f64,
            });
        }
    }

    rows
}

/// Unweighted mean of cohort retention per variant and week offset.
pub fn average_retention(
    cohorts: &[CohortRetention],
    weeks: u32,
) -> anyhow::Result<Vec<RetentionCurve>> {
    Variant::ALL
        .iter()
        .map(|&variant| {
            let mut sums = vec![0.0; weeks as usize];
            let mut counts = vec![0usize; weeks as usize];
            for row in cohorts.iter().filter(|r| r.variant == variant) {
                sums[row.weeks_after as usize] += row.retention_rate;
                counts[row.weeks_after as usize] += 1;
            }
            ensure!(
                weeks == 0 || counts[0] > 0,
                "variant {variant} has no signup cohorts"
            );

            let rates = sums
                .into_iter()
                .zip(counts)
                .map(|(sum, count)| sum / count as f64)
                .collect();
            Ok(RetentionCurve { variant, rates })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorConfig;
    use crate::generator;
    use crate::models::{Activity, Competition, CompetitionType, Segment, User};
    use chrono::NaiveTime;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn user(user_id: u32, signup_date: NaiveDate, variant_group: Variant) -> User {
        User {
            user_id,
            signup_date,
            user_segment: Segment::Student,
            variant_group,
        }
    }

    fn activity(activity_id: u64, user_id: u32, day: NaiveDate, stage: Stage) -> Activity {
        Activity {
            activity_id,
            user_id,
            competition_id: 1,
            activity_timestamp: day.and_time(NaiveTime::MIN) + Duration::hours(5),
            activity_type: stage,
            session_duration: 0,
        }
    }

    /// Control: users 1-4, one engaged. Treatment: users 5-8, two engaged.
    fn tiny_dataset() -> Dataset {
        let monday = date(2025, 9, 1);
        let users = vec![
            user(1, monday, Variant::Control),
            user(2, monday, Variant::Control),
            user(3, date(2025, 9, 10), Variant::Control),
            user(4, date(2025, 9, 10), Variant::Control),
            user(5, monday, Variant::Treatment),
            user(6, monday, Variant::Treatment),
            user(7, date(2025, 9, 10), Variant::Treatment),
            user(8, date(2025, 9, 10), Variant::Treatment),
        ];
        let activities = vec![
            activity(1, 1, date(2025, 9, 2), Stage::Signup),
            activity(2, 1, date(2025, 9, 4), Stage::StartInterview),
            activity(3, 5, date(2025, 9, 2), Stage::Signup),
            activity(4, 5, date(2025, 9, 4), Stage::StartInterview),
            activity(5, 5, date(2025, 9, 4), Stage::CompleteInterview),
            activity(6, 7, date(2025, 9, 23), Stage::Signup),
        ];
        Dataset {
            users,
            competitions: vec![Competition {
                competition_id: 1,
                competition_date: monday,
                competition_type: CompetitionType::Technical,
            }],
            activities,
        }
    }

    #[test]
    fn engagement_counts_distinct_signed_up_users() {
        let summary = engagement(&tiny_dataset(), 0.05).unwrap();
        assert_eq!(summary.control.engaged_users, 1);
        assert_eq!(summary.control.total_users, 4);
        assert!((summary.control.rate - 0.25).abs() < 1e-12);
        assert_eq!(summary.treatment.engaged_users, 2);
        assert!((summary.absolute_lift - 0.25).abs() < 1e-12);
        assert!((summary.relative_lift.unwrap() - 1.0).abs() < 1e-12);
        assert!(!summary.test.significant);
    }

    #[test]
    fn fully_engaged_variants_still_produce_an_analysis() {
        let mut dataset = tiny_dataset();
        let monday = date(2025, 9, 1);
        dataset.activities = dataset
            .users
            .iter()
            .map(|u| activity(u64::from(u.user_id), u.user_id, monday, Stage::Signup))
            .collect();

        let analysis = analyze(&dataset, &AnalysisConfig::default()).unwrap();
        let test = &analysis.engagement.test;
        assert_eq!(analysis.engagement.control.rate, 1.0);
        assert_eq!(analysis.engagement.treatment.rate, 1.0);
        assert_eq!(test.p_value, 1.0);
        assert!(!test.significant);
    }

    #[test]
    fn small_generated_runs_always_analyze() {
        for seed in 0..20 {
            let dataset = generator::generate(&GeneratorConfig {
                seed,
                num_users: 20,
                ..GeneratorConfig::default()
            })
            .unwrap();
            if Variant::ALL.iter().any(|v| dataset.variant_size(*v) == 0) {
                continue;
            }
            assert!(analyze(&dataset, &AnalysisConfig::default()).is_ok(), "seed {seed}");
        }
    }

    #[test]
    fn empty_variant_is_an_error() {
        let mut dataset = tiny_dataset();
        dataset
            .users
            .retain(|u| u.variant_group == Variant::Control);
        dataset.activities.retain(|a| a.user_id <= 4);
        assert!(engagement(&dataset, 0.05).is_err());
    }

    #[test]
    fn unknown_user_in_activity_is_an_error() {
        let mut dataset = tiny_dataset();
        dataset
            .activities
            .push(activity(7, 99, date(2025, 9, 2), Stage::Signup));
        assert!(analyze(&dataset, &AnalysisConfig::default()).is_err());
    }

    #[test]
    fn funnel_rates_chain_from_population() {
        let dataset = tiny_dataset();
        let funnels = funnel(&dataset, &variant_index(&dataset).unwrap()).unwrap();
        let treatment = &funnels[1];
        assert_eq!(treatment.variant, Variant::Treatment);
        assert_eq!(treatment.step(Stage::Signup).users, 2);
        assert!((treatment.step(Stage::Signup).conversion_rate - 0.5).abs() < 1e-12);
        assert!((treatment.step(Stage::StartInterview).conversion_rate - 0.5).abs() < 1e-12);
        assert!((treatment.step(Stage::CompleteInterview).conversion_rate - 1.0).abs() < 1e-12);
        assert_eq!(treatment.step(Stage::ViewFeedback).users, 0);
        assert_eq!(treatment.step(Stage::ShareResult).conversion_rate, 0.0);
        assert!((treatment.drop_off(Stage::StartInterview) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn week_start_is_monday() {
        assert_eq!(week_start(date(2025, 9, 1)), date(2025, 9, 1));
        assert_eq!(week_start(date(2025, 9, 7)), date(2025, 9, 1));
        assert_eq!(week_start(date(2025, 9, 10)), date(2025, 9, 8));
    }

    #[test]
    fn retention_buckets_activity_by_cohort_week() {
        let rows = cohort_retention(&tiny_dataset(), 4);
        let find = |cohort: NaiveDate, variant: Variant, week: u32| {
            rows.iter()
                .find(|r| r.cohort_week == cohort && r.variant == variant && r.weeks_after == week)
                .unwrap()
        };

        assert_eq!(rows.len(), 4 * 4);
        assert_eq!(find(date(2025, 9, 1), Variant::Control, 0).active_users, 1);
        assert_eq!(find(date(2025, 9, 1), Variant::Control, 1).active_users, 0);
        // user 7 is in the 2025-09-08 cohort and active on 2025-09-23
        assert_eq!(find(date(2025, 9, 8), Variant::Treatment, 2).active_users, 1);
        assert!((find(date(2025, 9, 8), Variant::Treatment, 2).retention_rate - 0.5).abs() < 1e-12);

        let curves = average_retention(&rows, 4).unwrap();
        let treatment = &curves[1];
        assert!((treatment.at_week(0).unwrap() - 0.25).abs() < 1e-12);
        assert!((treatment.at_week(2).unwrap() - 0.25).abs() < 1e-12);
        assert_eq!(treatment.at_week(4), None);
    }

    #[test]
    fn generated_funnel_counts_never_increase() {
        let dataset = generator::generate(&GeneratorConfig {
            num_users: 1000,
            ..GeneratorConfig::default()
        })
        .unwrap();
        let analysis = analyze(&dataset, &AnalysisConfig::default()).unwrap();

        for funnel in &analysis.funnels {
            for pair in funnel.steps.windows(2) {
                assert!(pair[1].users <= pair[0].users);
            }
            for step in &funnel.steps {
                assert!((0.0..=1.0).contains(&step.conversion_rate));
            }
            assert_eq!(
                funnel.step(Stage::Signup).users,
                if funnel.variant == Variant::Control {
                    analysis.engagement.control.engaged_users
                } else {
                    analysis.engagement.treatment.engaged_users
                }
            );
        }
    }

    #[test]
    fn retention_never_exceeds_cohort_engagement() {
        let dataset = generator::generate(&GeneratorConfig {
            num_users: 800,
            ..GeneratorConfig::default()
        })
        .unwrap();
        let engaged = engaged_users(&dataset);
        let rows = cohort_retention(&dataset, 16);

        for row in &rows {
            let cohort_engaged = dataset
                .users
                .iter()
                .filter(|u| {
                    u.variant_group == row.variant
                        && week_start(u.signup_date) == row.cohort_week
                        && engaged.contains(&u.user_id)
                })
                .count();
            assert!(row.active_users <= cohort_engaged);
        }
    }

    #[test]
    fn default_simulation_shows_significant_lift() {
        let dataset = generator::generate(&GeneratorConfig::default()).unwrap();
        let analysis = analyze(&dataset, &AnalysisConfig::default()).unwrap();

        assert!(analysis.engagement.absolute_lift > 0.0);
        assert!(analysis.engagement.test.p_value < 0.001);
        assert!(analysis.engagement.test.significant);
        assert_eq!(analysis.retention.len(), 2);
        assert_eq!(analysis.retention[0].rates.len(), 16);

        let again = analyze(&dataset, &AnalysisConfig::default()).unwrap();
        assert_eq!(
            again.engagement.treatment.rate.to_bits(),
            analysis.engagement.treatment.rate.to_bits()
        );
    }
}
