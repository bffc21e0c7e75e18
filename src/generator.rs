use anyhow::{ensure, Context};
use chrono::{Duration, NaiveDateTime, NaiveTime};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::config::{FunnelModel, GeneratorConfig};
use crate::models::{Activity, Competition, CompetitionType, Dataset, Segment, Stage, User, Variant};

/// Builds the full synthetic dataset. Every draw comes from one RNG seeded
/// with `config.seed`, so equal configs produce equal datasets.
pub fn generate(config: &GeneratorConfig) -> anyhow::Result<Dataset> {
    validate(config)?;
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    let users = generate_users(config, &mut rng)?;
    let competitions = generate_competitions(config, &mut rng);

    let mut simulator = FunnelSimulator::new(&config.funnel, &mut rng);
    for user in &users {
        for competition in &competitions {
            if competition.competition_date < user.signup_date {
                continue;
            }
            simulator.simulate(user, competition);
        }
    }
    let activities = simulator.finish();

    info!(
        users = users.len(),
        competitions = competitions.len(),
        activities = activities.len(),
        seed = config.seed,
        "Generated dataset"
    );

    Ok(Dataset {
        users,
        competitions,
        activities,
    })
}

fn validate(config: &GeneratorConfig) -> anyhow::Result<()> {
    let funnel = &config.funnel;
    let probabilities = [
        ("signup_control", funnel.signup_control),
        ("signup_treatment", funnel.signup_treatment),
        ("start_given_signup", funnel.start_given_signup),
        ("complete_control", funnel.complete_control),
        ("complete_treatment", funnel.complete_treatment),
        ("feedback_given_complete", funnel.feedback_given_complete),
        ("share_given_feedback", funnel.share_given_feedback),
        ("treatment_share", config.treatment_share),
    ];
    for (name, p) in probabilities {
        ensure!((0.0..=1.0).contains(&p), "{name} must be within 0..=1, got {p}");
    }
    ensure!(
        config.signup_window_days >= 0,
        "signup window must not be negative"
    );
    Ok(())
}

fn generate_users(config: &GeneratorConfig, rng: &mut ChaCha8Rng) -> anyhow::Result<Vec<User>> {
    let segments =
        WeightedIndex::new(config.segment_weights).context("invalid segment weights")?;

    let users = (1..=config.num_users)
        .map(|user_id| {
            let offset = rng.gen_range(0..=config.signup_window_days);
            let user_segment = Segment::ALL[segments.sample(rng)];
            let variant_group = if rng.gen_bool(config.treatment_share) {
                Variant::Treatment
            } else {
                Variant::Control
            };
            User {
                user_id,
                signup_date: config.start_date + Duration::days(offset),
                user_segment,
                variant_group,
            }
        })
        .collect();

    Ok(users)
}

fn generate_competitions(config: &GeneratorConfig, rng: &mut ChaCha8Rng) -> Vec<Competition> {
    (0..config.num_competitions)
        .map(|week| Competition {
            competition_id: week + 1,
            competition_date: config.start_date + Duration::weeks(i64::from(week)),
            competition_type: CompetitionType::ALL[rng.gen_range(0..CompetitionType::ALL.len())],
        })
        .collect()
}

/// Walks one (user, competition) pair through the funnel, stopping at the
/// first failed gate.
struct FunnelSimulator<'a> {
    model: &'a FunnelModel,
    rng: &'a mut ChaCha8Rng,
    next_id: u64,
    activities: Vec<Activity>,
}

impl<'a> FunnelSimulator<'a> {
    fn new(model: &'a FunnelModel, rng: &'a mut ChaCha8Rng) -> Self {
        Self {
            model,
            rng,
            next_id: 1,
            activities: Vec::new(),
        }
    }

    fn simulate(&mut self, user: &User, competition: &Competition) {
        let variant = user.variant_group;
        let opens_at = competition.competition_date.and_time(NaiveTime::MIN);

        if !self.rng.gen_bool(self.model.signup(variant)) {
            return;
        }
        let signup_at = opens_at + Duration::hours(self.rng.gen_range(0..=48));
        self.emit(user, competition, Stage::Signup, signup_at, 0);

        if !self.rng.gen_bool(self.model.start_given_signup) {
            return;
        }
        let started_at = opens_at + Duration::hours(self.rng.gen_range(48..=96));
        self.emit(user, competition, Stage::StartInterview, started_at, 0);

        if !self.rng.gen_bool(self.model.complete(variant)) {
            return;
        }
        let interview_secs: u32 = self.rng.gen_range(1800..=3600);
        let finished_at = started_at + Duration::seconds(i64::from(interview_secs));
        self.emit(
            user,
            competition,
            Stage::CompleteInterview,
            finished_at,
            interview_secs,
        );

        if !self.rng.gen_bool(self.model.feedback_given_complete) {
            return;
        }
        let viewed_at = finished_at + Duration::seconds(self.rng.gen_range(300..=1800));
        let reading_secs = self.rng.gen_range(300..=900);
        self.emit(user, competition, Stage::ViewFeedback, viewed_at, reading_secs);

        if !self.rng.gen_bool(self.model.share_given_feedback) {
            return;
        }
        let shared_at = finished_at + Duration::seconds(self.rng.gen_range(1800..=3600));
        let sharing_secs = self.rng.gen_range(60..=300);
        self.emit(user, competition, Stage::ShareResult, shared_at, sharing_secs);
    }

    fn emit(
        &mut self,
        user: &User,
        competition: &Competition,
        stage: Stage,
        activity_timestamp: NaiveDateTime,
        session_duration: u32,
    ) {
        debug!(
            activity_id = self.next_id,
            user_id = user.user_id,
            competition_id = competition.competition_id,
            %stage,
            "Emitting activity"
        );
        self.activities.push(Activity {
            activity_id: self.next_id,
            user_id: user.user_id,
            competition_id: competition.competition_id,
            activity_timestamp,
            activity_type: stage,
            session_duration,
        });
        self.next_id += 1;
    }

    fn finish(self) -> Vec<Activity> {
        self.activities
    }
}
