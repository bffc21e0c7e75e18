use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use crate::analysis::Analysis;
use crate::config::{AnalysisConfig, GeneratorConfig};
use crate::models::{Stage, Variant};

pub const SUMMARY_FILE: &str = "ab_test_summary.txt";
pub const SUMMARY_JSON_FILE: &str = "ab_test_summary.json";

fn percent(rate: f64) -> String {
    format!("{:.2}%", rate * 100.0)
}

pub(crate) fn format_p_value(p_value: f64) -> String {
    if p_value < 0.001 {
        "p < 0.001".to_string()
    } else {
        format!("p = {p_value:.4}")
    }
}

/// Stage transition with the largest mean drop-off across both variants.
pub fn steepest_drop_off(analysis: &Analysis) -> Option<(Stage, f64, f64)> {
    let control = analysis.funnel(Variant::Control)?;
    let treatment = analysis.funnel(Variant::Treatment)?;

    Stage::ALL
        .iter()
        .skip(1)
        .map(|&stage| (stage, control.drop_off(stage), treatment.drop_off(stage)))
        .max_by(|a, b| {
            (a.1 + a.2)
                .partial_cmp(&(b.1 + b.2))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

pub fn recommendation(analysis: &Analysis) -> &'static str {
    let engagement = &analysis.engagement;
    match (engagement.test.significant, engagement.absolute_lift > 0.0) {
        (true, true) => "IMPLEMENT TREATMENT VARIANT",
        (true, false) => "KEEP CONTROL VARIANT",
        (false, _) => "CONTINUE TESTING: NO SIGNIFICANT DIFFERENCE",
    }
}

pub fn build_report(analysis: &Analysis, config: &AnalysisConfig) -> String {
    let overview = &analysis.overview;
    let engagement = &analysis.engagement;
    let test = &engagement.test;
    let mut output = String::new();

    let _ = writeln!(output, "A/B TEST RESULTS - MOCK INTERVIEW COMPETITIONS");
    let _ = writeln!(output);
    match (overview.first_competition, overview.last_activity) {
        (Some(start), Some(end)) => {
            let _ = writeln!(output, "TEST PERIOD: {start} - {end}");
        }
        _ => {
            let _ = writeln!(output, "TEST PERIOD: no activity recorded");
        }
    }
    let _ = writeln!(
        output,
        "SAMPLE SIZE: {} users ({} control, {} treatment)",
        overview.total_users, overview.control_users, overview.treatment_users
    );
    let _ = writeln!(output, "ACTIVITIES: {}", overview.activities);

    let _ = writeln!(output);
    let _ = writeln!(output, "1. PRIMARY METRIC - USER ENGAGEMENT");
    for group in [&engagement.control, &engagement.treatment] {
        let _ = writeln!(
            output,
            "   - {:<10} {} engagement rate ({} / {} users)",
            format!("{}:", group.variant.title()),
            percent(group.rate),
            group.engaged_users,
            group.total_users
        );
    }
    let _ = writeln!(
        output,
        "   - Absolute lift: {:+.2} percentage points",
        engagement.absolute_lift * 100.0
    );
    match engagement.relative_lift {
        Some(lift) => {
            let _ = writeln!(output, "   - Relative lift: {:+.1}%", lift * 100.0);
        }
        None => {
            let _ = writeln!(output, "   - Relative lift: undefined (control rate is zero)");
        }
    }
    let _ = writeln!(
        output,
        "   - Two-proportion z-test: z = {:.4}, {} ({} at alpha = {})",
        test.z_statistic,
        format_p_value(test.p_value),
        if test.significant {
            "SIGNIFICANT"
        } else {
            "NOT SIGNIFICANT"
        },
        test.alpha
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "2. FUNNEL ANALYSIS - CONVERSION AND DROP-OFF");
    for funnel in &analysis.funnels {
        let _ = writeln!(output, "   {} group:", funnel.variant.title());
        for step in &funnel.steps {
            let _ = writeln!(
                output,
                "     {:20} {:>6} users ({:>6})",
                step.stage.as_str(),
                step.users,
                percent(step.conversion_rate)
            );
        }
    }
    if let (Some(control), Some(treatment)) = (
        analysis.funnel(Variant::Control),
        analysis.funnel(Variant::Treatment),
    ) {
        let _ = writeln!(output, "   Drop-off by step (control / treatment):");
        for stage in Stage::ALL.iter().skip(1) {
            if let Some(previous) = stage.previous() {
                let _ = writeln!(
                    output,
                    "     {} -> {}: {} / {}",
                    previous.title(),
                    stage.title(),
                    percent(control.drop_off(*stage)),
                    percent(treatment.drop_off(*stage))
                );
            }
        }
    }
    if let Some((stage, control_drop, treatment_drop)) = steepest_drop_off(analysis) {
        let from = stage.previous().map_or("", Stage::title);
        let _ = writeln!(
            output,
            "   Highest drop-off: {} -> {} ({} in control, {} in treatment)",
            from,
            stage.title(),
            percent(control_drop),
            percent(treatment_drop)
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "3. RETENTION ANALYSIS");
    let control_curve = analysis.retention_curve(Variant::Control);
    let treatment_curve = analysis.retention_curve(Variant::Treatment);
    let week = config.headline_week;
    if let (Some(c), Some(t)) = (
        control_curve.and_then(|curve| curve.at_week(week)),
        treatment_curve.and_then(|curve| curve.at_week(week)),
    ) {
        let _ = writeln!(
            output,
            "   Week {week} retention: Control {:.1}%, Treatment {:.1}%",
            c * 100.0,
            t * 100.0
        );
    }
    let _ = writeln!(output, "   Week | Control | Treatment | Difference");
    if let (Some(control), Some(treatment)) = (control_curve, treatment_curve) {
        for (week, (c, t)) in control
            .rates
            .iter()
            .zip(&treatment.rates)
            .enumerate()
            .step_by(2)
        {
            let _ = writeln!(
                output,
                "   {:>4} | {:>6.2}% | {:>8.2}% | {:>+8.2}%",
                week,
                c * 100.0,
                t * 100.0,
                (t - c) * 100.0
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "RECOMMENDATION: {}", recommendation(analysis));
    let additional = (engagement.absolute_lift * overview.total_users as f64).trunc() as i64;
    let _ = writeln!(
        output,
        "BUSINESS IMPACT: expected {:+} engaged users per {} signups",
        additional, overview.total_users
    );

    output
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    recommendation: &'static str,
    generator: Option<&'a GeneratorConfig>,
    analysis_config: &'a AnalysisConfig,
    #[serde(flatten)]
    analysis: &'a Analysis,
}

/// Writes the text and JSON summaries, returning their paths.
pub fn write_reports(
    dir: &Path,
    analysis: &Analysis,
    config: &AnalysisConfig,
    generator: Option<&GeneratorConfig>,
) -> anyhow::Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create reports directory {}", dir.display()))?;

    let text_path = dir.join(SUMMARY_FILE);
    fs::write(&text_path, build_report(analysis, config))
        .with_context(|| format!("failed to write {}", text_path.display()))?;

    let json_path = dir.join(SUMMARY_JSON_FILE);
    let summary = JsonSummary {
        recommendation: recommendation(analysis),
        generator,
        analysis_config: config,
        analysis,
    };
    let json = serde_json::to_string_pretty(&summary)?;
    fs::write(&json_path, json)
        .with_context(|| format!("failed to write {}", json_path.display()))?;

    info!(text = %text_path.display(), json = %json_path.display(), "Wrote reports");
    Ok((text_path, json_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis;
    use crate::generator;

    fn sample_analysis() -> Analysis {
        let dataset = generator::generate(&GeneratorConfig {
            num_users: 1200,
            ..GeneratorConfig::default()
        })
        .unwrap();
        analysis::analyze(&dataset, &AnalysisConfig::default()).unwrap()
    }

    #[test]
    fn p_value_formatting_switches_below_threshold() {
        assert_eq!(format_p_value(0.0001), "p < 0.001");
        assert_eq!(format_p_value(0.0421), "p = 0.0421");
    }

    #[test]
    fn report_covers_every_section() {
        let analysis = sample_analysis();
        let report = build_report(&analysis, &AnalysisConfig::default());

        assert!(report.contains("SAMPLE SIZE: 1200 users"));
        assert!(report.contains("1. PRIMARY METRIC - USER ENGAGEMENT"));
        assert!(report.contains("Two-proportion z-test"));
        assert!(report.contains("Highest drop-off"));
        assert!(report.contains("Week 4 retention"));
        for stage in Stage::ALL {
            assert!(report.contains(stage.as_str()));
        }
        assert!(report.contains("RECOMMENDATION: IMPLEMENT TREATMENT VARIANT"));
    }

    #[test]
    fn writes_text_and_json_summaries() {
        let analysis = sample_analysis();
        let dir = tempfile::tempdir().unwrap();
        let generator = GeneratorConfig::default();

        let (text, json) = write_reports(
            dir.path(),
            &analysis,
            &AnalysisConfig::default(),
            Some(&generator),
        )
        .unwrap();

        assert!(fs::read_to_string(text).unwrap().contains("RECOMMENDATION"));
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(json).unwrap()).unwrap();
        assert_eq!(value["generator"]["seed"], 42);
        assert_eq!(value["engagement"]["control"]["variant"], "control");
        assert_eq!(value["funnels"].as_array().unwrap().len(), 2);
    }
}
