//! Chart rendering for the analysis results.
//!
//! Charts are written as SVG through [`plotters`], so no system fonts or
//! native image libraries are required.

use std::fs;
use std::path::{Path, PathBuf};

use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use thiserror::Error;
use tracing::info;

use crate::analysis::Analysis;
use crate::models::{Stage, Variant};
use crate::report::format_p_value;

pub const ENGAGEMENT_CHART: &str = "engagement_comparison.svg";
pub const FUNNEL_CHART: &str = "funnel_comparison.svg";
pub const RETENTION_CHART: &str = "retention_curves.svg";

const SIZE: (u32, u32) = (1200, 720);
const CONTROL_COLOR: RGBColor = RGBColor(0x34, 0x98, 0xdb);
const TREATMENT_COLOR: RGBColor = RGBColor(0x2e, 0xcc, 0x71);

#[derive(Error, Debug)]
pub enum PlotError {
    #[error("Failed to create drawing area: {0}")]
    DrawingArea(String),

    #[error("Failed to configure chart: {0}")]
    ChartConfig(String),

    #[error("Failed to draw chart elements: {0}")]
    Drawing(String),

    #[error("Failed to create output directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing data: {0}")]
    MissingData(&'static str),
}

type Result<T> = core::result::Result<T, PlotError>;

fn variant_color(variant: Variant) -> RGBColor {
    match variant {
        Variant::Control => CONTROL_COLOR,
        Variant::Treatment => TREATMENT_COLOR,
    }
}

/// Renders all three charts into `dir` and returns their paths.
pub fn render_all(dir: &Path, analysis: &Analysis) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let paths = vec![
        dir.join(ENGAGEMENT_CHART),
        dir.join(FUNNEL_CHART),
        dir.join(RETENTION_CHART),
    ];
    engagement_chart(analysis, &paths[0])?;
    funnel_chart(analysis, &paths[1])?;
    retention_chart(analysis, &paths[2])?;

    info!(dir = %dir.display(), charts = paths.len(), "Rendered charts");
    Ok(paths)
}

/// Bar chart of engagement rate per variant, annotated with the lift.
pub fn engagement_chart(analysis: &Analysis, output_path: &Path) -> Result<()> {
    let engagement = &analysis.engagement;
    let bars = [
        (Variant::Control, engagement.control.rate * 100.0),
        (Variant::Treatment, engagement.treatment.rate * 100.0),
    ];
    let y_max = bars.iter().map(|(_, y)| *y).fold(1.0, f64::max) * 1.25;

    let root = SVGBackend::new(output_path, SIZE).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| PlotError::DrawingArea(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("A/B Test: User Engagement Rate by Variant", ("sans-serif", 32))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(80)
        .build_cartesian_2d(-0.5f64..1.5f64, 0f64..y_max)
        .map_err(|e| PlotError::ChartConfig(e.to_string()))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(3)
        .y_desc("Engagement Rate (%)")
        .x_label_formatter(&|x| category_label(*x, &["Control", "Treatment"]))
        .label_style(("sans-serif", 20))
        .draw()
        .map_err(|e| PlotError::Drawing(e.to_string()))?;

    chart
        .draw_series(bars.iter().enumerate().map(|(i, (variant, rate))| {
            let x = i as f64;
            Rectangle::new(
                [(x - 0.3, 0.0), (x + 0.3, *rate)],
                variant_color(*variant).mix(0.8).filled(),
            )
        }))
        .map_err(|e| PlotError::Drawing(e.to_string()))?;

    let value_style = ("sans-serif", 22)
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Center, VPos::Bottom));
    chart
        .draw_series(bars.iter().enumerate().map(|(i, (_, rate))| {
            Text::new(format!("{rate:.2}%"), (i as f64, *rate), value_style.clone())
        }))
        .map_err(|e| PlotError::Drawing(e.to_string()))?;

    let lift = engagement
        .relative_lift
        .map_or_else(|| "n/a".to_string(), |l| format!("{:+.1}%", l * 100.0));
    let p_value = format_p_value(engagement.test.p_value);
    chart
        .draw_series(std::iter::once(Text::new(
            format!("Lift: {lift} ({p_value})"),
            (0.5, y_max * 0.95),
            ("sans-serif", 22)
                .into_font()
                .color(&BLACK)
                .pos(Pos::new(HPos::Center, VPos::Top)),
        )))
        .map_err(|e| PlotError::Drawing(e.to_string()))?;

    root.present()
        .map_err(|e| PlotError::Drawing(e.to_string()))?;
    Ok(())
}

/// Grouped bar chart of users reaching each funnel stage.
pub fn funnel_chart(analysis: &Analysis, output_path: &Path) -> Result<()> {
    let stage_count = Stage::ALL.len();
    let y_max = analysis
        .funnels
        .iter()
        .flat_map(|f| f.steps.iter().map(|s| s.users as f64))
        .fold(1.0, f64::max)
        * 1.15;
    let labels: Vec<&str> = Stage::ALL.iter().map(|s| s.title()).collect();

    let root = SVGBackend::new(output_path, SIZE).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| PlotError::DrawingArea(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Funnel Analysis: User Journey by Variant", ("sans-serif", 32))
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(80)
        .build_cartesian_2d(
            -0.5f64..stage_count as f64 - 0.5,
            0f64..y_max,
        )
        .map_err(|e| PlotError::ChartConfig(e.to_string()))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(stage_count + 1)
        .x_desc("Funnel Stage")
        .y_desc("Number of Users")
        .x_label_formatter(&|x| category_label(*x, &labels))
        .label_style(("sans-serif", 18))
        .draw()
        .map_err(|e| PlotError::Drawing(e.to_string()))?;

    const WIDTH: f64 = 0.35;
    for funnel in &analysis.funnels {
        let color = variant_color(funnel.variant);
        let offset = match funnel.variant {
            Variant::Control => -WIDTH,
            Variant::Treatment => 0.0,
        };
        chart
            .draw_series(funnel.steps.iter().map(|step| {
                let x = step.stage.index() as f64 + offset;
                Rectangle::new(
                    [(x, 0.0), (x + WIDTH, step.users as f64)],
                    color.mix(0.8).filled(),
                )
            }))
            .map_err(|e| PlotError::Drawing(e.to_string()))?
            .label(funnel.variant.title())
            .legend(move |(x, y)| Rectangle::new([(x, y - 6), (x + 14, y + 6)], color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .label_font(("sans-serif", 18))
        .draw()
        .map_err(|e| PlotError::Drawing(e.to_string()))?;

    root.present()
        .map_err(|e| PlotError::Drawing(e.to_string()))?;
    Ok(())
}

/// Line chart of mean cohort retention per week after signup.
pub fn retention_chart(analysis: &Analysis, output_path: &Path) -> Result<()> {
    let weeks = analysis
        .retention
        .iter()
        .map(|c| c.rates.len())
        .max()
        .filter(|w| *w > 0)
        .ok_or(PlotError::MissingData("retention curves are empty"))?;
    let y_max = analysis
        .retention
        .iter()
        .flat_map(|c| c.rates.iter().map(|r| r * 100.0))
        .fold(1.0, f64::max)
        * 1.2;
    let x_max = (weeks - 1).max(1) as f64;

    let root = SVGBackend::new(output_path, SIZE).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| PlotError::DrawingArea(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            "Cohort Retention Analysis: User Retention Over Time",
            ("sans-serif", 32),
        )
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(80)
        .build_cartesian_2d(0f64..x_max, 0f64..y_max)
        .map_err(|e| PlotError::ChartConfig(e.to_string()))?;

    chart
        .configure_mesh()
        .x_desc("Weeks After Signup")
        .y_desc("Retention Rate (%)")
        .x_labels(weeks)
        .x_label_formatter(&|x| format!("{:.0}", x))
        .label_style(("sans-serif", 18))
        .draw()
        .map_err(|e| PlotError::Drawing(e.to_string()))?;

    for curve in &analysis.retention {
        let color = variant_color(curve.variant);
        let points: Vec<(f64, f64)> = curve
            .rates
            .iter()
            .enumerate()
            .map(|(week, rate)| (week as f64, rate * 100.0))
            .collect();

        chart
            .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(3)))
            .map_err(|e| PlotError::Drawing(e.to_string()))?
            .label(curve.variant.title())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(3)));

        chart
            .draw_series(points.iter().map(|&point| Circle::new(point, 5, color.filled())))
            .map_err(|e| PlotError::Drawing(e.to_string()))?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .label_font(("sans-serif", 18))
        .draw()
        .map_err(|e| PlotError::Drawing(e.to_string()))?;

    root.present()
        .map_err(|e| PlotError::Drawing(e.to_string()))?;
    Ok(())
}

/// Maps an integral axis position to its category name.
fn category_label(x: f64, labels: &[&str]) -> String {
    let index = x.round();
    if (x - index).abs() > 1e-6 || index < 0.0 {
        return String::new();
    }
    labels
        .get(index as usize)
        .map(|s| s.to_string())
        .unwrap_or_default()
}
