use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod analysis;
mod config;
mod generator;
mod models;
mod plots;
mod report;
mod stats;
mod store;

use config::{AnalysisConfig, GeneratorConfig};

#[derive(Parser)]
#[command(name = "ab-funnel-sim")]
#[command(about = "Simulate and analyze an A/B test of mock interview competitions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate users, competitions and activity tables
    Generate {
        #[command(flatten)]
        data: DataArgs,
        #[command(flatten)]
        generator: GeneratorArgs,
    },
    /// Analyze previously generated tables
    Analyze {
        #[command(flatten)]
        data: DataArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Generate and analyze in one go
    Run {
        #[command(flatten)]
        data: DataArgs,
        #[command(flatten)]
        generator: GeneratorArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args)]
struct DataArgs {
    /// Directory holding users.csv, competitions.csv and user_activity.csv
    #[arg(long, env = "ABSIM_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,
}

#[derive(Args)]
struct GeneratorArgs {
    #[arg(long, env = "ABSIM_SEED", default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value_t = 5000)]
    users: u32,
    #[arg(long, default_value_t = 16)]
    competitions: u32,
}

impl GeneratorArgs {
    fn to_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            seed: self.seed,
            num_users: self.users,
            num_competitions: self.competitions,
            ..GeneratorConfig::default()
        }
    }
}

#[derive(Args)]
struct OutputArgs {
    #[arg(long, env = "ABSIM_REPORTS_DIR", default_value = "reports")]
    reports_dir: PathBuf,
    #[arg(long, env = "ABSIM_PLOTS_DIR", default_value = "visualizations")]
    plots_dir: PathBuf,
    /// Significance level for the two-proportion z-test
    #[arg(long, default_value_t = 0.05)]
    alpha: f64,
    /// Skip chart rendering
    #[arg(long)]
    no_plots: bool,
}

impl OutputArgs {
    fn to_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            alpha: self.alpha,
            ..AnalysisConfig::default()
        }
    }
}

fn run_generate(data_dir: &Path, config: &GeneratorConfig) -> anyhow::Result<()> {
    let dataset = generator::generate(config)?;
    store::write_dataset(data_dir, &dataset)?;

    println!("Generated {} users", dataset.users.len());
    println!("Generated {} competitions", dataset.competitions.len());
    println!("Generated {} activity records", dataset.activities.len());
    println!("Data saved to {}.", data_dir.display());
    Ok(())
}

fn run_analyze(
    data_dir: &Path,
    output: &OutputArgs,
    generator: Option<&GeneratorConfig>,
) -> anyhow::Result<()> {
    let dataset = store::load_dataset(data_dir)
        .with_context(|| format!("failed to load tables from {}", data_dir.display()))?;
    let config = output.to_config();
    let analysis = analysis::analyze(&dataset, &config)?;

    let overview = &analysis.overview;
    println!("Dataset overview:");
    println!("  Total users: {}", overview.total_users);
    println!("  Control group: {}", overview.control_users);
    println!("  Treatment group: {}", overview.treatment_users);
    println!("  Total activities: {}", overview.activities);
    println!();
    print!("{}", report::build_report(&analysis, &config));

    let (text, json) = report::write_reports(&output.reports_dir, &analysis, &config, generator)?;
    println!();
    println!("Report written to {} and {}.", text.display(), json.display());

    if !output.no_plots {
        let charts = plots::render_all(&output.plots_dir, &analysis)
            .context("failed to render charts")?;
        for chart in charts {
            println!("Saved chart {}.", chart.display());
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ab_funnel_sim=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate { data, generator } => {
            run_generate(&data.data_dir, &generator.to_config())?;
        }
        Commands::Analyze { data, output } => {
            run_analyze(&data.data_dir, &output, None)?;
        }
        Commands::Run {
            data,
            generator,
            output,
        } => {
            let config = generator.to_config();
            run_generate(&data.data_dir, &config)?;
            println!();
            run_analyze(&data.data_dir, &output, Some(&config))?;
        }
    }

    Ok(())
}
