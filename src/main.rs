//! lemonflow CLI

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;

use lemonflow::flows::{self, ASICFLOW, VERILATOR_SIM};
use lemonflow::simulate::DEFAULT_FIRMWARE;
use lemonflow::{
    firmware_plusarg, FixSuggestion, LemonError, Orchestrator, Project, SimulationRunner,
    SynthesisBuild, TestMatrix, ToolRegistry,
};

#[derive(Parser)]
#[command(name = "lemonflow")]
#[command(about = "Build and verification flows for the lemoncore RISC-V core")]
#[command(version)]
struct Cli {
    /// Project manifest (default: ./lemonflow.yaml if present, else built-in lemoncore)
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write the run event log as JSON
    #[arg(long, global = true)]
    events: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and run the per-module unit tests
    Test {
        /// Only run these modules (repeatable)
        #[arg(short, long = "module")]
        modules: Vec<String>,

        /// Modules built in parallel
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,
    },

    /// Build the full-core simulator and run a firmware image
    Sim {
        #[arg(default_value = DEFAULT_FIRMWARE)]
        firmware: String,

        /// Pass the argument to the simulator as-is instead of +firmware+<path>
        #[arg(long)]
        raw: bool,
    },

    /// Run synthesis and physical design
    Synth {
        /// Target profile
        #[arg(long)]
        target: Option<String>,

        /// Clock period in ns
        #[arg(long)]
        clock_period: Option<f64>,
    },

    /// Check the project manifest and print the standard flows
    Validate,

    /// Print the step order of a flow
    Plan {
        #[arg(long, default_value = VERILATOR_SIM)]
        flow: String,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Test { modules, jobs } => run_tests(cli.project.as_deref(), cli.events.as_deref(), &modules, jobs).await,
        Commands::Sim { firmware, raw } => run_sim(cli.project.as_deref(), cli.events.as_deref(), &firmware, raw).await,
        Commands::Synth {
            target,
            clock_period,
        } => run_synth(cli.project.as_deref(), cli.events.as_deref(), target, clock_period).await,
        Commands::Validate => validate(cli.project.as_deref()),
        Commands::Plan { flow } => plan(&flow),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if let Some(suggestion) = e.fix_suggestion() {
                eprintln!("  {} {}", "Fix:".yellow(), suggestion);
            }
            std::process::exit(1);
        }
    }
}

fn load_project(path: Option<&Path>) -> Result<Project, LemonError> {
    Project::discover(path)?.with_env()
}

fn orchestrator(project: &Project) -> Orchestrator {
    Orchestrator::new(ToolRegistry::new(project.tools.clone()), project.build_dir())
}

fn write_events(path: Option<&Path>, events: Value) -> Result<(), LemonError> {
    if let Some(path) = path {
        let text = serde_json::to_string_pretty(&events).map_err(|e| LemonError::Config {
            reason: format!("cannot serialize events: {}", e),
        })?;
        std::fs::write(path, text)?;
    }
    Ok(())
}

async fn run_tests(
    project_path: Option<&Path>,
    events: Option<&Path>,
    modules: &[String],
    jobs: usize,
) -> Result<i32, LemonError> {
    let project = load_project(project_path)?;
    println!(
        "{} Testing {} | jobs: {}",
        "→".cyan(),
        project.design.cyan().bold(),
        jobs.max(1)
    );

    let matrix = TestMatrix::new(orchestrator(&project), project).jobs(jobs);
    let report = matrix.run(modules).await?;

    for m in &report.modules {
        let symbol = if m.outcome.is_pass() {
            "✓".green()
        } else {
            "✗".red()
        };
        println!(
            "  {} {} {}",
            symbol,
            m.module,
            format!("({:.1}s)", m.duration.as_secs_f32()).dimmed()
        );
        if let Some(detail) = m.outcome.detail() {
            println!("      {} {}: {}", "Error:".red(), m.outcome.label(), detail);
        }
    }

    let total = report.modules.len();
    let passed = report.passed_count();
    let line = format!("{}/{} modules passed", passed, total);
    if report.all_passed() {
        println!("{}", line.green().bold());
    } else {
        println!("{}", line.red().bold());
    }

    let dump: serde_json::Map<String, Value> = report
        .modules
        .iter()
        .map(|m| (m.module.clone(), m.events.to_json()))
        .collect();
    write_events(events, Value::Object(dump))?;

    Ok(if report.all_passed() { 0 } else { 1 })
}

async fn run_sim(
    project_path: Option<&Path>,
    events: Option<&Path>,
    firmware: &str,
    raw: bool,
) -> Result<i32, LemonError> {
    let project = load_project(project_path)?;
    let arg = if raw {
        firmware.to_string()
    } else {
        firmware_plusarg(Path::new(firmware))
    };

    let runner = SimulationRunner::new(orchestrator(&project), project);
    let build = runner.build().await?;
    write_events(events, build.events.to_json())?;

    println!("{} Simulating with {}", "→".cyan(), arg.cyan());
    let outcome = runner.launch(build, &arg).await?;
    Ok(outcome.status.code().unwrap_or(1))
}

async fn run_synth(
    project_path: Option<&Path>,
    events: Option<&Path>,
    target: Option<String>,
    clock_period: Option<f64>,
) -> Result<i32, LemonError> {
    let project = load_project(project_path)?;
    let mut build = SynthesisBuild::new(orchestrator(&project), project);
    if let Some(target) = target {
        build = build.target(target);
    }
    if let Some(ns) = clock_period {
        build = build.clock_period(ns);
    }
    build.settings().validate()?;

    println!(
        "{} Synthesizing for {} @ {} ns",
        "→".cyan(),
        build.settings().target.cyan().bold(),
        build.settings().clock_period_ns
    );
    let result = build.run().await?;
    write_events(events, result.events.to_json())?;

    println!("{}", result.summary());
    if let Some(failure) = &result.failed_step {
        println!("{} {}", "Error:".red(), failure);
        return Ok(1);
    }
    Ok(0)
}

fn validate(project_path: Option<&Path>) -> Result<i32, LemonError> {
    let project = load_project(project_path)?;
    project.validate()?;

    // Build every job so naming and input problems surface here
    let matrix = TestMatrix::new(orchestrator(&project), project.clone());
    for module in matrix.select(&[])? {
        matrix.job_for(&module)?;
    }
    SimulationRunner::new(orchestrator(&project), project.clone()).job()?;
    SynthesisBuild::new(orchestrator(&project), project.clone()).job()?;
    flows::verilator_sim_config(&project)?;
    flows::asicflow_config(&project)?;

    println!("{} Project '{}' is valid", "✓".green(), project.design);
    let sources = project.verilog_sources()?;
    println!("  Verilog sources: {}", sources.len());
    for missing in sources.iter().filter(|p| !p.exists()) {
        println!("    {} missing {}", "!".yellow(), missing.display());
    }
    println!("  Modules: {}", project.module_names().join(", "));
    println!("  Build dir: {}", project.build_dir().display());
    for name in [VERILATOR_SIM, ASICFLOW] {
        let graph = flows::by_name(name)?;
        let order: Vec<String> = graph.topological_order().iter().map(|s| s.to_string()).collect();
        println!("  Flow {}: {}", name.cyan(), order.join(" -> "));
    }
    Ok(0)
}

fn plan(flow: &str) -> Result<i32, LemonError> {
    let graph = flows::by_name(flow)?;
    println!("{} {}", "Flow".cyan(), graph.name().cyan().bold());
    for (i, step) in graph.topological_order().iter().enumerate() {
        let deps = graph.get_dependencies(step);
        let after = if deps.is_empty() {
            String::new()
        } else {
            let names: Vec<&str> = deps.iter().map(|d| d.as_ref()).collect();
            format!(" (after {})", names.join(", ")).dimmed().to_string()
        };
        println!(
            "  {}. {} [{}]{}",
            i + 1,
            step,
            graph.tool(step).unwrap_or("?"),
            after
        );
    }
    Ok(0)
}
