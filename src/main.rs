use std::path::PathBuf;

use clap::Parser;
use log::{error, info};

use platemesh::{
    pipeline::{self, Artifacts, Backend},
    sweep::{self, SweepOptions},
    template, GeometryKernel, ModelConfig, Result,
};

/// Generates the tagged mesh of a deformed MEMS plate pair
#[derive(Parser, Debug)]
#[command(name = "platemesh", version, about)]
struct Cli {
    /// JSON geometry template
    template: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Parameter override, e.g. `overetch=0.2` or `coeff(3)=-0.1`
    #[arg(short = 's', long = "set", value_name = "NAME=VALUE")]
    overrides: Vec<String>,

    /// Sweep file with rows `name,min,max,num_points`
    #[arg(long)]
    sweep: Option<PathBuf>,

    /// Worker threads for sweeps
    #[arg(short, long, default_value_t = 1)]
    workers: usize,

    /// Mesher: `internal` or `gmsh`
    #[arg(long, default_value = "internal", value_parser = parse_backend)]
    backend: Backend,

    /// File stem of a single run's artifacts
    #[arg(long, default_value = "mesh")]
    name: String,

    /// Also write the `.geo` script
    #[arg(long)]
    geo: bool,

    /// Regenerate sweep samples whose mesh already exists
    #[arg(long)]
    force: bool,
}

fn parse_backend(value: &str) -> std::result::Result<Backend, String> {
    Backend::parse(value).ok_or_else(|| format!("unknown backend \"{value}\""))
}

fn run(cli: Cli) -> Result<()> {
    let mut config = ModelConfig::load(&cli.template)?;
    let overrides = cli
        .overrides
        .iter()
        .map(|o| template::parse_override(o))
        .collect::<Result<Vec<(String, f64)>>>()?;
    for (name, _) in &overrides {
        config.validate_override_name(name)?;
    }
    config.apply_overrides(&overrides)?;

    match &cli.sweep {
        Some(sweep_file) => {
            let axes = sweep::load_axes(sweep_file)?;
            let report = sweep::run_sweep(
                &config,
                &axes,
                &SweepOptions {
                    output_dir: cli.output_dir.clone(),
                    workers: cli.workers,
                    backend: cli.backend,
                    geo: cli.geo,
                    force: cli.force,
                },
            )?;
            for failure in &report.failures {
                error!(
                    "sample {} skipped ({}): {}",
                    failure.id, failure.kind, failure.reason
                );
            }
        }
        None => {
            std::fs::create_dir_all(&cli.output_dir)?;
            let mut kernel = GeometryKernel::new(config.length);
            let artifacts = Artifacts::in_dir(&cli.output_dir, &cli.name, cli.geo);
            let outcome = pipeline::run(&mut kernel, &config, cli.backend, &artifacts)?;
            info!(
                "{}: {} nodes, {} triangles, groups {}",
                artifacts.msh.display(),
                outcome.nodes,
                outcome.triangles,
                outcome.groups.join(", ")
            );
        }
    }

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        error!("{err}");
        std::process::exit(1);
    }
}
