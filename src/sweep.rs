//! Parameter sweeps over a worker pool.
//!
//! Each worker owns one [`GeometryKernel`] and resets it before every
//! sample. Sample-local failures are recorded and never stop sibling
//! samples; fatal errors abort the sweep.
//!
//! The output directory holds `parameters.csv`, which maps every sample id
//! to its parameter values, and `msh/<id>.msh`. Samples whose mesh is
//! already present are skipped unless regeneration is forced.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use indicatif::ProgressBar;
use log::{info, warn};
use rayon::prelude::*;

use crate::{
    error::{PlatemeshError, Result},
    kernel::GeometryKernel,
    pipeline::{self, Artifacts, Backend, RunOutcome},
    template::ModelConfig,
};

/// One row of the sweep file
#[derive(Debug, Clone, PartialEq)]
pub struct SweepAxis {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub num_points: usize,
}

impl SweepAxis {
    /// Evenly spaced values, both ends included
    pub fn values(&self) -> Vec<f64> {
        if self.num_points == 1 {
            return vec![self.min];
        }
        let step = (self.max - self.min) / (self.num_points - 1) as f64;
        let mut values: Vec<f64> = (0..self.num_points)
            .map(|i| self.min + i as f64 * step)
            .collect();
        values[self.num_points - 1] = self.max;
        values
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: usize,
    pub parameters: Vec<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleFailure {
    pub id: usize,
    pub parameters: Vec<(String, f64)>,
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub succeeded: usize,
    /// Samples left alone because their mesh already existed
    pub skipped: usize,
    pub failures: Vec<SampleFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepOptions {
    pub output_dir: PathBuf,
    pub workers: usize,
    pub backend: Backend,
    pub geo: bool,
    /// Regenerate samples whose mesh already exists
    pub force: bool,
}

/// Sample id to parameter table written next to the meshes
pub const MANIFEST: &str = "parameters.csv";

impl SweepOptions {
    fn msh_path(&self, id: usize) -> PathBuf {
        self.output_dir.join("msh").join(format!("{id}.msh"))
    }
}

fn format_parameters(parameters: &[(String, f64)]) -> String {
    parameters
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<String>>()
        .join(", ")
}

/// Parses a sweep file with the header `name,min,max,num_points`
///
/// # Arguments
/// * `contents` - The text of the csv file
///
/// # Returns
/// One axis per data row, in file order
pub fn parse_axes(contents: &str) -> Result<Vec<SweepAxis>> {
    let mut headers: Vec<&str> = Vec::new();
    let mut axes: Vec<SweepAxis> = Vec::new();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if headers.is_empty() {
            headers = line.split(',').map(|x| x.trim()).collect();
            if headers != ["name", "min", "max", "num_points"] {
                return Err(PlatemeshError::Template(format!(
                    "sweep header must be name,min,max,num_points, got \"{line}\""
                )));
            }
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(|x| x.trim()).collect();
        if fields.len() != headers.len() {
            return Err(PlatemeshError::Template(format!(
                "sweep row \"{line}\" has {} fields, expected {}",
                fields.len(),
                headers.len()
            )));
        }
        let bad_row = || PlatemeshError::Template(format!("non-numeric value in sweep row \"{line}\""));
        let min: f64 = fields[1].parse().map_err(|_| bad_row())?;
        let max: f64 = fields[2].parse().map_err(|_| bad_row())?;
        let num_points: usize = fields[3].parse().map_err(|_| bad_row())?;
        if num_points == 0 || !min.is_finite() || !max.is_finite() {
            return Err(PlatemeshError::Template(format!(
                "sweep row \"{line}\" needs finite bounds and at least one point"
            )));
        }

        axes.push(SweepAxis {
            name: fields[0].to_owned(),
            min,
            max,
            num_points,
        });
    }

    Ok(axes)
}

pub fn load_axes(path: &Path) -> Result<Vec<SweepAxis>> {
    let contents = std::fs::read_to_string(path).map_err(|err| {
        PlatemeshError::Template(format!("Unable to open sweep file {}: {err}", path.display()))
    })?;
    parse_axes(&contents)
}

/// Cartesian product of all axes, last axis varying fastest, numbered from 1
pub fn samples(axes: &[SweepAxis]) -> Vec<Sample> {
    let mut combos: Vec<Vec<(String, f64)>> = vec![Vec::new()];
    for axis in axes {
        let values = axis.values();
        combos = combos
            .into_iter()
            .flat_map(|prefix| {
                values.iter().map(move |&v| {
                    let mut next = prefix.clone();
                    next.push((axis.name.clone(), v));
                    next
                })
            })
            .collect();
    }

    combos
        .into_iter()
        .enumerate()
        .map(|(i, parameters)| Sample { id: i + 1, parameters })
        .collect()
}

/// Writes the `ID,<axis names>` table with one row per sample
fn write_manifest(path: &Path, axes: &[SweepAxis], samples: &[Sample]) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    let names: Vec<&str> = axes.iter().map(|a| a.name.as_str()).collect();
    writeln!(file, "ID,{}", names.join(","))?;
    for sample in samples {
        let values: Vec<String> = sample
            .parameters
            .iter()
            .map(|(_, value)| value.to_string())
            .collect();
        writeln!(file, "{},{}", sample.id, values.join(","))?;
    }
    Ok(())
}

fn run_sample(
    kernel: &mut GeometryKernel,
    base: &ModelConfig,
    sample: &Sample,
    options: &SweepOptions,
) -> Result<RunOutcome> {
    kernel.reset();
    let mut config = base.clone();
    config.apply_overrides(&sample.parameters)?;

    let artifacts = Artifacts {
        msh: options.msh_path(sample.id),
        geo: options
            .geo
            .then(|| options.output_dir.join("geo").join(format!("{}.geo", sample.id))),
    };
    pipeline::run(kernel, &config, options.backend, &artifacts)
}

/// Runs the pipeline once per sample of the sweep
///
/// # Arguments
/// * `base` - The template configuration every sample starts from
/// * `axes` - The swept parameters
/// * `options` - Output directory, worker count, backend and regeneration
///
/// # Returns
/// The number of successful and skipped samples and every recorded failure
pub fn run_sweep(
    base: &ModelConfig,
    axes: &[SweepAxis],
    options: &SweepOptions,
) -> Result<SweepReport> {
    for axis in axes {
        base.validate_override_name(&axis.name)?;
    }
    let samples = samples(axes);

    std::fs::create_dir_all(options.output_dir.join("msh"))?;
    if options.geo {
        std::fs::create_dir_all(options.output_dir.join("geo"))?;
    }
    write_manifest(&options.output_dir.join(MANIFEST), axes, &samples)?;

    let (pending, done): (Vec<&Sample>, Vec<&Sample>) = samples
        .iter()
        .partition(|sample| options.force || !options.msh_path(sample.id).exists());
    if !done.is_empty() {
        info!(
            "skipping {} of {} samples whose mesh already exists",
            done.len(),
            samples.len()
        );
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .build()
        .map_err(|err| PlatemeshError::Pipeline(format!("unable to start workers: {err}")))?;
    info!(
        "running {} samples on {} workers",
        pending.len(),
        pool.current_num_threads()
    );

    let aborted = AtomicBool::new(false);
    let progress_bar = ProgressBar::new(pending.len() as u64);
    let results: Vec<(&Sample, Result<RunOutcome>)> = pool.install(|| {
        pending
            .par_iter()
            .copied()
            .map_init(
                || GeometryKernel::new(base.length),
                |kernel, sample| {
                    if aborted.load(Ordering::Relaxed) {
                        return None;
                    }
                    let result = run_sample(kernel, base, sample, options);
                    if matches!(&result, Err(err) if err.is_fatal()) {
                        aborted.store(true, Ordering::Relaxed);
                    }
                    progress_bar.inc(1);
                    Some((sample, result))
                },
            )
            .flatten()
            .collect()
    });

    let mut report = SweepReport {
        skipped: done.len(),
        ..SweepReport::default()
    };
    for (sample, result) in results {
        match result {
            Ok(_) => report.succeeded += 1,
            Err(err) if err.is_fatal() => {
                progress_bar.abandon_with_message("sweep aborted");
                return Err(err);
            }
            Err(err) => {
                warn!(
                    "sample {} ({}) failed with {}: {err}",
                    sample.id,
                    format_parameters(&sample.parameters),
                    err.kind()
                );
                report.failures.push(SampleFailure {
                    id: sample.id,
                    parameters: sample.parameters.clone(),
                    kind: err.kind(),
                    reason: err.to_string(),
                });
            }
        }
    }

    progress_bar.finish_with_message("sweep complete");
    info!(
        "{} samples succeeded, {} failed, {} skipped",
        report.succeeded,
        report.failures.len(),
        report.skipped
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axes_parse_and_expand_last_row_fastest() {
        let axes = parse_axes("name,min,max,num_points\noveretch,0.1,0.2,2\ncoeff(1),-0.1,0.1,3\n")
            .unwrap();
        assert_eq!(axes.len(), 2);
        assert_eq!(axes[1].values(), vec![-0.1, 0.0, 0.1]);

        let samples = samples(&axes);
        assert_eq!(samples.len(), 6);
        assert_eq!(samples[0].id, 1);
        assert_eq!(
            samples[1].parameters,
            vec![("overetch".to_owned(), 0.1), ("coeff(1)".to_owned(), 0.0)]
        );
        assert_eq!(samples[5].parameters[0], ("overetch".to_owned(), 0.2));
    }

    #[test]
    fn malformed_sweep_files_are_template_errors() {
        for case in [
            "parameter,low,high,n\noveretch,0,1,2",
            "name,min,max,num_points\noveretch,0,1",
            "name,min,max,num_points\noveretch,zero,1,2",
            "name,min,max,num_points\noveretch,0,1,0",
        ] {
            assert!(matches!(parse_axes(case), Err(PlatemeshError::Template(_))));
        }
    }

    #[test]
    fn unknown_axis_aborts_before_any_sample() {
        let axes = vec![SweepAxis {
            name: "depth".to_owned(),
            min: 0.0,
            max: 1.0,
            num_points: 2,
        }];
        let options = SweepOptions {
            output_dir: std::env::temp_dir().join("platemesh-sweep-unknown-axis"),
            workers: 1,
            backend: Backend::Internal,
            geo: false,
            force: false,
        };
        assert!(matches!(
            run_sweep(&ModelConfig::default(), &axes, &options),
            Err(PlatemeshError::Template(_))
        ));
        assert!(!options.output_dir.exists());
    }

    #[test]
    fn manifest_maps_ids_to_parameters() {
        let axes = parse_axes("name,min,max,num_points\noveretch,0.1,0.2,2\nr,1,1,1\n").unwrap();
        let path = std::env::temp_dir().join(format!(
            "platemesh-manifest-{}.csv",
            std::process::id()
        ));
        write_manifest(&path, &axes, &samples(&axes)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "ID,overetch,r\n1,0.1,1\n2,0.2,1\n");
        std::fs::remove_file(&path).unwrap();
    }
}
