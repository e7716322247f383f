//! One ordered pipeline invocation for a single parameter vector.

use std::{
    f64::consts::FRAC_PI_2,
    path::{Path, PathBuf},
};

use log::{debug, info};

use crate::{
    boolean,
    boundary::{BoundaryCurveBuilder, PlateEdges},
    datatypes::{CurveId, Mesh, PhysicalGroup, SurfaceId},
    discretize::{MeshDiscretizer, StructuredPatch},
    error::{PlatemeshError, Result},
    geo,
    kernel::GeometryKernel,
    layout::{self, FarFieldKind, PlateGeometry, SizeHints},
    mesher,
    modes::DeformationModel,
    msh,
    tagger::PhysicalGroupTagger,
    template::ModelConfig,
};

/// How the mesh artifact is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Built-in constrained Delaunay mesher
    Internal,
    /// External `gmsh` binary fed with the exported `.geo` script
    Gmsh,
}

impl Backend {
    pub fn parse(value: &str) -> Option<Backend> {
        match value.trim() {
            "internal" => Some(Backend::Internal),
            "gmsh" => Some(Backend::Gmsh),
            _ => None,
        }
    }
}

/// Post-subtraction handles and constraints of one built model
#[derive(Debug, Clone)]
pub struct PlateModel {
    pub deformation: DeformationModel,
    /// Sampled edges of the moving plate
    pub upper_edges: PlateEdges,
    pub upper: [CurveId; 4],
    pub lower: [CurveId; 4],
    pub far_field: Vec<CurveId>,
    pub domain: Vec<SurfaceId>,
    pub discretizer: MeshDiscretizer,
    pub groups: Vec<PhysicalGroup>,
}

/// Where a run writes its artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub msh: PathBuf,
    pub geo: Option<PathBuf>,
}

impl Artifacts {
    /// `<dir>/<name>.msh`, plus `<dir>/<name>.geo` when `geo` is set
    pub fn in_dir(dir: &Path, name: &str, geo: bool) -> Artifacts {
        Artifacts {
            msh: dir.join(format!("{name}.msh")),
            geo: geo.then(|| dir.join(format!("{name}.geo"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub nodes: usize,
    pub triangles: usize,
    pub groups: Vec<String>,
    /// The generated mesh, kept for the internal backend only
    pub mesh: Option<Mesh>,
}

fn size_hints(config: &ModelConfig, geometry: &PlateGeometry) -> SizeHints {
    let extent = 0.5 * geometry.length + config.far_field.margin;
    let side = match config.far_field.kind {
        FarFieldKind::Circle => extent * FRAC_PI_2,
        FarFieldKind::Box => 2.0 * extent,
    };
    SizeHints {
        plate: geometry.length / config.long_edge_elements() as f64,
        far_field: side / config.far_field.elements.max(1) as f64,
    }
}

/// Builds, subtracts, constrains and tags the plate-pair domain
///
/// # Arguments
/// * `kernel` - A freshly created or reset kernel
/// * `config` - The parameter vector of this invocation
///
/// # Returns
/// The post-subtraction handles, element counts and physical groups
pub fn build_model(kernel: &mut GeometryKernel, config: &ModelConfig) -> Result<PlateModel> {
    if !kernel.is_pristine() {
        return Err(PlatemeshError::Pipeline(
            "kernel must be reset before a new invocation".to_owned(),
        ));
    }
    config.check_parameters()?;
    let geometry = PlateGeometry::new(
        config.length,
        config.thickness,
        config.overetch,
        config.distance,
    )?;
    kernel.set_characteristic_length(config.length)?;

    let deformation = DeformationModel::new(
        config.length,
        &config.coeff,
        &config.beta,
        config.n,
        config.offset,
    )?;
    let end_model = match &config.end_modes {
        Some(end) => Some(DeformationModel::new(
            end.length,
            &end.coeff,
            &end.beta,
            end.coeff.len(),
            0.0,
        )?),
        None => None,
    };

    let builder = BoundaryCurveBuilder::new(
        &deformation,
        end_model.as_ref(),
        config.policy,
        config.nx,
        config.ny,
    )?;
    let (xmin, xmax) = geometry.span();
    let (upper_bottom, upper_top) = geometry.upper();
    let (lower_bottom, lower_top) = geometry.lower();
    let upper_edges = builder.plate(xmin, xmax, upper_bottom, upper_top)?;
    let lower_edges = PlateEdges::rectangle(xmin, xmax, lower_bottom, lower_top);
    debug!(
        "plate geometry: length {}, thickness {}, gap {}",
        geometry.length, geometry.thickness, geometry.gap
    );

    let layout = layout::build(
        kernel,
        &upper_edges,
        &lower_edges,
        &config.far_field,
        size_hints(config, &geometry),
    )?;

    let outcome = boolean::subtract(
        kernel,
        layout.far_field.surface,
        &[layout.upper.surface, layout.lower.surface],
    )?;
    let upper = outcome.remap.map_curves(layout.upper.curves())?;
    let lower = outcome.remap.map_curves(layout.lower.curves())?;
    let far_field = layout
        .far_field
        .curves
        .iter()
        .map(|&c| outcome.remap.curve(c))
        .collect::<Result<Vec<CurveId>>>()?;

    let mut discretizer = MeshDiscretizer::new(kernel)?;
    let (long, short) = (config.long_edge_elements(), config.short_edge_elements());
    for plate in [upper, lower] {
        for (curve, elements) in plate.iter().zip([long, short, long, short]) {
            discretizer.set_count(kernel, *curve, elements)?;
        }
        discretizer.add_patch(kernel, StructuredPatch::from_curves(plate))?;
    }
    for &curve in &far_field {
        discretizer.set_count(kernel, curve, config.far_field.elements)?;
    }
    discretizer.validate()?;

    let tags = &config.tags;
    let mut tagger = PhysicalGroupTagger::new(kernel)?;
    tagger.add_curves(kernel, "force_segment", tags.force_segment, &upper[..1])?;
    tagger.add_curves(kernel, "upper_plate", tags.upper_plate, &upper)?;
    tagger.add_curves(kernel, "lower_plate", tags.lower_plate, &lower)?;
    tagger.add_curves(kernel, "boundary", tags.boundary, &far_field)?;
    tagger.add_surfaces(kernel, "space", tags.space, &outcome.surfaces)?;

    info!(
        "built model with {} curves and {} domain surface(s)",
        kernel.curves().count(),
        outcome.surfaces.len()
    );

    Ok(PlateModel {
        deformation,
        upper_edges,
        upper,
        lower,
        far_field,
        domain: outcome.surfaces,
        discretizer,
        groups: tagger.finish(),
    })
}

/// Builds the model and meshes it with the internal backend, without I/O
pub fn mesh_model(kernel: &mut GeometryKernel, config: &ModelConfig) -> Result<(PlateModel, Mesh)> {
    let model = build_model(kernel, config)?;
    let mesh = mesher::generate(kernel, &model.discretizer, model.groups.clone(), &config.mesh)?;
    Ok((model, mesh))
}

/// Runs the whole pipeline and writes its artifacts
///
/// # Arguments
/// * `kernel` - A freshly created or reset kernel
/// * `config` - The parameter vector of this invocation
/// * `backend` - The mesher producing the `.msh` artifact
/// * `artifacts` - Output paths
///
/// # Returns
/// Node and triangle counts and the physical group names of the artifact
pub fn run(
    kernel: &mut GeometryKernel,
    config: &ModelConfig,
    backend: Backend,
    artifacts: &Artifacts,
) -> Result<RunOutcome> {
    match backend {
        Backend::Internal => {
            let model = build_model(kernel, config)?;
            if let Some(geo_path) = &artifacts.geo {
                geo::save_geo(kernel, &model.discretizer, &model.groups, geo_path)?;
            }
            let mesh = mesher::generate(kernel, &model.discretizer, model.groups, &config.mesh)?;
            msh::save_msh(&mesh, &artifacts.msh)?;

            Ok(RunOutcome {
                nodes: mesh.nodes.len(),
                triangles: mesh.elements.len(),
                groups: mesh.groups.iter().map(|g| g.name.clone()).collect(),
                mesh: Some(mesh),
            })
        }
        Backend::Gmsh => {
            let model = build_model(kernel, config)?;
            let geo_path = artifacts
                .geo
                .clone()
                .unwrap_or_else(|| artifacts.msh.with_extension("geo"));
            geo::save_geo(kernel, &model.discretizer, &model.groups, &geo_path)?;
            geo::run_gmsh(&geo_path, &artifacts.msh)?;

            let produced = msh::read_msh(&artifacts.msh)?;
            Ok(RunOutcome {
                nodes: produced.nodes.len(),
                triangles: produced.count(msh::TRIANGLE),
                groups: produced
                    .physical_names
                    .iter()
                    .map(|p| p.name.clone())
                    .collect(),
                mesh: None,
            })
        }
    }
}
