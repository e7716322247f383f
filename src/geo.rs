//! Gmsh `.geo` export of the final geometry and the external Gmsh backend.
//!
//! The script describes the kernel state after subtraction: the resulting
//! surface already carries the plates as holes, so no boolean directive is
//! emitted and every handle matches the one used for physical groups.

use std::{io::Write, path::Path, process::Command};

use log::info;

use crate::{
    datatypes::{CurveKind, GroupMembers, PhysicalGroup},
    discretize::MeshDiscretizer,
    error::{PlatemeshError, Result},
    kernel::GeometryKernel,
};

fn join<T: ToString>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<String>>()
        .join(", ")
}

/// Writes a `.geo` script for the live entities of `kernel`
///
/// # Arguments
/// * `kernel` - The kernel holding the post-subtraction geometry
/// * `discretizer` - Element counts, written as transfinite curves
/// * `groups` - Physical groups to declare
/// * `out` - Destination of the script
pub fn write_geo<W: Write>(
    kernel: &GeometryKernel,
    discretizer: &MeshDiscretizer,
    groups: &[PhysicalGroup],
    out: &mut W,
) -> Result<()> {
    writeln!(out, "// Define points")?;
    for (id, point) in kernel.points() {
        match point.size_hint {
            Some(size) => writeln!(
                out,
                "Point({}) = {{{}, {}, {}, {}}};",
                id.0, point.position.x, point.position.y, point.z, size
            )?,
            None => writeln!(
                out,
                "Point({}) = {{{}, {}, {}}};",
                id.0, point.position.x, point.position.y, point.z
            )?,
        }
    }

    writeln!(out, "\n// Define curves")?;
    for (id, curve) in kernel.curves() {
        let points = join(curve.points.iter().map(|p| p.0));
        match (curve.kind, curve.center) {
            (CurveKind::Line, _) => writeln!(out, "Line({}) = {{{points}}};", id.0)?,
            (CurveKind::Spline, _) => writeln!(out, "Spline({}) = {{{points}}};", id.0)?,
            (CurveKind::Arc, Some(center)) => writeln!(
                out,
                "Circle({}) = {{{}, {}, {}}};",
                id.0,
                curve.start().0,
                center.0,
                curve.end().0
            )?,
            (CurveKind::Arc, None) => {
                return Err(PlatemeshError::GeometryDegenerate(format!(
                    "{id} has no arc center"
                )))
            }
        }
    }

    writeln!(out, "\n// Define loops")?;
    for (id, curve_loop) in kernel.loops() {
        let curves = join(curve_loop.curves.iter().map(|d| d.signed()));
        writeln!(out, "Curve Loop({}) = {{{curves}}};", id.0)?;
    }

    writeln!(out, "\n// Define surfaces")?;
    for (id, surface) in kernel.surfaces() {
        let loops = join(surface.loops().map(|l| l.0));
        writeln!(out, "Plane Surface({}) = {{{loops}}};", id.0)?;
    }

    writeln!(out, "\n// Structured discretization")?;
    for (curve, elements) in discretizer.counts() {
        writeln!(
            out,
            "Transfinite Curve {{{}}} = {} Using Progression 1;",
            curve.0,
            elements + 1
        )?;
    }

    writeln!(out, "\n// Physical groups")?;
    for group in groups {
        let (kind, members) = match &group.members {
            GroupMembers::Curves(c) => ("Curve", join(c.iter().map(|c| c.0))),
            GroupMembers::Surfaces(s) => ("Surface", join(s.iter().map(|s| s.0))),
        };
        writeln!(
            out,
            "Physical {kind}(\"{}\", {}) = {{{members}}};",
            group.name, group.tag
        )?;
    }

    writeln!(out, "\n// Define mesh settings")?;
    writeln!(out, "Mesh.ElementOrder = 1;")?;
    writeln!(out, "Mesh.MshFileVersion = 2.2;")?;

    Ok(())
}

pub fn save_geo(
    kernel: &GeometryKernel,
    discretizer: &MeshDiscretizer,
    groups: &[PhysicalGroup],
    path: &Path,
) -> Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    write_geo(kernel, discretizer, groups, &mut file)?;
    file.flush()?;
    info!("wrote {}", path.display());
    Ok(())
}

/// Runs Gmsh on a `.geo` script, producing an MSH 2.2 mesh
///
/// # Arguments
/// * `geo` - The script written by [`save_geo`]
/// * `msh` - The output filepath of the .msh file
pub fn run_gmsh(geo: &Path, msh: &Path) -> Result<()> {
    info!("running gmsh on {}", geo.display());
    let output = Command::new("gmsh")
        .arg(geo)
        .arg("-2")
        .arg("-format")
        .arg("msh22")
        .arg("-o")
        .arg(msh)
        .output()?;

    if !output.status.success() || !msh.exists() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PlatemeshError::MeshNonConvergence(format!(
            "gmsh failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        boolean, datatypes::DirectedCurve, discretize::StructuredPatch,
        tagger::PhysicalGroupTagger,
    };

    #[test]
    fn script_declares_every_entity_and_group() {
        let mut kernel = GeometryKernel::new(10.0);
        let c = kernel.add_point(0.0, 0.0).unwrap();
        let ring: Vec<_> = [(10.0, 0.0), (0.0, 10.0), (-10.0, 0.0), (0.0, -10.0)]
            .iter()
            .map(|&(x, y)| kernel.add_point(x, y).unwrap())
            .collect();
        let plate: Vec<_> = [(-2.0, 1.0), (2.0, 1.0), (2.0, 2.0), (-2.0, 2.0)]
            .iter()
            .map(|&(x, y)| kernel.add_point(x, y).unwrap())
            .collect();
        let arcs: Vec<_> = (0..4)
            .map(|i| kernel.add_arc(ring[i], c, ring[(i + 1) % 4]).unwrap())
            .collect();
        let bottom = kernel.add_line(plate[0], plate[1]).unwrap();
        let right = kernel.add_line(plate[1], plate[2]).unwrap();
        let top = kernel.add_spline(&[plate[3], plate[2]]).unwrap();
        let left = kernel.add_line(plate[0], plate[3]).unwrap();
        let far_loop = kernel
            .add_loop(&arcs.iter().map(|&a| DirectedCurve::forward(a)).collect::<Vec<_>>())
            .unwrap();
        let plate_loop = kernel
            .add_loop(&[
                DirectedCurve::forward(bottom),
                DirectedCurve::forward(right),
                DirectedCurve::reversed(top),
                DirectedCurve::reversed(left),
            ])
            .unwrap();
        let far = kernel.add_surface(far_loop, &[]).unwrap();
        let tool = kernel.add_surface(plate_loop, &[]).unwrap();
        let outcome = boolean::subtract(&mut kernel, far, &[tool]).unwrap();

        let mut discretizer = MeshDiscretizer::new(&mut kernel).unwrap();
        let plate_curves = outcome.remap.map_curves([bottom, right, top, left]).unwrap();
        for (curve, n) in plate_curves.iter().zip([8, 2, 8, 2]) {
            discretizer.set_count(&kernel, *curve, n).unwrap();
        }
        discretizer
            .add_patch(&kernel, StructuredPatch::from_curves(plate_curves))
            .unwrap();
        let mut tagger = PhysicalGroupTagger::new(&mut kernel).unwrap();
        tagger
            .add_curves(&kernel, "force_segment", 10, &plate_curves[..1])
            .unwrap();
        tagger
            .add_surfaces(&kernel, "space", 30, &outcome.surfaces)
            .unwrap();

        let mut buffer: Vec<u8> = Vec::new();
        write_geo(&kernel, &discretizer, tagger.groups(), &mut buffer).unwrap();
        let script = String::from_utf8(buffer).unwrap();

        assert!(script.contains("Point(1) = {0, 0, 0};"));
        assert!(script.contains("Circle(9) = {2, 1, 3};"));
        assert!(script.contains("Spline(15) = {9, 8};"));
        assert!(script.contains("Curve Loop(3) = {9, 10, 11, 12};"));
        assert!(script.contains("Curve Loop(4) = {13, 14, -15, -16};"));
        assert!(script.contains("Plane Surface(3) = {3, 4};"));
        assert!(script.contains("Transfinite Curve {13} = 9 Using Progression 1;"));
        assert!(script.contains("Physical Curve(\"force_segment\", 10) = {13};"));
        assert!(script.contains("Physical Surface(\"space\", 30) = {3};"));
        assert!(!script.contains("Line(5)"));
    }
}
