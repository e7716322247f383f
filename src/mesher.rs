use std::collections::{BTreeMap, BTreeSet};

use log::info;
use nalgebra::Point2;

use crate::{
    datatypes::{
        CurveId, Element, GroupMembers, Mesh, Node, PhysicalGroup, PointId, Segment, SurfaceId,
    },
    discretize::MeshDiscretizer,
    error::{PlatemeshError, Result},
    kernel::{GeometryKernel, Stage},
    triangulation::{SizeField, Triangulation},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshOptions {
    /// Growth of the element size per unit distance from the boundary
    pub grading: f64,
    pub max_nodes: usize,
}

impl Default for MeshOptions {
    fn default() -> Self {
        MeshOptions {
            grading: 0.3,
            max_nodes: 200_000,
        }
    }
}

/// Returns the node shared by every curve ending at `point`
fn point_node(
    kernel: &GeometryKernel,
    mesh: &mut Mesh,
    point_nodes: &mut BTreeMap<PointId, usize>,
    point: PointId,
) -> Result<usize> {
    if let Some(&node) = point_nodes.get(&point) {
        return Ok(node);
    }
    let position = kernel.point(point)?.position;
    mesh.nodes.push(Node {
        vertex: position.into(),
    });
    point_nodes.insert(point, mesh.nodes.len() - 1);
    Ok(mesh.nodes.len() - 1)
}

/// Splits a curve into its fixed number of segments
fn discretize_curve(
    kernel: &GeometryKernel,
    discretizer: &MeshDiscretizer,
    mesh: &mut Mesh,
    point_nodes: &mut BTreeMap<PointId, usize>,
    curve: CurveId,
) -> Result<Vec<usize>> {
    let count = discretizer.count(curve).ok_or_else(|| {
        PlatemeshError::MeshNonConvergence(format!("{curve} has no element count"))
    })?;
    let samples = kernel.sample_curve(curve, count)?;
    let (start, end) = {
        let c = kernel.curve(curve)?;
        (c.start(), c.end())
    };

    let mut nodes = Vec::with_capacity(count + 1);
    nodes.push(point_node(kernel, mesh, point_nodes, start)?);
    for sample in &samples[1..count] {
        mesh.nodes.push(Node {
            vertex: (*sample).into(),
        });
        nodes.push(mesh.nodes.len() - 1);
    }
    nodes.push(point_node(kernel, mesh, point_nodes, end)?);

    for pair in nodes.windows(2) {
        mesh.segments.push(Segment {
            nodes: [pair[0], pair[1]],
            curve,
        });
    }

    Ok(nodes)
}

/// Node ring of every loop of a surface, outer loop first
fn surface_rings(
    kernel: &GeometryKernel,
    surface: SurfaceId,
    curve_nodes: &BTreeMap<CurveId, Vec<usize>>,
) -> Result<Vec<Vec<usize>>> {
    let mut rings = Vec::new();

    for loop_id in kernel.surface(surface)?.loops() {
        let mut ring: Vec<usize> = Vec::new();
        for directed in &kernel.curve_loop(loop_id)?.curves {
            let mut nodes = curve_nodes
                .get(&directed.curve)
                .ok_or_else(|| {
                    PlatemeshError::MeshNonConvergence(format!(
                        "{} of {surface} was not discretized",
                        directed.curve
                    ))
                })?
                .clone();
            if directed.reversed {
                nodes.reverse();
            }
            let skip = usize::from(!ring.is_empty());
            ring.extend(nodes.into_iter().skip(skip));
        }

        if ring.len() < 2 || ring.first() != ring.last() {
            return Err(PlatemeshError::MeshNonConvergence(format!(
                "discretized {loop_id} of {surface} does not close"
            )));
        }
        ring.pop();
        rings.push(ring);
    }

    Ok(rings)
}

/// Generates the two-dimensional mesh of every live surface
///
/// # Arguments
/// * `kernel` - The kernel holding the post-subtraction geometry
/// * `discretizer` - Element counts for every boundary curve
/// * `groups` - Physical groups attached to the resulting mesh
/// * `options` - Size grading and node budget
///
/// # Returns
/// Nodes, boundary segments, counter-clockwise triangles and the groups
pub fn generate(
    kernel: &mut GeometryKernel,
    discretizer: &MeshDiscretizer,
    groups: Vec<PhysicalGroup>,
    options: &MeshOptions,
) -> Result<Mesh> {
    kernel.enter(Stage::MeshGenerate)?;
    discretizer.validate()?;
    discretizer.check_budget(options.max_nodes)?;

    let surfaces: Vec<SurfaceId> = kernel.surfaces().map(|(id, _)| *id).collect();
    if surfaces.is_empty() {
        return Err(PlatemeshError::MeshNonConvergence(
            "no surface left to mesh".to_owned(),
        ));
    }

    let mut curves: BTreeSet<CurveId> = BTreeSet::new();
    for &surface in &surfaces {
        for loop_id in kernel.surface(surface)?.loops() {
            curves.extend(kernel.curve_loop(loop_id)?.curves.iter().map(|d| d.curve));
        }
    }
    for group in &groups {
        if let GroupMembers::Curves(members) = &group.members {
            curves.extend(members.iter().copied());
        }
    }

    let mut mesh = Mesh::default();
    let mut point_nodes: BTreeMap<PointId, usize> = BTreeMap::new();
    let mut curve_nodes: BTreeMap<CurveId, Vec<usize>> = BTreeMap::new();
    for curve in curves {
        let nodes = discretize_curve(kernel, discretizer, &mut mesh, &mut point_nodes, curve)?;
        curve_nodes.insert(curve, nodes);
    }

    for &surface in &surfaces {
        let rings = surface_rings(kernel, surface, &curve_nodes)?;
        let positions: Vec<Vec<Point2<f64>>> = rings
            .iter()
            .map(|ring| ring.iter().map(|&n| mesh.nodes[n].vertex.into()).collect())
            .collect();

        let mut triangulation = Triangulation::from_rings(&positions)?;
        let size = SizeField::from_rings(&positions, options.grading);
        if mesh.nodes.len() > options.max_nodes {
            return Err(PlatemeshError::MeshNonConvergence(format!(
                "boundary discretization alone needs {} nodes, budget is {}",
                mesh.nodes.len(),
                options.max_nodes
            )));
        }
        let budget = options.max_nodes - mesh.nodes.len() + triangulation.boundary_len();
        triangulation.refine(&size, budget)?;
        triangulation.check()?;

        let mut local_to_global: Vec<usize> = rings.concat();
        for point in &triangulation.points()[triangulation.boundary_len()..] {
            mesh.nodes.push(Node {
                vertex: (*point).into(),
            });
            local_to_global.push(mesh.nodes.len() - 1);
        }
        let first_element = mesh.elements.len();
        mesh.elements
            .extend(triangulation.triangles().iter().map(|t| Element {
                nodes: t.map(|v| local_to_global[v]),
                surface,
            }));

        info!(
            "meshed {surface}: {} triangles over area {:.4}",
            mesh.elements.len() - first_element,
            triangulation.area()
        );
    }

    mesh.groups = groups;
    info!(
        "generated mesh with {} nodes, {} segments and {} triangles",
        mesh.nodes.len(),
        mesh.segments.len(),
        mesh.elements.len()
    );

    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{boolean, datatypes::DirectedCurve, polygon, tagger::PhysicalGroupTagger};
    use approx::assert_relative_eq;

    /// Square of side 20 with a square hole of side 4, both subtracted
    fn meshed(counts: (usize, usize)) -> Result<Mesh> {
        let mut kernel = GeometryKernel::new(20.0);
        let squares = [(0.0, 0.0, 20.0), (8.0, 8.0, 4.0)];
        let points: Vec<Vec<PointId>> = squares
            .iter()
            .map(|&(x, y, s)| {
                vec![
                    kernel.add_point(x, y).unwrap(),
                    kernel.add_point(x + s, y).unwrap(),
                    kernel.add_point(x + s, y + s).unwrap(),
                    kernel.add_point(x, y + s).unwrap(),
                ]
            })
            .collect();
        let curves: Vec<Vec<CurveId>> = points
            .iter()
            .map(|p| {
                (0..4)
                    .map(|i| kernel.add_line(p[i], p[(i + 1) % 4]).unwrap())
                    .collect()
            })
            .collect();
        let loops: Vec<_> = curves
            .iter()
            .map(|c| {
                let directed: Vec<_> = c.iter().map(|&id| DirectedCurve::forward(id)).collect();
                kernel.add_loop(&directed).unwrap()
            })
            .collect();
        let outer = kernel.add_surface(loops[0], &[]).unwrap();
        let hole = kernel.add_surface(loops[1], &[]).unwrap();
        let outcome = boolean::subtract(&mut kernel, outer, &[hole])?;

        let mut discretizer = MeshDiscretizer::new(&mut kernel)?;
        for (k, curve_set) in curves.iter().enumerate() {
            for &c in curve_set {
                let n = if k == 0 { counts.0 } else { counts.1 };
                discretizer.set_count(&kernel, outcome.remap.curve(c)?, n)?;
            }
        }

        let mut tagger = PhysicalGroupTagger::new(&mut kernel)?;
        tagger.add_surfaces(&kernel, "space", 30, &outcome.surfaces)?;
        generate(
            &mut kernel,
            &discretizer,
            tagger.finish(),
            &MeshOptions::default(),
        )
    }

    #[test]
    fn triangles_are_positive_and_tile_the_domain() {
        let mesh = meshed((10, 4)).unwrap();

        assert!(mesh.elements.iter().all(|e| mesh.element_area(e) > 0.0));
        assert_relative_eq!(mesh.total_area(), 400.0 - 16.0, max_relative = 1e-9);
        assert_eq!(mesh.segments.len(), 4 * 10 + 4 * 4);
        // boundary nodes come first: 40 + 16
        assert!(mesh.nodes.len() > 56);
    }

    #[test]
    fn every_node_belongs_to_a_triangle() {
        let mesh = meshed((8, 2)).unwrap();
        let mut used = vec![false; mesh.nodes.len()];
        for e in &mesh.elements {
            for &n in &e.nodes {
                used[n] = true;
            }
        }
        assert!(used.iter().all(|&u| u));

        let hole: Vec<Point2<f64>> = [(8.0, 8.0), (12.0, 8.0), (12.0, 12.0), (8.0, 12.0)]
            .iter()
            .map(|&(x, y)| Point2::new(x, y))
            .collect();
        for e in &mesh.elements {
            let c = e
                .nodes
                .iter()
                .map(|&n| Point2::from(mesh.nodes[n].vertex))
                .fold(Point2::origin(), |acc: Point2<f64>, p| acc + p.coords / 3.0);
            assert!(!polygon::point_in_polygon(&c, &hole));
        }
    }

    #[test]
    fn tiny_node_budget_does_not_converge() {
        let mut kernel = GeometryKernel::new(1.0);
        let p = [
            kernel.add_point(0.0, 0.0).unwrap(),
            kernel.add_point(1.0, 0.0).unwrap(),
            kernel.add_point(0.0, 1.0).unwrap(),
        ];
        let c = [
            kernel.add_line(p[0], p[1]).unwrap(),
            kernel.add_line(p[1], p[2]).unwrap(),
            kernel.add_line(p[2], p[0]).unwrap(),
        ];
        let l = kernel
            .add_loop(&c.map(DirectedCurve::forward))
            .unwrap();
        kernel.add_surface(l, &[]).unwrap();
        let mut discretizer = MeshDiscretizer::new(&mut kernel).unwrap();
        for curve in c {
            discretizer.set_count(&kernel, curve, 20).unwrap();
        }
        let options = MeshOptions {
            grading: 0.3,
            max_nodes: 10,
        };
        assert!(matches!(
            generate(&mut kernel, &discretizer, Vec::new(), &options),
            Err(PlatemeshError::MeshNonConvergence(_))
        ));
    }

    #[test]
    fn oversized_counts_fail_before_sampling() {
        let mut kernel = GeometryKernel::new(1.0);
        let p = [
            kernel.add_point(0.0, 0.0).unwrap(),
            kernel.add_point(1.0, 0.0).unwrap(),
            kernel.add_point(0.0, 1.0).unwrap(),
        ];
        let c = [
            kernel.add_line(p[0], p[1]).unwrap(),
            kernel.add_line(p[1], p[2]).unwrap(),
            kernel.add_line(p[2], p[0]).unwrap(),
        ];
        let l = kernel
            .add_loop(&c.map(DirectedCurve::forward))
            .unwrap();
        kernel.add_surface(l, &[]).unwrap();
        let mut discretizer = MeshDiscretizer::new(&mut kernel).unwrap();
        for curve in c {
            // sampling this many nodes would exhaust memory
            discretizer.set_count(&kernel, curve, 1 << 40).unwrap();
        }

        match generate(&mut kernel, &discretizer, Vec::new(), &MeshOptions::default()) {
            Err(PlatemeshError::MeshNonConvergence(reason)) => {
                assert!(reason.contains("budget"), "{reason}")
            }
            other => panic!("expected a budget failure, got {other:?}"),
        }
    }
}
