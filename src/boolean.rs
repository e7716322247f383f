//! Subtraction of plate surfaces from the far-field surface.
//!
//! The difference itself is computed on the sampled loop polygons with
//! `i_overlay`. Every contour of the result must then follow one of the
//! input loops, so that the result can be expressed with the existing
//! curves: a tool crossing another boundary would need its curves split,
//! which is reported as a failed operation together with slivers narrower
//! than the sliver threshold and results whose area breaks the identity
//! `|outer| - sum |tool|`.
//!
//! The consumed curves, loops and surfaces are deleted and re-created under
//! new handles. Points are not renumbered.

use std::collections::BTreeMap;

use i_overlay::core::fill_rule::FillRule;
use i_overlay::core::overlay_rule::OverlayRule;
use i_overlay::float::single::SingleFloatOverlay;
use log::{debug, info};
use nalgebra::Point2;

use crate::{
    datatypes::{CurveId, CurveLoop, DirectedCurve, LoopId, Surface, SurfaceId},
    error::{PlatemeshError, Result},
    kernel::{GeometryKernel, Stage, TOLERANCE_FACTOR},
    polygon,
};

/// Minimum boundary separation relative to the characteristic length
pub const SLIVER_FACTOR: f64 = 1e-6;

/// Relative tolerance of the area identity check
const AREA_TOLERANCE: f64 = 1e-9;

/// Relative tolerance on the area of the overlay result, which is computed
/// on snapped coordinates
const OVERLAY_AREA_TOLERANCE: f64 = 1e-6;

/// Old handle to new handle table. `None` marks an entity deleted without
/// replacement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Remap {
    pub curves: BTreeMap<CurveId, Option<CurveId>>,
    pub loops: BTreeMap<LoopId, Option<LoopId>>,
    pub surfaces: BTreeMap<SurfaceId, Option<SurfaceId>>,
}

fn lookup<K, V>(table: &BTreeMap<K, Option<V>>, old: K) -> Result<V>
where
    K: Ord + Copy + std::fmt::Display,
    V: Copy,
{
    match table.get(&old) {
        Some(Some(new)) => Ok(*new),
        Some(None) => Err(PlatemeshError::Pipeline(format!(
            "{old} was removed by the boolean subtraction"
        ))),
        None => Err(PlatemeshError::Pipeline(format!(
            "{old} is not part of the boolean subtraction"
        ))),
    }
}

impl Remap {
    pub fn curve(&self, old: CurveId) -> Result<CurveId> {
        lookup(&self.curves, old)
    }

    pub fn curve_loop(&self, old: LoopId) -> Result<LoopId> {
        lookup(&self.loops, old)
    }

    pub fn surface(&self, old: SurfaceId) -> Result<SurfaceId> {
        lookup(&self.surfaces, old)
    }

    pub fn map_curves<const N: usize>(&self, old: [CurveId; N]) -> Result<[CurveId; N]> {
        let mut new = old;
        for id in new.iter_mut() {
            *id = self.curve(*id)?;
        }
        Ok(new)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubtractOutcome {
    pub surfaces: Vec<SurfaceId>,
    pub remap: Remap,
}

/// Ring in `i_overlay` path form with the requested winding
fn to_path(ring: &[Point2<f64>], counter_clockwise: bool) -> Vec<[f64; 2]> {
    let mut path: Vec<[f64; 2]> = ring.iter().map(|p| [p.x, p.y]).collect();
    if (polygon::signed_area(ring) > 0.0) != counter_clockwise {
        path.reverse();
    }
    path
}

fn path_area(path: &[[f64; 2]]) -> f64 {
    let ring: Vec<Point2<f64>> = path.iter().map(|&[x, y]| Point2::new(x, y)).collect();
    polygon::signed_area(&ring).abs()
}

/// Whether every vertex of `path` lies within `tolerance` of the boundary of `ring`
fn follows(path: &[[f64; 2]], ring: &[Point2<f64>], tolerance: f64) -> bool {
    let n = ring.len();
    path.iter().all(|&[x, y]| {
        let p = Point2::new(x, y);
        (0..n).any(|i| polygon::point_segment_distance(&p, &ring[i], &ring[(i + 1) % n]) <= tolerance)
    })
}

/// Computes `outer \ (tool_1 u ... u tool_n)`
///
/// # Arguments
/// * `kernel` - The kernel owning all surfaces
/// * `outer` - The surface to cut
/// * `tools` - Surfaces removed from `outer`, consumed by the operation
///
/// # Returns
/// The resulting surface handles and the old-to-new handle table
pub fn subtract(
    kernel: &mut GeometryKernel,
    outer: SurfaceId,
    tools: &[SurfaceId],
) -> Result<SubtractOutcome> {
    kernel.enter(Stage::BooleanSubtract)?;

    let sliver = kernel.tolerance() / TOLERANCE_FACTOR * SLIVER_FACTOR;
    let outer_surface = kernel.surface(outer)?.clone();

    // outer loop first, then the holes it already has, then one loop per tool
    let mut boundaries: Vec<(LoopId, String)> = vec![(outer_surface.outer, outer.to_string())];
    for &hole in &outer_surface.holes {
        boundaries.push((hole, hole.to_string()));
    }
    let first_tool = boundaries.len();
    for &tool in tools {
        if tool == outer {
            return Err(PlatemeshError::BooleanOp(format!(
                "{tool} cannot be subtracted from itself"
            )));
        }
        let surface = kernel.surface(tool)?;
        if !surface.holes.is_empty() {
            return Err(PlatemeshError::BooleanOp(format!(
                "{tool} has holes; only simply connected tools are supported"
            )));
        }
        boundaries.push((surface.outer, tool.to_string()));
    }
    let rings = boundaries
        .iter()
        .map(|(id, _)| kernel.loop_polygon(*id))
        .collect::<Result<Vec<Vec<Point2<f64>>>>>()?;

    let subject: Vec<Vec<[f64; 2]>> = rings[..first_tool]
        .iter()
        .enumerate()
        .map(|(k, ring)| to_path(ring, k == 0))
        .collect();
    let clip: Vec<Vec<[f64; 2]>> = rings[first_tool..]
        .iter()
        .map(|ring| to_path(ring, true))
        .collect();
    let shapes = subject.overlay(&clip, OverlayRule::Difference, FillRule::NonZero);
    debug!(
        "difference of {outer} and {} tools has {} shape(s)",
        tools.len(),
        shapes.len()
    );

    let mut expected = kernel.surface_area(outer)?;
    for &tool in tools {
        expected -= kernel.surface_area(tool)?;
    }

    // every contour of the result must follow exactly one input loop
    let mut placed = vec![false; boundaries.len()];
    let mut overlay_area = 0.0;
    for shape in &shapes {
        for (c, contour) in shape.iter().enumerate() {
            let k = (0..boundaries.len())
                .find(|&k| !placed[k] && follows(contour, &rings[k], sliver))
                .ok_or_else(|| {
                    PlatemeshError::BooleanOp(format!(
                        "a boundary of the difference follows none of the input loops; \
                         a tool crosses the boundary of {outer} or another tool"
                    ))
                })?;
            if (c == 0) != (k == 0) {
                return Err(PlatemeshError::BooleanOp(format!(
                    "subtracting from {outer} splits it into disconnected parts"
                )));
            }
            placed[k] = true;
            let area = path_area(contour);
            overlay_area += if c == 0 { area } else { -area };
        }
    }
    if let Some(k) = placed.iter().position(|p| !p) {
        let (_, name) = &boundaries[k];
        return Err(PlatemeshError::BooleanOp(if k == 0 {
            format!("the tools remove all of {outer}")
        } else if k < first_tool {
            format!("hole {name} of {outer} is covered by a tool")
        } else {
            format!("{name} is not strictly inside {outer}")
        }));
    }

    for i in 0..rings.len() {
        for j in i + 1..rings.len() {
            let clearance = polygon::boundary_distance(&rings[i], &rings[j]);
            if clearance < sliver {
                return Err(PlatemeshError::BooleanOp(format!(
                    "{} and {} leave a sliver of width {clearance}",
                    boundaries[i].1, boundaries[j].1
                )));
            }
        }
    }
    if (overlay_area - expected).abs() > OVERLAY_AREA_TOLERANCE * expected.abs() {
        return Err(PlatemeshError::BooleanOp(format!(
            "difference of {outer} has area {overlay_area}, expected {expected}"
        )));
    }

    let mut remap = Remap::default();
    let new_outer = rebuild_loop(kernel, outer_surface.outer, &mut remap)?;
    let mut holes = Vec::with_capacity(boundaries.len() - 1);
    for (id, _) in &boundaries[1..] {
        holes.push(rebuild_loop(kernel, *id, &mut remap)?);
    }

    let result = kernel.insert_surface(Surface {
        outer: new_outer,
        holes,
    });

    kernel.remove_surface(outer);
    remap.surfaces.insert(outer, Some(result));
    for &tool in tools {
        kernel.remove_surface(tool);
        remap.surfaces.insert(tool, None);
    }
    for (&old, _) in remap.loops.iter() {
        kernel.remove_loop(old);
    }
    for (&old, _) in remap.curves.iter() {
        kernel.remove_curve(old);
    }

    let area = kernel.surface_area(result)?;
    let scale = area.abs().max(expected.abs());
    if !(area > 0.0) || (area - expected).abs() > AREA_TOLERANCE * scale {
        return Err(PlatemeshError::BooleanOp(format!(
            "result {result} has area {area}, expected {expected}"
        )));
    }

    info!(
        "subtracted {} surfaces from {outer}: {result} with {} holes, area {area:.4}",
        tools.len(),
        boundaries.len() - 1
    );

    Ok(SubtractOutcome {
        surfaces: vec![result],
        remap,
    })
}

/// Re-creates a loop and its curves under new handles
fn rebuild_loop(kernel: &mut GeometryKernel, old: LoopId, remap: &mut Remap) -> Result<LoopId> {
    let curve_loop = kernel.curve_loop(old)?.clone();
    let mut curves = Vec::with_capacity(curve_loop.curves.len());

    for directed in &curve_loop.curves {
        let new = match remap.curves.get(&directed.curve) {
            Some(Some(new)) => *new,
            _ => {
                let curve = kernel.curve(directed.curve)?.clone();
                let new = kernel.insert_curve(curve);
                debug!("{} -> {new}", directed.curve);
                remap.curves.insert(directed.curve, Some(new));
                new
            }
        };
        curves.push(DirectedCurve {
            curve: new,
            reversed: directed.reversed,
        });
    }

    let new = kernel.insert_loop(CurveLoop { curves });
    remap.loops.insert(old, Some(new));
    Ok(new)
}
