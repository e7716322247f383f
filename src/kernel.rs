//! Geometry kernel owning every entity of one pipeline invocation.
//!
//! Handles are allocated per entity kind, starting at 1 and increasing
//! monotonically; a handle is never reused until [`GeometryKernel::reset`].
//! The kernel also enforces the stage order of the pipeline: once a later
//! stage has been entered, operations of an earlier stage are rejected.

use std::collections::BTreeMap;

use log::debug;
use nalgebra::{Point2, Rotation2, Vector2};

use crate::{
    datatypes::{
        Curve, CurveId, CurveKind, CurveLoop, DirectedCurve, LoopId, Point, PointId, Surface,
        SurfaceId,
    },
    error::{PlatemeshError, Result},
    polygon,
};

/// Merge/closure tolerance relative to the characteristic length
pub const TOLERANCE_FACTOR: f64 = 1e-9;

/// Dense evaluation steps per spline span
const SPLINE_SUBDIVISIONS: usize = 16;

/// Dense evaluation steps per quarter turn of an arc
const ARC_SUBDIVISIONS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Points,
    Curves,
    Loops,
    Surfaces,
    BooleanSubtract,
    TransfiniteConstraints,
    PhysicalGroups,
    MeshGenerate,
}

#[derive(Debug, Clone)]
pub struct GeometryKernel {
    tolerance: f64,
    stage: Stage,
    next_point: usize,
    next_curve: usize,
    next_loop: usize,
    next_surface: usize,
    points: BTreeMap<PointId, Point>,
    curves: BTreeMap<CurveId, Curve>,
    loops: BTreeMap<LoopId, CurveLoop>,
    surfaces: BTreeMap<SurfaceId, Surface>,
}

impl GeometryKernel {
    /// Creates an empty kernel whose tolerance scales with `characteristic_length`
    pub fn new(characteristic_length: f64) -> GeometryKernel {
        GeometryKernel {
            tolerance: TOLERANCE_FACTOR * characteristic_length.abs(),
            stage: Stage::Points,
            next_point: 1,
            next_curve: 1,
            next_loop: 1,
            next_surface: 1,
            points: BTreeMap::new(),
            curves: BTreeMap::new(),
            loops: BTreeMap::new(),
            surfaces: BTreeMap::new(),
        }
    }

    /// Clears every entity table and restarts all handle counters.
    /// Must be called between invocations sharing one kernel.
    pub fn reset(&mut self) {
        self.stage = Stage::Points;
        self.next_point = 1;
        self.next_curve = 1;
        self.next_loop = 1;
        self.next_surface = 1;
        self.points.clear();
        self.curves.clear();
        self.loops.clear();
        self.surfaces.clear();
    }

    /// Whether no entity has been created since construction or the last reset
    pub fn is_pristine(&self) -> bool {
        self.stage == Stage::Points
            && self.next_point == 1
            && self.next_curve == 1
            && self.next_loop == 1
            && self.next_surface == 1
    }

    /// Rescales the tolerance; only allowed before any entity exists
    pub fn set_characteristic_length(&mut self, length: f64) -> Result<()> {
        if !self.is_pristine() {
            return Err(PlatemeshError::Pipeline(
                "tolerance can only change on a reset kernel".to_owned(),
            ));
        }
        self.tolerance = TOLERANCE_FACTOR * length.abs();
        Ok(())
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Moves the pipeline to `stage`, rejecting backward transitions
    pub fn enter(&mut self, stage: Stage) -> Result<()> {
        if stage < self.stage {
            return Err(PlatemeshError::Pipeline(format!(
                "cannot return to {:?} stage after {:?}",
                stage, self.stage
            )));
        }
        self.stage = stage;
        Ok(())
    }

    pub fn add_point(&mut self, x: f64, y: f64) -> Result<PointId> {
        self.add_point_with_size(Point2::new(x, y), None)
    }

    /// Adds a point, merging it into an existing point closer than the tolerance
    ///
    /// # Arguments
    /// * `position` - Planar coordinates
    /// * `size_hint` - Optional local mesh size
    ///
    /// # Returns
    /// The handle of the new point, or of the point it was merged into
    pub fn add_point_with_size(
        &mut self,
        position: Point2<f64>,
        size_hint: Option<f64>,
    ) -> Result<PointId> {
        self.enter(Stage::Points)?;

        if !(position.x.is_finite() && position.y.is_finite()) {
            return Err(PlatemeshError::GeometryDegenerate(format!(
                "non-finite point coordinates ({}, {})",
                position.x, position.y
            )));
        }

        let tolerance = self.tolerance;
        if let Some((&id, existing)) = self
            .points
            .iter_mut()
            .find(|(_, p)| (p.position - position).norm() <= tolerance)
        {
            debug!(
                "merged point ({}, {}) into {id} at ({}, {})",
                position.x, position.y, existing.position.x, existing.position.y
            );
            existing.size_hint = match (existing.size_hint, size_hint) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            return Ok(id);
        }

        let id = PointId(self.next_point);
        self.next_point += 1;
        self.points.insert(
            id,
            Point {
                position,
                z: 0.0,
                size_hint,
            },
        );

        Ok(id)
    }

    pub fn add_line(&mut self, from: PointId, to: PointId) -> Result<CurveId> {
        self.add_curve(CurveKind::Line, &[from, to], None)
    }

    pub fn add_spline(&mut self, points: &[PointId]) -> Result<CurveId> {
        self.add_curve(CurveKind::Spline, points, None)
    }

    pub fn add_arc(&mut self, start: PointId, center: PointId, end: PointId) -> Result<CurveId> {
        self.add_curve(CurveKind::Arc, &[start, end], Some(center))
    }

    /// Adds a curve through the given points
    ///
    /// Consecutive repeated handles (left behind by point merging) are
    /// collapsed; a curve that degenerates to a single point is rejected.
    pub fn add_curve(
        &mut self,
        kind: CurveKind,
        points: &[PointId],
        center: Option<PointId>,
    ) -> Result<CurveId> {
        self.enter(Stage::Curves)?;

        let mut distinct: Vec<PointId> = Vec::with_capacity(points.len());
        for &id in points {
            self.point(id)?;
            if distinct.last() != Some(&id) {
                distinct.push(id);
            }
        }
        if distinct.len() < 2 {
            return Err(PlatemeshError::GeometryDegenerate(format!(
                "{kind:?} through {points:?} collapses to a single point"
            )));
        }

        match kind {
            CurveKind::Line => {
                if distinct.len() != 2 {
                    return Err(PlatemeshError::GeometryDegenerate(format!(
                        "line needs exactly two points, got {distinct:?}"
                    )));
                }
            }
            CurveKind::Spline => {}
            CurveKind::Arc => {
                let center = center.ok_or_else(|| {
                    PlatemeshError::GeometryDegenerate("arc is missing its center".to_owned())
                })?;
                if distinct.len() != 2 {
                    return Err(PlatemeshError::GeometryDegenerate(format!(
                        "arc needs a start and an end point, got {distinct:?}"
                    )));
                }
                self.check_arc(distinct[0], center, distinct[1])?;
            }
        }

        let curve = Curve {
            kind,
            points: distinct,
            center: if kind == CurveKind::Arc { center } else { None },
        };
        Ok(self.insert_curve(curve))
    }

    fn check_arc(&self, start: PointId, center: PointId, end: PointId) -> Result<()> {
        let c = self.point(center)?.position;
        let s = self.point(start)?.position - c;
        let e = self.point(end)?.position - c;
        let (rs, re) = (s.norm(), e.norm());

        if rs <= self.tolerance || (rs - re).abs() > self.tolerance.max(1e-12 * rs) {
            return Err(PlatemeshError::GeometryDegenerate(format!(
                "arc {start} -> {end} about {center} has inconsistent radii {rs} and {re}"
            )));
        }
        let sweep = arc_sweep(&s, &e).abs();
        if sweep <= self.tolerance / rs || sweep >= std::f64::consts::PI {
            return Err(PlatemeshError::GeometryDegenerate(format!(
                "arc {start} -> {end} sweeps {sweep} rad, must be strictly between 0 and pi"
            )));
        }
        Ok(())
    }

    /// Adds a closed loop of directed curves
    pub fn add_loop(&mut self, curves: &[DirectedCurve]) -> Result<LoopId> {
        self.enter(Stage::Loops)?;

        if curves.is_empty() {
            return Err(PlatemeshError::GeometryDegenerate(
                "curve loop is empty".to_owned(),
            ));
        }

        for (i, current) in curves.iter().enumerate() {
            let next = &curves[(i + 1) % curves.len()];
            let end = self.directed_end(current)?;
            let start = self.directed_start(next)?;
            let gap = (self.point(end)?.position - self.point(start)?.position).norm();
            if gap > self.tolerance {
                return Err(PlatemeshError::GeometryDegenerate(format!(
                    "curve loop is open between {} and {} (gap {gap})",
                    current.signed(),
                    next.signed()
                )));
            }
        }

        Ok(self.insert_loop(CurveLoop {
            curves: curves.to_vec(),
        }))
    }

    /// Adds a planar surface bounded by `outer` with optional holes
    pub fn add_surface(&mut self, outer: LoopId, holes: &[LoopId]) -> Result<SurfaceId> {
        self.enter(Stage::Surfaces)?;

        let outer_polygon = self.loop_polygon(outer)?;
        if !polygon::is_simple(&outer_polygon) {
            return Err(PlatemeshError::GeometryDegenerate(format!(
                "{outer} intersects itself"
            )));
        }

        let mut hole_polygons: Vec<Vec<Point2<f64>>> = Vec::with_capacity(holes.len());
        for &hole in holes {
            let hole_polygon = self.loop_polygon(hole)?;
            if !polygon::is_simple(&hole_polygon) {
                return Err(PlatemeshError::GeometryDegenerate(format!(
                    "{hole} intersects itself"
                )));
            }
            if !polygon::contains(&outer_polygon, &hole_polygon) {
                return Err(PlatemeshError::GeometryDegenerate(format!(
                    "hole {hole} is not inside {outer}"
                )));
            }
            for other in &hole_polygons {
                if polygon::boundaries_intersect(other, &hole_polygon)
                    || polygon::point_in_polygon(&hole_polygon[0], other)
                    || polygon::point_in_polygon(&other[0], &hole_polygon)
                {
                    return Err(PlatemeshError::GeometryDegenerate(format!(
                        "hole {hole} overlaps another hole of the surface"
                    )));
                }
            }
            hole_polygons.push(hole_polygon);
        }

        Ok(self.insert_surface(Surface {
            outer,
            holes: holes.to_vec(),
        }))
    }

    pub(crate) fn insert_curve(&mut self, curve: Curve) -> CurveId {
        let id = CurveId(self.next_curve);
        self.next_curve += 1;
        self.curves.insert(id, curve);
        id
    }

    pub(crate) fn insert_loop(&mut self, curve_loop: CurveLoop) -> LoopId {
        let id = LoopId(self.next_loop);
        self.next_loop += 1;
        self.loops.insert(id, curve_loop);
        id
    }

    pub(crate) fn insert_surface(&mut self, surface: Surface) -> SurfaceId {
        let id = SurfaceId(self.next_surface);
        self.next_surface += 1;
        self.surfaces.insert(id, surface);
        id
    }

    pub(crate) fn remove_curve(&mut self, id: CurveId) -> Option<Curve> {
        self.curves.remove(&id)
    }

    pub(crate) fn remove_loop(&mut self, id: LoopId) -> Option<CurveLoop> {
        self.loops.remove(&id)
    }

    pub(crate) fn remove_surface(&mut self, id: SurfaceId) -> Option<Surface> {
        self.surfaces.remove(&id)
    }

    pub fn point(&self, id: PointId) -> Result<&Point> {
        self.points
            .get(&id)
            .ok_or_else(|| PlatemeshError::Pipeline(format!("unknown {id}")))
    }

    pub fn curve(&self, id: CurveId) -> Result<&Curve> {
        self.curves
            .get(&id)
            .ok_or_else(|| PlatemeshError::Pipeline(format!("unknown or deleted {id}")))
    }

    pub fn curve_loop(&self, id: LoopId) -> Result<&CurveLoop> {
        self.loops
            .get(&id)
            .ok_or_else(|| PlatemeshError::Pipeline(format!("unknown or deleted {id}")))
    }

    pub fn surface(&self, id: SurfaceId) -> Result<&Surface> {
        self.surfaces
            .get(&id)
            .ok_or_else(|| PlatemeshError::Pipeline(format!("unknown or deleted {id}")))
    }

    pub fn points(&self) -> impl Iterator<Item = (&PointId, &Point)> {
        self.points.iter()
    }

    pub fn curves(&self) -> impl Iterator<Item = (&CurveId, &Curve)> {
        self.curves.iter()
    }

    pub fn loops(&self) -> impl Iterator<Item = (&LoopId, &CurveLoop)> {
        self.loops.iter()
    }

    pub fn surfaces(&self) -> impl Iterator<Item = (&SurfaceId, &Surface)> {
        self.surfaces.iter()
    }

    pub fn directed_start(&self, directed: &DirectedCurve) -> Result<PointId> {
        let curve = self.curve(directed.curve)?;
        Ok(if directed.reversed {
            curve.end()
        } else {
            curve.start()
        })
    }

    pub fn directed_end(&self, directed: &DirectedCurve) -> Result<PointId> {
        let curve = self.curve(directed.curve)?;
        Ok(if directed.reversed {
            curve.start()
        } else {
            curve.end()
        })
    }

    fn positions(&self, ids: &[PointId]) -> Result<Vec<Point2<f64>>> {
        ids.iter().map(|&id| Ok(self.point(id)?.position)).collect()
    }

    /// Dense polyline following the curve from its first to its last point
    pub fn curve_polyline(&self, id: CurveId) -> Result<Vec<Point2<f64>>> {
        let curve = self.curve(id)?;
        let control = self.positions(&curve.points)?;

        Ok(match curve.kind {
            CurveKind::Line => control,
            CurveKind::Spline => catmull_rom_chain(&control, SPLINE_SUBDIVISIONS),
            CurveKind::Arc => {
                let center = self.point(arc_center(curve, id)?)?.position;
                let sweep = arc_sweep(&(control[0] - center), &(control[1] - center));
                let steps = ((sweep.abs() / std::f64::consts::FRAC_PI_2)
                    * ARC_SUBDIVISIONS as f64)
                    .ceil()
                    .max(1.0) as usize;
                arc_points(&center, &control[0], &control[1], sweep, steps)
            }
        })
    }

    pub fn curve_length(&self, id: CurveId) -> Result<f64> {
        Ok(polyline_length(&self.curve_polyline(id)?))
    }

    /// Samples `segments + 1` points uniformly spaced in arc length
    ///
    /// # Arguments
    /// * `id` - The curve to sample
    /// * `segments` - Number of equal-length pieces, at least one
    ///
    /// # Returns
    /// Points from the curve start to its end, both reproduced exactly
    pub fn sample_curve(&self, id: CurveId, segments: usize) -> Result<Vec<Point2<f64>>> {
        if segments == 0 {
            return Err(PlatemeshError::MeshNonConvergence(format!(
                "{id} needs at least one element"
            )));
        }

        let curve = self.curve(id)?;
        let control = self.positions(&curve.points)?;
        let first = control[0];
        let last = control[control.len() - 1];

        let mut samples = match curve.kind {
            CurveKind::Line => (0..=segments)
                .map(|i| first + (last - first) * (i as f64 / segments as f64))
                .collect(),
            CurveKind::Arc => {
                let center = self.point(arc_center(curve, id)?)?.position;
                let sweep = arc_sweep(&(first - center), &(last - center));
                arc_points(&center, &first, &last, sweep, segments)
            }
            CurveKind::Spline => {
                let dense = catmull_rom_chain(&control, SPLINE_SUBDIVISIONS);
                resample_by_length(&dense, segments)
            }
        };

        samples[0] = first;
        samples[segments] = last;
        Ok(samples)
    }

    /// Closed contour of a loop, without repeating the first point
    pub fn loop_polygon(&self, id: LoopId) -> Result<Vec<Point2<f64>>> {
        let curve_loop = self.curve_loop(id)?;
        let mut contour: Vec<Point2<f64>> = Vec::new();

        for directed in &curve_loop.curves {
            let mut polyline = self.curve_polyline(directed.curve)?;
            if directed.reversed {
                polyline.reverse();
            }
            let skip = usize::from(!contour.is_empty());
            contour.extend(polyline.into_iter().skip(skip));
        }
        contour.pop();

        Ok(contour)
    }

    /// Area enclosed by the outer loop minus the hole areas
    pub fn surface_area(&self, id: SurfaceId) -> Result<f64> {
        let surface = self.surface(id)?;
        let mut area = polygon::signed_area(&self.loop_polygon(surface.outer)?).abs();
        for &hole in &surface.holes {
            area -= polygon::signed_area(&self.loop_polygon(hole)?).abs();
        }
        Ok(area)
    }
}

fn arc_center(curve: &Curve, id: CurveId) -> Result<PointId> {
    curve
        .center
        .ok_or_else(|| PlatemeshError::GeometryDegenerate(format!("{id} has no arc center")))
}

/// Signed angle from `from` to `to`, in (-pi, pi]
fn arc_sweep(from: &Vector2<f64>, to: &Vector2<f64>) -> f64 {
    let cross = from.x * to.y - from.y * to.x;
    cross.atan2(from.dot(to))
}

fn arc_points(
    center: &Point2<f64>,
    start: &Point2<f64>,
    end: &Point2<f64>,
    sweep: f64,
    steps: usize,
) -> Vec<Point2<f64>> {
    let radius = start - center;
    let mut points: Vec<Point2<f64>> = (0..=steps)
        .map(|i| center + Rotation2::new(sweep * i as f64 / steps as f64) * radius)
        .collect();
    points[steps] = *end;
    points
}

/// Point on a Catmull-Rom segment running from `p1` to `p2`, `t` in [0, 1]
fn catmull_rom_point(
    p0: &Vector2<f64>,
    p1: &Vector2<f64>,
    p2: &Vector2<f64>,
    p3: &Vector2<f64>,
    t: f64,
) -> Vector2<f64> {
    let t2 = t * t;
    let t3 = t2 * t;
    (p1 * 2.0
        + (p2 - p0) * t
        + (p0 * 2.0 - p1 * 5.0 + p2 * 4.0 - p3) * t2
        + (-p0 + p1 * 3.0 - p2 * 3.0 + p3) * t3)
        * 0.5
}

/// Dense polyline through every control point. End segments use mirrored
/// phantom points so the curve passes through the first and last point.
fn catmull_rom_chain(points: &[Point2<f64>], samples_per_segment: usize) -> Vec<Point2<f64>> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let n = points.len();
    let v: Vec<Vector2<f64>> = points.iter().map(|p| p.coords).collect();
    let mut result = Vec::with_capacity((n - 1) * samples_per_segment + 1);

    for seg in 0..(n - 1) {
        let p0 = if seg == 0 { v[0] * 2.0 - v[1] } else { v[seg - 1] };
        let p1 = v[seg];
        let p2 = v[seg + 1];
        let p3 = if seg + 2 < n {
            v[seg + 2]
        } else {
            v[n - 1] * 2.0 - v[n - 2]
        };

        for i in 0..samples_per_segment {
            let t = i as f64 / samples_per_segment as f64;
            result.push(Point2::from(catmull_rom_point(&p0, &p1, &p2, &p3, t)));
        }
    }
    result.push(points[n - 1]);

    result
}

pub fn polyline_length(points: &[Point2<f64>]) -> f64 {
    points.windows(2).map(|w| (w[1] - w[0]).norm()).sum()
}

/// Redistributes `segments + 1` points at equal arc length along a polyline
fn resample_by_length(polyline: &[Point2<f64>], segments: usize) -> Vec<Point2<f64>> {
    let total = polyline_length(polyline);
    let spacing = total / segments as f64;

    let mut result = Vec::with_capacity(segments + 1);
    result.push(polyline[0]);

    let mut index = 0;
    let mut walked = 0.0; // length up to polyline[index]
    for k in 1..segments {
        let target = k as f64 * spacing;
        while index + 1 < polyline.len() - 1
            && walked + (polyline[index + 1] - polyline[index]).norm() < target
        {
            walked += (polyline[index + 1] - polyline[index]).norm();
            index += 1;
        }
        let piece = polyline[index + 1] - polyline[index];
        let length = piece.norm();
        let t = if length > 0.0 {
            ((target - walked) / length).clamp(0.0, 1.0)
        } else {
            0.0
        };
        result.push(polyline[index] + piece * t);
    }
    result.push(polyline[polyline.len() - 1]);

    result
}
