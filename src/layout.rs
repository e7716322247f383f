//! Entity construction for the plate pair and the enclosing far field.
//!
//! All points are created first, then curves, loops and surfaces, so that
//! the kernel stage order is respected for the whole layout.

use log::info;
use nalgebra::Point2;

use crate::{
    boundary::{Edge, PlateEdges},
    datatypes::{CurveId, DirectedCurve, LoopId, PointId, SurfaceId},
    error::{PlatemeshError, Result},
    kernel::GeometryKernel,
};

/// Effective plate dimensions after overetch, origin at the gap centre
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateGeometry {
    pub length: f64,
    pub thickness: f64,
    pub gap: f64,
}

impl PlateGeometry {
    /// Applies the overetch to the nominal dimensions
    ///
    /// # Arguments
    /// * `length` - Nominal plate length
    /// * `thickness` - Nominal plate thickness
    /// * `overetch` - Amount every face recedes
    /// * `distance` - Nominal gap between the plates
    pub fn new(length: f64, thickness: f64, overetch: f64, distance: f64) -> Result<PlateGeometry> {
        let geometry = PlateGeometry {
            length: length - 2.0 * overetch,
            thickness: thickness - 2.0 * overetch,
            gap: distance + 2.0 * overetch,
        };

        if !(geometry.length > 0.0) {
            return Err(PlatemeshError::Parameter(format!(
                "overetch {overetch} leaves no plate length (L = {length})"
            )));
        }
        if !(geometry.thickness > 0.0) {
            return Err(PlatemeshError::Parameter(format!(
                "overetch {overetch} leaves no plate thickness (t = {thickness})"
            )));
        }
        if !(geometry.gap > 0.0) {
            return Err(PlatemeshError::Parameter(format!(
                "overetch {overetch} with distance {distance} closes the plate gap"
            )));
        }

        Ok(geometry)
    }

    pub fn span(&self) -> (f64, f64) {
        (-0.5 * self.length, 0.5 * self.length)
    }

    /// Undeformed `(bottom, top)` of the moving plate
    pub fn upper(&self) -> (f64, f64) {
        (0.5 * self.gap, 0.5 * self.gap + self.thickness)
    }

    /// `(bottom, top)` of the fixed plate
    pub fn lower(&self) -> (f64, f64) {
        (-0.5 * self.gap - self.thickness, -0.5 * self.gap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FarFieldKind {
    Circle,
    Box,
}

impl FarFieldKind {
    pub fn parse(value: &str) -> Option<FarFieldKind> {
        match value.trim() {
            "circle" => Some(FarFieldKind::Circle),
            "box" => Some(FarFieldKind::Box),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FarField {
    pub kind: FarFieldKind,
    pub margin: f64,
    /// Element count per far-field edge
    pub elements: usize,
}

/// Local mesh sizes attached to the created points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeHints {
    pub plate: f64,
    pub far_field: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlateHandles {
    pub bottom: CurveId,
    pub right: CurveId,
    pub top: CurveId,
    pub left: CurveId,
    pub outline: LoopId,
    pub surface: SurfaceId,
}

impl PlateHandles {
    pub fn curves(&self) -> [CurveId; 4] {
        [self.bottom, self.right, self.top, self.left]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FarFieldHandles {
    pub curves: Vec<CurveId>,
    pub outline: LoopId,
    pub surface: SurfaceId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub upper: PlateHandles,
    pub lower: PlateHandles,
    pub far_field: FarFieldHandles,
}

struct PlatePoints {
    bottom: Vec<PointId>,
    right: Vec<PointId>,
    top: Vec<PointId>,
    left: Vec<PointId>,
}

struct FarFieldPoints {
    /// Boundary points in counter-clockwise order
    ring: Vec<PointId>,
    center: Option<PointId>,
}

fn add_edge_points(kernel: &mut GeometryKernel, edge: &Edge, size: f64) -> Result<Vec<PointId>> {
    edge.points
        .iter()
        .map(|p| kernel.add_point_with_size(*p, Some(size)))
        .collect()
}

fn add_plate_points(
    kernel: &mut GeometryKernel,
    edges: &PlateEdges,
    size: f64,
) -> Result<PlatePoints> {
    Ok(PlatePoints {
        bottom: add_edge_points(kernel, &edges.bottom, size)?,
        right: add_edge_points(kernel, &edges.right, size)?,
        top: add_edge_points(kernel, &edges.top, size)?,
        left: add_edge_points(kernel, &edges.left, size)?,
    })
}

fn add_far_field_points(
    kernel: &mut GeometryKernel,
    far_field: &FarField,
    (lo, hi): (Point2<f64>, Point2<f64>),
    size: f64,
) -> Result<FarFieldPoints> {
    match far_field.kind {
        FarFieldKind::Circle => {
            let center = Point2::new(0.5 * (lo.x + hi.x), 0.5 * (lo.y + hi.y));
            let radius = 0.5 * (hi - lo).norm() + far_field.margin;
            let center_id = kernel.add_point_with_size(center, Some(size))?;
            let ring = [(1.0, 0.0), (0.0, 1.0), (-1.0, 0.0), (0.0, -1.0)]
                .iter()
                .map(|&(dx, dy)| {
                    kernel.add_point_with_size(
                        Point2::new(center.x + dx * radius, center.y + dy * radius),
                        Some(size),
                    )
                })
                .collect::<Result<Vec<PointId>>>()?;
            Ok(FarFieldPoints {
                ring,
                center: Some(center_id),
            })
        }
        FarFieldKind::Box => {
            let m = far_field.margin;
            let ring = [
                (lo.x - m, lo.y - m),
                (hi.x + m, lo.y - m),
                (hi.x + m, hi.y + m),
                (lo.x - m, hi.y + m),
            ]
            .iter()
            .map(|&(x, y)| kernel.add_point_with_size(Point2::new(x, y), Some(size)))
            .collect::<Result<Vec<PointId>>>()?;
            Ok(FarFieldPoints { ring, center: None })
        }
    }
}

fn add_edge_curve(kernel: &mut GeometryKernel, edge: &Edge, ids: &[PointId]) -> Result<CurveId> {
    if edge.deformed {
        kernel.add_spline(ids)
    } else {
        kernel.add_line(ids[0], ids[ids.len() - 1])
    }
}

fn add_plate(
    kernel: &mut GeometryKernel,
    edges: &PlateEdges,
    points: &PlatePoints,
) -> Result<[CurveId; 4]> {
    Ok([
        add_edge_curve(kernel, &edges.bottom, &points.bottom)?,
        add_edge_curve(kernel, &edges.right, &points.right)?,
        add_edge_curve(kernel, &edges.top, &points.top)?,
        add_edge_curve(kernel, &edges.left, &points.left)?,
    ])
}

/// Counter-clockwise outline: bottom and right forward, top and left reversed
fn plate_loop(kernel: &mut GeometryKernel, curves: &[CurveId; 4]) -> Result<LoopId> {
    kernel.add_loop(&[
        DirectedCurve::forward(curves[0]),
        DirectedCurve::forward(curves[1]),
        DirectedCurve::reversed(curves[2]),
        DirectedCurve::reversed(curves[3]),
    ])
}

/// Creates every entity of the plate pair and the far field
///
/// # Arguments
/// * `kernel` - A kernel in its initial stage
/// * `upper` - Sampled edges of the moving plate
/// * `lower` - Sampled edges of the fixed plate
/// * `far_field` - Shape and margin of the enclosing boundary
/// * `hints` - Local mesh sizes for plate and far-field points
///
/// # Returns
/// The curve, loop and surface handles of all three regions
pub fn build(
    kernel: &mut GeometryKernel,
    upper: &PlateEdges,
    lower: &PlateEdges,
    far_field: &FarField,
    hints: SizeHints,
) -> Result<Layout> {
    let (_, lower_top) = lower.bounds();
    let upper_min = upper.min_y();
    if upper_min <= lower_top.y {
        return Err(PlatemeshError::Parameter(format!(
            "deformed upper plate reaches y = {upper_min}, at or below the lower plate face y = {}",
            lower_top.y
        )));
    }
    if !(far_field.margin > 0.0) || far_field.elements == 0 {
        return Err(PlatemeshError::Parameter(format!(
            "far field needs a positive margin and element count, got {} and {}",
            far_field.margin, far_field.elements
        )));
    }

    let (upper_lo, upper_hi) = upper.bounds();
    let (lower_lo, lower_hi) = lower.bounds();
    let bounds = (
        Point2::new(upper_lo.x.min(lower_lo.x), upper_lo.y.min(lower_lo.y)),
        Point2::new(upper_hi.x.max(lower_hi.x), upper_hi.y.max(lower_hi.y)),
    );

    let upper_points = add_plate_points(kernel, upper, hints.plate)?;
    let lower_points = add_plate_points(kernel, lower, hints.plate)?;
    let far_points = add_far_field_points(kernel, far_field, bounds, hints.far_field)?;

    let upper_curves = add_plate(kernel, upper, &upper_points)?;
    let lower_curves = add_plate(kernel, lower, &lower_points)?;
    let ring = &far_points.ring;
    let far_curves = (0..ring.len())
        .map(|i| {
            let (from, to) = (ring[i], ring[(i + 1) % ring.len()]);
            match far_points.center {
                Some(center) => kernel.add_arc(from, center, to),
                None => kernel.add_line(from, to),
            }
        })
        .collect::<Result<Vec<CurveId>>>()?;

    let upper_loop = plate_loop(kernel, &upper_curves)?;
    let lower_loop = plate_loop(kernel, &lower_curves)?;
    let far_loop = kernel.add_loop(
        &far_curves
            .iter()
            .map(|&c| DirectedCurve::forward(c))
            .collect::<Vec<DirectedCurve>>(),
    )?;

    let upper_surface = kernel.add_surface(upper_loop, &[])?;
    let lower_surface = kernel.add_surface(lower_loop, &[])?;
    let far_surface = kernel.add_surface(far_loop, &[])?;

    info!(
        "built layout: {} points, {} curves, {} surfaces",
        kernel.points().count(),
        kernel.curves().count(),
        kernel.surfaces().count()
    );

    let plate = |curves: [CurveId; 4], outline, surface| PlateHandles {
        bottom: curves[0],
        right: curves[1],
        top: curves[2],
        left: curves[3],
        outline,
        surface,
    };

    Ok(Layout {
        upper: plate(upper_curves, upper_loop, upper_surface),
        lower: plate(lower_curves, lower_loop, lower_surface),
        far_field: FarFieldHandles {
            curves: far_curves,
            outline: far_loop,
            surface: far_surface,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        boundary::{BoundaryCurveBuilder, DeformationPolicy},
        datatypes::CurveKind,
        modes::DeformationModel,
    };
    use approx::assert_relative_eq;

    fn edges(geometry: &PlateGeometry) -> (PlateEdges, PlateEdges) {
        let model = DeformationModel::new(
            100.0,
            &[-0.075, -0.075, -0.15, 0.15],
            &[0.018751, 0.046941, 0.078548, 0.109955],
            4,
            0.0,
        )
        .unwrap();
        let builder =
            BoundaryCurveBuilder::new(&model, None, DeformationPolicy::default(), 50, 6).unwrap();
        let (xmin, xmax) = geometry.span();
        let (ub, ut) = geometry.upper();
        let (lb, lt) = geometry.lower();
        (
            builder.plate(xmin, xmax, ub, ut).unwrap(),
            PlateEdges::rectangle(xmin, xmax, lb, lt),
        )
    }

    const HINTS: SizeHints = SizeHints {
        plate: 1.0,
        far_field: 4.0,
    };

    #[test]
    fn overetch_shrinks_plates_and_widens_gap() {
        let geometry = PlateGeometry::new(100.0, 5.0, 0.125, 2.0).unwrap();
        assert_relative_eq!(geometry.length, 99.75);
        assert_relative_eq!(geometry.thickness, 4.75);
        assert_relative_eq!(geometry.gap, 2.25);
        assert_eq!(geometry.upper(), (1.125, 5.875));
        assert_eq!(geometry.lower(), (-5.875, -1.125));
    }

    #[test]
    fn excessive_overetch_is_a_parameter_error() {
        assert!(matches!(
            PlateGeometry::new(100.0, 5.0, 2.5, 2.0),
            Err(PlatemeshError::Parameter(_))
        ));
        assert!(matches!(
            PlateGeometry::new(100.0, 5.0, -1.5, 2.0),
            Err(PlatemeshError::Parameter(_))
        ));
    }

    #[test]
    fn circular_layout_has_splines_and_quarter_arcs() {
        let geometry = PlateGeometry::new(100.0, 5.0, 0.125, 2.0).unwrap();
        let (upper, lower) = edges(&geometry);
        let mut kernel = GeometryKernel::new(100.0);
        let far_field = FarField {
            kind: FarFieldKind::Circle,
            margin: 50.0,
            elements: 40,
        };
        let layout = build(&mut kernel, &upper, &lower, &far_field, HINTS).unwrap();

        let top = kernel.curve(layout.upper.top).unwrap();
        assert_eq!(top.kind, CurveKind::Spline);
        assert_eq!(top.points.len(), 50);
        assert_eq!(
            kernel.curve(layout.lower.top).unwrap().kind,
            CurveKind::Line
        );
        assert_eq!(layout.far_field.curves.len(), 4);
        for &arc in &layout.far_field.curves {
            assert_eq!(kernel.curve(arc).unwrap().kind, CurveKind::Arc);
        }
        // plates 1 and 2, far field 3
        assert_eq!(layout.far_field.surface, SurfaceId(3));
        assert!(kernel.surface_area(layout.upper.surface).unwrap() > 0.0);
    }

    #[test]
    fn box_layout_encloses_plates_with_margin() {
        let geometry = PlateGeometry::new(100.0, 5.0, 0.125, 2.0).unwrap();
        let (upper, lower) = edges(&geometry);
        let mut kernel = GeometryKernel::new(100.0);
        let far_field = FarField {
            kind: FarFieldKind::Box,
            margin: 10.0,
            elements: 20,
        };
        let layout = build(&mut kernel, &upper, &lower, &far_field, HINTS).unwrap();
        let contour = kernel.loop_polygon(layout.far_field.outline).unwrap();

        assert_eq!(contour.len(), 4);
        assert_relative_eq!(contour[0].x, -59.875);
        assert_relative_eq!(contour[0].y, -15.875);
    }

    #[test]
    fn touching_plates_are_rejected() {
        let geometry = PlateGeometry::new(100.0, 5.0, 0.125, 2.0).unwrap();
        let (xmin, xmax) = geometry.span();
        let upper = PlateEdges::rectangle(xmin, xmax, -2.0, 3.0);
        let lower = PlateEdges::rectangle(xmin, xmax, -5.875, -1.125);
        let mut kernel = GeometryKernel::new(100.0);
        let far_field = FarField {
            kind: FarFieldKind::Circle,
            margin: 50.0,
            elements: 40,
        };
        assert!(matches!(
            build(&mut kernel, &upper, &lower, &far_field, HINTS),
            Err(PlatemeshError::Parameter(_))
        ));
    }
}
