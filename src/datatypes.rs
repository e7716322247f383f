use std::fmt::Display;

use nalgebra::Point2;

macro_rules! handle {
    ($name:ident, $label:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub usize);

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{} {}", $label, self.0)
            }
        }
    };
}

handle!(PointId, "point");
handle!(CurveId, "curve");
handle!(LoopId, "loop");
handle!(SurfaceId, "surface");

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

impl From<Point2<f64>> for Vertex {
    fn from(p: Point2<f64>) -> Self {
        Vertex { x: p.x, y: p.y }
    }
}

impl From<Vertex> for Point2<f64> {
    fn from(v: Vertex) -> Self {
        Point2::new(v.x, v.y)
    }
}

/// A geometric point with an optional local mesh size hint
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub position: Point2<f64>,
    pub z: f64,
    pub size_hint: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveKind {
    Line,
    /// Interpolating spline through every control point
    Spline,
    /// Circular arc from the first to the last point about `Curve::center`
    Arc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    pub kind: CurveKind,
    pub points: Vec<PointId>,
    pub center: Option<PointId>,
}

impl Curve {
    pub fn start(&self) -> PointId {
        self.points[0]
    }

    pub fn end(&self) -> PointId {
        self.points[self.points.len() - 1]
    }
}

/// A curve handle with a traversal sign, as used inside curve loops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirectedCurve {
    pub curve: CurveId,
    pub reversed: bool,
}

impl DirectedCurve {
    pub fn forward(curve: CurveId) -> Self {
        DirectedCurve {
            curve,
            reversed: false,
        }
    }

    pub fn reversed(curve: CurveId) -> Self {
        DirectedCurve {
            curve,
            reversed: true,
        }
    }

    /// Signed handle in Gmsh notation
    pub fn signed(&self) -> i64 {
        let id = self.curve.0 as i64;
        if self.reversed {
            -id
        } else {
            id
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurveLoop {
    pub curves: Vec<DirectedCurve>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pub outer: LoopId,
    pub holes: Vec<LoopId>,
}

impl Surface {
    pub fn loops(&self) -> impl Iterator<Item = LoopId> + '_ {
        std::iter::once(self.outer).chain(self.holes.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupMembers {
    Curves(Vec<CurveId>),
    Surfaces(Vec<SurfaceId>),
}

/// Named and tagged entity collection consumed by the field solver
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalGroup {
    pub name: String,
    pub tag: u32,
    pub members: GroupMembers,
}

impl PhysicalGroup {
    /// Topological dimension of the members
    pub fn dimension(&self) -> usize {
        match self.members {
            GroupMembers::Curves(_) => 1,
            GroupMembers::Surfaces(_) => 2,
        }
    }

    pub fn len(&self) -> usize {
        match &self.members {
            GroupMembers::Curves(c) => c.len(),
            GroupMembers::Surfaces(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub vertex: Vertex,
}

/// Two-node boundary element lying on a curve
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub nodes: [usize; 2],
    pub curve: CurveId,
}

/// Three-node element lying on a surface, counter-clockwise
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub nodes: [usize; 3],
    pub surface: SurfaceId,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mesh {
    pub nodes: Vec<Node>,
    pub segments: Vec<Segment>,
    pub elements: Vec<Element>,
    pub groups: Vec<PhysicalGroup>,
}

impl Mesh {
    pub fn group(&self, name: &str) -> Option<&PhysicalGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn element_area(&self, element: &Element) -> f64 {
        let v0 = &self.nodes[element.nodes[0]].vertex;
        let v1 = &self.nodes[element.nodes[1]].vertex;
        let v2 = &self.nodes[element.nodes[2]].vertex;

        0.5 * (v0.x * (v1.y - v2.y) + v1.x * (v2.y - v0.y) + v2.x * (v0.y - v1.y))
    }

    pub fn total_area(&self) -> f64 {
        self.elements.iter().map(|e| self.element_area(e)).sum()
    }

    pub fn segments_on(&self, curve: CurveId) -> impl Iterator<Item = &Segment> + '_ {
        self.segments.iter().filter(move |s| s.curve == curve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directed_curve_sign_follows_gmsh() {
        assert_eq!(DirectedCurve::forward(CurveId(7)).signed(), 7);
        assert_eq!(DirectedCurve::reversed(CurveId(7)).signed(), -7);
    }

    #[test]
    fn element_area_is_signed() {
        let mesh = Mesh {
            nodes: vec![
                Node { vertex: Vertex { x: 0.0, y: 0.0 } },
                Node { vertex: Vertex { x: 2.0, y: 0.0 } },
                Node { vertex: Vertex { x: 0.0, y: 1.0 } },
            ],
            segments: vec![],
            elements: vec![
                Element { nodes: [0, 1, 2], surface: SurfaceId(1) },
                Element { nodes: [0, 2, 1], surface: SurfaceId(1) },
            ],
            groups: vec![],
        };
        assert_eq!(mesh.element_area(&mesh.elements[0]), 1.0);
        assert_eq!(mesh.element_area(&mesh.elements[1]), -1.0);
    }
}
