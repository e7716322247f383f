//! Sampling of deformed plate edges.
//!
//! Every edge is produced in increasing physical coordinate: bottom and top
//! run left to right, left and right run bottom to top. Corner points are
//! shared between the long and the short edges.

use nalgebra::Point2;

use crate::{
    error::{PlatemeshError, Result},
    modes::DeformationModel,
};

/// Which edges of a pair receive deflection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgePolicy {
    None,
    /// Only the leading edge deflects (top for long edges, right for short edges)
    OneSided,
    Symmetric,
}

impl EdgePolicy {
    pub fn parse(value: &str) -> Option<EdgePolicy> {
        match value.trim() {
            "none" => Some(EdgePolicy::None),
            "one_sided" | "cantilever" => Some(EdgePolicy::OneSided),
            "symmetric" => Some(EdgePolicy::Symmetric),
            _ => None,
        }
    }

    fn leading(&self) -> bool {
        *self != EdgePolicy::None
    }

    fn trailing(&self) -> bool {
        *self == EdgePolicy::Symmetric
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeformationPolicy {
    pub long_edges: EdgePolicy,
    pub short_edges: EdgePolicy,
}

impl Default for DeformationPolicy {
    fn default() -> Self {
        DeformationPolicy {
            long_edges: EdgePolicy::Symmetric,
            short_edges: EdgePolicy::None,
        }
    }
}

/// Ordered samples along one physical edge
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub points: Vec<Point2<f64>>,
    pub deformed: bool,
}

impl Edge {
    fn straight(from: Point2<f64>, to: Point2<f64>) -> Edge {
        Edge {
            points: vec![from, to],
            deformed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlateEdges {
    pub bottom: Edge,
    pub right: Edge,
    pub top: Edge,
    pub left: Edge,
}

impl PlateEdges {
    /// Undeformed rectangle with straight edges
    pub fn rectangle(xmin: f64, xmax: f64, y_bottom: f64, y_top: f64) -> PlateEdges {
        let bottom_left = Point2::new(xmin, y_bottom);
        let bottom_right = Point2::new(xmax, y_bottom);
        let top_right = Point2::new(xmax, y_top);
        let top_left = Point2::new(xmin, y_top);

        PlateEdges {
            bottom: Edge::straight(bottom_left, bottom_right),
            right: Edge::straight(bottom_right, top_right),
            top: Edge::straight(top_left, top_right),
            left: Edge::straight(bottom_left, top_left),
        }
    }

    pub fn edges(&self) -> [&Edge; 4] {
        [&self.bottom, &self.right, &self.top, &self.left]
    }

    /// Lowest sampled y of the plate outline
    pub fn min_y(&self) -> f64 {
        self.edges()
            .iter()
            .flat_map(|e| e.points.iter())
            .fold(f64::INFINITY, |m, p| m.min(p.y))
    }

    /// Axis-aligned bounding box as `(min, max)` corners
    pub fn bounds(&self) -> (Point2<f64>, Point2<f64>) {
        self.edges().iter().flat_map(|e| e.points.iter()).fold(
            (
                Point2::new(f64::INFINITY, f64::INFINITY),
                Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            ),
            |(lo, hi), p| {
                (
                    Point2::new(lo.x.min(p.x), lo.y.min(p.y)),
                    Point2::new(hi.x.max(p.x), hi.y.max(p.y)),
                )
            },
        )
    }
}

/// Produces `count` uniformly spaced values with exact end points
///
/// # Arguments
/// * `min` - First sample
/// * `max` - Last sample
/// * `count` - Number of samples, at least two
pub fn sample_span(min: f64, max: f64, count: usize) -> Result<Vec<f64>> {
    if count < 2 {
        return Err(PlatemeshError::Parameter(format!(
            "sample count must be at least 2, got {count}"
        )));
    }
    if !(min.is_finite() && max.is_finite()) || max <= min {
        return Err(PlatemeshError::Parameter(format!(
            "invalid sample span [{min}, {max}]"
        )));
    }

    let step = (max - min) / (count - 1) as f64;
    let mut samples: Vec<f64> = (0..count).map(|i| min + i as f64 * step).collect();
    samples[count - 1] = max;

    Ok(samples)
}

pub struct BoundaryCurveBuilder<'a> {
    model: &'a DeformationModel,
    end_model: Option<&'a DeformationModel>,
    policy: DeformationPolicy,
    nx: usize,
    ny: usize,
}

impl<'a> BoundaryCurveBuilder<'a> {
    pub fn new(
        model: &'a DeformationModel,
        end_model: Option<&'a DeformationModel>,
        policy: DeformationPolicy,
        nx: usize,
        ny: usize,
    ) -> Result<BoundaryCurveBuilder<'a>> {
        if policy.short_edges != EdgePolicy::None && end_model.is_none() {
            return Err(PlatemeshError::Parameter(
                "short edge deformation requires end modes".to_owned(),
            ));
        }
        Ok(BoundaryCurveBuilder {
            model,
            end_model,
            policy,
            nx,
            ny,
        })
    }

    /// Evaluates a long edge at baseline `y`, deflected or straight
    fn long_edge(&self, xs: &[f64], y: f64, deformed: bool) -> Edge {
        if !deformed {
            return Edge::straight(
                Point2::new(xs[0], y),
                Point2::new(xs[xs.len() - 1], y),
            );
        }
        Edge {
            points: xs
                .iter()
                .map(|&x| Point2::new(x, y + self.model.deflection(x)))
                .collect(),
            deformed: true,
        }
    }

    /// Evaluates a short edge between two corners sharing the same x.
    /// The end deflection is taken relative to its chord so both corners stay put.
    fn short_edge(&self, from: Point2<f64>, to: Point2<f64>, deformed: bool) -> Result<Edge> {
        let end_model = match (deformed, self.end_model) {
            (true, Some(m)) => m,
            _ => return Ok(Edge::straight(from, to)),
        };

        let half = 0.5 * end_model.length;
        let w_start = end_model.deflection(-half);
        let w_end = end_model.deflection(half);

        let samples = sample_span(0.0, 1.0, self.ny)?;
        let mut points = Vec::with_capacity(samples.len());
        for (i, &s) in samples.iter().enumerate() {
            if i == 0 {
                points.push(from);
                continue;
            }
            if i == samples.len() - 1 {
                points.push(to);
                continue;
            }
            let chord = (1.0 - s) * w_start + s * w_end;
            let offset = end_model.deflection(-half + s * end_model.length) - chord;
            let y = from.y + s * (to.y - from.y);
            points.push(Point2::new(from.x + offset, y));
        }

        Ok(Edge {
            points,
            deformed: true,
        })
    }

    /// Samples the four edges of a plate spanning `[xmin, xmax] x [y_bottom, y_top]`
    ///
    /// # Arguments
    /// * `xmin`, `xmax` - Horizontal extent of the plate
    /// * `y_bottom`, `y_top` - Undeformed vertical extent
    ///
    /// # Returns
    /// The bottom, right, top and left edges
    pub fn plate(&self, xmin: f64, xmax: f64, y_bottom: f64, y_top: f64) -> Result<PlateEdges> {
        if y_top <= y_bottom {
            return Err(PlatemeshError::Parameter(format!(
                "plate thickness must be positive, got [{y_bottom}, {y_top}]"
            )));
        }

        let xs = sample_span(xmin, xmax, self.nx)?;
        let long = self.policy.long_edges;
        let bottom = self.long_edge(&xs, y_bottom, long.trailing());
        let top = self.long_edge(&xs, y_top, long.leading());

        // With one deflected edge the thickness varies along the span
        if long == EdgePolicy::OneSided {
            if let Some(x) = xs
                .iter()
                .find(|&&x| y_top + self.model.deflection(x) <= y_bottom)
            {
                return Err(PlatemeshError::Parameter(format!(
                    "deflected top edge crosses the bottom edge at x = {x}"
                )));
            }
        }

        let bottom_left = bottom.points[0];
        let bottom_right = bottom.points[bottom.points.len() - 1];
        let top_left = top.points[0];
        let top_right = top.points[top.points.len() - 1];

        let short = self.policy.short_edges;
        let right = self.short_edge(bottom_right, top_right, short.leading())?;
        let left = self.short_edge(bottom_left, top_left, short.trailing())?;

        Ok(PlateEdges {
            bottom,
            right,
            top,
            left,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn model() -> DeformationModel {
        DeformationModel::new(
            100.0,
            &[-0.075, -0.075, -0.15, 0.15],
            &[0.018751, 0.046941, 0.078548, 0.109955],
            4,
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn span_has_exact_end_points() {
        let xs = sample_span(-49.875, 49.875, 2).unwrap();
        assert_eq!(xs, vec![-49.875, 49.875]);

        let xs = sample_span(-0.1, 0.7, 7).unwrap();
        assert_eq!(xs.len(), 7);
        assert_eq!(xs[0], -0.1);
        assert_eq!(xs[6], 0.7);
        assert!(xs.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn span_rejects_single_sample() {
        assert!(matches!(
            sample_span(0.0, 1.0, 1),
            Err(PlatemeshError::Parameter(_))
        ));
    }

    #[test]
    fn two_samples_give_two_points_per_deformed_edge() {
        let model = model();
        let builder =
            BoundaryCurveBuilder::new(&model, None, DeformationPolicy::default(), 2, 2).unwrap();
        let edges = builder.plate(-10.0, 10.0, 1.0, 4.0).unwrap();
        assert_eq!(edges.top.points.len(), 2);
        assert_eq!(edges.bottom.points.len(), 2);
        assert_eq!(edges.top.points[0].x, -10.0);
        assert_eq!(edges.top.points[1].x, 10.0);
    }

    #[test]
    fn symmetric_policy_deflects_both_long_edges_equally() {
        let model = model();
        let builder =
            BoundaryCurveBuilder::new(&model, None, DeformationPolicy::default(), 50, 6).unwrap();
        let edges = builder.plate(-49.875, 49.875, 1.125, 5.875).unwrap();

        assert!(edges.top.deformed && edges.bottom.deformed);
        assert_eq!(edges.top.points.len(), 50);
        for (t, b) in edges.top.points.iter().zip(&edges.bottom.points) {
            assert_relative_eq!(t.y - b.y, 4.75, epsilon = 1e-12);
        }
        assert!(edges.top.points.windows(2).all(|w| w[1].x > w[0].x));
        assert!(!edges.left.deformed && !edges.right.deformed);
    }

    #[test]
    fn one_sided_policy_keeps_bottom_rigid() {
        let model = model();
        let policy = DeformationPolicy {
            long_edges: EdgePolicy::OneSided,
            short_edges: EdgePolicy::None,
        };
        let builder = BoundaryCurveBuilder::new(&model, None, policy, 20, 4).unwrap();
        let edges = builder.plate(-49.875, 49.875, 1.125, 5.875).unwrap();

        assert!(edges.top.deformed);
        assert!(!edges.bottom.deformed);
        assert_eq!(edges.bottom.points.len(), 2);
        assert_eq!(edges.bottom.points[0].y, 1.125);
        // Corners are shared with the short edges
        assert_eq!(edges.right.points[0], edges.bottom.points[1]);
        assert_eq!(edges.right.points[1], edges.top.points[19]);
    }

    #[test]
    fn deformed_short_edges_keep_their_corners() {
        let model = model();
        let ends = DeformationModel::new(4.75, &[0.05], &[0.3948], 1, 0.0).unwrap();
        let policy = DeformationPolicy {
            long_edges: EdgePolicy::Symmetric,
            short_edges: EdgePolicy::Symmetric,
        };
        let builder = BoundaryCurveBuilder::new(&model, Some(&ends), policy, 10, 7).unwrap();
        let edges = builder.plate(-49.875, 49.875, 1.125, 5.875).unwrap();

        assert_eq!(edges.left.points.len(), 7);
        assert_eq!(edges.left.points[0], edges.bottom.points[0]);
        assert_eq!(edges.left.points[6], edges.top.points[0]);
        assert_eq!(edges.right.points[0], edges.bottom.points[9]);
        assert_eq!(edges.right.points[6], edges.top.points[9]);
        assert!(edges.right.points.windows(2).all(|w| w[1].y > w[0].y));
    }

    #[test]
    fn short_edge_deformation_requires_end_modes() {
        let model = model();
        let policy = DeformationPolicy {
            long_edges: EdgePolicy::None,
            short_edges: EdgePolicy::OneSided,
        };
        assert!(matches!(
            BoundaryCurveBuilder::new(&model, None, policy, 10, 4),
            Err(PlatemeshError::Parameter(_))
        ));
    }

    #[test]
    fn policy_names_parse() {
        assert_eq!(EdgePolicy::parse("symmetric"), Some(EdgePolicy::Symmetric));
        assert_eq!(EdgePolicy::parse("cantilever"), Some(EdgePolicy::OneSided));
        assert_eq!(EdgePolicy::parse("wobbly"), None);
    }
}
