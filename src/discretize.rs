//! Structured element counts per curve.

use std::collections::BTreeMap;

use log::debug;

use crate::{
    datatypes::CurveId,
    error::{PlatemeshError, Result},
    kernel::{GeometryKernel, Stage},
};

/// Four curves bounding one structured region, as two opposite pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructuredPatch {
    pub bottom: CurveId,
    pub right: CurveId,
    pub top: CurveId,
    pub left: CurveId,
}

impl StructuredPatch {
    pub fn from_curves(curves: [CurveId; 4]) -> StructuredPatch {
        StructuredPatch {
            bottom: curves[0],
            right: curves[1],
            top: curves[2],
            left: curves[3],
        }
    }

    fn opposite_pairs(&self) -> [(CurveId, CurveId); 2] {
        [(self.bottom, self.top), (self.left, self.right)]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshDiscretizer {
    counts: BTreeMap<CurveId, usize>,
    patches: Vec<StructuredPatch>,
}

impl MeshDiscretizer {
    /// Starts the discretization stage of `kernel`
    pub fn new(kernel: &mut GeometryKernel) -> Result<MeshDiscretizer> {
        kernel.enter(Stage::TransfiniteConstraints)?;
        Ok(MeshDiscretizer::default())
    }

    /// Fixes the number of elements along a curve
    ///
    /// # Arguments
    /// * `kernel` - The kernel owning the curve
    /// * `curve` - A live curve handle
    /// * `elements` - Number of segments, at least one
    pub fn set_count(
        &mut self,
        kernel: &GeometryKernel,
        curve: CurveId,
        elements: usize,
    ) -> Result<()> {
        kernel.curve(curve)?;
        if elements == 0 {
            return Err(PlatemeshError::MeshNonConvergence(format!(
                "{curve} cannot be split into zero elements"
            )));
        }
        if let Some(previous) = self.counts.insert(curve, elements) {
            debug!("{curve}: element count {previous} replaced by {elements}");
        }
        Ok(())
    }

    /// Declares a structured region whose opposite edges must match
    pub fn add_patch(&mut self, kernel: &GeometryKernel, patch: StructuredPatch) -> Result<()> {
        for curve in [patch.bottom, patch.right, patch.top, patch.left] {
            kernel.curve(curve)?;
        }
        self.patches.push(patch);
        Ok(())
    }

    pub fn count(&self, curve: CurveId) -> Option<usize> {
        self.counts.get(&curve).copied()
    }

    pub fn counts(&self) -> impl Iterator<Item = (&CurveId, &usize)> {
        self.counts.iter()
    }

    pub fn patches(&self) -> &[StructuredPatch] {
        &self.patches
    }

    /// Boundary nodes the counts produce. A closed loop of `k` segments has
    /// `k` nodes, so this is the sum of all counts.
    pub fn boundary_nodes(&self) -> usize {
        self.counts
            .values()
            .fold(0usize, |total, &n| total.saturating_add(n))
    }

    /// Fails before any curve is sampled when the boundary alone exceeds
    /// the node budget
    pub fn check_budget(&self, max_nodes: usize) -> Result<()> {
        let nodes = self.boundary_nodes();
        if nodes > max_nodes {
            return Err(PlatemeshError::MeshNonConvergence(format!(
                "element counts put {nodes} nodes on the boundary, budget is {max_nodes}"
            )));
        }
        Ok(())
    }

    /// Checks that every structured patch is fully constrained and that
    /// opposite edges carry equal counts
    pub fn validate(&self) -> Result<()> {
        for patch in &self.patches {
            for (a, b) in patch.opposite_pairs() {
                match (self.count(a), self.count(b)) {
                    (Some(na), Some(nb)) if na == nb => {}
                    (Some(na), Some(nb)) => {
                        return Err(PlatemeshError::MeshNonConvergence(format!(
                            "opposite edges {a} and {b} have {na} and {nb} elements"
                        )))
                    }
                    _ => {
                        return Err(PlatemeshError::MeshNonConvergence(format!(
                            "structured patch edge {a} or {b} has no element count"
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::DirectedCurve;

    fn square() -> (GeometryKernel, [CurveId; 4]) {
        let mut kernel = GeometryKernel::new(1.0);
        let p = [
            kernel.add_point(0.0, 0.0).unwrap(),
            kernel.add_point(1.0, 0.0).unwrap(),
            kernel.add_point(1.0, 1.0).unwrap(),
            kernel.add_point(0.0, 1.0).unwrap(),
        ];
        let bottom = kernel.add_line(p[0], p[1]).unwrap();
        let right = kernel.add_line(p[1], p[2]).unwrap();
        let top = kernel.add_line(p[3], p[2]).unwrap();
        let left = kernel.add_line(p[0], p[3]).unwrap();
        let outline = kernel
            .add_loop(&[
                DirectedCurve::forward(bottom),
                DirectedCurve::forward(right),
                DirectedCurve::reversed(top),
                DirectedCurve::reversed(left),
            ])
            .unwrap();
        kernel.add_surface(outline, &[]).unwrap();
        (kernel, [bottom, right, top, left])
    }

    #[test]
    fn matching_opposite_counts_validate() {
        let (mut kernel, curves) = square();
        let mut discretizer = MeshDiscretizer::new(&mut kernel).unwrap();
        for (curve, n) in curves.iter().zip([8, 3, 8, 3]) {
            discretizer.set_count(&kernel, *curve, n).unwrap();
        }
        discretizer
            .add_patch(&kernel, StructuredPatch::from_curves(curves))
            .unwrap();
        assert!(discretizer.validate().is_ok());
        assert_eq!(discretizer.count(curves[1]), Some(3));
    }

    #[test]
    fn unequal_opposite_counts_do_not_converge() {
        let (mut kernel, curves) = square();
        let mut discretizer = MeshDiscretizer::new(&mut kernel).unwrap();
        for (curve, n) in curves.iter().zip([8, 3, 9, 3]) {
            discretizer.set_count(&kernel, *curve, n).unwrap();
        }
        discretizer
            .add_patch(&kernel, StructuredPatch::from_curves(curves))
            .unwrap();
        assert!(matches!(
            discretizer.validate(),
            Err(PlatemeshError::MeshNonConvergence(_))
        ));
    }

    #[test]
    fn missing_count_does_not_converge() {
        let (mut kernel, curves) = square();
        let mut discretizer = MeshDiscretizer::new(&mut kernel).unwrap();
        discretizer.set_count(&kernel, curves[0], 4).unwrap();
        discretizer.set_count(&kernel, curves[2], 4).unwrap();
        discretizer
            .add_patch(&kernel, StructuredPatch::from_curves(curves))
            .unwrap();
        assert!(matches!(
            discretizer.validate(),
            Err(PlatemeshError::MeshNonConvergence(_))
        ));
    }

    #[test]
    fn boundary_beyond_the_node_budget_is_rejected() {
        let (mut kernel, curves) = square();
        let mut discretizer = MeshDiscretizer::new(&mut kernel).unwrap();
        for (curve, n) in curves.iter().zip([usize::MAX, 3, usize::MAX, 3]) {
            discretizer.set_count(&kernel, *curve, n).unwrap();
        }
        assert_eq!(discretizer.boundary_nodes(), usize::MAX);
        assert!(matches!(
            discretizer.check_budget(200_000),
            Err(PlatemeshError::MeshNonConvergence(_))
        ));

        discretizer.set_count(&kernel, curves[0], 8).unwrap();
        discretizer.set_count(&kernel, curves[2], 8).unwrap();
        assert_eq!(discretizer.boundary_nodes(), 22);
        assert!(discretizer.check_budget(22).is_ok());
    }

    #[test]
    fn zero_elements_and_unknown_curves_are_rejected() {
        let (mut kernel, curves) = square();
        let mut discretizer = MeshDiscretizer::new(&mut kernel).unwrap();
        assert!(matches!(
            discretizer.set_count(&kernel, curves[0], 0),
            Err(PlatemeshError::MeshNonConvergence(_))
        ));
        assert!(matches!(
            discretizer.set_count(&kernel, CurveId(99), 4),
            Err(PlatemeshError::Pipeline(_))
        ));
    }
}
