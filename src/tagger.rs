//! Named, numbered physical groups over live entities.

use log::info;

use crate::{
    datatypes::{CurveId, GroupMembers, PhysicalGroup, SurfaceId},
    error::{PlatemeshError, Result},
    kernel::{GeometryKernel, Stage},
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhysicalGroupTagger {
    groups: Vec<PhysicalGroup>,
}

impl PhysicalGroupTagger {
    /// Starts the tagging stage of `kernel`
    pub fn new(kernel: &mut GeometryKernel) -> Result<PhysicalGroupTagger> {
        kernel.enter(Stage::PhysicalGroups)?;
        Ok(PhysicalGroupTagger::default())
    }

    pub fn add_curves(
        &mut self,
        kernel: &GeometryKernel,
        name: &str,
        tag: u32,
        curves: &[CurveId],
    ) -> Result<()> {
        for &curve in curves {
            kernel.curve(curve)?;
        }
        self.push(PhysicalGroup {
            name: name.to_owned(),
            tag,
            members: GroupMembers::Curves(curves.to_vec()),
        })
    }

    pub fn add_surfaces(
        &mut self,
        kernel: &GeometryKernel,
        name: &str,
        tag: u32,
        surfaces: &[SurfaceId],
    ) -> Result<()> {
        for &surface in surfaces {
            kernel.surface(surface)?;
        }
        self.push(PhysicalGroup {
            name: name.to_owned(),
            tag,
            members: GroupMembers::Surfaces(surfaces.to_vec()),
        })
    }

    fn push(&mut self, group: PhysicalGroup) -> Result<()> {
        if group.name.trim().is_empty() {
            return Err(PlatemeshError::Pipeline(
                "physical group name is empty".to_owned(),
            ));
        }
        if group.is_empty() {
            return Err(PlatemeshError::Pipeline(format!(
                "physical group \"{}\" has no members",
                group.name
            )));
        }
        if let Some(existing) = self.groups.iter().find(|g| {
            g.name == group.name || (g.tag == group.tag && g.dimension() == group.dimension())
        }) {
            return Err(PlatemeshError::Pipeline(format!(
                "physical group \"{}\" ({}) clashes with \"{}\" ({})",
                group.name, group.tag, existing.name, existing.tag
            )));
        }

        info!(
            "physical group \"{}\" ({}): {} entities of dimension {}",
            group.name,
            group.tag,
            group.len(),
            group.dimension()
        );
        self.groups.push(group);
        Ok(())
    }

    pub fn groups(&self) -> &[PhysicalGroup] {
        &self.groups
    }

    pub fn finish(self) -> Vec<PhysicalGroup> {
        self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{boolean, datatypes::DirectedCurve};

    /// Square with a square hole, returning the outer curves and surfaces
    fn nested_squares() -> (GeometryKernel, Vec<CurveId>, SurfaceId, SurfaceId) {
        let mut kernel = GeometryKernel::new(10.0);
        let corners = [(0.0, 0.0, 10.0), (4.0, 4.0, 2.0)];
        let points: Vec<Vec<_>> = corners
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
        let inner = kernel.add_surface(loops[1], &[]).unwrap();
        (kernel, curves.concat(), outer, inner)
    }

    #[test]
    fn pre_subtraction_handles_are_rejected() {
        let (mut kernel, curves, outer, inner) = nested_squares();
        let outcome = boolean::subtract(&mut kernel, outer, &[inner]).unwrap();
        let mut tagger = PhysicalGroupTagger::new(&mut kernel).unwrap();

        assert!(matches!(
            tagger.add_curves(&kernel, "boundary", 20, &curves[..4]),
            Err(PlatemeshError::Pipeline(_))
        ));
        assert!(matches!(
            tagger.add_surfaces(&kernel, "space", 30, &[outer]),
            Err(PlatemeshError::Pipeline(_))
        ));

        let renamed: Vec<CurveId> = curves[..4]
            .iter()
            .map(|&c| outcome.remap.curve(c).unwrap())
            .collect();
        tagger.add_curves(&kernel, "boundary", 20, &renamed).unwrap();
        tagger
            .add_surfaces(&kernel, "space", 30, &outcome.surfaces)
            .unwrap();

        let groups = tagger.finish();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].dimension(), 2);
    }

    #[test]
    fn clashing_names_or_tags_are_rejected() {
        let (mut kernel, curves, _, _) = nested_squares();
        let mut tagger = PhysicalGroupTagger::new(&mut kernel).unwrap();
        tagger.add_curves(&kernel, "upper_plate", 11, &curves[4..]).unwrap();

        assert!(tagger
            .add_curves(&kernel, "upper_plate", 12, &curves[..1])
            .is_err());
        assert!(tagger
            .add_curves(&kernel, "lower_plate", 11, &curves[..1])
            .is_err());
        assert!(tagger.add_curves(&kernel, "empty", 13, &[]).is_err());
        assert_eq!(tagger.groups().len(), 1);
    }
}
