//! Geometry template loading and per-invocation parameter overrides.
//!
//! A template is a JSON object:
//!
//! ```json
//! {
//!     "parameters": { "length": 100, "overetch": 0.125, "coeff": [-0.075, -0.075, -0.15, 0.15] },
//!     "deformation": { "long_edges": "symmetric", "short_edges": "none" },
//!     "far_field": { "kind": "circle", "margin": 50, "elements": 40 },
//!     "physical_groups": { "force_segment": 10, "space": 30 },
//!     "mesh": { "grading": 0.3, "max_nodes": 200000 }
//! }
//! ```
//!
//! Only `parameters` is required; every missing key keeps its default.

use std::path::Path;

use json::JsonValue;
use log::info;

use crate::{
    boundary::{DeformationPolicy, EdgePolicy},
    error::{PlatemeshError, Result},
    layout::{FarField, FarFieldKind},
    mesher::MeshOptions,
};

/// Clamped-free wavenumbers of the first four modes for a beam of length 100
pub const CLAMPED_FREE_BETAS: [f64; 4] = [0.018751, 0.046941, 0.078548, 0.109955];

const SCALAR_PARAMETERS: [&str; 10] = [
    "length",
    "thickness",
    "overetch",
    "distance",
    "n",
    "offset",
    "nx",
    "ny",
    "r",
    "margin",
];

/// Mode model for the deflection of the short edges
#[derive(Debug, Clone, PartialEq)]
pub struct EndModes {
    pub length: f64,
    pub coeff: Vec<f64>,
    pub beta: Vec<f64>,
}

/// Numeric tags of the physical groups read by the solver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupTags {
    pub force_segment: u32,
    pub upper_plate: u32,
    pub lower_plate: u32,
    pub boundary: u32,
    pub space: u32,
}

impl Default for GroupTags {
    fn default() -> Self {
        GroupTags {
            force_segment: 10,
            upper_plate: 11,
            lower_plate: 12,
            boundary: 20,
            space: 30,
        }
    }
}

impl GroupTags {
    pub fn named(&self) -> [(&'static str, u32); 5] {
        [
            ("force_segment", self.force_segment),
            ("upper_plate", self.upper_plate),
            ("lower_plate", self.lower_plate),
            ("boundary", self.boundary),
            ("space", self.space),
        ]
    }

    fn slot(&mut self, name: &str) -> Option<&mut u32> {
        match name {
            "force_segment" => Some(&mut self.force_segment),
            "upper_plate" => Some(&mut self.upper_plate),
            "lower_plate" => Some(&mut self.lower_plate),
            "boundary" => Some(&mut self.boundary),
            "space" => Some(&mut self.space),
            _ => None,
        }
    }
}

/// Every parameter of one pipeline invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub length: f64,
    pub thickness: f64,
    pub overetch: f64,
    pub distance: f64,
    /// Number of modes used from `coeff` / `beta`
    pub n: usize,
    pub coeff: Vec<f64>,
    pub beta: Vec<f64>,
    pub offset: f64,
    pub nx: usize,
    pub ny: usize,
    /// Discretization-density multiplier
    pub r: f64,
    pub policy: DeformationPolicy,
    pub end_modes: Option<EndModes>,
    pub far_field: FarField,
    pub tags: GroupTags,
    pub mesh: MeshOptions,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            length: 100.0,
            thickness: 5.0,
            overetch: 0.125,
            distance: 2.0,
            n: 4,
            coeff: vec![-0.075, -0.075, -0.15, 0.15],
            beta: CLAMPED_FREE_BETAS.to_vec(),
            offset: 0.0,
            nx: 50,
            ny: 6,
            r: 2.0,
            policy: DeformationPolicy::default(),
            end_modes: None,
            far_field: FarField {
                kind: FarFieldKind::Circle,
                margin: 50.0,
                elements: 40,
            },
            tags: GroupTags::default(),
            mesh: MeshOptions::default(),
        }
    }
}

fn template_error(message: String) -> PlatemeshError {
    PlatemeshError::Template(message)
}

fn number(value: &JsonValue, key: &str) -> Result<f64> {
    match value.as_f64() {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(template_error(format!("\"{key}\" must be a number, got {value}"))),
    }
}

fn integer(value: &JsonValue, key: &str) -> Result<usize> {
    let v = number(value, key)?;
    if v < 0.0 || v.fract() != 0.0 {
        return Err(template_error(format!(
            "\"{key}\" must be a non-negative integer, got {v}"
        )));
    }
    Ok(v as usize)
}

fn text<'a>(value: &'a JsonValue, key: &str) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| template_error(format!("\"{key}\" must be a string, got {value}")))
}

fn numbers(value: &JsonValue, key: &str) -> Result<Vec<f64>> {
    if !value.is_array() {
        return Err(template_error(format!(
            "\"{key}\" must be a list of numbers, got {value}"
        )));
    }
    value.members().map(|v| number(v, key)).collect()
}

fn section<'a>(value: &'a JsonValue, key: &str) -> Result<&'a JsonValue> {
    if !value.is_object() {
        return Err(template_error(format!(
            "\"{key}\" must be an object, got {value}"
        )));
    }
    Ok(value)
}

/// Splits `coeff(3)` into `("coeff", 3)`
fn indexed(name: &str) -> Option<(&str, usize)> {
    let (base, rest) = name.split_once('(')?;
    let index = rest.strip_suffix(')')?.trim().parse().ok()?;
    Some((base.trim(), index))
}

/// Parses a `name=value` override
pub fn parse_override(assignment: &str) -> Result<(String, f64)> {
    let (name, value) = assignment.split_once('=').ok_or_else(|| {
        template_error(format!("override \"{assignment}\" is not of the form name=value"))
    })?;
    let value: f64 = value.trim().parse().map_err(|_| {
        template_error(format!("override \"{assignment}\" has a non-numeric value"))
    })?;
    Ok((name.trim().to_owned(), value))
}

fn as_count(name: &str, value: f64) -> Result<usize> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return Err(PlatemeshError::Parameter(format!(
            "{name} must be a non-negative integer, got {value}"
        )));
    }
    Ok(value as usize)
}

impl ModelConfig {
    /// Parses a template from its JSON text
    pub fn from_json(contents: &str) -> Result<ModelConfig> {
        let template = json::parse(contents)
            .map_err(|err| template_error(format!("Error in template json: {err}")))?;

        if !template.is_object() {
            return Err(template_error("template must be a json object".to_owned()));
        }
        if !template.has_key("parameters") {
            return Err(template_error(
                "template is missing the parameters section".to_owned(),
            ));
        }

        let mut config = ModelConfig::default();
        for (key, value) in template.entries() {
            match key {
                "parameters" => config.read_parameters(section(value, key)?)?,
                "deformation" => config.read_deformation(section(value, key)?)?,
                "far_field" => config.read_far_field(section(value, key)?)?,
                "physical_groups" => config.read_groups(section(value, key)?)?,
                "mesh" => config.read_mesh(section(value, key)?)?,
                _ => {
                    return Err(template_error(format!(
                        "unknown template section \"{key}\""
                    )))
                }
            }
        }

        Ok(config)
    }

    /// Loads a template file
    ///
    /// # Arguments
    /// * `path` - Path to the JSON template
    ///
    /// # Returns
    /// The configuration with the template values applied over the defaults
    pub fn load(path: &Path) -> Result<ModelConfig> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            template_error(format!("Unable to open template {}: {err}", path.display()))
        })?;
        let config = ModelConfig::from_json(&contents)?;
        info!("loaded template {}", path.display());
        Ok(config)
    }

    fn read_parameters(&mut self, parameters: &JsonValue) -> Result<()> {
        for (key, value) in parameters.entries() {
            match key {
                "coeff" => self.coeff = numbers(value, key)?,
                "beta" => self.beta = numbers(value, key)?,
                "n" => self.n = integer(value, key)?,
                "nx" => self.nx = integer(value, key)?,
                "ny" => self.ny = integer(value, key)?,
                "length" => self.length = number(value, key)?,
                "thickness" => self.thickness = number(value, key)?,
                "overetch" => self.overetch = number(value, key)?,
                "distance" => self.distance = number(value, key)?,
                "offset" => self.offset = number(value, key)?,
                "r" => self.r = number(value, key)?,
                _ => return Err(template_error(format!("unknown parameter \"{key}\""))),
            }
        }
        Ok(())
    }

    fn read_deformation(&mut self, deformation: &JsonValue) -> Result<()> {
        for (key, value) in deformation.entries() {
            match key {
                "long_edges" | "short_edges" => {
                    let policy = EdgePolicy::parse(text(value, key)?).ok_or_else(|| {
                        template_error(format!("unknown edge policy {value} for \"{key}\""))
                    })?;
                    if key == "long_edges" {
                        self.policy.long_edges = policy;
                    } else {
                        self.policy.short_edges = policy;
                    }
                }
                "end_modes" => {
                    let modes = section(value, key)?;
                    let mut end = EndModes {
                        length: self.thickness,
                        coeff: Vec::new(),
                        beta: Vec::new(),
                    };
                    for (key, value) in modes.entries() {
                        match key {
                            "length" => end.length = number(value, key)?,
                            "coeff" => end.coeff = numbers(value, key)?,
                            "beta" => end.beta = numbers(value, key)?,
                            _ => {
                                return Err(template_error(format!(
                                    "unknown end_modes key \"{key}\""
                                )))
                            }
                        }
                    }
                    self.end_modes = Some(end);
                }
                _ => return Err(template_error(format!("unknown deformation key \"{key}\""))),
            }
        }
        Ok(())
    }

    fn read_far_field(&mut self, far_field: &JsonValue) -> Result<()> {
        for (key, value) in far_field.entries() {
            match key {
                "kind" => {
                    self.far_field.kind = FarFieldKind::parse(text(value, key)?).ok_or_else(
                        || template_error(format!("unknown far field kind {value}")),
                    )?
                }
                "margin" => self.far_field.margin = number(value, key)?,
                "elements" => self.far_field.elements = integer(value, key)?,
                _ => return Err(template_error(format!("unknown far_field key \"{key}\""))),
            }
        }
        Ok(())
    }

    fn read_groups(&mut self, groups: &JsonValue) -> Result<()> {
        for (key, value) in groups.entries() {
            let tag = integer(value, key)?;
            let tag = u32::try_from(tag)
                .map_err(|_| template_error(format!("tag of \"{key}\" is out of range")))?;
            match self.tags.slot(key) {
                Some(slot) => *slot = tag,
                None => return Err(template_error(format!("unknown physical group \"{key}\""))),
            }
        }

        // Curve groups and surface groups live in separate tag spaces in the
        // artifact, but the solver looks them up by tag alone.
        let named = self.tags.named();
        for (i, (name, tag)) in named.iter().enumerate() {
            if let Some((other, _)) = named[i + 1..].iter().find(|(_, t)| t == tag) {
                return Err(template_error(format!(
                    "physical groups \"{name}\" and \"{other}\" share tag {tag}"
                )));
            }
        }
        Ok(())
    }

    fn read_mesh(&mut self, mesh: &JsonValue) -> Result<()> {
        for (key, value) in mesh.entries() {
            match key {
                "grading" => self.mesh.grading = number(value, key)?,
                "max_nodes" => self.mesh.max_nodes = integer(value, key)?,
                _ => return Err(template_error(format!("unknown mesh key \"{key}\""))),
            }
        }
        Ok(())
    }

    /// Checks that `name` addresses an overridable parameter
    pub fn validate_override_name(&self, name: &str) -> Result<()> {
        if SCALAR_PARAMETERS.contains(&name) {
            return Ok(());
        }
        match indexed(name) {
            Some(("coeff", j)) if (1..=self.coeff.len()).contains(&j) => Ok(()),
            Some(("beta", j)) if (1..=self.beta.len()).contains(&j) => Ok(()),
            Some((base @ ("coeff" | "beta"), j)) => Err(template_error(format!(
                "{base}({j}) is outside the template's list"
            ))),
            _ => Err(template_error(format!("unknown parameter \"{name}\""))),
        }
    }

    /// Overrides one parameter
    ///
    /// # Arguments
    /// * `name` - A scalar parameter, `margin`, or `coeff(j)` / `beta(j)` (1-based)
    /// * `value` - The new value; integer parameters require an integral value
    pub fn set(&mut self, name: &str, value: f64) -> Result<()> {
        self.validate_override_name(name)?;

        match name {
            "length" => self.length = value,
            "thickness" => self.thickness = value,
            "overetch" => self.overetch = value,
            "distance" => self.distance = value,
            "offset" => self.offset = value,
            "r" => self.r = value,
            "margin" => self.far_field.margin = value,
            "n" => self.n = as_count(name, value)?,
            "nx" => self.nx = as_count(name, value)?,
            "ny" => self.ny = as_count(name, value)?,
            _ => match indexed(name) {
                Some(("coeff", j)) => self.coeff[j - 1] = value,
                Some(("beta", j)) => self.beta[j - 1] = value,
                _ => return Err(template_error(format!("unknown parameter \"{name}\""))),
            },
        }

        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &[(String, f64)]) -> Result<()> {
        for (name, value) in overrides {
            self.set(name, *value)?;
        }
        Ok(())
    }

    /// Rejects scalar values no geometry could be built from
    pub fn check_parameters(&self) -> Result<()> {
        let finite = [
            ("length", self.length),
            ("thickness", self.thickness),
            ("overetch", self.overetch),
            ("distance", self.distance),
            ("offset", self.offset),
            ("r", self.r),
        ];
        if let Some((name, value)) = finite.iter().find(|(_, v)| !v.is_finite()) {
            return Err(PlatemeshError::Parameter(format!(
                "{name} must be finite, got {value}"
            )));
        }
        if self.nx < 2 || self.ny < 2 {
            return Err(PlatemeshError::Parameter(format!(
                "nx and ny must be at least 2, got {} and {}",
                self.nx, self.ny
            )));
        }
        if !(self.r > 0.0) {
            return Err(PlatemeshError::Parameter(format!(
                "density multiplier r must be positive, got {}",
                self.r
            )));
        }
        if let Some(end) = &self.end_modes {
            if end.coeff.len() != end.beta.len() {
                return Err(PlatemeshError::Parameter(format!(
                    "end_modes lists {} coefficients but {} eigenvalues",
                    end.coeff.len(),
                    end.beta.len()
                )));
            }
        }
        Ok(())
    }

    /// Element count of a long plate edge
    pub fn long_edge_elements(&self) -> usize {
        ((self.r * (self.nx - 1) as f64).round() as usize).max(1)
    }

    /// Element count of a short plate edge
    pub fn short_edge_elements(&self) -> usize {
        ((self.r * (self.ny - 1) as f64).round() as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn template_sections_override_defaults() {
        let config = ModelConfig::from_json(
            r#"{
                "parameters": { "overetch": 0.2, "nx": 30, "coeff": [0.1, 0.2] , "n": 2 },
                "deformation": { "long_edges": "cantilever" },
                "far_field": { "kind": "box", "elements": 12 },
                "physical_groups": { "space": 31 },
                "mesh": { "grading": 0.5 }
            }"#,
        )
        .unwrap();

        assert_relative_eq!(config.overetch, 0.2);
        assert_eq!(config.nx, 30);
        assert_eq!(config.coeff, vec![0.1, 0.2]);
        assert_eq!(config.policy.long_edges, EdgePolicy::OneSided);
        assert_eq!(config.policy.short_edges, EdgePolicy::None);
        assert_eq!(config.far_field.kind, FarFieldKind::Box);
        assert_eq!(config.far_field.elements, 12);
        assert_relative_eq!(config.far_field.margin, 50.0);
        assert_eq!(config.tags.space, 31);
        assert_eq!(config.tags.boundary, 20);
        assert_relative_eq!(config.mesh.grading, 0.5);
        assert_eq!(config.beta, CLAMPED_FREE_BETAS.to_vec());
    }

    #[test]
    fn malformed_templates_are_template_errors() {
        let cases = [
            "{",
            "{}",
            r#"{ "parameters": {}, "solver": {} }"#,
            r#"{ "parameters": { "depth": 1 } }"#,
            r#"{ "parameters": { "nx": "fifty" } }"#,
            r#"{ "parameters": { "nx": 2.5 } }"#,
            r#"{ "parameters": { "coeff": 1 } }"#,
            r#"{ "parameters": {}, "physical_groups": { "space": 10 } }"#,
            r#"{ "parameters": {}, "deformation": { "long_edges": "twisted" } }"#,
        ];
        for case in cases {
            assert!(
                matches!(ModelConfig::from_json(case), Err(PlatemeshError::Template(_))),
                "{case}"
            );
        }
    }

    #[test]
    fn overrides_address_scalars_and_list_entries() {
        let mut config = ModelConfig::default();
        let overrides = ["overetch=0.3", "coeff(2)=0.5", " beta(4) = 0.2", "nx=20"]
            .iter()
            .map(|o| parse_override(o))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        config.apply_overrides(&overrides).unwrap();

        assert_relative_eq!(config.overetch, 0.3);
        assert_relative_eq!(config.coeff[1], 0.5);
        assert_relative_eq!(config.beta[3], 0.2);
        assert_eq!(config.nx, 20);
    }

    #[test]
    fn bad_overrides_are_rejected() {
        let mut config = ModelConfig::default();

        assert!(matches!(
            config.set("depth", 1.0),
            Err(PlatemeshError::Template(_))
        ));
        assert!(matches!(
            config.set("coeff(5)", 1.0),
            Err(PlatemeshError::Template(_))
        ));
        assert!(matches!(
            config.set("coeff(0)", 1.0),
            Err(PlatemeshError::Template(_))
        ));
        assert!(matches!(
            config.set("nx", 12.5),
            Err(PlatemeshError::Parameter(_))
        ));
        assert!(parse_override("overetch").is_err());
        assert!(parse_override("overetch=abc").is_err());
    }

    #[test]
    fn element_counts_follow_the_density_multiplier() {
        let mut config = ModelConfig::default();
        assert_eq!(config.long_edge_elements(), 98);
        assert_eq!(config.short_edge_elements(), 10);

        config.r = 0.01;
        assert_eq!(config.short_edge_elements(), 1);

        config.r = 0.0;
        assert!(config.check_parameters().is_err());
        config.r = 1.0;
        config.ny = 1;
        assert!(config.check_parameters().is_err());
    }

    #[test]
    fn end_mode_lists_must_have_equal_lengths() {
        let mut config = ModelConfig::default();
        config.end_modes = Some(EndModes {
            length: 5.0,
            coeff: vec![0.01, 0.02],
            beta: vec![0.375],
        });
        match config.check_parameters() {
            Err(PlatemeshError::Parameter(reason)) => {
                assert!(reason.contains('2') && reason.contains('1'), "{reason}")
            }
            other => panic!("expected a parameter error, got {other:?}"),
        }

        if let Some(end) = config.end_modes.as_mut() {
            end.beta.push(0.5);
        }
        assert!(config.check_parameters().is_ok());
    }
}
