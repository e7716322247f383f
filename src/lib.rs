//! Parametric geometry and mesh generation for a deformed MEMS plate pair.
//!
//! Mode shapes deflect the plate boundary, the plates are subtracted from a
//! far-field region and the resulting domain is meshed and tagged for the
//! field solver.

pub mod boolean;
pub mod boundary;
pub mod datatypes;
pub mod discretize;
pub mod error;
pub mod geo;
pub mod kernel;
pub mod layout;
pub mod mesher;
pub mod modes;
pub mod msh;
pub mod pipeline;
pub mod polygon;
pub mod sweep;
pub mod tagger;
pub mod template;
pub mod triangulation;

pub use error::{PlatemeshError, Result};
pub use kernel::GeometryKernel;
pub use template::ModelConfig;
