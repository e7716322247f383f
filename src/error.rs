use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlatemeshError>;

#[derive(Error, Debug)]
pub enum PlatemeshError {
    #[error("Parameter error: {0}")]
    Parameter(String),

    #[error("Degenerate geometry: {0}")]
    GeometryDegenerate(String),

    #[error("Boolean operation failed: {0}")]
    BooleanOp(String),

    #[error("Mesh did not converge: {0}")]
    MeshNonConvergence(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlatemeshError {
    /// Whether the error invalidates the whole run rather than a single
    /// parameter sample.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlatemeshError::Template(_) | PlatemeshError::Pipeline(_) | PlatemeshError::Io(_)
        )
    }

    /// Short label used when recording failed samples
    pub fn kind(&self) -> &'static str {
        match self {
            PlatemeshError::Parameter(_) => "ParameterError",
            PlatemeshError::GeometryDegenerate(_) => "GeometryDegenerateError",
            PlatemeshError::BooleanOp(_) => "BooleanOpFailure",
            PlatemeshError::MeshNonConvergence(_) => "MeshNonConvergence",
            PlatemeshError::Template(_) => "TemplateError",
            PlatemeshError::Pipeline(_) => "PipelineError",
            PlatemeshError::Io(_) => "IoError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_local_errors_are_not_fatal() {
        assert!(!PlatemeshError::Parameter("x".into()).is_fatal());
        assert!(!PlatemeshError::BooleanOp("x".into()).is_fatal());
        assert!(!PlatemeshError::MeshNonConvergence("x".into()).is_fatal());
        assert!(!PlatemeshError::GeometryDegenerate("x".into()).is_fatal());
        assert!(PlatemeshError::Template("x".into()).is_fatal());
    }

    #[test]
    fn display_names_category() {
        let err = PlatemeshError::BooleanOp("plate 2 crosses boundary".into());
        assert_eq!(
            err.to_string(),
            "Boolean operation failed: plate 2 crosses boundary"
        );
        assert_eq!(err.kind(), "BooleanOpFailure");
    }
}
