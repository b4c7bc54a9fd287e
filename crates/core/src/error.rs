#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// The job document could not be rewritten for submission.
    #[error("Workflow mutation failed: {0}")]
    Mutation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
