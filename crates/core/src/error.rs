use thiserror::Error;

use crate::model::{AnswerError, TestDefinitionError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    TestDefinition(#[from] TestDefinitionError),
    #[error(transparent)]
    Answer(#[from] AnswerError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Recording;

    #[test]
    fn wraps_model_errors() {
        let err: Error = Recording::new("", vec![1]).unwrap_err().into();
        assert!(matches!(err, Error::Answer(AnswerError::MissingContentType)));
    }
}
