use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("unable to connect to database at {}: {source}", .path.display())]
    Connection {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("no {entity} with external id {external_id}")]
    DanglingReference {
        entity: &'static str,
        external_id: i64,
    },

    #[error("{operation}: {source}")]
    Operation {
        operation: String,
        #[source]
        source: Box<Error>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Attaches the name of the step that failed.
    pub fn during(self, operation: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping operation context.
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_message_names_step_and_cause() {
        let err = Error::DanglingReference {
            entity: "group",
            external_id: 7,
        }
        .during("inserting group with ext_id:8");

        assert_eq!(
            err.to_string(),
            "inserting group with ext_id:8: no group with external id 7"
        );
        assert!(matches!(
            err.root(),
            Error::DanglingReference { external_id: 7, .. }
        ));
    }
}
