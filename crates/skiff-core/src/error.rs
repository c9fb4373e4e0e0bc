use serde::{Deserialize, Serialize};

use crate::auth::AuthError;
use crate::lifecycle::ExecutionError;
use crate::runtime::BootError;
use crate::store::EntityError;

/// A request the service understands but does not implement yet.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("not implemented: {0}")]
pub struct UnsupportedRequest(pub String);

/// Response category an error maps to at the service boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NotFound,
    NotImplemented,
    Unauthorized,
    Conflict,
    Internal,
}

impl ErrorKind {
    /// HTTP status an API layer answers with.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::NotImplemented => 501,
            Self::Unauthorized => 401,
            Self::Conflict => 409,
            Self::Internal => 500,
        }
    }

    /// Caller mistakes, as opposed to failures of the service itself.
    #[must_use]
    pub fn is_user_error(self) -> bool {
        !matches!(self, Self::Internal)
    }
}

/// Classify an error chain by the first typed error found in it.
pub fn classify(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if let Some(entity) = cause.downcast_ref::<EntityError>() {
            match entity {
                EntityError::DoesNotExist { .. } => return ErrorKind::NotFound,
                EntityError::AlreadyExists { .. } => return ErrorKind::Conflict,
                _ => {}
            }
        }
        if cause.downcast_ref::<UnsupportedRequest>().is_some() {
            return ErrorKind::NotImplemented;
        }
        if cause.downcast_ref::<AuthError>().is_some() {
            return ErrorKind::Unauthorized;
        }
        if cause.downcast_ref::<ExecutionError>().is_some() {
            return ErrorKind::Conflict;
        }
        if cause.downcast_ref::<BootError>().is_some() {
            return ErrorKind::Internal;
        }
    }
    ErrorKind::Internal
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn classification_looks_through_context() {
        let err = Err::<(), _>(EntityError::DoesNotExist {
            kind: "commit",
            id: "~abc".into(),
        })
        .context("loading commit")
        .expect_err("error");
        assert_eq!(classify(&err), ErrorKind::NotFound);
        assert_eq!(classify(&err).http_status(), 404);

        let err = anyhow::Error::new(UnsupportedRequest("parameters".into()));
        assert_eq!(classify(&err), ErrorKind::NotImplemented);
        assert!(classify(&err).is_user_error());

        let err = anyhow::Error::new(ExecutionError::AlreadyFinished {
            id: "e1".into(),
            status: skiff_domain::ExecutionStatus::Error,
        });
        assert_eq!(classify(&err), ErrorKind::Conflict);
        assert_eq!(classify(&err).http_status(), 409);

        let err = anyhow::anyhow!("disk on fire");
        assert_eq!(classify(&err), ErrorKind::Internal);
        assert!(!classify(&err).is_user_error());
    }
}
