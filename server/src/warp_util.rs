#![deny(warnings)]

use {
    crate::error::ArchiveError,
    anyhow::{Error, Result},
    http::{header, Response},
    hyper::{Body, StatusCode},
    serde_derive::Serialize,
    std::{borrow::Cow, convert::Infallible},
    warp::{
        body::BodyDeserializeError,
        reject::{InvalidQuery, MethodNotAllowed, Reject},
        reply, Rejection, Reply,
    },
};

#[derive(Serialize)]
#[serde(remote = "StatusCode")]
struct StatusCodeU16(#[serde(getter = "StatusCode::as_u16")] u16);

#[derive(Clone, Serialize, Debug, thiserror::Error)]
#[error("HTTP {}: {}", status, message)]
pub struct HttpError {
    pub message: Cow<'static, str>,
    #[serde(with = "StatusCodeU16")]
    pub status: StatusCode,
}

impl HttpError {
    pub fn from_slice(status: StatusCode, message: &'static str) -> Self {
        Self {
            status,
            message: Cow::Borrowed(message),
        }
    }

    pub fn internal_server_error() -> Self {
        HttpError::from_slice(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    fn from_archive_error(error: &ArchiveError) -> Self {
        let status = match error {
            ArchiveError::InvalidPath(_)
            | ArchiveError::AccessDenied { .. }
            | ArchiveError::UnreadableSourceFile { .. } => StatusCode::NOT_FOUND,

            ArchiveError::MissingRequiredField(_)
            | ArchiveError::NameCollisionUnresolvable { .. } => StatusCode::BAD_REQUEST,

            ArchiveError::ExternalServiceFailure(_) => StatusCode::BAD_GATEWAY,

            ArchiveError::CopyFailed { .. }
            | ArchiveError::CatalogTransactionFailed { .. }
            | ArchiveError::CleanupFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self {
            status,
            message: Cow::Owned(error.to_string()),
        }
    }

    pub fn from(error: Error) -> Self {
        if let Some(e) = error.downcast_ref::<ArchiveError>() {
            Self::from_archive_error(e)
        } else if let Some(e) = error.root_cause().downcast_ref::<HttpError>() {
            e.clone()
        } else {
            Self::internal_server_error()
        }
    }

    pub fn as_reply(&self) -> impl Reply {
        reply::with_status(reply::json(&self), self.status)
    }
}

impl Reject for HttpError {}

/// Serialize `value` as the body of a JSON response.
pub fn json_response(value: &impl serde::Serialize) -> Result<Response<Body>> {
    let body = serde_json::to_vec(value)?;

    Ok(crate::response()
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))?)
}

pub async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let error = if rejection.is_not_found() {
        HttpError::from_slice(StatusCode::NOT_FOUND, "not found")
    } else if let Some(error) = rejection.find::<HttpError>() {
        error.clone()
    } else if rejection.find::<InvalidQuery>().is_some()
        || rejection.find::<BodyDeserializeError>().is_some()
    {
        HttpError::from_slice(StatusCode::BAD_REQUEST, "malformed request")
    } else if rejection.find::<MethodNotAllowed>().is_some() {
        HttpError::from_slice(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        HttpError::internal_server_error()
    };

    Ok(error.as_reply())
}
