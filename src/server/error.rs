use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

use crate::server::dtos::error_dto::ErrorBody;

pub type AppResult<T> = Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("upstream did not answer in time")]
    UpstreamTimeout,

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("upstream redirected too many times")]
    RedirectLimitExceeded,

    #[error("upstream sent a body that could not be decoded: {0}")]
    MalformedUpstreamBody(String),

    // never reaches a client, the controller falls back to the original body
    #[error("rewrite failed: {0}")]
    RewriteFailure(String),

    #[error("{0}")]
    InternalServerErrorWithContext(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamUnreachable(_)
            | Self::RedirectLimitExceeded
            | Self::MalformedUpstreamBody(_) => StatusCode::BAD_GATEWAY,
            Self::RewriteFailure(_) | Self::InternalServerErrorWithContext(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// How an error body should look, picked from the client's Accept header. Iframes navigating
/// straight to the proxy get a page, players and scripts get json.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFormat {
    Json,
    Html,
}

impl ErrorFormat {
    pub fn from_accept(accept: Option<&str>) -> Self {
        match accept {
            Some(v) if v.contains("text/html") && !v.starts_with("application/json") => Self::Html,
            _ => Self::Json,
        }
    }
}

/// An error paired with the format the client asked for.
#[derive(Debug)]
pub struct ErrorResponse {
    pub error: Error,
    pub format: ErrorFormat,
}

impl ErrorResponse {
    pub fn new(error: Error, format: ErrorFormat) -> Self {
        Self { error, format }
    }
}

fn with_cors(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let message = self.error.to_string();

        let response = match self.format {
            ErrorFormat::Json => (status, Json(ErrorBody::new(status, message))).into_response(),
            ErrorFormat::Html => (status, Html(ErrorBody::new(status, message).to_html()))
                .into_response(),
        };

        with_cors(response)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        ErrorResponse::new(self, ErrorFormat::Json).into_response()
    }
}

impl From<Error> for ErrorResponse {
    fn from(error: Error) -> Self {
        Self::new(error, ErrorFormat::Json)
    }
}
