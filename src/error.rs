use std::fmt::Display;
use std::io::Cursor;

use argon2::Error as Argon2Error;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use mongodb::error::Error as DbError;
use rocket::{
    http::{ContentType, Status},
    response::{self, Responder},
    serde::json::serde_json::json,
    Request, Response,
};
use thiserror::Error;

use crate::ballot_box::CastError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Argon2(#[from] Argon2Error),
    #[error(transparent)]
    Cast(#[from] CastError),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    /// Shorthand for a `404` describing the missing resource.
    pub fn not_found(what: impl Display) -> Self {
        Self::Status(Status::NotFound, format!("{what} not found"))
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::Db(_) | Self::Argon2(_) => Status::InternalServerError,
            Self::Jwt(err) => match err.kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::BadRequest,
            },
            Self::Cast(err) => err.status(),
            Self::Status(status, _) => *status,
        }
    }

    /// A short machine-readable code for API clients.
    fn code(&self) -> &'static str {
        match self {
            Self::Db(_) => "database",
            Self::Jwt(_) => "token",
            Self::Argon2(_) => "password",
            Self::Cast(err) => err.code(),
            Self::Status(..) => "request",
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        // Internal details stay in the log.
        let message = if status.class().is_server_error() {
            error!("{self}");
            "Internal server error".to_string()
        } else {
            warn!("{self}");
            self.to_string()
        };
        let body = json!({
            "error": self.code(),
            "message": message,
        })
        .to_string();

        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}
