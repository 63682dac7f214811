use rocket::http::{ContentType, Status};
use serde_json::json;
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Batch of {size} references exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Missing query parameter '{0}'")]
    MissingParameter(&'static str),
}

impl ApiError {
    fn status(&self) -> Status {
        match self {
            ApiError::BatchTooLarge { .. } => Status::BadRequest,
            ApiError::MissingParameter(_) => Status::BadRequest,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ApiError::BatchTooLarge { .. } => "Batch too large",
            ApiError::MissingParameter(_) => "Missing parameter",
        }
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        log::warn!("Rejecting media request: {}", self);

        let body = json!({
            "error": self.label(),
            "message": self.to_string()
        })
        .to_string();

        rocket::Response::build()
            .status(self.status())
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}
