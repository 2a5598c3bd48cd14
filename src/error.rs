use actix_web::http::StatusCode;
use thiserror::Error;

/// Service-level failures. Display strings are user-facing (Spanish);
/// handlers wrap them in `ApiResponse::error` with the matching status.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Negocio no encontrado")]
    BusinessNotFound,

    #[error("Reseña no encontrada")]
    ReviewNotFound,

    #[error("No puedes calificar tu propio negocio")]
    SelfReview,

    #[error("Ya has calificado este negocio")]
    DuplicateReview,

    #[error("Debes seleccionar al menos un aspecto para calificar")]
    NoValidTags,

    #[error("La calificación debe estar entre 1 y 5")]
    RatingOutOfRange,

    #[error("No tienes permiso para modificar este negocio")]
    NotOwner,

    #[error("{0}")]
    Validation(String),

    #[error("El servicio no está disponible. Por favor, intente más tarde.")]
    Upstream(String),

    #[error("Error al acceder a los datos. Por favor, intente más tarde.")]
    Database(#[from] sqlx::Error),

    #[error("No se pudo guardar el cambio. Por favor, intente de nuevo.")]
    WriteConflict,
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::BusinessNotFound | ServiceError::ReviewNotFound => StatusCode::NOT_FOUND,
            ServiceError::SelfReview | ServiceError::NotOwner => StatusCode::FORBIDDEN,
            ServiceError::DuplicateReview
            | ServiceError::NoValidTags
            | ServiceError::RatingOutOfRange
            | ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::WriteConflict => StatusCode::CONFLICT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_failures_are_client_errors() {
        assert_eq!(ServiceError::SelfReview.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ServiceError::DuplicateReview.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::BusinessNotFound.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::WriteConflict.status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn messages_are_user_facing_spanish() {
        assert_eq!(
            ServiceError::SelfReview.to_string(),
            "No puedes calificar tu propio negocio"
        );
        assert_eq!(
            ServiceError::DuplicateReview.to_string(),
            "Ya has calificado este negocio"
        );
    }
}
