use axum::http::StatusCode;
use thiserror::Error;

/// Таксономия ошибок движка бронирования.
///
/// "Мест нет / лист ожидания" ошибкой не является — это отдельный
/// результат `ReserveOutcome::Waitlisted`, на который вызывающий код
/// обязан ветвиться.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Сущность (мероприятие, бронь, платёж, запись листа ожидания) не найдена.
    #[error("{0} not found")]
    NotFound(String),

    /// Переход, несовместимый с текущим терминальным состоянием,
    /// либо операция, которой не хватает свободных мест.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Внутреннее нарушение инварианта — баг в последовательности операций,
    /// не лечится повтором.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Некорректные входные данные, отклонены до обращения к общему состоянию.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl EngineError {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        EngineError::NotFound(format!("{} {}", what, id))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        }
    }
}
