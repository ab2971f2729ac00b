use remote::{RemoteError, models::OptionId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Option not found: {0}")]
    OptionMissing(OptionId),

    #[error("Sign-in failed: {0}")]
    SignIn(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Spanish text for the user. `fallback` names the action that failed, details stay in the log.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            AppError::OptionMissing(option_id) => {
                format!("{fallback}: la palabra {option_id} no está en la lista actual")
            }
            AppError::NotAuthenticated | AppError::Remote(RemoteError::Unauthorized) => {
                "Tu sesión ha expirado. Inicia sesión de nuevo.".to_string()
            }
            AppError::Remote(e) if e.is_not_found() => {
                format!("{fallback}: no se encontró el voto")
            }
            _ => format!("{fallback}. Por favor, intenta de nuevo."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_is_spanish() {
        let missing = AppError::OptionMissing(999);
        assert_eq!(
            missing.user_message("Error al registrar el voto"),
            "Error al registrar el voto: la palabra 999 no está en la lista actual"
        );

        let gone = AppError::Remote(RemoteError::NotFound("vote for option 3".to_string()));
        assert_eq!(
            gone.user_message("Error al actualizar el voto"),
            "Error al actualizar el voto: no se encontró el voto"
        );

        let unavailable = AppError::Remote(RemoteError::Status {
            status: 503,
            message: "down".to_string(),
        });
        assert_eq!(
            unavailable.user_message("Error al registrar el voto"),
            "Error al registrar el voto. Por favor, intenta de nuevo."
        );

        assert_eq!(
            AppError::Remote(RemoteError::Unauthorized).user_message("x"),
            AppError::NotAuthenticated.user_message("y")
        );
    }
}
