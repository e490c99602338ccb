//! Typed error hierarchy for the board service.
//!
//! `BoardError` is the single taxonomy shared by the ordered-list engine, the
//! access guard and the mutation coordinator. Storage and configuration code
//! keeps using `anyhow` with context and is converted at the coordinator seam
//! via `BoardError::Persistence`.
//!
//! Long-poll timeouts are not errors: `ChangeBroker::subscribe` returns `None`.

use thiserror::Error;

use crate::board::models::{BoardId, CardId, ListId};

/// Errors surfaced by board, list and card operations.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Board {id} not found")]
    BoardNotFound { id: BoardId },

    #[error("List {id} not found")]
    ListNotFound { id: ListId },

    #[error("Card {id} not found")]
    CardNotFound { id: CardId },

    #[error("Board {board_id} is locked; unlock it before making changes")]
    ReadOnly { board_id: BoardId },

    #[error("Incorrect password for board {board_id}")]
    AuthFailure { board_id: BoardId },

    #[error("Incorrect admin password")]
    AdminAuthFailure,

    #[error("Persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl BoardError {
    /// True for any of the not-found variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::BoardNotFound { .. } | Self::ListNotFound { .. } | Self::CardNotFound { .. }
        )
    }

    /// True for authentication failures (board or admin secret).
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthFailure { .. } | Self::AdminAuthFailure)
    }
}

impl From<anyhow::Error> for BoardError {
    fn from(err: anyhow::Error) -> Self {
        Self::Persistence(err)
    }
}

pub type BoardResult<T> = std::result::Result<T, BoardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_variants_are_grouped() {
        assert!(BoardError::BoardNotFound { id: 1 }.is_not_found());
        assert!(BoardError::ListNotFound { id: 2 }.is_not_found());
        assert!(BoardError::CardNotFound { id: 3 }.is_not_found());
        assert!(!BoardError::ReadOnly { board_id: 1 }.is_not_found());
        assert!(!BoardError::BadRequest("x".into()).is_not_found());
    }

    #[test]
    fn read_only_message_names_the_board() {
        let err = BoardError::ReadOnly { board_id: 42 };
        assert!(err.to_string().contains("42"));
        assert!(err.to_string().contains("locked"));
    }

    #[test]
    fn anyhow_converts_to_persistence() {
        let err: BoardError = anyhow::anyhow!("disk full").into();
        match &err {
            BoardError::Persistence(inner) => assert_eq!(inner.to_string(), "disk full"),
            _ => panic!("Expected Persistence variant"),
        }
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn auth_failures_are_grouped() {
        assert!(BoardError::AuthFailure { board_id: 7 }.is_auth_failure());
        assert!(BoardError::AdminAuthFailure.is_auth_failure());
        assert!(!BoardError::ReadOnly { board_id: 7 }.is_auth_failure());
    }
}
