use anyhow::Result;
use async_trait::async_trait;

use super::models::{Board, BoardId, BoardList, Card, CardDraft, CardId, ListId};

/// Persistent storage for boards, lists and cards.
///
/// Identifiers are allocated by the store. Any error is treated by the
/// coordinator as a persistence failure that aborts the mutation.
#[async_trait]
pub trait BoardStore: Send + Sync {
    async fn create_board(&self, name: &str) -> Result<Board>;

    async fn load_board(&self, id: BoardId) -> Result<Option<Board>>;

    async fn list_boards(&self) -> Result<Vec<Board>>;

    /// Persist name, password hash, palette and list order.
    async fn save_board(&self, board: &Board) -> Result<()>;

    /// Delete a board with all of its lists and cards.
    async fn delete_board(&self, id: BoardId) -> Result<bool>;

    /// Create an empty list at the end of the board.
    async fn create_list(&self, board_id: BoardId, name: &str) -> Result<BoardList>;

    async fn load_list(&self, id: ListId) -> Result<Option<BoardList>>;

    /// Write every given list (name, card order and card content) in one
    /// transaction. Cards no longer present in a list are deleted.
    async fn save_lists(&self, lists: &[BoardList]) -> Result<()>;

    async fn delete_list(&self, id: ListId) -> Result<bool>;

    /// Allocate an identifier for a new card in `list_id`. The card is not
    /// part of the list order until the list is saved.
    async fn create_card(&self, list_id: ListId, draft: CardDraft) -> Result<Card>;

    async fn load_card(&self, id: CardId) -> Result<Option<Card>>;

    async fn delete_card(&self, id: CardId) -> Result<bool>;
}
