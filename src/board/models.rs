use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::ordered::CardSequence;

pub type BoardId = i64;
pub type ListId = i64;
pub type CardId = i64;

/// Tag name → color (e.g. `"urgent" → "#ff0000"`).
pub type TagPalette = BTreeMap<String, String>;

/// Top-level shared container. Owns its lists; `lists` holds their
/// identifiers in display order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Board {
    pub id: BoardId,
    pub name: String,
    pub lists: Vec<ListId>,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub tags: TagPalette,
    pub created_at: String,
}

impl Board {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// An ordered container of cards within a board.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardList {
    pub id: ListId,
    pub board_id: BoardId,
    pub name: String,
    pub cards: CardSequence,
}

impl BoardList {
    pub fn new(id: ListId, board_id: BoardId, name: impl Into<String>) -> Self {
        Self {
            id,
            board_id,
            name: name.into(),
            cards: CardSequence::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Card {
    pub id: CardId,
    pub list_id: ListId,
    pub board_id: BoardId,
    pub title: String,
    pub description: String,
    pub subtasks: Vec<String>,
    pub completed: BTreeSet<String>,
    pub tags: TagPalette,
}

impl Card {
    pub fn add_tag(&mut self, name: &str, color: &str) {
        self.tags.insert(name.to_string(), color.to_string());
    }

    pub fn remove_tag(&mut self, name: &str) -> bool {
        self.tags.remove(name).is_some()
    }

    /// Check the card-level invariants before it is saved. The completed
    /// set must stay a subset of the subtask list.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Card title cannot be empty".to_string());
        }
        if self.subtasks.iter().any(|s| s.is_empty()) {
            return Err("Subtask names cannot be empty".to_string());
        }
        let unique: BTreeSet<&String> = self.subtasks.iter().collect();
        if unique.len() != self.subtasks.len() {
            return Err("Subtasks must be unique".to_string());
        }
        if let Some(orphan) = self
            .completed
            .iter()
            .find(|c| !self.subtasks.iter().any(|s| s == *c))
        {
            return Err(format!("Completed subtask '{}' is not a subtask", orphan));
        }
        Ok(())
    }
}

/// Client-supplied card content, before the store allocates an identifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CardDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub completed: BTreeSet<String>,
    #[serde(default)]
    pub tags: TagPalette,
}

impl CardDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Build a card with the given identity. Content is taken as sent;
    /// `Card::validate` rejects malformed subtasks.
    pub fn into_card(self, id: CardId, list_id: ListId, board_id: BoardId) -> Card {
        Card {
            id,
            list_id,
            board_id,
            title: self.title,
            description: self.description,
            subtasks: self.subtasks,
            completed: self.completed,
            tags: self.tags,
        }
    }

    /// Overwrite the editable content of `card`, keeping its identity.
    pub fn apply_to(self, card: &mut Card) {
        let updated = self.into_card(card.id, card.list_id, card.board_id);
        *card = updated;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Moved,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Moved => "moved",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered to long-poll waiters after a successful mutation.
/// `card` is `None` for deletions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CardChange {
    pub kind: ChangeKind,
    pub board_id: BoardId,
    pub list_id: ListId,
    pub card_id: CardId,
    pub card: Option<Card>,
}

impl CardChange {
    pub fn of(kind: ChangeKind, card: &Card) -> Self {
        Self {
            kind,
            board_id: card.board_id,
            list_id: card.list_id,
            card_id: card.id,
            card: Some(card.clone()),
        }
    }

    pub fn deleted(board_id: BoardId, list_id: ListId, card_id: CardId) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            board_id,
            list_id,
            card_id,
            card: None,
        }
    }
}

// API view types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSummary {
    pub id: BoardId,
    pub name: String,
    pub protected: bool,
    pub tags: TagPalette,
    pub created_at: String,
}

impl From<&Board> for BoardSummary {
    fn from(board: &Board) -> Self {
        Self {
            id: board.id,
            name: board.name.clone(),
            protected: board.has_password(),
            tags: board.tags.clone(),
            created_at: board.created_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardView {
    pub board: BoardSummary,
    pub lists: Vec<BoardList>,
}
