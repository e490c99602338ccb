//! Keyboard and drag interaction model for a rendered board.
//!
//! The presentation layer feeds user intents into a [`Cursor`] together with
//! the current [`BoardLayout`]; the cursor updates its state and may emit a
//! [`Command`] to send to the server. Nothing here draws or talks HTTP.

use serde::{Deserialize, Serialize};

use super::models::{BoardView, CardId, ListId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorState {
    #[default]
    Idle,
    CardFocused(CardId),
    Dragging { card: CardId, origin: ListId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Focus(CardId),
    Blur,
    Move { direction: Direction, shift: bool },
    BeginDrag,
    Drop { target_list: ListId, index: i64 },
    CancelDrag,
    Delete,
    Edit,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    MoveCard {
        card_id: CardId,
        target_list: ListId,
        index: i64,
    },
    DeleteCard {
        list_id: ListId,
        card_id: CardId,
    },
    EditTitle {
        card_id: CardId,
    },
    OpenDetail {
        card_id: CardId,
    },
}

/// Card ids per list, in board order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardLayout {
    lists: Vec<(ListId, Vec<CardId>)>,
}

impl BoardLayout {
    pub fn new(lists: Vec<(ListId, Vec<CardId>)>) -> Self {
        Self { lists }
    }

    /// (list position, card position) of a card.
    pub fn locate(&self, card: CardId) -> Option<(usize, usize)> {
        self.lists.iter().enumerate().find_map(|(li, (_, cards))| {
            cards.iter().position(|&c| c == card).map(|ci| (li, ci))
        })
    }

    fn list_id(&self, list_pos: usize) -> Option<ListId> {
        self.lists.get(list_pos).map(|(id, _)| *id)
    }

    fn cards(&self, list_pos: usize) -> &[CardId] {
        self.lists
            .get(list_pos)
            .map(|(_, cards)| cards.as_slice())
            .unwrap_or(&[])
    }
}

impl From<&BoardView> for BoardLayout {
    fn from(view: &BoardView) -> Self {
        Self::new(
            view.lists
                .iter()
                .map(|list| (list.id, list.cards.ids()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Cursor {
    state: CursorState,
    read_only: bool,
}

impl Cursor {
    pub fn new(read_only: bool) -> Self {
        Self {
            state: CursorState::Idle,
            read_only,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Switch read-only mode. An in-progress drag is abandoned when the
    /// board becomes read-only.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
        if let (true, CursorState::Dragging { card, .. }) = (read_only, self.state) {
            self.state = CursorState::CardFocused(card);
        }
    }

    /// Drop focus on a card that is no longer on the board.
    pub fn sync(&mut self, layout: &BoardLayout) {
        let card = match self.state {
            CursorState::Idle => return,
            CursorState::CardFocused(card) | CursorState::Dragging { card, .. } => card,
        };
        if layout.locate(card).is_none() {
            self.state = CursorState::Idle;
        }
    }

    pub fn apply(&mut self, layout: &BoardLayout, intent: Intent) -> Option<Command> {
        self.sync(layout);
        match (self.state, intent) {
            (CursorState::Dragging { card, .. }, Intent::Drop { target_list, index }) => {
                self.state = CursorState::CardFocused(card);
                Some(Command::MoveCard {
                    card_id: card,
                    target_list,
                    index,
                })
            }
            (CursorState::Dragging { card, .. }, Intent::CancelDrag | Intent::Blur) => {
                self.state = CursorState::CardFocused(card);
                None
            }
            (CursorState::Dragging { .. }, _) => None,

            (_, Intent::Focus(card)) => {
                if layout.locate(card).is_some() {
                    self.state = CursorState::CardFocused(card);
                }
                None
            }
            (CursorState::Idle, _) => None,

            (CursorState::CardFocused(_), Intent::Blur) => {
                self.state = CursorState::Idle;
                None
            }
            (CursorState::CardFocused(card), Intent::Move { direction, shift }) => {
                self.navigate(layout, card, direction, shift)
            }
            (CursorState::CardFocused(card), Intent::BeginDrag) => {
                if !self.read_only {
                    let (list_pos, _) = layout.locate(card)?;
                    let origin = layout.list_id(list_pos)?;
                    self.state = CursorState::Dragging { card, origin };
                }
                None
            }
            (CursorState::CardFocused(card), Intent::Delete) => {
                if self.read_only {
                    return None;
                }
                let (list_pos, _) = layout.locate(card)?;
                let list_id = layout.list_id(list_pos)?;
                self.state = CursorState::Idle;
                Some(Command::DeleteCard {
                    list_id,
                    card_id: card,
                })
            }
            (CursorState::CardFocused(card), Intent::Edit) => {
                (!self.read_only).then_some(Command::EditTitle { card_id: card })
            }
            (CursorState::CardFocused(card), Intent::Open) => {
                Some(Command::OpenDetail { card_id: card })
            }
            (CursorState::CardFocused(_), Intent::Drop { .. } | Intent::CancelDrag) => None,
        }
    }

    fn navigate(
        &mut self,
        layout: &BoardLayout,
        card: CardId,
        direction: Direction,
        shift: bool,
    ) -> Option<Command> {
        let (list_pos, card_pos) = layout.locate(card)?;
        let cards = layout.cards(list_pos);
        match direction {
            Direction::Up | Direction::Down => {
                let next = match direction {
                    Direction::Up => card_pos.checked_sub(1)?,
                    _ => card_pos + 1,
                };
                if next >= cards.len() {
                    return None;
                }
                if shift {
                    if self.read_only {
                        return None;
                    }
                    return Some(Command::MoveCard {
                        card_id: card,
                        target_list: layout.list_id(list_pos)?,
                        index: next as i64,
                    });
                }
                self.state = CursorState::CardFocused(cards[next]);
                None
            }
            Direction::Left | Direction::Right => {
                let adjacent = match direction {
                    Direction::Left => list_pos.checked_sub(1)?,
                    _ => list_pos + 1,
                };
                let neighbours = layout.cards(adjacent);
                let landing = if card_pos < neighbours.len() {
                    card_pos
                } else if card_pos >= 1 && card_pos - 1 < neighbours.len() {
                    card_pos - 1
                } else {
                    0
                };
                if let Some(&target) = neighbours.get(landing) {
                    self.state = CursorState::CardFocused(target);
                }
                None
            }
        }
    }
}
