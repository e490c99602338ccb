//! Ordered card sequences and the per-list critical sections that guard them.
//!
//! `CardSequence` is the position-aware container (insert-at, move, remove,
//! snapshot). `ListEngine` keeps one `tokio::sync::Mutex<BoardList>` per loaded
//! list so that unrelated lists mutate concurrently while requests against the
//! same list are applied one at a time, in the order they acquire the lock.
//!
//! Indices are clamped, never rejected: a drag computed against a stale client
//! snapshot lands at the nearest valid position instead of failing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, trace};

use super::models::{BoardList, Card, CardId, ListId};
use crate::errors::{BoardError, BoardResult};

/// Clamp a client-supplied index into `[0, len]`.
pub fn clamp_index(index: i64, len: usize) -> usize {
    if index <= 0 {
        0
    } else {
        usize::try_from(index).map_or(len, |i| i.min(len))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved { from: usize, to: usize },
    Unchanged { at: usize },
}

impl MoveOutcome {
    pub fn index(&self) -> usize {
        match *self {
            Self::Moved { to, .. } => to,
            Self::Unchanged { at } => at,
        }
    }
}

/// Cards of one list in display order. Never holds two cards with the same id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct CardSequence(Vec<Card>);

impl CardSequence {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Card> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Card> {
        self.0.iter_mut()
    }

    pub fn ids(&self) -> Vec<CardId> {
        self.0.iter().map(|c| c.id).collect()
    }

    pub fn position(&self, card_id: CardId) -> Option<usize> {
        self.0.iter().position(|c| c.id == card_id)
    }

    pub fn get(&self, card_id: CardId) -> Option<&Card> {
        self.0.iter().find(|c| c.id == card_id)
    }

    pub fn get_mut(&mut self, card_id: CardId) -> Option<&mut Card> {
        self.0.iter_mut().find(|c| c.id == card_id)
    }

    /// Copy of the current order. Mutating it has no effect on the list.
    pub fn snapshot(&self) -> Vec<Card> {
        self.0.clone()
    }

    /// Insert `card` at `index` (clamped) and return the index it landed on.
    /// A card already present under the same id is taken out first.
    pub fn insert_at(&mut self, card: Card, index: i64) -> usize {
        self.remove(card.id);
        let at = clamp_index(index, self.0.len());
        self.0.insert(at, card);
        at
    }

    /// Move a card to `new_index`, clamped against the sequence with the card
    /// removed. Moving to the current position leaves the order untouched.
    pub fn move_to(&mut self, card_id: CardId, new_index: i64) -> BoardResult<MoveOutcome> {
        let from = self
            .position(card_id)
            .ok_or(BoardError::CardNotFound { id: card_id })?;
        let to = clamp_index(new_index, self.0.len() - 1);
        if to == from {
            return Ok(MoveOutcome::Unchanged { at: from });
        }
        let card = self.0.remove(from);
        self.0.insert(to, card);
        Ok(MoveOutcome::Moved { from, to })
    }

    pub fn remove(&mut self, card_id: CardId) -> Option<Card> {
        let at = self.position(card_id)?;
        Some(self.0.remove(at))
    }
}

impl From<Vec<Card>> for CardSequence {
    fn from(cards: Vec<Card>) -> Self {
        let mut seq = Self::default();
        for card in cards {
            let end = seq.len() as i64;
            seq.insert_at(card, end);
        }
        seq
    }
}

impl<'a> IntoIterator for &'a CardSequence {
    type Item = &'a Card;
    type IntoIter = std::slice::Iter<'a, Card>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ── List-level operations ─────────────────────────────────────────────

impl BoardList {
    /// Insert `card` at `index` (clamped), pointing its back-references at
    /// this list. Returns the resulting order.
    pub fn insert_at(&mut self, mut card: Card, index: i64) -> Vec<Card> {
        card.list_id = self.id;
        card.board_id = self.board_id;
        let at = self.cards.insert_at(card, index);
        trace!(list_id = self.id, at, "card inserted");
        self.cards.snapshot()
    }

    pub fn move_within_list(&mut self, card_id: CardId, new_index: i64) -> BoardResult<MoveOutcome> {
        self.cards.move_to(card_id, new_index)
    }

    /// Remove a card by id. Absent cards are not an error.
    pub fn remove_card(&mut self, card_id: CardId) -> Option<Card> {
        self.cards.remove(card_id)
    }

    pub fn read(&self) -> Vec<Card> {
        self.cards.snapshot()
    }
}

/// Take `card_id` out of `source` and insert it into `target` at `new_index`
/// (clamped). Returns the index in `target`.
pub fn move_across_lists(
    source: &mut BoardList,
    target: &mut BoardList,
    card_id: CardId,
    new_index: i64,
) -> BoardResult<usize> {
    let mut card = source
        .cards
        .remove(card_id)
        .ok_or(BoardError::CardNotFound { id: card_id })?;
    card.list_id = target.id;
    card.board_id = target.board_id;
    Ok(target.cards.insert_at(card, new_index))
}

// ── Per-list critical sections ────────────────────────────────────────

pub type ListSlot = Arc<tokio::sync::Mutex<BoardList>>;
pub type ListGuard = OwnedMutexGuard<BoardList>;

/// Registry of loaded lists, one async mutex per list.
#[derive(Default)]
pub struct ListEngine {
    slots: Mutex<HashMap<ListId, ListSlot>>,
}

impl ListEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ListId, ListSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_loaded(&self, list_id: ListId) -> bool {
        self.slots().contains_key(&list_id)
    }

    pub fn slot(&self, list_id: ListId) -> Option<ListSlot> {
        self.slots().get(&list_id).cloned()
    }

    /// Register a list loaded from storage. If another request installed the
    /// same list first, that copy wins and is returned.
    pub fn install(&self, list: BoardList) -> ListSlot {
        let id = list.id;
        self.slots()
            .entry(id)
            .or_insert_with(|| {
                debug!(list_id = id, cards = list.cards.len(), "list loaded into engine");
                Arc::new(tokio::sync::Mutex::new(list))
            })
            .clone()
    }

    pub fn evict(&self, list_id: ListId) -> bool {
        self.slots().remove(&list_id).is_some()
    }

    /// Acquire the critical section of one list.
    ///
    /// Fails with `ListNotFound` if the list is not loaded, or was evicted
    /// while this request was waiting for the lock.
    pub async fn lock(&self, list_id: ListId) -> BoardResult<ListGuard> {
        let slot = self
            .slot(list_id)
            .ok_or(BoardError::ListNotFound { id: list_id })?;
        let guard = slot.clone().lock_owned().await;
        match self.slot(list_id) {
            Some(current) if Arc::ptr_eq(&current, &slot) => Ok(guard),
            _ => Err(BoardError::ListNotFound { id: list_id }),
        }
    }

    /// Lock several lists in ascending id order. Guards are returned in that
    /// order, with duplicates collapsed.
    pub async fn lock_many(&self, list_ids: &[ListId]) -> BoardResult<Vec<ListGuard>> {
        let mut ids = list_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock(id).await?);
        }
        Ok(guards)
    }

    /// Lock two distinct lists; guards come back in argument order.
    pub async fn lock_pair(&self, first: ListId, second: ListId) -> BoardResult<(ListGuard, ListGuard)> {
        if first == second {
            return Err(BoardError::BadRequest(format!(
                "List {} cannot be locked twice",
                first
            )));
        }
        let mut guards = self.lock_many(&[first, second]).await?;
        let high = guards.pop();
        let low = guards.pop();
        match (low, high) {
            (Some(low), Some(high)) if first < second => Ok((low, high)),
            (Some(low), Some(high)) => Ok((high, low)),
            _ => Err(BoardError::ListNotFound { id: first }),
        }
    }

    pub async fn read(&self, list_id: ListId) -> BoardResult<Vec<Card>> {
        Ok(self.lock(list_id).await?.read())
    }
}
