//! Mutation coordinator: the only path by which cards, lists and boards change.
//!
//! Every card-affecting request runs the same sequence while holding the
//! critical section of each list it touches:
//!
//! 1. check the session against the board's access guard
//! 2. snapshot the lists, apply the change through the ordered-list engine
//! 3. persist every touched list in one storage transaction
//! 4. publish the resulting card to the change broker
//!
//! A storage failure restores the snapshots and nothing is published.
//!
//! Lock order is board lock (palette, password, list set) before list locks,
//! and list locks in ascending id. Card moves take list locks only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::broker::ChangeBroker;
use super::guard::{self, AdminSecret, SessionContext};
use super::models::*;
use super::ordered::{ListEngine, ListGuard, MoveOutcome, move_across_lists};
use super::store::BoardStore;
use crate::errors::{BoardError, BoardResult};

/// Attempts to pin down a card's list when it is moving concurrently.
const LOCATE_ATTEMPTS: usize = 3;

/// Per-board async locks for board-level read-modify-write.
#[derive(Default)]
struct BoardLocks {
    locks: Mutex<HashMap<BoardId, Arc<tokio::sync::Mutex<()>>>>,
}

impl BoardLocks {
    fn locks(&self) -> MutexGuard<'_, HashMap<BoardId, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, board_id: BoardId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks().entry(board_id).or_default().clone()
    }

    fn forget(&self, board_id: BoardId) {
        self.locks().remove(&board_id);
    }
}

pub struct MutationCoordinator {
    store: Arc<dyn BoardStore>,
    engine: ListEngine,
    broker: Arc<ChangeBroker>,
    admin: AdminSecret,
    board_locks: BoardLocks,
}

impl MutationCoordinator {
    pub fn new(store: Arc<dyn BoardStore>, broker: Arc<ChangeBroker>, admin: AdminSecret) -> Self {
        Self {
            store,
            engine: ListEngine::new(),
            broker,
            admin,
            board_locks: BoardLocks::default(),
        }
    }

    pub fn broker(&self) -> &Arc<ChangeBroker> {
        &self.broker
    }

    // ── Internal helpers ──────────────────────────────────────────────

    async fn board(&self, board_id: BoardId) -> BoardResult<Board> {
        self.store
            .load_board(board_id)
            .await?
            .ok_or(BoardError::BoardNotFound { id: board_id })
    }

    /// Make sure a list is present in the engine, loading it from storage.
    async fn hydrate(&self, list_id: ListId) -> BoardResult<()> {
        if self.engine.is_loaded(list_id) {
            return Ok(());
        }
        let list = self
            .store
            .load_list(list_id)
            .await?
            .ok_or(BoardError::ListNotFound { id: list_id })?;
        self.engine.install(list);
        Ok(())
    }

    async fn lock_list(&self, list_id: ListId) -> BoardResult<ListGuard> {
        self.hydrate(list_id).await?;
        self.engine.lock(list_id).await
    }

    async fn lock_lists(&self, list_ids: &[ListId]) -> BoardResult<Vec<ListGuard>> {
        for &id in list_ids {
            self.hydrate(id).await?;
        }
        self.engine.lock_many(list_ids).await
    }

    async fn stored_card(&self, card_id: CardId) -> BoardResult<Card> {
        self.store
            .load_card(card_id)
            .await?
            .ok_or(BoardError::CardNotFound { id: card_id })
    }

    /// Lock the list that currently holds `card_id`.
    async fn lock_card_list(&self, card_id: CardId) -> BoardResult<ListGuard> {
        for _ in 0..LOCATE_ATTEMPTS {
            let stored = self.stored_card(card_id).await?;
            let list = self.lock_list(stored.list_id).await?;
            if list.cards.get(card_id).is_some() {
                return Ok(list);
            }
        }
        Err(BoardError::CardNotFound { id: card_id })
    }

    /// Persist `lists`. On failure every list is put back to `before`.
    async fn commit(&self, lists: &mut [&mut BoardList], before: Vec<BoardList>) -> BoardResult<()> {
        let current: Vec<BoardList> = lists.iter().map(|l| (**l).clone()).collect();
        if let Err(err) = self.store.save_lists(&current).await {
            warn!(error = %format!("{:#}", err), lists = current.len(), "save failed, restoring lists");
            for (list, saved) in lists.iter_mut().zip(before) {
                **list = saved;
            }
            return Err(BoardError::Persistence(err));
        }
        Ok(())
    }

    async fn save_board(&self, board: &Board) -> BoardResult<()> {
        self.store.save_board(board).await?;
        Ok(())
    }

    /// Best-effort write of a board's previous state after a later step failed.
    async fn revert_board(&self, before: &Board) {
        if let Err(err) = self.store.save_board(before).await {
            warn!(board_id = before.id, error = %format!("{:#}", err), "failed to revert board");
        }
    }

    fn publish(&self, change: CardChange) {
        self.broker.publish(change);
    }

    // ── Boards ────────────────────────────────────────────────────────

    pub async fn create_board(&self, name: &str) -> BoardResult<Board> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BoardError::BadRequest("Board name cannot be empty".into()));
        }
        let board = self.store.create_board(name).await?;
        info!(board_id = board.id, name = %board.name, "board created");
        Ok(board)
    }

    pub async fn list_boards(&self) -> BoardResult<Vec<BoardSummary>> {
        let boards = self.store.list_boards().await?;
        Ok(boards.iter().map(BoardSummary::from).collect())
    }

    pub async fn board_view(&self, board_id: BoardId) -> BoardResult<BoardView> {
        let board = self.board(board_id).await?;
        let mut lists = Vec::with_capacity(board.lists.len());
        for &list_id in &board.lists {
            match self.lock_list(list_id).await {
                Ok(list) => lists.push(list.clone()),
                // Deleted between loading the board and reading the list.
                Err(BoardError::ListNotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(BoardView {
            board: BoardSummary::from(&board),
            lists,
        })
    }

    /// Delete a board and everything in it. Requires the admin password.
    /// Every card it held is published as deleted.
    pub async fn delete_board(&self, admin_password: &str, board_id: BoardId) -> BoardResult<()> {
        self.admin.check(admin_password)?;
        let board_lock = self.board_locks.get(board_id);
        let _board_guard = board_lock.lock().await;

        let board = self.board(board_id).await?;
        let lists = self.lock_lists(&board.lists).await?;
        if !self.store.delete_board(board_id).await? {
            return Err(BoardError::BoardNotFound { id: board_id });
        }
        for &list_id in &board.lists {
            self.engine.evict(list_id);
        }
        self.board_locks.forget(board_id);
        let mut cards = 0;
        for list in &lists {
            for card in list.cards.iter() {
                self.publish(CardChange::deleted(board_id, list.id, card.id));
                cards += 1;
            }
        }
        info!(board_id, lists = board.lists.len(), cards, "board deleted");
        Ok(())
    }

    // ── Access ────────────────────────────────────────────────────────

    /// Set or clear (`""`) a board's password. The session that sets it is
    /// unlocked for the board afterwards.
    pub async fn set_password(
        &self,
        session: &mut SessionContext,
        board_id: BoardId,
        password: &str,
    ) -> BoardResult<BoardSummary> {
        let board_lock = self.board_locks.get(board_id);
        let _board_guard = board_lock.lock().await;

        let mut board = self.board(board_id).await?;
        session.ensure_writable(&board)?;
        guard::set_password(&mut board, password);
        self.save_board(&board).await?;
        if board.has_password() {
            session.grant(board_id);
        }
        info!(board_id, protected = board.has_password(), "board password changed");
        Ok(BoardSummary::from(&board))
    }

    pub async fn verify_password(&self, board_id: BoardId, password: &str) -> BoardResult<bool> {
        let board = self.board(board_id).await?;
        Ok(guard::verify(&board, password))
    }

    pub async fn unlock(
        &self,
        session: &mut SessionContext,
        board_id: BoardId,
        password: &str,
    ) -> BoardResult<()> {
        let board = self.board(board_id).await?;
        session.request_unlock(&board, password)?;
        debug!(board_id, session = %session.id, "board unlocked");
        Ok(())
    }

    // ── Lists ─────────────────────────────────────────────────────────

    pub async fn add_list(
        &self,
        session: &SessionContext,
        board_id: BoardId,
        name: &str,
    ) -> BoardResult<BoardList> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BoardError::BadRequest("List name cannot be empty".into()));
        }
        let board_lock = self.board_locks.get(board_id);
        let _board_guard = board_lock.lock().await;

        let board = self.board(board_id).await?;
        session.ensure_writable(&board)?;
        let list = self.store.create_list(board_id, name).await?;
        self.engine.install(list.clone());
        debug!(board_id, list_id = list.id, "list added");
        Ok(list)
    }

    pub async fn rename_list(
        &self,
        session: &SessionContext,
        list_id: ListId,
        name: &str,
    ) -> BoardResult<BoardList> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BoardError::BadRequest("List name cannot be empty".into()));
        }
        let mut list = self.lock_list(list_id).await?;
        let board = self.board(list.board_id).await?;
        session.ensure_writable(&board)?;

        let before = list.clone();
        list.name = name.to_string();
        self.commit(&mut [&mut *list], vec![before]).await?;
        Ok(list.clone())
    }

    /// Delete a list and its cards. Each card is published as deleted.
    pub async fn delete_list(&self, session: &SessionContext, list_id: ListId) -> BoardResult<()> {
        let board_id = self.lock_list(list_id).await?.board_id;
        let board_lock = self.board_locks.get(board_id);
        let _board_guard = board_lock.lock().await;

        let list = self.lock_list(list_id).await?;
        let board = self.board(board_id).await?;
        session.ensure_writable(&board)?;

        self.store.delete_list(list_id).await?;
        self.engine.evict(list_id);
        for card in list.cards.iter() {
            self.publish(CardChange::deleted(board_id, list_id, card.id));
        }
        info!(board_id, list_id, cards = list.cards.len(), "list deleted");
        Ok(())
    }

    pub async fn read_list(&self, list_id: ListId) -> BoardResult<Vec<Card>> {
        self.hydrate(list_id).await?;
        self.engine.read(list_id).await
    }

    // ── Cards ─────────────────────────────────────────────────────────

    pub async fn get_card(&self, card_id: CardId) -> BoardResult<Card> {
        let list = self.lock_card_list(card_id).await?;
        list.cards
            .get(card_id)
            .cloned()
            .ok_or(BoardError::CardNotFound { id: card_id })
    }

    /// Insert a new card at `index` (clamped; end of list when absent).
    pub async fn add_card(
        &self,
        session: &SessionContext,
        list_id: ListId,
        draft: CardDraft,
        index: Option<i64>,
    ) -> BoardResult<Card> {
        let mut list = self.lock_list(list_id).await?;
        draft
            .clone()
            .into_card(0, list.id, list.board_id)
            .validate()
            .map_err(BoardError::BadRequest)?;
        let board = self.board(list.board_id).await?;
        session.ensure_writable(&board)?;

        let card = self.store.create_card(list_id, draft).await?;
        let card_id = card.id;
        let before = list.clone();
        let at = index.unwrap_or(list.cards.len() as i64);
        list.insert_at(card, at);

        if let Err(err) = self.commit(&mut [&mut *list], vec![before]).await {
            if let Err(cleanup) = self.store.delete_card(card_id).await {
                warn!(card_id, error = %format!("{:#}", cleanup), "failed to discard unsaved card");
            }
            return Err(err);
        }

        let card = list
            .cards
            .get(card_id)
            .cloned()
            .ok_or(BoardError::CardNotFound { id: card_id })?;
        debug!(list_id, card_id, "card created");
        self.publish(CardChange::of(ChangeKind::Created, &card));
        Ok(card)
    }

    /// Replace a card's content. The card must currently be in `list_id`.
    pub async fn update_card(
        &self,
        session: &SessionContext,
        list_id: ListId,
        card_id: CardId,
        draft: CardDraft,
    ) -> BoardResult<Card> {
        let mut list = self.lock_list(list_id).await?;
        let board = self.board(list.board_id).await?;
        session.ensure_writable(&board)?;

        let mut updated = list
            .cards
            .get(card_id)
            .cloned()
            .ok_or(BoardError::CardNotFound { id: card_id })?;
        draft.apply_to(&mut updated);
        updated.validate().map_err(BoardError::BadRequest)?;

        let before = list.clone();
        if let Some(slot) = list.cards.get_mut(card_id) {
            *slot = updated.clone();
        }
        self.commit(&mut [&mut *list], vec![before]).await?;
        self.publish(CardChange::of(ChangeKind::Updated, &updated));
        Ok(updated)
    }

    /// Move a card to `index` of `target_list`, within its current list or
    /// across lists of the same board.
    pub async fn move_card(
        &self,
        session: &SessionContext,
        card_id: CardId,
        target_list: ListId,
        index: i64,
    ) -> BoardResult<Card> {
        for _ in 0..LOCATE_ATTEMPTS {
            let source = self.stored_card(card_id).await?.list_id;
            let moved = if source == target_list {
                self.move_within(session, source, card_id, index).await
            } else {
                self.move_across(session, source, target_list, card_id, index).await
            };
            match moved {
                // Moved elsewhere before we got the lock; look again.
                Err(BoardError::CardNotFound { .. }) => continue,
                other => return other,
            }
        }
        Err(BoardError::CardNotFound { id: card_id })
    }

    async fn move_within(
        &self,
        session: &SessionContext,
        list_id: ListId,
        card_id: CardId,
        index: i64,
    ) -> BoardResult<Card> {
        let mut list = self.lock_list(list_id).await?;
        let board = self.board(list.board_id).await?;
        session.ensure_writable(&board)?;

        let before = list.clone();
        let outcome = list.move_within_list(card_id, index)?;
        if let MoveOutcome::Moved { .. } = outcome {
            self.commit(&mut [&mut *list], vec![before]).await?;
        }
        let card = list
            .cards
            .get(card_id)
            .cloned()
            .ok_or(BoardError::CardNotFound { id: card_id })?;
        if let MoveOutcome::Moved { from, to } = outcome {
            debug!(list_id, card_id, from, to, "card reordered");
            self.publish(CardChange::of(ChangeKind::Moved, &card));
        }
        Ok(card)
    }

    async fn move_across(
        &self,
        session: &SessionContext,
        source_id: ListId,
        target_id: ListId,
        card_id: CardId,
        index: i64,
    ) -> BoardResult<Card> {
        self.hydrate(source_id).await?;
        self.hydrate(target_id).await?;
        let (mut source, mut target) = self.engine.lock_pair(source_id, target_id).await?;
        if source.board_id != target.board_id {
            return Err(BoardError::BadRequest(format!(
                "Cannot move card {} to list {} on another board",
                card_id, target_id
            )));
        }
        let board = self.board(source.board_id).await?;
        session.ensure_writable(&board)?;

        let before = vec![source.clone(), target.clone()];
        let at = move_across_lists(&mut source, &mut target, card_id, index)?;
        self.commit(&mut [&mut *source, &mut *target], before).await?;

        let card = target
            .cards
            .get(card_id)
            .cloned()
            .ok_or(BoardError::CardNotFound { id: card_id })?;
        debug!(from_list = source_id, to_list = target_id, card_id, at, "card moved");
        self.publish(CardChange::of(ChangeKind::Moved, &card));
        Ok(card)
    }

    /// Remove a card from a list. Removing an absent card succeeds without
    /// touching storage. Returns the resulting order.
    pub async fn remove_card(
        &self,
        session: &SessionContext,
        list_id: ListId,
        card_id: CardId,
    ) -> BoardResult<Vec<Card>> {
        let mut list = self.lock_list(list_id).await?;
        let board = self.board(list.board_id).await?;
        session.ensure_writable(&board)?;

        if list.cards.get(card_id).is_none() {
            return Ok(list.read());
        }
        let before = list.clone();
        list.remove_card(card_id);
        self.commit(&mut [&mut *list], vec![before]).await?;
        self.publish(CardChange::deleted(list.board_id, list_id, card_id));
        Ok(list.read())
    }

    // ── Tags ──────────────────────────────────────────────────────────

    /// Tag a card. A tag new to the board is added to its palette as well.
    pub async fn add_card_tag(
        &self,
        session: &SessionContext,
        card_id: CardId,
        name: &str,
        color: &str,
    ) -> BoardResult<Card> {
        if name.trim().is_empty() {
            return Err(BoardError::BadRequest("Tag name cannot be empty".into()));
        }
        let board_id = self.stored_card(card_id).await?.board_id;
        let board_lock = self.board_locks.get(board_id);
        let _board_guard = board_lock.lock().await;

        let mut list = self.lock_card_list(card_id).await?;
        let board = self.board(list.board_id).await?;
        session.ensure_writable(&board)?;

        let board_before = board.clone();
        let palette_changed = !board.tags.contains_key(name);
        if palette_changed {
            let mut board = board;
            board.tags.insert(name.to_string(), color.to_string());
            self.save_board(&board).await?;
        }

        let before = list.clone();
        let card = match list.cards.get_mut(card_id) {
            Some(card) => {
                card.add_tag(name, color);
                card.clone()
            }
            None => return Err(BoardError::CardNotFound { id: card_id }),
        };
        if let Err(err) = self.commit(&mut [&mut *list], vec![before]).await {
            if palette_changed {
                self.revert_board(&board_before).await;
            }
            return Err(err);
        }
        self.publish(CardChange::of(ChangeKind::Updated, &card));
        Ok(card)
    }

    /// Untag a card. The board palette is left as it is.
    pub async fn remove_card_tag(
        &self,
        session: &SessionContext,
        card_id: CardId,
        name: &str,
    ) -> BoardResult<Card> {
        let mut list = self.lock_card_list(card_id).await?;
        let board = self.board(list.board_id).await?;
        session.ensure_writable(&board)?;

        let before = list.clone();
        let (removed, card) = match list.cards.get_mut(card_id) {
            Some(card) => (card.remove_tag(name), card.clone()),
            None => return Err(BoardError::CardNotFound { id: card_id }),
        };
        if removed {
            self.commit(&mut [&mut *list], vec![before]).await?;
            self.publish(CardChange::of(ChangeKind::Updated, &card));
        }
        Ok(card)
    }

    /// Rename and/or recolor a palette tag, rewriting every card that has it.
    pub async fn update_board_tag(
        &self,
        session: &SessionContext,
        board_id: BoardId,
        old_name: &str,
        new_name: &str,
        color: &str,
    ) -> BoardResult<BoardSummary> {
        if new_name.trim().is_empty() {
            return Err(BoardError::BadRequest("Tag name cannot be empty".into()));
        }
        self.rewrite_tag(session, board_id, old_name, Some((new_name, color)))
            .await
    }

    /// Drop a tag from the palette and from every card of the board.
    pub async fn delete_board_tag(
        &self,
        session: &SessionContext,
        board_id: BoardId,
        name: &str,
    ) -> BoardResult<BoardSummary> {
        self.rewrite_tag(session, board_id, name, None).await
    }

    async fn rewrite_tag(
        &self,
        session: &SessionContext,
        board_id: BoardId,
        old_name: &str,
        replacement: Option<(&str, &str)>,
    ) -> BoardResult<BoardSummary> {
        let board_lock = self.board_locks.get(board_id);
        let _board_guard = board_lock.lock().await;

        let mut board = self.board(board_id).await?;
        session.ensure_writable(&board)?;
        if replacement.is_some() && !board.tags.contains_key(old_name) {
            return Err(BoardError::BadRequest(format!(
                "Tag '{}' is not on board {}",
                old_name, board_id
            )));
        }
        let mut lists = self.lock_lists(&board.lists).await?;

        let board_before = board.clone();
        board.tags.remove(old_name);
        if let Some((name, color)) = replacement {
            board.tags.insert(name.to_string(), color.to_string());
        }

        let before: Vec<BoardList> = lists.iter().map(|l| (**l).clone()).collect();
        let mut touched = Vec::new();
        for list in lists.iter_mut() {
            for card in list.cards.iter_mut() {
                if !card.remove_tag(old_name) {
                    continue;
                }
                if let Some((name, color)) = replacement {
                    card.add_tag(name, color);
                }
                touched.push(card.clone());
            }
        }

        if board != board_before {
            self.save_board(&board).await?;
        }
        if !touched.is_empty() {
            let mut refs: Vec<&mut BoardList> = lists.iter_mut().map(|g| &mut **g).collect();
            if let Err(err) = self.commit(&mut refs, before).await {
                self.revert_board(&board_before).await;
                return Err(err);
            }
        }

        debug!(board_id, tag = old_name, cards = touched.len(), "board tag rewritten");
        for card in &touched {
            self.publish(CardChange::of(ChangeKind::Updated, card));
        }
        Ok(BoardSummary::from(&board))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::db::DbHandle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const ADMIN: &str = "admin-secret";

    /// Store that can be told to fail list saves.
    struct FlakyStore {
        inner: DbHandle,
        fail_saves: AtomicBool,
    }

    #[async_trait]
    impl BoardStore for FlakyStore {
        async fn create_board(&self, name: &str) -> anyhow::Result<Board> {
            self.inner.create_board(name).await
        }
        async fn load_board(&self, id: BoardId) -> anyhow::Result<Option<Board>> {
            self.inner.load_board(id).await
        }
        async fn list_boards(&self) -> anyhow::Result<Vec<Board>> {
            self.inner.list_boards().await
        }
        async fn save_board(&self, board: &Board) -> anyhow::Result<()> {
            self.inner.save_board(board).await
        }
        async fn delete_board(&self, id: BoardId) -> anyhow::Result<bool> {
            self.inner.delete_board(id).await
        }
        async fn create_list(&self, board_id: BoardId, name: &str) -> anyhow::Result<BoardList> {
            self.inner.create_list(board_id, name).await
        }
        async fn load_list(&self, id: ListId) -> anyhow::Result<Option<BoardList>> {
            self.inner.load_list(id).await
        }
        async fn save_lists(&self, lists: &[BoardList]) -> anyhow::Result<()> {
            if self.fail_saves.load(Ordering::SeqCst) {
                anyhow::bail!("disk unavailable");
            }
            self.inner.save_lists(lists).await
        }
        async fn delete_list(&self, id: ListId) -> anyhow::Result<bool> {
            self.inner.delete_list(id).await
        }
        async fn create_card(&self, list_id: ListId, draft: CardDraft) -> anyhow::Result<Card> {
            self.inner.create_card(list_id, draft).await
        }
        async fn load_card(&self, id: CardId) -> anyhow::Result<Option<Card>> {
            self.inner.load_card(id).await
        }
        async fn delete_card(&self, id: CardId) -> anyhow::Result<bool> {
            self.inner.delete_card(id).await
        }
    }

    struct Fixture {
        coordinator: Arc<MutationCoordinator>,
        store: Arc<FlakyStore>,
        session: SessionContext,
        board: Board,
        todo: ListId,
        done: ListId,
    }

    impl Fixture {
        fn broker(&self) -> &Arc<ChangeBroker> {
            self.coordinator.broker()
        }

        async fn card(&self, list: ListId, title: &str) -> Card {
            self.coordinator
                .add_card(&self.session, list, CardDraft::titled(title), None)
                .await
                .unwrap()
        }

        async fn titles(&self, list: ListId) -> Vec<String> {
            self.coordinator
                .read_list(list)
                .await
                .unwrap()
                .into_iter()
                .map(|c| c.title)
                .collect()
        }

        /// Park one long-poll waiter and return its handle.
        async fn listen(&self) -> tokio::task::JoinHandle<Option<CardChange>> {
            let broker = self.broker().clone();
            let before = broker.waiter_count();
            let handle =
                tokio::spawn(async move { broker.subscribe(Duration::from_millis(200)).await });
            while self.broker().waiter_count() == before {
                tokio::task::yield_now().await;
            }
            handle
        }
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(FlakyStore {
            inner: DbHandle::in_memory().unwrap(),
            fail_saves: AtomicBool::new(false),
        });
        let coordinator = Arc::new(MutationCoordinator::new(
            store.clone(),
            Arc::new(ChangeBroker::default()),
            AdminSecret::new(ADMIN),
        ));
        let session = SessionContext::new();
        let board = coordinator.create_board("Roadmap").await.unwrap();
        let todo = coordinator.add_list(&session, board.id, "Todo").await.unwrap().id;
        let done = coordinator.add_list(&session, board.id, "Done").await.unwrap().id;
        Fixture {
            coordinator,
            store,
            session,
            board,
            todo,
            done,
        }
    }

    #[tokio::test]
    async fn test_add_card_appends_and_publishes_created() {
        let f = fixture().await;
        f.card(f.todo, "A").await;
        let listener = f.listen().await;
        let b = f
            .coordinator
            .add_card(&f.session, f.todo, CardDraft::titled("B"), Some(0))
            .await
            .unwrap();

        assert_eq!(f.titles(f.todo).await, vec!["B", "A"]);
        let change = listener.await.unwrap().expect("change published");
        assert_eq!(change.kind, ChangeKind::Created);
        assert_eq!(change.card_id, b.id);
        assert_eq!(change.card.unwrap().list_id, f.todo);
    }

    #[tokio::test]
    async fn test_add_card_rejects_blank_title() {
        let f = fixture().await;
        let err = f
            .coordinator
            .add_card(&f.session, f.todo, CardDraft::titled("  "), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_malformed_subtasks_are_rejected() {
        let f = fixture().await;
        let duplicate = CardDraft {
            title: "A".into(),
            subtasks: vec!["one".into(), "one".into()],
            ..CardDraft::default()
        };
        let err = f
            .coordinator
            .add_card(&f.session, f.todo, duplicate, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::BadRequest(_)));

        let a = f.card(f.todo, "A").await;
        let orphan = CardDraft {
            title: "A".into(),
            subtasks: vec!["one".into()],
            completed: ["two".to_string()].into_iter().collect(),
            ..CardDraft::default()
        };
        let err = f
            .coordinator
            .update_card(&f.session, f.todo, a.id, orphan)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::BadRequest(_)));
        assert!(f.coordinator.get_card(a.id).await.unwrap().subtasks.is_empty());
        assert_eq!(f.titles(f.todo).await, vec!["A"]);
    }

    #[tokio::test]
    async fn test_cross_list_move_scenario() {
        let f = fixture().await;
        f.card(f.todo, "A").await;
        let b = f.card(f.todo, "B").await;
        f.card(f.todo, "C").await;
        f.card(f.done, "D").await;

        let listener = f.listen().await;
        let moved = f
            .coordinator
            .move_card(&f.session, b.id, f.done, 0)
            .await
            .unwrap();

        assert_eq!(moved.list_id, f.done);
        assert_eq!(f.titles(f.todo).await, vec!["A", "C"]);
        assert_eq!(f.titles(f.done).await, vec!["B", "D"]);
        let change = listener.await.unwrap().expect("move published");
        assert_eq!(change.kind, ChangeKind::Moved);
        assert_eq!(change.list_id, f.done);

        // Durable: a fresh load from storage sees the same order
        let stored = f.store.load_list(f.done).await.unwrap().unwrap();
        assert_eq!(stored.cards.ids()[0], b.id);
    }

    #[tokio::test]
    async fn test_move_within_list_clamps_index() {
        let f = fixture().await;
        let a = f.card(f.todo, "A").await;
        f.card(f.todo, "B").await;
        f.card(f.todo, "C").await;
        f.coordinator
            .move_card(&f.session, a.id, f.todo, 99)
            .await
            .unwrap();
        assert_eq!(f.titles(f.todo).await, vec!["B", "C", "A"]);
        f.coordinator
            .move_card(&f.session, a.id, f.todo, -4)
            .await
            .unwrap();
        assert_eq!(f.titles(f.todo).await, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_move_to_other_board_is_rejected() {
        let f = fixture().await;
        let a = f.card(f.todo, "A").await;
        let other = f.coordinator.create_board("Other").await.unwrap();
        let foreign = f
            .coordinator
            .add_list(&f.session, other.id, "Elsewhere")
            .await
            .unwrap();
        let err = f
            .coordinator
            .move_card(&f.session, a.id, foreign.id, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::BadRequest(_)));
        assert_eq!(f.titles(f.todo).await, vec!["A"]);
    }

    #[tokio::test]
    async fn test_remove_card_is_idempotent() {
        let f = fixture().await;
        let a = f.card(f.todo, "A").await;
        f.card(f.todo, "B").await;
        let after = f
            .coordinator
            .remove_card(&f.session, f.todo, a.id)
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        let again = f
            .coordinator
            .remove_card(&f.session, f.todo, a.id)
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
        assert!(f.store.load_card(a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_locked_board_rejects_mutations_without_side_effects() {
        let f = fixture().await;
        let a = f.card(f.todo, "A").await;
        let mut owner = f.session.clone();
        f.coordinator
            .set_password(&mut owner, f.board.id, "hunter2")
            .await
            .unwrap();

        let visitor = SessionContext::new();
        let listener = f.listen().await;
        let err = f
            .coordinator
            .move_card(&visitor, a.id, f.done, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::ReadOnly { .. }));
        let err = f
            .coordinator
            .add_card(&visitor, f.todo, CardDraft::titled("X"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::ReadOnly { .. }));

        assert_eq!(f.titles(f.todo).await, vec!["A"]);
        assert!(f.titles(f.done).await.is_empty());
        assert!(listener.await.unwrap().is_none());

        // The owner unlocked itself by setting the password
        f.coordinator
            .move_card(&owner, a.id, f.done, 0)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unlock_with_correct_password_allows_writes() {
        let f = fixture().await;
        let mut owner = f.session.clone();
        f.coordinator
            .set_password(&mut owner, f.board.id, "pw")
            .await
            .unwrap();

        let mut visitor = SessionContext::new();
        let err = f
            .coordinator
            .unlock(&mut visitor, f.board.id, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::AuthFailure { .. }));
        assert!(f.coordinator.verify_password(f.board.id, "pw").await.unwrap());

        f.coordinator
            .unlock(&mut visitor, f.board.id, "pw")
            .await
            .unwrap();
        f.coordinator
            .add_card(&visitor, f.todo, CardDraft::titled("ok"), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_persistence_failure_restores_and_does_not_publish() {
        let f = fixture().await;
        let a = f.card(f.todo, "A").await;
        f.card(f.todo, "B").await;

        f.store.fail_saves.store(true, Ordering::SeqCst);
        let listener = f.listen().await;
        let err = f
            .coordinator
            .move_card(&f.session, a.id, f.done, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::Persistence(_)));
        let err = f
            .coordinator
            .add_card(&f.session, f.todo, CardDraft::titled("C"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::Persistence(_)));

        assert_eq!(f.titles(f.todo).await, vec!["A", "B"]);
        assert!(f.titles(f.done).await.is_empty());
        assert!(listener.await.unwrap().is_none());

        f.store.fail_saves.store(false, Ordering::SeqCst);
        let stored = f.store.load_list(f.todo).await.unwrap().unwrap();
        assert_eq!(stored.cards.len(), 2);
    }

    #[tokio::test]
    async fn test_update_card_requires_membership() {
        let f = fixture().await;
        let a = f.card(f.todo, "A").await;
        let draft = CardDraft {
            title: "A2".into(),
            subtasks: vec!["one".into()],
            ..CardDraft::default()
        };
        let err = f
            .coordinator
            .update_card(&f.session, f.done, a.id, draft.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::CardNotFound { .. }));

        let updated = f
            .coordinator
            .update_card(&f.session, f.todo, a.id, draft)
            .await
            .unwrap();
        assert_eq!(updated.title, "A2");
        assert_eq!(f.coordinator.get_card(a.id).await.unwrap().subtasks, vec!["one"]);
    }

    #[tokio::test]
    async fn test_card_tag_extends_palette() {
        let f = fixture().await;
        let a = f.card(f.todo, "A").await;
        let card = f
            .coordinator
            .add_card_tag(&f.session, a.id, "urgent", "#ff0000")
            .await
            .unwrap();
        assert_eq!(card.tags.get("urgent").map(String::as_str), Some("#ff0000"));

        let view = f.coordinator.board_view(f.board.id).await.unwrap();
        assert!(view.board.tags.contains_key("urgent"));

        let card = f
            .coordinator
            .remove_card_tag(&f.session, a.id, "urgent")
            .await
            .unwrap();
        assert!(card.tags.is_empty());
        let view = f.coordinator.board_view(f.board.id).await.unwrap();
        assert!(view.board.tags.contains_key("urgent"));
    }

    #[tokio::test]
    async fn test_update_and_delete_board_tag_rewrite_cards() {
        let f = fixture().await;
        let a = f.card(f.todo, "A").await;
        let d = f.card(f.done, "D").await;
        f.coordinator
            .add_card_tag(&f.session, a.id, "bug", "#f00")
            .await
            .unwrap();
        f.coordinator
            .add_card_tag(&f.session, d.id, "bug", "#f00")
            .await
            .unwrap();

        let summary = f
            .coordinator
            .update_board_tag(&f.session, f.board.id, "bug", "defect", "#0f0")
            .await
            .unwrap();
        assert!(!summary.tags.contains_key("bug"));
        assert_eq!(summary.tags.get("defect").map(String::as_str), Some("#0f0"));
        let a = f.coordinator.get_card(a.id).await.unwrap();
        assert_eq!(a.tags.get("defect").map(String::as_str), Some("#0f0"));

        let summary = f
            .coordinator
            .delete_board_tag(&f.session, f.board.id, "defect")
            .await
            .unwrap();
        assert!(summary.tags.is_empty());
        assert!(f.coordinator.get_card(d.id).await.unwrap().tags.is_empty());

        let err = f
            .coordinator
            .update_board_tag(&f.session, f.board.id, "missing", "x", "#000")
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_list_rename_and_delete() {
        let f = fixture().await;
        let a = f.card(f.done, "A").await;
        let renamed = f
            .coordinator
            .rename_list(&f.session, f.done, "Shipped")
            .await
            .unwrap();
        assert_eq!(renamed.name, "Shipped");

        let listener = f.listen().await;
        f.coordinator.delete_list(&f.session, f.done).await.unwrap();
        let change = listener.await.unwrap().expect("card deletion published");
        assert_eq!(change.kind, ChangeKind::Deleted);
        assert_eq!(change.card_id, a.id);

        assert!(matches!(
            f.coordinator.read_list(f.done).await,
            Err(BoardError::ListNotFound { .. })
        ));
        let view = f.coordinator.board_view(f.board.id).await.unwrap();
        assert_eq!(view.lists.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_board_requires_admin_password() {
        let f = fixture().await;
        f.card(f.todo, "A").await;
        let err = f
            .coordinator
            .delete_board("guess", f.board.id)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::AdminAuthFailure));

        f.coordinator.delete_board(ADMIN, f.board.id).await.unwrap();
        assert!(matches!(
            f.coordinator.board_view(f.board.id).await,
            Err(BoardError::BoardNotFound { .. })
        ));
        assert!(matches!(
            f.coordinator.read_list(f.todo).await,
            Err(BoardError::ListNotFound { .. })
        ));
        assert!(f.coordinator.list_boards().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_board_publishes_card_deletions() {
        let f = fixture().await;
        let a = f.card(f.todo, "A").await;
        let b = f.card(f.done, "B").await;

        let listener = f.listen().await;
        assert!(f.coordinator.delete_board("guess", f.board.id).await.is_err());
        assert!(listener.await.unwrap().is_none());

        let listener = f.listen().await;
        f.coordinator.delete_board(ADMIN, f.board.id).await.unwrap();
        let change = listener.await.unwrap().expect("card deletion published");
        assert_eq!(change.kind, ChangeKind::Deleted);
        assert_eq!(change.board_id, f.board.id);
        assert!(change.card.is_none());
        assert!([a.id, b.id].contains(&change.card_id));
        assert_eq!(f.broker().waiter_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_moves_keep_every_card() {
        let f = fixture().await;
        let mut ids = Vec::new();
        for n in 0..6 {
            ids.push(f.card(f.todo, &format!("card {}", n)).await.id);
        }

        let mut tasks = Vec::new();
        for (n, id) in ids.iter().copied().enumerate() {
            let coordinator = f.coordinator.clone();
            let session = f.session.clone();
            let (todo, done) = (f.todo, f.done);
            tasks.push(tokio::spawn(async move {
                for step in 0..5 {
                    let target = if (n + step) % 2 == 0 { done } else { todo };
                    coordinator
                        .move_card(&session, id, target, (step % 3) as i64)
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut all = f.coordinator.read_list(f.todo).await.unwrap();
        all.extend(f.coordinator.read_list(f.done).await.unwrap());
        let mut seen: Vec<CardId> = all.iter().map(|c| c.id).collect();
        seen.sort_unstable();
        assert_eq!(seen, ids);
    }
}
