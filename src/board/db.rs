use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use super::models::*;
use super::store::BoardStore;

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(BoardDb::new(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(BoardDb::new_in_memory()?))
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS boards (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                password_hash TEXT,
                tags TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS lists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                board_id INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS cards (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                list_id INTEGER NOT NULL REFERENCES lists(id) ON DELETE CASCADE,
                board_id INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                subtasks TEXT NOT NULL DEFAULT '[]',
                completed TEXT NOT NULL DEFAULT '[]',
                tags TEXT NOT NULL DEFAULT '{}',
                position INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_lists_board ON lists(board_id, position);
            CREATE INDEX IF NOT EXISTS idx_cards_list ON cards(list_id, position);
            ",
        )?;
        Ok(())
    }

    // ── Boards ────────────────────────────────────────────────────────

    pub fn create_board(&self, name: &str) -> Result<Board> {
        self.conn
            .execute("INSERT INTO boards (name) VALUES (?1)", params![name])
            .context("Failed to insert board")?;
        let id = self.conn.last_insert_rowid();
        self.get_board(id)?.context("Board not found after insert")
    }

    pub fn get_board(&self, id: BoardId) -> Result<Option<Board>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, password_hash, tags, created_at FROM boards WHERE id = ?1",
                params![id],
                BoardRow::from_row,
            )
            .optional()
            .context("Failed to query board")?;
        match row {
            Some(row) => {
                let lists = self.list_ids(row.id)?;
                Ok(Some(row.into_board(lists)?))
            }
            None => Ok(None),
        }
    }

    pub fn list_boards(&self) -> Result<Vec<Board>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, password_hash, tags, created_at FROM boards ORDER BY id")
            .context("Failed to prepare list_boards")?;
        let rows = stmt
            .query_map([], BoardRow::from_row)
            .context("Failed to query boards")?;
        let mut boards = Vec::new();
        for row in rows {
            let r = row.context("Failed to read board row")?;
            let lists = self.list_ids(r.id)?;
            boards.push(r.into_board(lists)?);
        }
        Ok(boards)
    }

    pub fn save_board(&self, board: &Board) -> Result<()> {
        let tags = serde_json::to_string(&board.tags).context("Failed to encode board tags")?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let updated = tx
            .execute(
                "UPDATE boards SET name = ?1, password_hash = ?2, tags = ?3 WHERE id = ?4",
                params![board.name, board.password_hash, tags, board.id],
            )
            .context("Failed to update board")?;
        anyhow::ensure!(updated == 1, "Board {} does not exist", board.id);
        for (position, list_id) in board.lists.iter().enumerate() {
            tx.execute(
                "UPDATE lists SET position = ?1 WHERE id = ?2 AND board_id = ?3",
                params![position as i64, list_id, board.id],
            )
            .context("Failed to update list position")?;
        }
        tx.commit().context("Failed to commit board update")?;
        Ok(())
    }

    pub fn delete_board(&self, id: BoardId) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM boards WHERE id = ?1", params![id])
            .context("Failed to delete board")?;
        Ok(count > 0)
    }

    fn list_ids(&self, board_id: BoardId) -> Result<Vec<ListId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM lists WHERE board_id = ?1 ORDER BY position, id")
            .context("Failed to prepare list_ids")?;
        let rows = stmt
            .query_map(params![board_id], |row| row.get(0))
            .context("Failed to query list ids")?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.context("Failed to read list id")?);
        }
        Ok(ids)
    }

    // ── Lists ─────────────────────────────────────────────────────────

    pub fn create_list(&self, board_id: BoardId, name: &str) -> Result<BoardList> {
        let next: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(position), -1) + 1 FROM lists WHERE board_id = ?1",
                params![board_id],
                |row| row.get(0),
            )
            .context("Failed to get next list position")?;
        self.conn
            .execute(
                "INSERT INTO lists (board_id, name, position) VALUES (?1, ?2, ?3)",
                params![board_id, name, next],
            )
            .context("Failed to insert list")?;
        let id = self.conn.last_insert_rowid();
        self.get_list(id)?.context("List not found after insert")
    }

    pub fn get_list(&self, id: ListId) -> Result<Option<BoardList>> {
        let header: Option<(ListId, BoardId, String)> = self
            .conn
            .query_row(
                "SELECT id, board_id, name FROM lists WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .context("Failed to query list")?;
        let Some((id, board_id, name)) = header else {
            return Ok(None);
        };
        let mut list = BoardList::new(id, board_id, name);
        list.cards = self.list_cards(id)?.into();
        Ok(Some(list))
    }

    fn list_cards(&self, list_id: ListId) -> Result<Vec<Card>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, list_id, board_id, title, description, subtasks, completed, tags
                 FROM cards WHERE list_id = ?1 ORDER BY position, id",
            )
            .context("Failed to prepare list_cards")?;
        let rows = stmt
            .query_map(params![list_id], CardRow::from_row)
            .context("Failed to query cards")?;
        let mut cards = Vec::new();
        for row in rows {
            let r = row.context("Failed to read card row")?;
            cards.push(r.into_card()?);
        }
        Ok(cards)
    }

    /// Persist names and full card order for every list in one transaction.
    pub fn save_lists(&self, lists: &[BoardList]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        // Upsert everything first so a card moving between two of these
        // lists is never deleted by the stale-row sweep below.
        for list in lists {
            let updated = tx
                .execute(
                    "UPDATE lists SET name = ?1 WHERE id = ?2",
                    params![list.name, list.id],
                )
                .context("Failed to update list")?;
            anyhow::ensure!(updated == 1, "List {} does not exist", list.id);

            for (position, card) in list.cards.iter().enumerate() {
                let encoded = EncodedCard::new(card)?;
                tx.execute(
                    "INSERT INTO cards (id, list_id, board_id, title, description, subtasks, completed, tags, position)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(id) DO UPDATE SET
                        list_id = excluded.list_id,
                        board_id = excluded.board_id,
                        title = excluded.title,
                        description = excluded.description,
                        subtasks = excluded.subtasks,
                        completed = excluded.completed,
                        tags = excluded.tags,
                        position = excluded.position,
                        updated_at = datetime('now')",
                    params![
                        card.id,
                        list.id,
                        list.board_id,
                        card.title,
                        card.description,
                        encoded.subtasks,
                        encoded.completed,
                        encoded.tags,
                        position as i64,
                    ],
                )
                .with_context(|| format!("Failed to save card {}", card.id))?;
            }
        }

        for list in lists {
            let keep = serde_json::to_string(&list.cards.ids())?;
            tx.execute(
                "DELETE FROM cards WHERE list_id = ?1
                 AND id NOT IN (SELECT value FROM json_each(?2))",
                params![list.id, keep],
            )
            .context("Failed to delete removed cards")?;
        }

        tx.commit().context("Failed to commit list update")?;
        Ok(())
    }

    pub fn delete_list(&self, id: ListId) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM lists WHERE id = ?1", params![id])
            .context("Failed to delete list")?;
        Ok(count > 0)
    }

    // ── Cards ─────────────────────────────────────────────────────────

    pub fn create_card(&self, list_id: ListId, draft: CardDraft) -> Result<Card> {
        let board_id: BoardId = self
            .conn
            .query_row(
                "SELECT board_id FROM lists WHERE id = ?1",
                params![list_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up list")?
            .with_context(|| format!("List {} does not exist", list_id))?;
        let next: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(position), -1) + 1 FROM cards WHERE list_id = ?1",
                params![list_id],
                |row| row.get(0),
            )
            .context("Failed to get next card position")?;

        let pending = draft.into_card(0, list_id, board_id);
        let encoded = EncodedCard::new(&pending)?;
        self.conn
            .execute(
                "INSERT INTO cards (list_id, board_id, title, description, subtasks, completed, tags, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    list_id,
                    board_id,
                    pending.title,
                    pending.description,
                    encoded.subtasks,
                    encoded.completed,
                    encoded.tags,
                    next,
                ],
            )
            .context("Failed to insert card")?;
        let id = self.conn.last_insert_rowid();
        self.get_card(id)?.context("Card not found after insert")
    }

    pub fn get_card(&self, id: CardId) -> Result<Option<Card>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, list_id, board_id, title, description, subtasks, completed, tags
                 FROM cards WHERE id = ?1",
                params![id],
                CardRow::from_row,
            )
            .optional()
            .context("Failed to query card")?;
        row.map(CardRow::into_card).transpose()
    }

    pub fn delete_card(&self, id: CardId) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM cards WHERE id = ?1", params![id])
            .context("Failed to delete card")?;
        Ok(count > 0)
    }
}

#[async_trait]
impl BoardStore for DbHandle {
    async fn create_board(&self, name: &str) -> Result<Board> {
        let name = name.to_string();
        self.call(move |db| db.create_board(&name)).await
    }

    async fn load_board(&self, id: BoardId) -> Result<Option<Board>> {
        self.call(move |db| db.get_board(id)).await
    }

    async fn list_boards(&self) -> Result<Vec<Board>> {
        self.call(|db| db.list_boards()).await
    }

    async fn save_board(&self, board: &Board) -> Result<()> {
        let board = board.clone();
        self.call(move |db| db.save_board(&board)).await
    }

    async fn delete_board(&self, id: BoardId) -> Result<bool> {
        self.call(move |db| db.delete_board(id)).await
    }

    async fn create_list(&self, board_id: BoardId, name: &str) -> Result<BoardList> {
        let name = name.to_string();
        self.call(move |db| db.create_list(board_id, &name)).await
    }

    async fn load_list(&self, id: ListId) -> Result<Option<BoardList>> {
        self.call(move |db| db.get_list(id)).await
    }

    async fn save_lists(&self, lists: &[BoardList]) -> Result<()> {
        let lists = lists.to_vec();
        self.call(move |db| db.save_lists(&lists)).await
    }

    async fn delete_list(&self, id: ListId) -> Result<bool> {
        self.call(move |db| db.delete_list(id)).await
    }

    async fn create_card(&self, list_id: ListId, draft: CardDraft) -> Result<Card> {
        self.call(move |db| db.create_card(list_id, draft)).await
    }

    async fn load_card(&self, id: CardId) -> Result<Option<Card>> {
        self.call(move |db| db.get_card(id)).await
    }

    async fn delete_card(&self, id: CardId) -> Result<bool> {
        self.call(move |db| db.delete_card(id)).await
    }
}

// ── Row types ─────────────────────────────────────────────────────────

/// Intermediate row struct for boards.
struct BoardRow {
    id: BoardId,
    name: String,
    password_hash: Option<String>,
    tags: String,
    created_at: String,
}

impl BoardRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            password_hash: row.get(2)?,
            tags: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_board(self, lists: Vec<ListId>) -> Result<Board> {
        let tags: TagPalette =
            serde_json::from_str(&self.tags).context("Failed to parse board tags JSON")?;
        Ok(Board {
            id: self.id,
            name: self.name,
            lists,
            password_hash: self.password_hash,
            tags,
            created_at: self.created_at,
        })
    }
}

/// Intermediate row struct for cards.
struct CardRow {
    id: CardId,
    list_id: ListId,
    board_id: BoardId,
    title: String,
    description: String,
    subtasks: String,
    completed: String,
    tags: String,
}

impl CardRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            list_id: row.get(1)?,
            board_id: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            subtasks: row.get(5)?,
            completed: row.get(6)?,
            tags: row.get(7)?,
        })
    }

    fn into_card(self) -> Result<Card> {
        let subtasks: Vec<String> =
            serde_json::from_str(&self.subtasks).context("Failed to parse card subtasks JSON")?;
        let completed: BTreeSet<String> = serde_json::from_str(&self.completed)
            .context("Failed to parse card completed JSON")?;
        let tags: TagPalette =
            serde_json::from_str(&self.tags).context("Failed to parse card tags JSON")?;
        Ok(Card {
            id: self.id,
            list_id: self.list_id,
            board_id: self.board_id,
            title: self.title,
            description: self.description,
            subtasks,
            completed,
            tags,
        })
    }
}

/// JSON columns of a card, encoded once per write.
struct EncodedCard {
    subtasks: String,
    completed: String,
    tags: String,
}

impl EncodedCard {
    fn new(card: &Card) -> Result<Self> {
        Ok(Self {
            subtasks: serde_json::to_string(&card.subtasks)
                .context("Failed to encode card subtasks")?,
            completed: serde_json::to_string(&card.completed)
                .context("Failed to encode card completed")?,
            tags: serde_json::to_string(&card.tags).context("Failed to encode card tags")?,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
