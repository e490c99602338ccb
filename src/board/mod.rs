//! Shared kanban boards: ordered card lists kept in sync across viewers.
//!
//! ## Overview
//!
//! Boards hold ordered lists of cards. Any number of viewers read and change
//! the same board at once; each change is applied to the list's in-memory
//! copy, written to SQLite, then pushed to every viewer currently waiting on
//! `/api/updates`. Boards may carry a password, without which a session can
//! read but not write.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Viewer  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ long-poll│         │                                        │
//!                       │         │ MutationCoordinator::move_card() ...   │
//!                       │         v                                        │
//!                       │  coordinator.rs  (guard → apply → save → publish)│
//!                       │     │           │              │                 │
//!                       │     v           v              v                 │
//!                       │  guard.rs    ordered.rs     broker.rs            │
//!                       │  (sessions,  (ListEngine,   (ChangeBroker,       │
//!                       │   passwords)  CardSequence)  one-shot waiters)   │
//!                       │                 │                                │
//!                       │                 v                                │
//!                       │  store.rs (BoardStore trait) ← db.rs (SQLite)    │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module    | Responsibility                                           |
//! |-----------|----------------------------------------------------------|
//! | `models`  | Shared types: `Board`, `BoardList`, `Card`, `CardChange` |
//! | `cursor`  | Keyboard-driven selection and drag state for a client    |
//!
//! ## Typical Request Flow (drag a card to another list)
//!
//! 1. `POST /api/cards/{id}/move` → `api::move_card()`
//! 2. The coordinator finds the card's list, checks the session may write
//!    to the board, and locks source and target lists in ascending id order.
//! 3. The card is removed from the source, inserted at the clamped index
//!    in the target, and both lists are saved in one transaction.
//! 4. The moved card is published; every pending long-poll wakes with it.

pub mod api;
pub mod broker;
pub mod coordinator;
pub mod cursor;
pub mod db;
pub mod guard;
pub mod models;
pub mod ordered;
pub mod server;
pub mod store;
