//! Pipeline kanban board.
//!
//! | Module     | Responsibility                                            |
//! |------------|-----------------------------------------------------------|
//! | `models`   | Leads, stages, pipelines, ids, page queries               |
//! | `fetcher`  | One bounded, filtered page request against a `LeadStore`  |
//! | `column`   | Per-stage paginated window with stale-response immunity   |
//! | `registry` | Board-wide lead index across every loaded column          |
//! | `filter`   | Debounced search and ownership scope, generation counter  |
//! | `drag`     | Gesture state machine and optimistic relocation           |
//! | `admin`    | Stage create / rename / recolor / guarded delete          |
//! | `events`   | Broadcast events for the surrounding UI                   |
//! | `kanban`   | Composition root and event loop                           |

pub mod admin;
pub mod column;
pub mod drag;
pub mod events;
pub mod fetcher;
pub mod filter;
pub mod kanban;
pub mod models;
pub mod registry;

#[cfg(test)]
pub mod testing;

pub use column::{ColumnSet, StageColumnStore};
pub use drag::{DropOutcome, DropTarget, Point};
pub use events::{BoardEvent, NoticeLevel};
pub use kanban::{BoardCommand, KanbanBoard, ScrollMetrics};
pub use registry::AggregateRegistry;
