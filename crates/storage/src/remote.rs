//! Remote backend surface: one table handle per entity kind, each pairing
//! a request/response table client with a change feed that pushes row
//! events (including echoes of this client's own writes).

use std::sync::{Arc, Mutex};

use taskdeck_core::{NotesRow, ProjectRow, RowFields, TableRow, TagRow, TaskRow, TodoRow};

use crate::error::StorageError;
use crate::feed::{ChangeFeed, Subscription};

/// A change pushed by the backend. Updates carry only the fields the
/// originating patch touched; receivers merge them onto their copy of the
/// row rather than replacing it.
#[derive(Debug, Clone)]
pub enum ChangeEvent<R> {
    Inserted(R),
    Updated {
        id: String,
        project_id: Option<String>,
        fields: RowFields,
    },
    Deleted {
        id: String,
        project_id: Option<String>,
    },
}

impl<R: TableRow> ChangeEvent<R> {
    pub fn id(&self) -> &str {
        match self {
            Self::Inserted(row) => row.row_id(),
            Self::Updated { id, .. } | Self::Deleted { id, .. } => id,
        }
    }

    /// Project the event belongs to, when the backend could determine one.
    pub fn scope(&self) -> Option<&str> {
        match self {
            Self::Inserted(row) => row.row_project_id(),
            Self::Updated { project_id, .. } | Self::Deleted { project_id, .. } => {
                project_id.as_deref()
            }
        }
    }
}

/// One backend table. Writes are fire-and-return; the corresponding change
/// event arrives later over the feed like any other client's write would.
pub trait RemoteTable<R: TableRow>: Send {
    /// Fetch rows, optionally restricted to one project.
    fn select(&mut self, scope: Option<&str>) -> Result<Vec<R>, StorageError>;

    fn insert(&mut self, row: R) -> Result<(), StorageError>;

    fn update(&mut self, id: &str, fields: &RowFields) -> Result<(), StorageError>;

    fn delete(&mut self, id: &str) -> Result<(), StorageError>;
}

/// Shared handle to one table plus its feed. Cloning is cheap; every clone
/// talks to the same underlying table client.
pub struct TableHandle<R: TableRow> {
    table: Arc<Mutex<Box<dyn RemoteTable<R>>>>,
    feed: ChangeFeed<R>,
}

impl<R: TableRow> Clone for TableHandle<R> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            feed: self.feed.clone(),
        }
    }
}

impl<R: TableRow + Clone + Send + 'static> TableHandle<R> {
    pub fn new(table: impl RemoteTable<R> + 'static, feed: ChangeFeed<R>) -> Self {
        Self {
            table: Arc::new(Mutex::new(Box::new(table))),
            feed,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Box<dyn RemoteTable<R>>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn select(&self, scope: Option<&str>) -> Result<Vec<R>, StorageError> {
        self.lock().select(scope)
    }

    pub fn insert(&self, row: R) -> Result<(), StorageError> {
        self.lock().insert(row)
    }

    pub fn update(&self, id: &str, fields: &RowFields) -> Result<(), StorageError> {
        self.lock().update(id, fields)
    }

    pub fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.lock().delete(id)
    }

    /// Subscribe to change events, optionally filtered to one project.
    pub fn subscribe(&self, scope: Option<String>) -> Subscription<R> {
        self.feed.subscribe(scope)
    }

    pub fn feed(&self) -> &ChangeFeed<R> {
        &self.feed
    }
}

/// The full set of backend tables a synced deck needs.
#[derive(Clone)]
pub struct RemoteHandles {
    pub projects: TableHandle<ProjectRow>,
    pub tasks: TableHandle<TaskRow>,
    pub todos: TableHandle<TodoRow>,
    pub tags: TableHandle<TagRow>,
    pub notes: TableHandle<NotesRow>,
}
