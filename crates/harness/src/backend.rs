//! In-memory backend double. Each table keeps its rows behind a shared
//! lock and publishes change events over a real feed, so reconcilers under
//! test see exactly the traffic a live backend would produce: echoes of
//! their own writes, other clients' writes, and (on request) duplicated
//! deliveries and injected failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use taskdeck_core::{NotesRow, ProjectRow, RowFields, TableRow, TagRow, TaskRow, TodoRow};
use taskdeck_storage::{ChangeEvent, ChangeFeed, RemoteHandles, RemoteTable, StorageError, TableHandle};

struct TableState<R> {
    rows: Vec<R>,
    last_event: Option<ChangeEvent<R>>,
}

pub struct TestTable<R: TableRow> {
    state: Arc<Mutex<TableState<R>>>,
    feed: ChangeFeed<R>,
    fail_next: Arc<AtomicBool>,
}

impl<R: TableRow> Clone for TestTable<R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            feed: self.feed.clone(),
            fail_next: Arc::clone(&self.fail_next),
        }
    }
}

fn merge_onto_row<R>(row: &R, fields: &RowFields) -> Result<R, StorageError>
where
    R: serde::Serialize + serde::de::DeserializeOwned,
{
    let mut value =
        serde_json::to_value(row).map_err(|e| StorageError::Serialization(e.to_string()))?;
    if let Value::Object(map) = &mut value {
        for (key, field) in fields {
            map.insert(key.clone(), field.clone());
        }
    }
    serde_json::from_value(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

impl<R> TestTable<R>
where
    R: TableRow + serde::Serialize + serde::de::DeserializeOwned + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TableState {
                rows: Vec::new(),
                last_event: None,
            })),
            feed: ChangeFeed::new(),
            fail_next: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableState<R>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn feed(&self) -> &ChangeFeed<R> {
        &self.feed
    }

    /// Make the next table call fail with a backend error.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn check_fail(&self) -> Result<(), StorageError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Backend("injected failure".into()));
        }
        Ok(())
    }

    pub fn rows(&self) -> Vec<R> {
        self.lock().rows.clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().rows.iter().any(|r| r.row_id() == id)
    }

    /// Insert server-side state without publishing, as if it predated the
    /// client's connection.
    pub fn seed(&self, row: R) {
        self.lock().rows.push(row);
    }

    fn publish(&self, event: ChangeEvent<R>) {
        self.lock().last_event = Some(event.clone());
        self.feed.publish(event);
    }

    /// Redeliver the most recent event, as an at-least-once transport may.
    pub fn redeliver_last(&self) {
        let event = self.lock().last_event.clone();
        if let Some(event) = event {
            self.feed.publish(event);
        }
    }

    /// A write from some other client: applied server-side and announced
    /// over the feed.
    pub fn remote_insert(&self, row: R) {
        self.lock().rows.push(row.clone());
        self.publish(ChangeEvent::Inserted(row));
    }

    pub fn remote_update(&self, id: &str, fields: RowFields) {
        let project_id = {
            let mut state = self.lock();
            let Some(pos) = state.rows.iter().position(|r| r.row_id() == id) else {
                return;
            };
            match merge_onto_row(&state.rows[pos], &fields) {
                Ok(merged) => state.rows[pos] = merged,
                Err(_) => return,
            }
            state.rows[pos].row_project_id().map(str::to_string)
        };
        self.publish(ChangeEvent::Updated {
            id: id.to_string(),
            project_id,
            fields,
        });
    }

    pub fn remote_delete(&self, id: &str) {
        let project_id = {
            let mut state = self.lock();
            let Some(pos) = state.rows.iter().position(|r| r.row_id() == id) else {
                return;
            };
            let project_id = state.rows[pos].row_project_id().map(str::to_string);
            state.rows.remove(pos);
            project_id
        };
        self.publish(ChangeEvent::Deleted {
            id: id.to_string(),
            project_id,
        });
    }

    pub fn handle(&self) -> TableHandle<R> {
        TableHandle::new(self.clone(), self.feed.clone())
    }
}

impl<R> Default for TestTable<R>
where
    R: TableRow + serde::Serialize + serde::de::DeserializeOwned + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R> RemoteTable<R> for TestTable<R>
where
    R: TableRow + serde::Serialize + serde::de::DeserializeOwned + Clone + Send + 'static,
{
    fn select(&mut self, scope: Option<&str>) -> Result<Vec<R>, StorageError> {
        self.check_fail()?;
        Ok(self
            .lock()
            .rows
            .iter()
            .filter(|r| scope.is_none_or(|s| r.row_project_id() == Some(s)))
            .cloned()
            .collect())
    }

    fn insert(&mut self, row: R) -> Result<(), StorageError> {
        self.check_fail()?;
        self.lock().rows.push(row.clone());
        self.publish(ChangeEvent::Inserted(row));
        Ok(())
    }

    fn update(&mut self, id: &str, fields: &RowFields) -> Result<(), StorageError> {
        self.check_fail()?;
        let project_id = {
            let mut state = self.lock();
            // A concurrent delete may have won; treat as a no-op rather
            // than an error, the delete event settles it.
            let Some(pos) = state.rows.iter().position(|r| r.row_id() == id) else {
                return Ok(());
            };
            state.rows[pos] = merge_onto_row(&state.rows[pos], fields)?;
            state.rows[pos].row_project_id().map(str::to_string)
        };
        self.publish(ChangeEvent::Updated {
            id: id.to_string(),
            project_id,
            fields: fields.clone(),
        });
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<(), StorageError> {
        self.check_fail()?;
        let project_id = {
            let mut state = self.lock();
            let Some(pos) = state.rows.iter().position(|r| r.row_id() == id) else {
                return Ok(());
            };
            let project_id = state.rows[pos].row_project_id().map(str::to_string);
            state.rows.remove(pos);
            project_id
        };
        self.publish(ChangeEvent::Deleted {
            id: id.to_string(),
            project_id,
        });
        Ok(())
    }
}

/// All five tables of a backend instance. Clone handles from it for as
/// many clients as the test needs; they share state and feeds.
#[derive(Default)]
pub struct TestBackend {
    pub projects: TestTable<ProjectRow>,
    pub tasks: TestTable<TaskRow>,
    pub todos: TestTable<TodoRow>,
    pub tags: TestTable<TagRow>,
    pub notes: TestTable<NotesRow>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handles(&self) -> RemoteHandles {
        RemoteHandles {
            projects: self.projects.handle(),
            tasks: self.tasks.handle(),
            todos: self.todos.handle(),
            tags: self.tags.handle(),
            notes: self.notes.handle(),
        }
    }
}
