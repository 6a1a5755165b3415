//! Optimistic collection reconciler.
//!
//! A `Collection<E>` is the single in-memory source of truth for one entity
//! kind. Local mutations apply immediately; in remote mode they are also
//! sent to the backend, whose change feed later echoes them back. The
//! reconciler absorbs those echoes (and everyone else's changes) without
//! duplicating rows, applying events strictly in arrival order.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use taskdeck_core::{Entity, TableRow, merge_row_fields};
use taskdeck_storage::{
    ChangeEvent, LocalStore, Subscription, TableHandle, read_collection, write_collection,
};

use crate::error::EngineError;

pub type SharedLocal = Arc<Mutex<Box<dyn LocalStore + Send>>>;

pub fn shared_local(store: impl LocalStore + Send + 'static) -> SharedLocal {
    Arc::new(Mutex::new(Box::new(store)))
}

fn lock_local(local: &SharedLocal) -> MutexGuard<'_, Box<dyn LocalStore + Send>> {
    local.lock().unwrap_or_else(|e| e.into_inner())
}

enum Backend<E: Entity> {
    Local,
    Remote {
        table: TableHandle<E::Row>,
        scope: Option<String>,
        subscription: Subscription<E::Row>,
    },
}

pub struct Collection<E: Entity> {
    items: Vec<E>,
    loading: bool,
    /// Cache blob key; scoped collections carry `None` so a partial view
    /// never overwrites the full-collection blob.
    cache_key: Option<String>,
    local: SharedLocal,
    backend: Backend<E>,
}

fn decode_rows<E: Entity>(rows: Vec<E::Row>) -> Vec<E> {
    rows.into_iter()
        .filter_map(|row| {
            if row.row_id().is_empty() {
                warn!(kind = E::KIND, "row without id, skipping");
                None
            } else {
                Some(E::from_row(row))
            }
        })
        .collect()
}

impl<E: Entity> Collection<E> {
    /// Local-only collection: the cache blob is the durable copy and every
    /// mutation commits immediately.
    pub fn local(local: SharedLocal, cache_key: impl Into<String>) -> Result<Self, EngineError> {
        let cache_key = cache_key.into();
        let rows: Vec<E::Row> = {
            let guard = lock_local(&local);
            read_collection(&**guard, &cache_key)?.unwrap_or_default()
        };
        Ok(Self {
            items: decode_rows(rows),
            loading: false,
            cache_key: Some(cache_key),
            local,
            backend: Backend::Local,
        })
    }

    /// Remote-backed collection. Construction subscribes to the change feed
    /// and serves cached rows while loading; call [`refresh`](Self::refresh)
    /// to pull the authoritative snapshot.
    pub fn remote(
        local: SharedLocal,
        cache_key: Option<String>,
        table: TableHandle<E::Row>,
        scope: Option<String>,
    ) -> Result<Self, EngineError> {
        let subscription = table.subscribe(scope.clone());
        let rows: Vec<E::Row> = match &cache_key {
            Some(key) => {
                let guard = lock_local(&local);
                read_collection(&**guard, key)?.unwrap_or_default()
            }
            None => Vec::new(),
        };
        Ok(Self {
            items: decode_rows(rows),
            loading: true,
            cache_key,
            local,
            backend: Backend::Remote {
                table,
                scope,
                subscription,
            },
        })
    }

    pub fn items(&self) -> &[E] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.items.iter().find(|e| e.id() == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True until the first authoritative snapshot has been applied. Local
    /// collections are never loading.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Replace contents with the backend's current snapshot. A failed fetch
    /// keeps serving whatever was cached; stale beats empty.
    pub fn refresh(&mut self) -> Result<(), EngineError> {
        let Backend::Remote { table, scope, .. } = &self.backend else {
            return Ok(());
        };
        match table.select(scope.as_deref()) {
            Ok(rows) => {
                self.items = decode_rows(rows);
                self.loading = false;
                self.persist()
            }
            Err(e) => {
                warn!(kind = E::KIND, error = %e, "snapshot fetch failed, serving cached rows");
                self.loading = false;
                Ok(())
            }
        }
    }

    /// Insert optimistically. If the backend rejects the write the entity
    /// is removed again and the error propagated. In local mode the cache
    /// blob is the durable copy, so a failed write-through rolls back too.
    pub fn add(&mut self, entity: E) -> Result<(), EngineError> {
        self.items.push(entity.clone());
        if let Backend::Remote { table, .. } = &self.backend {
            if let Err(e) = table.insert(entity.to_row()) {
                let id = entity.id().to_string();
                self.items.retain(|item| item.id() != id);
                warn!(kind = E::KIND, id, error = %e, "insert rejected, rolled back");
                self.persist()?;
                return Err(e.into());
            }
        }
        let result = self.persist();
        if let Err(e) = &result {
            if matches!(self.backend, Backend::Local) {
                let id = entity.id().to_string();
                self.items.retain(|item| item.id() != id);
                warn!(kind = E::KIND, id, error = %e, "write-through failed, rolled back");
            }
        }
        result
    }

    /// Patch optimistically. A backend rejection is reported but the
    /// optimistic state stands; the next snapshot or change event will
    /// reconverge it.
    pub fn update(&mut self, id: &str, patch: E::Patch) -> Result<(), EngineError> {
        let Some(item) = self.items.iter_mut().find(|e| e.id() == id) else {
            return Err(EngineError::not_found(E::KIND, id));
        };
        item.apply_patch(patch.clone());
        if let Backend::Remote { table, .. } = &self.backend {
            let fields = E::patch_fields(&patch);
            if !fields.is_empty() {
                if let Err(e) = table.update(id, &fields) {
                    warn!(kind = E::KIND, id, error = %e, "update rejected, keeping local state");
                    self.persist()?;
                    return Err(e.into());
                }
            }
        }
        self.persist()
    }

    pub fn delete(&mut self, id: &str) -> Result<(), EngineError> {
        let before = self.items.len();
        self.items.retain(|e| e.id() != id);
        if self.items.len() == before {
            return Err(EngineError::not_found(E::KIND, id));
        }
        if let Backend::Remote { table, .. } = &self.backend {
            if let Err(e) = table.delete(id) {
                warn!(kind = E::KIND, id, error = %e, "delete rejected, keeping local state");
                self.persist()?;
                return Err(e.into());
            }
        }
        self.persist()
    }

    /// Drain buffered change events and apply them in arrival order.
    /// Returns how many events were applied.
    pub fn pump(&mut self) -> Result<usize, EngineError> {
        let events = match &self.backend {
            Backend::Local => return Ok(0),
            Backend::Remote { subscription, .. } => subscription.drain(),
        };
        if events.is_empty() {
            return Ok(0);
        }
        let count = events.len();
        for event in events {
            self.apply_event(event);
        }
        self.persist()?;
        Ok(count)
    }

    fn apply_event(&mut self, event: ChangeEvent<E::Row>) {
        match event {
            ChangeEvent::Inserted(row) => {
                if row.row_id().is_empty() {
                    warn!(kind = E::KIND, "feed row without id, skipping");
                    return;
                }
                // Echoes of our own optimistic inserts arrive here too.
                if self.items.iter().any(|e| e.id() == row.row_id()) {
                    return;
                }
                self.items.push(E::from_row(row));
            }
            ChangeEvent::Updated { id, fields, .. } => {
                // An update racing a delete loses; nothing to patch. It can
                // also mean this client missed the insert, hence the warn.
                let Some(pos) = self.items.iter().position(|e| e.id() == id) else {
                    warn!(kind = E::KIND, id, "update for unknown id, dropping");
                    return;
                };
                match merge_row_fields(&self.items[pos], &fields) {
                    Ok(merged) => self.items[pos] = merged,
                    Err(e) => {
                        warn!(kind = E::KIND, id, error = %e, "unmergeable update payload, skipping")
                    }
                }
            }
            ChangeEvent::Deleted { id, .. } => {
                self.items.retain(|e| e.id() != id);
            }
        }
    }

    fn persist(&self) -> Result<(), EngineError> {
        let Some(key) = &self.cache_key else {
            return Ok(());
        };
        let rows: Vec<E::Row> = self.items.iter().map(|e| e.to_row()).collect();
        let mut guard = lock_local(&self.local);
        write_collection(&mut **guard, key, &rows)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskdeck_core::{ProjectId, RowFields, Todo, TodoId, TodoPatch, TodoRow};
    use taskdeck_storage::{ChangeFeed, RemoteTable, SqliteLocalStore, StorageError, keys};

    fn todo(id: &str, text: &str) -> Todo {
        Todo {
            id: TodoId::from_string(id),
            project_id: ProjectId::from_string("p1"),
            text: text.into(),
            completed: false,
            created_at: chrono::DateTime::UNIX_EPOCH,
        }
    }

    fn mem_local() -> SharedLocal {
        shared_local(SqliteLocalStore::open_in_memory().unwrap())
    }

    /// Table double that records writes, echoes them over the feed, and can
    /// be told to reject the next call through a shared flag.
    struct FakeTable {
        rows: Vec<TodoRow>,
        feed: ChangeFeed<TodoRow>,
        fail_next: Arc<std::sync::atomic::AtomicBool>,
    }

    impl FakeTable {
        fn new(feed: ChangeFeed<TodoRow>) -> (Self, Arc<std::sync::atomic::AtomicBool>) {
            let fail_next = Arc::new(std::sync::atomic::AtomicBool::new(false));
            let table = Self {
                rows: Vec::new(),
                feed,
                fail_next: Arc::clone(&fail_next),
            };
            (table, fail_next)
        }

        fn check_fail(&mut self) -> Result<(), StorageError> {
            if self.fail_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(StorageError::Backend("injected".into()));
            }
            Ok(())
        }
    }

    impl RemoteTable<TodoRow> for FakeTable {
        fn select(&mut self, scope: Option<&str>) -> Result<Vec<TodoRow>, StorageError> {
            self.check_fail()?;
            Ok(self
                .rows
                .iter()
                .filter(|r| scope.is_none_or(|s| r.project_id == s))
                .cloned()
                .collect())
        }

        fn insert(&mut self, row: TodoRow) -> Result<(), StorageError> {
            self.check_fail()?;
            self.rows.push(row.clone());
            self.feed.publish(ChangeEvent::Inserted(row));
            Ok(())
        }

        fn update(&mut self, id: &str, fields: &RowFields) -> Result<(), StorageError> {
            self.check_fail()?;
            self.feed.publish(ChangeEvent::Updated {
                id: id.into(),
                project_id: None,
                fields: fields.clone(),
            });
            Ok(())
        }

        fn delete(&mut self, id: &str) -> Result<(), StorageError> {
            self.check_fail()?;
            self.rows.retain(|r| r.id != id);
            self.feed.publish(ChangeEvent::Deleted {
                id: id.into(),
                project_id: None,
            });
            Ok(())
        }
    }

    /// Store double whose next write can be told to fail, for exercising
    /// the local write-through path.
    struct FlakyStore {
        inner: SqliteLocalStore,
        fail_next_write: Arc<std::sync::atomic::AtomicBool>,
    }

    impl LocalStore for FlakyStore {
        fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.inner.read_blob(key)
        }

        fn write_blob(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
            if self
                .fail_next_write
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                return Err(StorageError::Backend("injected".into()));
            }
            self.inner.write_blob(key, bytes)
        }

        fn remove_blob(&mut self, key: &str) -> Result<(), StorageError> {
            self.inner.remove_blob(key)
        }
    }

    struct Remote {
        collection: Collection<Todo>,
        handle: TableHandle<TodoRow>,
        fail_next: Arc<std::sync::atomic::AtomicBool>,
        _local: SharedLocal,
    }

    fn remote_setup() -> Remote {
        let local = mem_local();
        let feed = ChangeFeed::new();
        let (table, fail_next) = FakeTable::new(feed.clone());
        let handle = TableHandle::new(table, feed);
        let collection = Collection::<Todo>::remote(
            Arc::clone(&local),
            Some(keys::TODOS.into()),
            handle.clone(),
            None,
        )
        .unwrap();
        Remote {
            collection,
            handle,
            fail_next,
            _local: local,
        }
    }

    fn arm_failure(flag: &Arc<std::sync::atomic::AtomicBool>) {
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    #[test]
    fn local_collection_commits_immediately_and_reloads() {
        let local = mem_local();
        {
            let mut c = Collection::<Todo>::local(Arc::clone(&local), keys::TODOS).unwrap();
            assert!(!c.is_loading());
            c.add(todo("a", "one")).unwrap();
            c.add(todo("b", "two")).unwrap();
            c.update("a", TodoPatch {
                completed: Some(true),
                ..TodoPatch::default()
            })
            .unwrap();
            c.delete("b").unwrap();
        }
        let c = Collection::<Todo>::local(local, keys::TODOS).unwrap();
        assert_eq!(c.len(), 1);
        assert!(c.get("a").unwrap().completed);
    }

    #[test]
    fn own_insert_echo_is_not_duplicated() {
        let mut r = remote_setup();
        r.collection.refresh().unwrap();
        r.collection.add(todo("a", "one")).unwrap();
        assert_eq!(r.collection.len(), 1);
        assert_eq!(r.collection.pump().unwrap(), 1);
        assert_eq!(r.collection.len(), 1);
    }

    #[test]
    fn foreign_insert_arrives_via_pump() {
        let mut r = remote_setup();
        r.collection.refresh().unwrap();
        r.handle
            .feed()
            .publish(ChangeEvent::Inserted(todo("x", "theirs").to_row()));
        r.collection.pump().unwrap();
        assert_eq!(r.collection.get("x").unwrap().text, "theirs");
    }

    #[test]
    fn rejected_insert_rolls_back() {
        let mut r = remote_setup();
        r.collection.refresh().unwrap();
        arm_failure(&r.fail_next);
        let err = r.collection.add(todo("a", "one")).unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(r.collection.is_empty());
    }

    #[test]
    fn rejected_update_keeps_optimistic_state() {
        let mut r = remote_setup();
        r.collection.refresh().unwrap();
        r.collection.add(todo("a", "one")).unwrap();
        r.collection.pump().unwrap();
        arm_failure(&r.fail_next);
        let err = r
            .collection
            .update("a", TodoPatch {
                text: Some("renamed".into()),
                ..TodoPatch::default()
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
        assert_eq!(r.collection.get("a").unwrap().text, "renamed");
    }

    #[test]
    fn update_for_unknown_id_is_dropped() {
        let mut r = remote_setup();
        r.collection.refresh().unwrap();
        let mut fields = RowFields::new();
        fields.insert("text".into(), serde_json::json!("ghost"));
        r.handle.feed().publish(ChangeEvent::Updated {
            id: "never-inserted".into(),
            project_id: None,
            fields,
        });
        assert_eq!(r.collection.pump().unwrap(), 1);
        assert!(r.collection.is_empty());
    }

    #[test]
    fn update_racing_delete_is_ignored() {
        let mut r = remote_setup();
        r.collection.refresh().unwrap();
        r.collection.add(todo("a", "one")).unwrap();
        r.collection.pump().unwrap();
        let mut fields = RowFields::new();
        fields.insert("text".into(), serde_json::json!("late"));
        r.handle.feed().publish(ChangeEvent::Deleted {
            id: "a".into(),
            project_id: None,
        });
        r.handle.feed().publish(ChangeEvent::Updated {
            id: "a".into(),
            project_id: None,
            fields,
        });
        r.collection.pump().unwrap();
        assert!(r.collection.get("a").is_none());
    }

    #[test]
    fn partial_update_event_preserves_untouched_fields() {
        let mut r = remote_setup();
        r.collection.refresh().unwrap();
        r.collection.add(todo("a", "one")).unwrap();
        r.collection.pump().unwrap();
        let mut fields = RowFields::new();
        fields.insert("completed".into(), serde_json::json!(true));
        r.handle.feed().publish(ChangeEvent::Updated {
            id: "a".into(),
            project_id: None,
            fields,
        });
        r.collection.pump().unwrap();
        let item = r.collection.get("a").unwrap();
        assert!(item.completed);
        assert_eq!(item.text, "one");
    }

    #[test]
    fn failed_snapshot_serves_cached_rows() {
        let local = mem_local();
        {
            let mut c = Collection::<Todo>::local(Arc::clone(&local), keys::TODOS).unwrap();
            c.add(todo("a", "cached")).unwrap();
        }
        let feed = ChangeFeed::new();
        let (table, fail_next) = FakeTable::new(feed.clone());
        let handle = TableHandle::new(table, feed);
        let mut c =
            Collection::<Todo>::remote(local, Some(keys::TODOS.into()), handle, None).unwrap();
        assert!(c.is_loading());
        assert_eq!(c.len(), 1);
        arm_failure(&fail_next);
        c.refresh().unwrap();
        assert!(!c.is_loading());
        assert_eq!(c.get("a").unwrap().text, "cached");
    }

    #[test]
    fn failed_write_through_rolls_back_local_add() {
        let fail_next_write = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let store = FlakyStore {
            inner: SqliteLocalStore::open_in_memory().unwrap(),
            fail_next_write: Arc::clone(&fail_next_write),
        };
        let local = shared_local(store);
        let mut c = Collection::<Todo>::local(Arc::clone(&local), keys::TODOS).unwrap();
        c.add(todo("a", "kept")).unwrap();

        arm_failure(&fail_next_write);
        let err = c.add(todo("b", "lost")).unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
        assert_eq!(c.len(), 1);
        assert!(c.get("b").is_none());

        // Memory and the durable copy agree.
        let reloaded = Collection::<Todo>::local(local, keys::TODOS).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get("a").is_some());
    }

    #[test]
    fn feed_row_without_id_is_skipped() {
        let mut r = remote_setup();
        r.collection.refresh().unwrap();
        let mut row = todo("x", "ok").to_row();
        row.id = String::new();
        r.handle.feed().publish(ChangeEvent::Inserted(row));
        r.collection.pump().unwrap();
        assert!(r.collection.is_empty());
    }

    #[test]
    fn scoped_collection_does_not_write_the_cache() {
        let local = mem_local();
        let feed = ChangeFeed::new();
        let (table, _fail) = FakeTable::new(feed.clone());
        let handle = TableHandle::new(table, feed);
        let mut c =
            Collection::<Todo>::remote(Arc::clone(&local), None, handle, Some("p1".into()))
                .unwrap();
        c.refresh().unwrap();
        c.add(todo("a", "scoped")).unwrap();
        let guard = lock_local(&local);
        assert!(guard.read_blob(keys::TODOS).unwrap().is_none());
    }
}
