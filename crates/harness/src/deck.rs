//! One client under test: a workspace wired either to the embedded store
//! alone or to a [`TestBackend`](crate::TestBackend).

use taskdeck_engine::{EngineError, Workspace};
use taskdeck_storage::SqliteLocalStore;

use crate::backend::TestBackend;

pub struct TestDeck {
    pub workspace: Workspace,
}

impl TestDeck {
    pub fn local() -> Result<Self, EngineError> {
        let store = SqliteLocalStore::open_in_memory()?;
        Ok(Self {
            workspace: Workspace::open_local(store)?,
        })
    }

    /// Connect a fresh client to the backend and pull initial snapshots.
    pub fn remote(backend: &TestBackend) -> Result<Self, EngineError> {
        let store = SqliteLocalStore::open_in_memory()?;
        Self::remote_with_store(backend, store)
    }

    /// Connect with a caller-provided store, for restart scenarios where
    /// the cache must survive the previous client.
    pub fn remote_with_store(
        backend: &TestBackend,
        store: SqliteLocalStore,
    ) -> Result<Self, EngineError> {
        let mut workspace = Workspace::open_remote(store, backend.handles())?;
        workspace.refresh()?;
        Ok(Self { workspace })
    }

    /// Drain all pending change events into the workspace.
    pub fn pump(&mut self) -> Result<(), EngineError> {
        self.workspace.pump()
    }
}
