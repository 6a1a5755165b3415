//! The workspace ties the collections together: global projects and tasks
//! for the dashboard, plus per-project todos, tags and notes that come and
//! go as projects are opened and closed.

use chrono::Utc;
use tracing::info;

use taskdeck_core::{
    Entity, Priority, Project, ProjectId, ProjectNotes, ProjectPatch, Status, Tag, TagId,
    TagPatch, Task, TaskId, TaskPatch, Todo, TodoId, TodoPatch,
};
use taskdeck_storage::{RemoteHandles, SqliteLocalStore, keys};

use crate::config::{Mode, RemoteConfig};
use crate::error::EngineError;
use crate::reconciler::{Collection, SharedLocal, shared_local};

/// Tags every new project starts with.
const DEFAULT_TAGS: [(&str, &str); 4] = [
    ("Bug", "#ef4444"),
    ("Feature", "#3b82f6"),
    ("Urgent", "#f97316"),
    ("Improvement", "#10b981"),
];

/// Focus on one project. In remote mode it carries scoped collections
/// whose filtered subscriptions are released on close; in local mode the
/// global collections already hold everything and only the focus itself
/// is recorded.
struct OpenProject {
    project_id: ProjectId,
    scoped: Option<ScopedCollections>,
}

struct ScopedCollections {
    todos: Collection<Todo>,
    tags: Collection<Tag>,
    notes: Collection<ProjectNotes>,
}

/// Side collections that are global in local mode but scoped per open
/// project in remote mode.
enum SideCollections {
    Local {
        todos: Collection<Todo>,
        tags: Collection<Tag>,
        notes: Collection<ProjectNotes>,
    },
    Remote,
}

pub struct Workspace {
    mode: Mode,
    local: SharedLocal,
    remote: Option<RemoteHandles>,
    projects: Collection<Project>,
    tasks: Collection<Task>,
    side: SideCollections,
    open: Option<OpenProject>,
}

impl Workspace {
    /// Open a workspace, resolving the mode once from the configuration:
    /// synced when the credentials check out and backend handles are
    /// wired, local-only otherwise. The choice is fixed for the session.
    pub fn open(
        store: SqliteLocalStore,
        config: Option<&RemoteConfig>,
        handles: Option<RemoteHandles>,
    ) -> Result<Self, EngineError> {
        match (Mode::resolve(config), handles) {
            (Mode::Remote, Some(handles)) => Self::open_remote(store, handles),
            _ => Self::open_local(store),
        }
    }

    /// Open a workspace backed only by the embedded store.
    pub fn open_local(store: SqliteLocalStore) -> Result<Self, EngineError> {
        let local = shared_local(store);
        let projects = Collection::local(local.clone(), keys::PROJECTS)?;
        let tasks = Collection::local(local.clone(), keys::TASKS)?;
        let side = SideCollections::Local {
            todos: Collection::local(local.clone(), keys::TODOS)?,
            tags: Collection::local(local.clone(), keys::TAGS)?,
            notes: Collection::local(local.clone(), keys::NOTES)?,
        };
        info!(projects = projects.len(), tasks = tasks.len(), "opened local workspace");
        Ok(Self {
            mode: Mode::Local,
            local,
            remote: None,
            projects,
            tasks,
            side,
            open: None,
        })
    }

    /// Open a synced workspace. Projects and tasks hydrate from the cache
    /// immediately; call [`refresh`](Self::refresh) to pull snapshots.
    pub fn open_remote(
        store: SqliteLocalStore,
        handles: RemoteHandles,
    ) -> Result<Self, EngineError> {
        let local = shared_local(store);
        let projects = Collection::remote(
            local.clone(),
            Some(keys::PROJECTS.into()),
            handles.projects.clone(),
            None,
        )?;
        let tasks = Collection::remote(
            local.clone(),
            Some(keys::TASKS.into()),
            handles.tasks.clone(),
            None,
        )?;
        info!(cached_projects = projects.len(), cached_tasks = tasks.len(), "opened synced workspace");
        Ok(Self {
            mode: Mode::Remote,
            local,
            remote: Some(handles),
            projects,
            tasks,
            side: SideCollections::Remote,
            open: None,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Pull authoritative snapshots for every live remote collection.
    pub fn refresh(&mut self) -> Result<(), EngineError> {
        self.projects.refresh()?;
        self.tasks.refresh()?;
        if let Some(scoped) = self.open.as_mut().and_then(|o| o.scoped.as_mut()) {
            scoped.todos.refresh()?;
            scoped.tags.refresh()?;
            scoped.notes.refresh()?;
        }
        Ok(())
    }

    /// Apply buffered change events across every live collection, strictly
    /// in each feed's arrival order.
    pub fn pump(&mut self) -> Result<(), EngineError> {
        self.projects.pump()?;
        self.tasks.pump()?;
        if let Some(scoped) = self.open.as_mut().and_then(|o| o.scoped.as_mut()) {
            scoped.todos.pump()?;
            scoped.tags.pump()?;
            scoped.notes.pump()?;
        }
        Ok(())
    }

    /// True while the dashboard's backing collections await their first
    /// snapshot; cached rows are already visible meanwhile.
    pub fn dashboard_loading(&self) -> bool {
        self.projects.is_loading() || self.tasks.is_loading()
    }

    /// True while the open project's board collections await their first
    /// snapshot.
    pub fn board_loading(&self) -> bool {
        match self.open.as_ref().and_then(|o| o.scoped.as_ref()) {
            Some(scoped) => {
                scoped.todos.is_loading()
                    || scoped.tags.is_loading()
                    || scoped.notes.is_loading()
            }
            None => false,
        }
    }

    // -- projects -----------------------------------------------------------

    pub fn projects(&self) -> &[Project] {
        self.projects.items()
    }

    pub fn project(&self, id: &ProjectId) -> Option<&Project> {
        self.projects.get(id.as_str())
    }

    pub fn create_project(
        &mut self,
        name: impl Into<String>,
        color: impl Into<String>,
        description: Option<String>,
    ) -> Result<ProjectId, EngineError> {
        let project = Project {
            id: ProjectId::new(),
            name: name.into(),
            color: color.into(),
            description,
            created_at: Utc::now(),
        };
        let id = project.id.clone();
        self.projects.add(project)?;
        self.seed_default_tags(&id)?;
        Ok(id)
    }

    pub fn update_project(
        &mut self,
        id: &ProjectId,
        patch: ProjectPatch,
    ) -> Result<(), EngineError> {
        self.projects.update(id.as_str(), patch)
    }

    /// Delete a project and everything that hangs off it: tasks, todos,
    /// tags and notes. If the project is currently open it is closed first.
    pub fn delete_project(&mut self, id: &ProjectId) -> Result<(), EngineError> {
        if self.open_project_id() == Some(id) {
            self.close_project();
        }

        let task_ids: Vec<String> = self
            .tasks
            .items()
            .iter()
            .filter(|t| t.project_id == *id)
            .map(|t| t.id.to_string())
            .collect();
        for task_id in task_ids {
            self.tasks.delete(&task_id)?;
        }

        match &mut self.side {
            SideCollections::Local { todos, tags, notes } => {
                delete_scoped(todos, id)?;
                delete_scoped(tags, id)?;
                delete_scoped(notes, id)?;
            }
            SideCollections::Remote => {
                // No live scoped collections for this project; cascade
                // straight through the backend tables.
                let handles = remote_handles(&self.remote)?;
                for row in handles.todos.select(Some(id.as_str()))? {
                    handles.todos.delete(&row.id)?;
                }
                for row in handles.tags.select(Some(id.as_str()))? {
                    handles.tags.delete(&row.id)?;
                }
                for row in handles.notes.select(Some(id.as_str()))? {
                    handles.notes.delete(&row.id)?;
                }
            }
        }

        self.projects.delete(id.as_str())?;
        info!(project = %id, "deleted project and its contents");
        Ok(())
    }

    // -- open project -------------------------------------------------------

    pub fn open_project_id(&self) -> Option<&ProjectId> {
        self.open.as_ref().map(|o| &o.project_id)
    }

    /// Focus one project. In remote mode this creates scoped collections
    /// with their own filtered subscriptions; any previously open project's
    /// subscriptions are released first.
    pub fn open_project(&mut self, id: &ProjectId) -> Result<(), EngineError> {
        if self.projects.get(id.as_str()).is_none() {
            return Err(EngineError::not_found(Project::KIND, id.as_str()));
        }
        self.close_project();
        if self.mode == Mode::Remote {
            let handles = remote_handles(&self.remote)?.clone();
            let scope = Some(id.to_string());
            let mut scoped = ScopedCollections {
                todos: Collection::remote(
                    self.local.clone(),
                    None,
                    handles.todos.clone(),
                    scope.clone(),
                )?,
                tags: Collection::remote(
                    self.local.clone(),
                    None,
                    handles.tags.clone(),
                    scope.clone(),
                )?,
                notes: Collection::remote(self.local.clone(), None, handles.notes, scope)?,
            };
            scoped.todos.refresh()?;
            scoped.tags.refresh()?;
            scoped.notes.refresh()?;
            self.open = Some(OpenProject {
                project_id: id.clone(),
                scoped: Some(scoped),
            });
        } else {
            // Local collections are global; opening just records focus.
            self.open = Some(OpenProject {
                project_id: id.clone(),
                scoped: None,
            });
        }
        Ok(())
    }

    pub fn close_project(&mut self) {
        // Dropping the scoped collections drops their subscriptions.
        self.open = None;
    }

    // -- tasks --------------------------------------------------------------

    pub fn tasks(&self) -> &[Task] {
        self.tasks.items()
    }

    pub fn tasks_for(&self, project: &ProjectId) -> Vec<&Task> {
        crate::views::tasks_for_project(self.tasks.items(), project.as_str())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_task(
        &mut self,
        project: &ProjectId,
        title: impl Into<String>,
        description: impl Into<String>,
        status: Status,
        priority: Priority,
        due_date: Option<chrono::NaiveDate>,
        tags: Vec<TagId>,
    ) -> Result<TaskId, EngineError> {
        let task = Task {
            id: TaskId::new(),
            project_id: project.clone(),
            title: title.into(),
            description: description.into(),
            status,
            priority,
            due_date,
            created_at: Utc::now(),
            tags,
            subtasks: Vec::new(),
        };
        let id = task.id.clone();
        self.tasks.add(task)?;
        Ok(id)
    }

    pub fn update_task(&mut self, id: &TaskId, patch: TaskPatch) -> Result<(), EngineError> {
        self.tasks.update(id.as_str(), patch)
    }

    pub fn delete_task(&mut self, id: &TaskId) -> Result<(), EngineError> {
        self.tasks.delete(id.as_str())
    }

    // -- todos --------------------------------------------------------------

    pub fn todos(&self, project: &ProjectId) -> Result<Vec<&Todo>, EngineError> {
        let collection = self.todos_for(project)?;
        Ok(collection
            .items()
            .iter()
            .filter(|t| t.project_id == *project)
            .collect())
    }

    pub fn add_todo(
        &mut self,
        project: &ProjectId,
        text: impl Into<String>,
    ) -> Result<TodoId, EngineError> {
        let todo = Todo {
            id: TodoId::new(),
            project_id: project.clone(),
            text: text.into(),
            completed: false,
            created_at: Utc::now(),
        };
        let id = todo.id.clone();
        self.todos_for_mut(project)?.add(todo)?;
        Ok(id)
    }

    pub fn update_todo(
        &mut self,
        project: &ProjectId,
        id: &TodoId,
        patch: TodoPatch,
    ) -> Result<(), EngineError> {
        self.todos_for_mut(project)?.update(id.as_str(), patch)
    }

    pub fn delete_todo(&mut self, project: &ProjectId, id: &TodoId) -> Result<(), EngineError> {
        self.todos_for_mut(project)?.delete(id.as_str())
    }

    /// Turn a quick todo into a real task on the board. The todo's id and
    /// creation time carry over, so the promoted task keeps its place in
    /// chronological orderings and the operation is idempotent under echo.
    pub fn promote_todo(
        &mut self,
        project: &ProjectId,
        id: &TodoId,
    ) -> Result<TaskId, EngineError> {
        let todo = self
            .todos_for(project)?
            .get(id.as_str())
            .ok_or_else(|| EngineError::not_found(Todo::KIND, id.as_str()))?
            .clone();
        let task = todo.promote();
        let task_id = task.id.clone();
        self.tasks.add(task)?;
        self.todos_for_mut(project)?.delete(id.as_str())?;
        Ok(task_id)
    }

    // -- tags ---------------------------------------------------------------

    pub fn tags(&self, project: &ProjectId) -> Result<Vec<&Tag>, EngineError> {
        let collection = self.tags_for(project)?;
        Ok(collection
            .items()
            .iter()
            .filter(|t| t.project_id == *project)
            .collect())
    }

    pub fn create_tag(
        &mut self,
        project: &ProjectId,
        name: impl Into<String>,
        color: impl Into<String>,
    ) -> Result<TagId, EngineError> {
        let tag = Tag {
            id: TagId::new(),
            project_id: project.clone(),
            name: name.into(),
            color: color.into(),
        };
        let id = tag.id.clone();
        self.tags_for_mut(project)?.add(tag)?;
        Ok(id)
    }

    pub fn update_tag(
        &mut self,
        project: &ProjectId,
        id: &TagId,
        patch: TagPatch,
    ) -> Result<(), EngineError> {
        self.tags_for_mut(project)?.update(id.as_str(), patch)
    }

    /// Tasks referencing the tag keep the dangling id; views omit it.
    pub fn delete_tag(&mut self, project: &ProjectId, id: &TagId) -> Result<(), EngineError> {
        self.tags_for_mut(project)?.delete(id.as_str())
    }

    // -- notes --------------------------------------------------------------

    /// A project with no notes row reads as empty content.
    pub fn notes(&self, project: &ProjectId) -> Result<String, EngineError> {
        let collection = self.notes_for(project)?;
        Ok(collection
            .get(project.as_str())
            .map(|n| n.content.clone())
            .unwrap_or_default())
    }

    /// Upsert: first write creates the row, later writes patch it.
    pub fn set_notes(
        &mut self,
        project: &ProjectId,
        content: impl Into<String>,
    ) -> Result<(), EngineError> {
        let content = content.into();
        let collection = self.notes_for_mut(project)?;
        if collection.get(project.as_str()).is_some() {
            collection.update(project.as_str(), taskdeck_core::NotesPatch {
                content: Some(content),
            })
        } else {
            collection.add(ProjectNotes {
                project_id: project.clone(),
                content,
            })
        }
    }

    // -- plumbing -----------------------------------------------------------

    fn seed_default_tags(&mut self, project: &ProjectId) -> Result<(), EngineError> {
        match &mut self.side {
            SideCollections::Local { tags, .. } => {
                for (name, color) in DEFAULT_TAGS {
                    tags.add(Tag {
                        id: TagId::new(),
                        project_id: project.clone(),
                        name: name.into(),
                        color: color.into(),
                    })?;
                }
            }
            SideCollections::Remote => {
                let handles = remote_handles(&self.remote)?;
                for (name, color) in DEFAULT_TAGS {
                    let tag = Tag {
                        id: TagId::new(),
                        project_id: project.clone(),
                        name: name.into(),
                        color: color.into(),
                    };
                    handles.tags.insert(tag.to_row())?;
                }
            }
        }
        Ok(())
    }

    fn scoped(&self, project: &ProjectId) -> Result<&ScopedCollections, EngineError> {
        self.open
            .as_ref()
            .filter(|o| o.project_id == *project)
            .and_then(|o| o.scoped.as_ref())
            .ok_or_else(|| EngineError::ProjectNotOpen(project.to_string()))
    }

    fn todos_for(&self, project: &ProjectId) -> Result<&Collection<Todo>, EngineError> {
        match &self.side {
            SideCollections::Local { todos, .. } => Ok(todos),
            SideCollections::Remote => Ok(&self.scoped(project)?.todos),
        }
    }

    fn todos_for_mut(&mut self, project: &ProjectId) -> Result<&mut Collection<Todo>, EngineError> {
        match &mut self.side {
            SideCollections::Local { todos, .. } => Ok(todos),
            SideCollections::Remote => self
                .open
                .as_mut()
                .filter(|o| o.project_id == *project)
                .and_then(|o| o.scoped.as_mut())
                .map(|s| &mut s.todos)
                .ok_or_else(|| EngineError::ProjectNotOpen(project.to_string())),
        }
    }

    fn tags_for(&self, project: &ProjectId) -> Result<&Collection<Tag>, EngineError> {
        match &self.side {
            SideCollections::Local { tags, .. } => Ok(tags),
            SideCollections::Remote => Ok(&self.scoped(project)?.tags),
        }
    }

    fn tags_for_mut(&mut self, project: &ProjectId) -> Result<&mut Collection<Tag>, EngineError> {
        match &mut self.side {
            SideCollections::Local { tags, .. } => Ok(tags),
            SideCollections::Remote => self
                .open
                .as_mut()
                .filter(|o| o.project_id == *project)
                .and_then(|o| o.scoped.as_mut())
                .map(|s| &mut s.tags)
                .ok_or_else(|| EngineError::ProjectNotOpen(project.to_string())),
        }
    }

    fn notes_for(&self, project: &ProjectId) -> Result<&Collection<ProjectNotes>, EngineError> {
        match &self.side {
            SideCollections::Local { notes, .. } => Ok(notes),
            SideCollections::Remote => Ok(&self.scoped(project)?.notes),
        }
    }

    fn notes_for_mut(
        &mut self,
        project: &ProjectId,
    ) -> Result<&mut Collection<ProjectNotes>, EngineError> {
        match &mut self.side {
            SideCollections::Local { notes, .. } => Ok(notes),
            SideCollections::Remote => self
                .open
                .as_mut()
                .filter(|o| o.project_id == *project)
                .and_then(|o| o.scoped.as_mut())
                .map(|s| &mut s.notes)
                .ok_or_else(|| EngineError::ProjectNotOpen(project.to_string())),
        }
    }
}

fn remote_handles(remote: &Option<RemoteHandles>) -> Result<&RemoteHandles, EngineError> {
    remote.as_ref().ok_or(EngineError::RemoteUnavailable)
}

fn delete_scoped<E: Entity>(
    collection: &mut Collection<E>,
    project: &ProjectId,
) -> Result<(), EngineError> {
    let ids: Vec<String> = collection
        .items()
        .iter()
        .filter(|e| e.project_id() == Some(project.as_str()))
        .map(|e| e.id().to_string())
        .collect();
    for id in ids {
        collection.delete(&id)?;
    }
    Ok(())
}
