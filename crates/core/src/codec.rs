//! Row <-> entity codec.
//!
//! Rows are the flat, snake_case, foreign-key-qualified shape persisted by
//! the remote backend (and cached verbatim by the local store). Entities are
//! the nested, typed in-memory shape. Decoding is defensive: a malformed
//! value degrades to a documented default (empty vec, `None` date, default
//! status/priority) instead of failing the whole collection hydration. The
//! only unrecoverable row is one without a usable id.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::entity::*;
use crate::error::CoreError;
use crate::ids::*;

/// A partial row: only the fields present in the originating patch appear
/// as keys (omission, not null), so a remote update never clobbers columns
/// the caller did not touch.
pub type RowFields = Map<String, Value>;

const DATE_FMT: &str = "%Y-%m-%d";

/// Accessors every wire row exposes, used for dedup and scope filtering.
pub trait TableRow {
    fn row_id(&self) -> &str;
    fn row_project_id(&self) -> Option<&str>;
}

/// Bidirectional mapping between one entity kind and its wire row, plus
/// the partial-update surface.
pub trait Entity: Clone {
    type Row: TableRow + Serialize + DeserializeOwned + Clone + Send + 'static;
    type Patch: Clone;

    /// Kind label for logs and local-store keys.
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn project_id(&self) -> Option<&str>;

    /// Total conversion; substitutes defaults for malformed values.
    fn from_row(row: Self::Row) -> Self;

    /// Lossless for all populated fields.
    fn to_row(&self) -> Self::Row;

    /// In-memory side of a partial update: fields absent from the patch
    /// are preserved.
    fn apply_patch(&mut self, patch: Self::Patch);

    /// Wire side of the same partial update.
    fn patch_fields(patch: &Self::Patch) -> RowFields;
}

/// Merge a partial row payload onto an existing entity, preserving every
/// field the payload does not mention. Used when applying remote update
/// events.
pub fn merge_row_fields<E: Entity>(entity: &E, fields: &RowFields) -> Result<E, CoreError> {
    let mut value = serde_json::to_value(entity.to_row())
        .map_err(|e| CoreError::Serialization(e.to_string()))?;
    if let Value::Object(map) = &mut value {
        for (key, field) in fields {
            map.insert(key.clone(), field.clone());
        }
    }
    let row: E::Row =
        serde_json::from_value(value).map_err(|e| CoreError::Serialization(e.to_string()))?;
    Ok(E::from_row(row))
}

fn parse_date(kind: &str, id: &str, raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?;
    // Tolerate full timestamps by reading the date prefix.
    let prefix = raw.get(..10).unwrap_or(raw);
    match NaiveDate::parse_from_str(prefix, DATE_FMT) {
        Ok(date) => Some(date),
        Err(_) => {
            warn!(kind, id, value = raw, "malformed date in row, defaulting to none");
            None
        }
    }
}

fn parse_timestamp(kind: &str, id: &str, raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(_) => {
            warn!(kind, id, value = raw, "malformed timestamp in row, defaulting to epoch");
            DateTime::<Utc>::UNIX_EPOCH
        }
    }
}

fn parse_status(id: &str, raw: &str) -> Status {
    Status::parse(raw).unwrap_or_else(|| {
        warn!(kind = "task", id, value = raw, "unknown status in row, defaulting");
        Status::default()
    })
}

fn parse_priority(id: &str, raw: &str) -> Priority {
    Priority::parse(raw).unwrap_or_else(|| {
        warn!(kind = "task", id, value = raw, "unknown priority in row, defaulting");
        Priority::default()
    })
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

impl TableRow for ProjectRow {
    fn row_id(&self) -> &str {
        &self.id
    }

    fn row_project_id(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
}

impl Entity for Project {
    type Row = ProjectRow;
    type Patch = ProjectPatch;

    const KIND: &'static str = "projects";

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn project_id(&self) -> Option<&str> {
        None
    }

    fn from_row(row: ProjectRow) -> Self {
        let created_at = parse_timestamp(Self::KIND, &row.id, &row.created_at);
        Self {
            id: ProjectId::from_string(row.id),
            name: row.name,
            color: row.color,
            description: row.description,
            created_at,
        }
    }

    fn to_row(&self) -> ProjectRow {
        ProjectRow {
            id: self.id.to_string(),
            name: self.name.clone(),
            color: self.color.clone(),
            description: self.description.clone(),
            created_at: self.created_at.to_rfc3339(),
        }
    }

    fn apply_patch(&mut self, patch: ProjectPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(color) = patch.color {
            self.color = color;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
    }

    fn patch_fields(patch: &ProjectPatch) -> RowFields {
        let mut fields = RowFields::new();
        if let Some(name) = &patch.name {
            fields.insert("name".into(), Value::String(name.clone()));
        }
        if let Some(color) = &patch.color {
            fields.insert("color".into(), Value::String(color.clone()));
        }
        if let Some(description) = &patch.description {
            fields.insert(
                "description".into(),
                description.clone().map(Value::String).unwrap_or(Value::Null),
            );
        }
        fields
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskRow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub subtasks: Vec<SubtaskRow>,
    #[serde(default)]
    pub created_at: String,
}

impl TableRow for TaskRow {
    fn row_id(&self) -> &str {
        &self.id
    }

    fn row_project_id(&self) -> Option<&str> {
        Some(&self.project_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    /// `Some(None)` clears the due date.
    pub due_date: Option<Option<NaiveDate>>,
    pub tags: Option<Vec<TagId>>,
    pub subtasks: Option<Vec<Subtask>>,
}

impl Entity for Task {
    type Row = TaskRow;
    type Patch = TaskPatch;

    const KIND: &'static str = "tasks";

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn project_id(&self) -> Option<&str> {
        Some(self.project_id.as_str())
    }

    fn from_row(row: TaskRow) -> Self {
        let due_date = parse_date(Self::KIND, &row.id, row.due_date.as_deref());
        let created_at = parse_timestamp(Self::KIND, &row.id, &row.created_at);
        let status = parse_status(&row.id, &row.status);
        let priority = parse_priority(&row.id, &row.priority);
        Self {
            id: TaskId::from_string(row.id),
            project_id: ProjectId::from_string(row.project_id),
            title: row.title,
            description: row.description,
            status,
            priority,
            due_date,
            created_at,
            tags: row.tags.into_iter().map(TagId::from_string).collect(),
            subtasks: row
                .subtasks
                .into_iter()
                .map(|s| Subtask {
                    id: SubtaskId::from_string(s.id),
                    text: s.text,
                    completed: s.completed,
                })
                .collect(),
        }
    }

    fn to_row(&self) -> TaskRow {
        TaskRow {
            id: self.id.to_string(),
            project_id: self.project_id.to_string(),
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status.as_str().to_string(),
            priority: self.priority.as_str().to_string(),
            due_date: self.due_date.map(|d| d.format(DATE_FMT).to_string()),
            tags: self.tags.iter().map(|t| t.to_string()).collect(),
            subtasks: self
                .subtasks
                .iter()
                .map(|s| SubtaskRow {
                    id: s.id.to_string(),
                    text: s.text.clone(),
                    completed: s.completed,
                })
                .collect(),
            created_at: self.created_at.to_rfc3339(),
        }
    }

    fn apply_patch(&mut self, patch: TaskPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        if let Some(subtasks) = patch.subtasks {
            self.subtasks = subtasks;
        }
    }

    fn patch_fields(patch: &TaskPatch) -> RowFields {
        let mut fields = RowFields::new();
        if let Some(title) = &patch.title {
            fields.insert("title".into(), Value::String(title.clone()));
        }
        if let Some(description) = &patch.description {
            fields.insert("description".into(), Value::String(description.clone()));
        }
        if let Some(status) = &patch.status {
            fields.insert("status".into(), Value::String(status.as_str().into()));
        }
        if let Some(priority) = &patch.priority {
            fields.insert("priority".into(), Value::String(priority.as_str().into()));
        }
        if let Some(due_date) = &patch.due_date {
            fields.insert(
                "due_date".into(),
                due_date
                    .map(|d| Value::String(d.format(DATE_FMT).to_string()))
                    .unwrap_or(Value::Null),
            );
        }
        if let Some(tags) = &patch.tags {
            fields.insert(
                "tags".into(),
                Value::Array(tags.iter().map(|t| Value::String(t.to_string())).collect()),
            );
        }
        if let Some(subtasks) = &patch.subtasks {
            let rows: Vec<Value> = subtasks
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "id": s.id.to_string(),
                        "text": s.text,
                        "completed": s.completed,
                    })
                })
                .collect();
            fields.insert("subtasks".into(), Value::Array(rows));
        }
        fields
    }
}

// ---------------------------------------------------------------------------
// Todo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoRow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub created_at: String,
}

impl TableRow for TodoRow {
    fn row_id(&self) -> &str {
        &self.id
    }

    fn row_project_id(&self) -> Option<&str> {
        Some(&self.project_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TodoPatch {
    pub text: Option<String>,
    pub completed: Option<bool>,
}

impl Entity for Todo {
    type Row = TodoRow;
    type Patch = TodoPatch;

    const KIND: &'static str = "todos";

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn project_id(&self) -> Option<&str> {
        Some(self.project_id.as_str())
    }

    fn from_row(row: TodoRow) -> Self {
        let created_at = parse_timestamp(Self::KIND, &row.id, &row.created_at);
        Self {
            id: TodoId::from_string(row.id),
            project_id: ProjectId::from_string(row.project_id),
            text: row.text,
            completed: row.completed,
            created_at,
        }
    }

    fn to_row(&self) -> TodoRow {
        TodoRow {
            id: self.id.to_string(),
            project_id: self.project_id.to_string(),
            text: self.text.clone(),
            completed: self.completed,
            created_at: self.created_at.to_rfc3339(),
        }
    }

    fn apply_patch(&mut self, patch: TodoPatch) {
        if let Some(text) = patch.text {
            self.text = text;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
    }

    fn patch_fields(patch: &TodoPatch) -> RowFields {
        let mut fields = RowFields::new();
        if let Some(text) = &patch.text {
            fields.insert("text".into(), Value::String(text.clone()));
        }
        if let Some(completed) = patch.completed {
            fields.insert("completed".into(), Value::Bool(completed));
        }
        fields
    }
}

// ---------------------------------------------------------------------------
// Tag
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: String,
}

impl TableRow for TagRow {
    fn row_id(&self) -> &str {
        &self.id
    }

    fn row_project_id(&self) -> Option<&str> {
        Some(&self.project_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TagPatch {
    pub name: Option<String>,
    pub color: Option<String>,
}

impl Entity for Tag {
    type Row = TagRow;
    type Patch = TagPatch;

    const KIND: &'static str = "tags";

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn project_id(&self) -> Option<&str> {
        Some(self.project_id.as_str())
    }

    fn from_row(row: TagRow) -> Self {
        Self {
            id: TagId::from_string(row.id),
            project_id: ProjectId::from_string(row.project_id),
            name: row.name,
            color: row.color,
        }
    }

    fn to_row(&self) -> TagRow {
        TagRow {
            id: self.id.to_string(),
            project_id: self.project_id.to_string(),
            name: self.name.clone(),
            color: self.color.clone(),
        }
    }

    fn apply_patch(&mut self, patch: TagPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(color) = patch.color {
            self.color = color;
        }
    }

    fn patch_fields(patch: &TagPatch) -> RowFields {
        let mut fields = RowFields::new();
        if let Some(name) = &patch.name {
            fields.insert("name".into(), Value::String(name.clone()));
        }
        if let Some(color) = &patch.color {
            fields.insert("color".into(), Value::String(color.clone()));
        }
        fields
    }
}

// ---------------------------------------------------------------------------
// Notes
// ---------------------------------------------------------------------------

/// Notes rows carry a server-internal auto id (`row_key`) with no entity
/// counterpart; the entity is addressed by project id alone. Clients write
/// `id == project_id` (see [`ProjectNotes`]'s `to_row`), and the adapter
/// must echo that client-chosen address in its change events — a backend
/// substituting its own auto id would produce `Updated`/`Deleted` events
/// that never match the in-memory entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesRow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub updated_at: String,
}

impl TableRow for NotesRow {
    fn row_id(&self) -> &str {
        &self.id
    }

    fn row_project_id(&self) -> Option<&str> {
        Some(&self.project_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotesPatch {
    pub content: Option<String>,
}

impl Entity for ProjectNotes {
    type Row = NotesRow;
    type Patch = NotesPatch;

    const KIND: &'static str = "notes";

    fn id(&self) -> &str {
        self.project_id.as_str()
    }

    fn project_id(&self) -> Option<&str> {
        Some(self.project_id.as_str())
    }

    fn from_row(row: NotesRow) -> Self {
        Self {
            project_id: ProjectId::from_string(row.project_id),
            content: row.content,
        }
    }

    fn to_row(&self) -> NotesRow {
        NotesRow {
            // The entity is the singleton for its project; reuse the project
            // id as the row address so upserts land on the same row.
            id: self.project_id.to_string(),
            project_id: self.project_id.to_string(),
            content: self.content.clone(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    fn apply_patch(&mut self, patch: NotesPatch) {
        if let Some(content) = patch.content {
            self.content = content;
        }
    }

    fn patch_fields(patch: &NotesPatch) -> RowFields {
        let mut fields = RowFields::new();
        if let Some(content) = &patch.content {
            fields.insert("content".into(), Value::String(content.clone()));
            fields.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_task() -> Task {
        Task {
            id: TaskId::from_string("task-1"),
            project_id: ProjectId::from_string("p1"),
            title: "Fix bug".into(),
            description: "crash on empty board".into(),
            status: Status::InProgress,
            priority: Priority::High,
            due_date: NaiveDate::from_ymd_opt(2024, 6, 8),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
            tags: vec![TagId::from_string("bug")],
            subtasks: vec![Subtask {
                id: SubtaskId::from_string("s1"),
                text: "reproduce".into(),
                completed: true,
            }],
        }
    }

    #[test]
    fn task_round_trips_through_row() {
        let task = sample_task();
        assert_eq!(Task::from_row(task.to_row()), task);
    }

    #[test]
    fn project_round_trips_through_row() {
        let project = Project {
            id: ProjectId::from_string("p1"),
            name: "Website".into(),
            color: "#3b82f6".into(),
            description: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        };
        assert_eq!(Project::from_row(project.to_row()), project);
    }

    #[test]
    fn malformed_row_degrades_to_defaults() {
        let row = TaskRow {
            id: "task-1".into(),
            project_id: "p1".into(),
            title: "t".into(),
            description: String::new(),
            status: "blocked".into(),
            priority: "urgent".into(),
            due_date: Some("not-a-date".into()),
            tags: Vec::new(),
            subtasks: Vec::new(),
            created_at: "garbage".into(),
        };
        let task = Task::from_row(row);
        assert_eq!(task.status, Status::Todo);
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.due_date, None);
        assert_eq!(task.created_at, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn missing_row_fields_deserialize_to_defaults() {
        let row: TaskRow =
            serde_json::from_value(serde_json::json!({"id": "task-1", "project_id": "p1"}))
                .unwrap();
        assert!(row.tags.is_empty());
        assert!(row.subtasks.is_empty());
        assert_eq!(row.due_date, None);
    }

    #[test]
    fn patch_fields_contains_only_present_keys() {
        let patch = TaskPatch {
            status: Some(Status::Complete),
            ..TaskPatch::default()
        };
        let fields = Task::patch_fields(&patch);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["status"], serde_json::json!("complete"));
    }

    #[test]
    fn clearing_due_date_emits_explicit_null() {
        let patch = TaskPatch {
            due_date: Some(None),
            ..TaskPatch::default()
        };
        let fields = Task::patch_fields(&patch);
        assert_eq!(fields["due_date"], Value::Null);
    }

    #[test]
    fn merge_preserves_fields_absent_from_payload() {
        let task = sample_task();
        let mut fields = RowFields::new();
        fields.insert("title".into(), serde_json::json!("Fix crash"));
        let merged = merge_row_fields(&task, &fields).unwrap();
        assert_eq!(merged.title, "Fix crash");
        assert_eq!(merged.description, task.description);
        assert_eq!(merged.status, task.status);
        assert_eq!(merged.tags, task.tags);
    }

    #[test]
    fn due_date_accepts_timestamp_prefix() {
        let mut row = sample_task().to_row();
        row.due_date = Some("2024-06-08T00:00:00Z".into());
        let task = Task::from_row(row);
        assert_eq!(task.due_date, NaiveDate::from_ymd_opt(2024, 6, 8));
    }
}
