use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    Todo,
    InProgress,
    Complete,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in-progress",
            Self::Complete => "complete",
        }
    }

    /// Parse a wire value. Unknown strings fall back to the documented
    /// default (`todo`) at the codec layer, so this returns an Option.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(Self::Todo),
            "in-progress" => Some(Self::InProgress),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }

    pub const ALL: [Status; 3] = [Status::Todo, Status::InProgress, Status::Complete];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub color: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Embedded in a Task; not independently addressable. Id is unique
/// within its owning task only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub text: String,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub title: String,
    pub description: String,
    pub status: Status,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    /// Tag ids. May reference tags that have since been deleted; dangling
    /// ids are tolerated and resolved views simply omit them.
    pub tags: Vec<TagId>,
    pub subtasks: Vec<Subtask>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: TodoId,
    pub project_id: ProjectId,
    pub text: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl Todo {
    /// Build the Task a todo promotes into: same id and creation time,
    /// text becomes the title, everything else at defaults.
    pub fn promote(&self) -> Task {
        Task {
            id: TaskId::from_string(self.id.as_str()),
            project_id: self.project_id.clone(),
            title: self.text.clone(),
            description: String::new(),
            status: Status::Todo,
            priority: Priority::Medium,
            due_date: None,
            created_at: self.created_at,
            tags: Vec::new(),
            subtasks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub project_id: ProjectId,
    pub name: String,
    pub color: String,
}

/// Free-text notes, exactly one per project. An absent row is equivalent
/// to empty content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectNotes {
    pub project_id: ProjectId,
    pub content: String,
}
