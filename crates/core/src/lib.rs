pub mod codec;
pub mod entity;
pub mod error;
pub mod ids;

pub use codec::{
    Entity, NotesPatch, NotesRow, ProjectPatch, ProjectRow, RowFields, SubtaskRow, TableRow,
    TagPatch, TagRow, TaskPatch, TaskRow, TodoPatch, TodoRow, merge_row_fields,
};
pub use entity::{Priority, Project, ProjectNotes, Status, Subtask, Tag, Task, Todo};
pub use error::CoreError;
pub use ids::*;
