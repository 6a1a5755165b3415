//! Derived read models: pure functions over collection snapshots. Nothing
//! here mutates state or touches a backend, so every view is cheap to
//! recompute after a pump.

use chrono::NaiveDate;

use taskdeck_core::{Priority, Status, Tag, TagId, Task};

/// Board columns in display order.
#[derive(Debug, Default)]
pub struct BoardColumns<'a> {
    pub todo: Vec<&'a Task>,
    pub in_progress: Vec<&'a Task>,
    pub complete: Vec<&'a Task>,
}

pub fn partition_by_status<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> BoardColumns<'a> {
    let mut columns = BoardColumns::default();
    for task in tasks {
        match task.status {
            Status::Todo => columns.todo.push(task),
            Status::InProgress => columns.in_progress.push(task),
            Status::Complete => columns.complete.push(task),
        }
    }
    columns
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubtaskProgress {
    pub completed: usize,
    pub total: usize,
}

pub fn subtask_progress(task: &Task) -> SubtaskProgress {
    SubtaskProgress {
        completed: task.subtasks.iter().filter(|s| s.completed).count(),
        total: task.subtasks.len(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionStats {
    pub total: usize,
    pub completed: usize,
    /// Rounded to the nearest whole percent; 0 for an empty set.
    pub percent: u8,
}

pub fn completion_stats<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> CompletionStats {
    let mut total = 0;
    let mut completed = 0;
    for task in tasks {
        total += 1;
        if task.status == Status::Complete {
            completed += 1;
        }
    }
    let percent = if total == 0 {
        0
    } else {
        ((completed as f64 / total as f64) * 100.0).round() as u8
    };
    CompletionStats {
        total,
        completed,
        percent,
    }
}

/// Earliest due date among tasks that still need doing. Completed tasks
/// never count, even when overdue.
pub fn nearest_deadline<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Option<NaiveDate> {
    tasks
        .into_iter()
        .filter(|t| t.status != Status::Complete)
        .filter_map(|t| t.due_date)
        .min()
}

pub fn tasks_for_project<'a>(tasks: &'a [Task], project_id: &str) -> Vec<&'a Task> {
    tasks
        .iter()
        .filter(|t| t.project_id.as_str() == project_id)
        .collect()
}

/// Resolve a task's tag ids against the tag collection. Ids whose tag has
/// been deleted are silently omitted.
pub fn resolve_tags<'a>(task: &Task, tags: &'a [Tag]) -> Vec<&'a Tag> {
    task.tags
        .iter()
        .filter_map(|id| tags.iter().find(|tag| tag.id == *id))
        .collect()
}

/// A text query plus optional exact-match filters, intersected.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: String,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub tag: Option<TagId>,
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Case-insensitive substring search over task titles and descriptions,
/// narrowed by whichever filters are set. A blank query matches nothing
/// rather than everything.
pub fn search<'a>(tasks: &'a [Task], query: &SearchQuery) -> Vec<&'a Task> {
    let needle = query.text.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    tasks
        .iter()
        .filter(|t| {
            t.title.to_lowercase().contains(&needle)
                || t.description.to_lowercase().contains(&needle)
        })
        .filter(|t| query.status.is_none_or(|s| t.status == s))
        .filter(|t| query.priority.is_none_or(|p| t.priority == p))
        .filter(|t| {
            query
                .tag
                .as_ref()
                .is_none_or(|tag| t.tags.iter().any(|id| id == tag))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueLabel {
    pub text: String,
    pub overdue: bool,
}

/// Human label for a due date relative to `today`.
///
/// Day deltas map to: `Today`, `Tomorrow`, `Yesterday`, `In N days` up to a
/// week out, then whole weeks up to a month, then whole months. Anything
/// more than a day past is `N days overdue`.
pub fn relative_due(due: NaiveDate, today: NaiveDate) -> DueLabel {
    let days = (due - today).num_days();
    let text = match days {
        0 => "Today".to_string(),
        1 => "Tomorrow".to_string(),
        -1 => "Yesterday".to_string(),
        2..=7 => format!("In {days} days"),
        8..=30 => {
            let weeks = days / 7;
            format!("In {} week{}", weeks, if weeks == 1 { "" } else { "s" })
        }
        31.. => {
            let months = days / 30;
            format!("In {} month{}", months, if months == 1 { "" } else { "s" })
        }
        _ => format!("{} days overdue", -days),
    };
    DueLabel {
        text,
        overdue: days < 0,
    }
}

/// Absolute calendar form, e.g. `Jun 8, 2024`.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%b %-d, %Y").to_string()
}

/// Absolute date with the relative label alongside, e.g.
/// `Jun 8, 2024 (Tomorrow)`.
pub fn format_due_date(due: NaiveDate, today: NaiveDate) -> String {
    format!("{} ({})", format_date(due), relative_due(due, today).text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskdeck_core::{Priority, ProjectId, Subtask, SubtaskId, TagId, TaskId};

    fn task(id: &str, project: &str, status: Status) -> Task {
        Task {
            id: TaskId::from_string(id),
            project_id: ProjectId::from_string(project),
            title: format!("task {id}"),
            description: String::new(),
            status,
            priority: Priority::Medium,
            due_date: None,
            created_at: Utc::now(),
            tags: Vec::new(),
            subtasks: Vec::new(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn partition_keeps_input_order_within_columns() {
        let tasks = vec![
            task("a", "p", Status::Todo),
            task("b", "p", Status::Complete),
            task("c", "p", Status::Todo),
        ];
        let columns = partition_by_status(&tasks);
        let ids: Vec<&str> = columns.todo.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert_eq!(columns.complete.len(), 1);
        assert!(columns.in_progress.is_empty());
    }

    #[test]
    fn subtask_progress_counts_completed() {
        let mut t = task("a", "p", Status::Todo);
        t.subtasks = vec![
            Subtask {
                id: SubtaskId::from_string("s1"),
                text: "one".into(),
                completed: true,
            },
            Subtask {
                id: SubtaskId::from_string("s2"),
                text: "two".into(),
                completed: false,
            },
        ];
        assert_eq!(subtask_progress(&t), SubtaskProgress {
            completed: 1,
            total: 2
        });
    }

    #[test]
    fn completion_stats_rounds_percent() {
        let tasks = vec![
            task("a", "p", Status::Complete),
            task("b", "p", Status::Todo),
            task("c", "p", Status::Todo),
        ];
        let stats = completion_stats(&tasks);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.percent, 33);
    }

    #[test]
    fn completion_stats_of_empty_set_is_zero() {
        let stats = completion_stats(&[]);
        assert_eq!(stats.percent, 0);
        assert_eq!(stats.total, 0);
    }

    #[test]
    fn nearest_deadline_ignores_completed_tasks() {
        let mut done = task("a", "p", Status::Complete);
        done.due_date = Some(date(2024, 6, 1));
        let mut open = task("b", "p", Status::Todo);
        open.due_date = Some(date(2024, 6, 15));
        let mut later = task("c", "p", Status::InProgress);
        later.due_date = Some(date(2024, 7, 1));
        let tasks = vec![done, open, later];
        assert_eq!(nearest_deadline(&tasks), Some(date(2024, 6, 15)));
    }

    #[test]
    fn nearest_deadline_none_when_nothing_is_due() {
        let tasks = vec![task("a", "p", Status::Todo)];
        assert_eq!(nearest_deadline(&tasks), None);
    }

    #[test]
    fn resolve_tags_omits_dangling_ids() {
        let tags = vec![Tag {
            id: TagId::from_string("bug"),
            project_id: ProjectId::from_string("p"),
            name: "Bug".into(),
            color: "#ef4444".into(),
        }];
        let mut t = task("a", "p", Status::Todo);
        t.tags = vec![TagId::from_string("bug"), TagId::from_string("deleted")];
        let resolved = resolve_tags(&t, &tags);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "Bug");
    }

    #[test]
    fn empty_query_matches_nothing() {
        let tasks = vec![task("a", "p", Status::Todo)];
        assert!(search(&tasks, &SearchQuery::text("")).is_empty());
        assert!(search(&tasks, &SearchQuery::text("   ")).is_empty());
        // Filters alone never open the floodgates either.
        let query = SearchQuery {
            status: Some(Status::Todo),
            ..SearchQuery::default()
        };
        assert!(search(&tasks, &query).is_empty());
    }

    #[test]
    fn search_is_case_insensitive_over_title_and_description() {
        let mut a = task("a", "p", Status::Todo);
        a.title = "Fix login Bug".into();
        let mut b = task("b", "p", Status::Todo);
        b.description = "debug the bugged flow".into();
        let c = task("c", "p", Status::Todo);
        let tasks = vec![a, b, c];
        let hits = search(&tasks, &SearchQuery::text("BUG"));
        let ids: Vec<&str> = hits.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn search_filters_intersect_with_the_text_match() {
        let mut a = task("a", "p", Status::Todo);
        a.title = "Fix bug".into();
        a.priority = Priority::High;
        a.tags = vec![TagId::from_string("urgent")];
        let mut b = task("b", "p", Status::Complete);
        b.title = "Fix other bug".into();
        b.priority = Priority::Low;
        let tasks = vec![a, b];

        let query = SearchQuery {
            text: "bug".into(),
            priority: Some(Priority::High),
            ..SearchQuery::default()
        };
        assert_eq!(search(&tasks, &query).len(), 1);

        let query = SearchQuery {
            text: "bug".into(),
            status: Some(Status::Complete),
            ..SearchQuery::default()
        };
        let hits = search(&tasks, &query);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "b");

        let query = SearchQuery {
            text: "bug".into(),
            tag: Some(TagId::from_string("urgent")),
            ..SearchQuery::default()
        };
        let hits = search(&tasks, &query);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "a");
    }

    #[test]
    fn relative_due_labels() {
        let today = date(2024, 6, 10);
        let cases = [
            (date(2024, 6, 10), "Today", false),
            (date(2024, 6, 11), "Tomorrow", false),
            (date(2024, 6, 9), "Yesterday", true),
            (date(2024, 6, 13), "In 3 days", false),
            (date(2024, 6, 17), "In 7 days", false),
            (date(2024, 6, 18), "In 1 week", false),
            (date(2024, 6, 25), "In 2 weeks", false),
            (date(2024, 7, 10), "In 4 weeks", false),
            (date(2024, 7, 11), "In 1 month", false),
            (date(2024, 8, 15), "In 2 months", false),
            (date(2024, 6, 5), "5 days overdue", true),
        ];
        for (due, text, overdue) in cases {
            let label = relative_due(due, today);
            assert_eq!(label.text, text, "due {due}");
            assert_eq!(label.overdue, overdue, "due {due}");
        }
    }

    #[test]
    fn format_date_is_month_day_year() {
        assert_eq!(format_date(date(2024, 6, 8)), "Jun 8, 2024");
        assert_eq!(format_date(date(2024, 12, 25)), "Dec 25, 2024");
    }

    #[test]
    fn format_due_date_combines_absolute_and_relative() {
        let today = date(2024, 6, 7);
        assert_eq!(format_due_date(date(2024, 6, 8), today), "Jun 8, 2024 (Tomorrow)");
        assert_eq!(
            format_due_date(date(2024, 6, 5), today),
            "Jun 5, 2024 (2 days overdue)"
        );
    }
}
