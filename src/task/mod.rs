//! Task framework: units of work, the task list, retry and the scheduler

pub mod retry;
pub mod scheduler;

pub use retry::{Backoff, RetryPolicy};
pub use scheduler::{Scheduler, SyncReport};

use crate::error::{Result, SyncError};
use crate::logging::Logger;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// One source -> destination unit of work
#[async_trait]
pub trait Task: Send + Sync {
    /// Display name, `"source -> destination"`
    fn name(&self) -> &str;

    /// Run one attempt of the task
    async fn run(&self) -> Result<()>;
}

pub type TaskRef = Arc<dyn Task>;

/// Name shared by git and image tasks
pub fn task_name(source: &str, destination: &str) -> String {
    format!("{} -> {}", source, destination)
}

/// Append-only, thread-safe collection of tasks
///
/// Built once (concurrent `add` is safe), then consumed once through
/// [`TaskList::drain`].
#[derive(Default)]
pub struct TaskList {
    tasks: Mutex<Vec<TaskRef>>,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, task: TaskRef) {
        self.lock().push(task);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Names in insertion order
    pub fn names(&self) -> Vec<String> {
        self.lock().iter().map(|t| t.name().to_string()).collect()
    }

    /// Take every task out of the list. A second drain yields nothing.
    pub fn drain(&self) -> Drain {
        let tasks = std::mem::take(&mut *self.lock());
        Drain {
            inner: tasks.into_iter(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TaskRef>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TaskList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Single-pass sequence produced by [`TaskList::drain`]
pub struct Drain {
    inner: std::vec::IntoIter<TaskRef>,
}

impl Iterator for Drain {
    type Item = TaskRef;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Drain {}

/// Source -> destination(s) mapping as read from a config file
pub type Entries = BTreeMap<String, Value>;

/// Expand a mapping into `(source, destination)` pairs
///
/// A destination is either a non-empty string or a non-empty list of non-empty
/// strings. Any other shape fails the whole expansion.
pub fn expand_entries(entries: &Entries) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();

    for (source, destination) in entries {
        match destination {
            Value::String(dest) => {
                if dest.is_empty() {
                    return Err(empty_destination(source));
                }
                pairs.push((source.clone(), dest.clone()));
            }
            Value::Array(list) => {
                if list.is_empty() {
                    return Err(empty_destination(source));
                }
                for item in list {
                    match item {
                        Value::String(dest) if !dest.is_empty() => {
                            pairs.push((source.clone(), dest.clone()));
                        }
                        Value::String(_) => return Err(empty_destination(source)),
                        other => {
                            return Err(SyncError::Config(format!(
                                "invalid destination type: {} for source: {}",
                                value_type(other),
                                source
                            )));
                        }
                    }
                }
            }
            _ => {
                return Err(SyncError::Config(format!(
                    "invalid destination, should be string or []string for source: {}",
                    source
                )));
            }
        }
    }

    Ok(pairs)
}

/// Build a task list from a mapping, one task per pair
pub fn generate_task_list<F>(entries: &Entries, logger: &Logger, mut build: F) -> Result<TaskList>
where
    F: FnMut(&str, &str) -> TaskRef,
{
    let pairs = expand_entries(entries)?;
    let list = TaskList::new();
    for (source, destination) in &pairs {
        logger.info(&format!("generate sync task: {} -> {}", source, destination));
        list.add(build(source, destination));
    }
    Ok(list)
}

fn empty_destination(source: &str) -> SyncError {
    SyncError::Config(format!("empty destination for source: {}", source))
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Named(String);

    #[async_trait]
    impl Task for Named {
        fn name(&self) -> &str {
            &self.0
        }

        async fn run(&self) -> Result<()> {
            Ok(())
        }
    }

    fn entries(value: Value) -> Entries {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_expand_counts_every_pair() {
        let map = entries(json!({
            "nginx:latest": "mirror/nginx:latest",
            "redis": ["a.example.com/redis", "b.example.com/redis", "c.example.com/redis"],
            "alpine:3": ["mirror/alpine:3"],
        }));

        let pairs = expand_entries(&map).unwrap();
        assert_eq!(pairs.len(), 1 + 3 + 1);
        assert!(pairs.contains(&("redis".to_string(), "b.example.com/redis".to_string())));
    }

    #[test]
    fn test_expand_rejects_bad_shapes() {
        let bad = [
            json!({ "nginx": [] }),
            json!({ "nginx": "" }),
            json!({ "nginx": ["ok/nginx", 42] }),
            json!({ "nginx": ["ok/nginx", ""] }),
            json!({ "nginx": { "to": "x" } }),
            json!({ "nginx": null }),
            json!({ "good": "mirror/good", "nginx": [] }),
        ];
        for value in bad {
            let err = expand_entries(&entries(value.clone())).unwrap_err();
            assert!(err.is_config(), "{} should be a config error", value);
        }
    }

    #[test]
    fn test_generate_task_list_builds_nothing_on_error() {
        let map = entries(json!({ "a": "b", "c": [true] }));
        let mut built = 0;
        let result = generate_task_list(&map, &Logger::new_quiet(), |s, d| {
            built += 1;
            Arc::new(Named(task_name(s, d)))
        });
        assert!(result.is_err());
        assert_eq!(built, 0);
    }

    #[test]
    fn test_drain_yields_each_task_once() {
        let list = TaskList::new();
        for i in 0..4 {
            list.add(Arc::new(Named(format!("task-{}", i))));
        }

        let drained: Vec<_> = list.drain().map(|t| t.name().to_string()).collect();
        assert_eq!(drained, vec!["task-0", "task-1", "task-2", "task-3"]);
        assert_eq!(list.drain().count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_add() {
        let list = Arc::new(TaskList::new());
        let mut handles = Vec::new();
        for worker in 0..8 {
            let list = Arc::clone(&list);
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    list.add(Arc::new(Named(format!("{}-{}", worker, i))));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(list.len(), 200);
    }
}
