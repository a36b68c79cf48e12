//! Join group for bounded fan-out
//!
//! Spawn a fixed set of tasks, then wait for all of them. A panicking task is
//! reported as [`MeshError::Task`] in its own slot and never takes its
//! siblings down.

use std::future::Future;

use tokio::task::JoinSet;
use twinmesh_core::MeshError;

/// Result of one task of a [`TaskGroup`].
#[derive(Debug)]
pub struct TaskOutcome<T> {
    pub name: String,
    pub result: Result<T, MeshError>,
}

pub struct TaskGroup<T> {
    label: String,
    names: Vec<String>,
    tasks: JoinSet<(usize, T)>,
}

impl<T: Send + 'static> TaskGroup<T> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            names: Vec::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let index = self.names.len();
        self.names.push(name.into());
        self.tasks.spawn(async move { (index, task.await) });
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Wait for every task. Outcomes are returned in spawn order.
    pub async fn join_all(mut self) -> Vec<TaskOutcome<T>> {
        let mut slots: Vec<Option<Result<T, MeshError>>> =
            self.names.iter().map(|_| None).collect();
        let mut panicked = Vec::new();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((index, value)) => slots[index] = Some(Ok(value)),
                Err(e) => {
                    tracing::error!(group = %self.label, error = %e, "Task failed");
                    panicked.push(e.to_string());
                }
            }
        }

        // A panicked task loses its index; fill the empty slots in order.
        let mut panicked = panicked.into_iter();
        self.names
            .into_iter()
            .zip(slots)
            .map(|(name, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(MeshError::Task {
                        label: format!("{}/{}", self.label, name),
                        reason: panicked.next().unwrap_or_else(|| "task did not finish".to_string()),
                    })
                });
                TaskOutcome { name, result }
            })
            .collect()
    }
}
