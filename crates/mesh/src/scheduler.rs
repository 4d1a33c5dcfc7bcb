//! Periodic task scheduler driven by an injectable time source.
//!
//! Tasks are checked in a fixed order on every tick, so two nodes fed the
//! same clock run the same tasks in the same sequence.

use offmesh_core::config::MeshConfig;
use serde::{Deserialize, Serialize};

/// Periodic node duties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Health,
    Gossip,
    Dispatch,
}

#[derive(Debug, Clone)]
struct PeriodicTask {
    kind: TaskKind,
    interval_ms: u64,
    next_due_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    tasks: Vec<PeriodicTask>,
    stopped: bool,
}

impl Scheduler {
    /// Health and gossip first fire one interval after `now_ms`; dispatch fires immediately
    pub fn new(config: &MeshConfig, now_ms: u64) -> Self {
        let task = |kind, interval_ms: u64, first_ms| PeriodicTask {
            kind,
            interval_ms: interval_ms.max(1),
            next_due_ms: first_ms,
        };
        Self {
            tasks: vec![
                task(
                    TaskKind::Health,
                    config.health.interval_ms,
                    now_ms.saturating_add(config.health.interval_ms),
                ),
                task(
                    TaskKind::Gossip,
                    config.gossip.interval_ms,
                    now_ms.saturating_add(config.gossip.interval_ms),
                ),
                task(TaskKind::Dispatch, config.dispatcher.interval_ms, now_ms),
            ],
            stopped: false,
        }
    }

    /// Tasks due at `now_ms`, in run order. Each returned task is rescheduled.
    pub fn due(&mut self, now_ms: u64) -> Vec<TaskKind> {
        if self.stopped {
            return Vec::new();
        }
        let mut due = Vec::new();
        for task in &mut self.tasks {
            if now_ms >= task.next_due_ms {
                due.push(task.kind);
                task.next_due_ms = now_ms.saturating_add(task.interval_ms);
            }
        }
        due
    }

    /// No task is returned after this
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}
