//! Asynchronous dependencies: settle-once cells the renderer can await.
//!
//! A [`Dependency`] is created in pairs with a [`DependencyHandle`]; the
//! handle settles the cell, from any thread, with either a node or an
//! error. Tasks that suspend on an unsettled dependency subscribe with
//! their id and a clone of the request's ping sender; settlement pings each
//! subscriber back into the ready queue.

use super::Node;
use crate::error::RenderError;
use crate::task::TaskId;
use crossbeam_channel::Sender;
use std::sync::{Arc, Mutex, MutexGuard};

/// The observable state of a dependency at poll time.
#[derive(Debug, Clone)]
pub enum DependencyPoll {
    /// Not settled yet.
    Pending,
    /// Settled with a node to render in place.
    Resolved(Node),
    /// Settled with an error.
    Failed(RenderError),
}

enum State {
    Pending { wakers: Vec<(TaskId, Sender<TaskId>)> },
    Resolved(Node),
    Failed(RenderError),
}

/// A shareable handle to a value that may not exist yet.
#[derive(Clone)]
pub struct Dependency {
    state: Arc<Mutex<State>>,
}

impl Dependency {
    /// Create an unsettled dependency and its settling handle.
    pub fn new() -> (Self, DependencyHandle) {
        let state = Arc::new(Mutex::new(State::Pending { wakers: Vec::new() }));
        (
            Self {
                state: Arc::clone(&state),
            },
            DependencyHandle { state },
        )
    }

    /// A dependency that is already resolved.
    pub fn resolved(node: Node) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Resolved(node))),
        }
    }

    /// Observe the current state.
    pub fn poll(&self) -> DependencyPoll {
        match &*lock(&self.state) {
            State::Pending { .. } => DependencyPoll::Pending,
            State::Resolved(node) => DependencyPoll::Resolved(node.clone()),
            State::Failed(err) => DependencyPoll::Failed(err.clone()),
        }
    }

    /// Register a task to be pinged when the dependency settles.
    ///
    /// If the dependency already settled, the ping is sent immediately so a
    /// late subscriber is never stranded.
    pub(crate) fn subscribe(&self, task: TaskId, ping: Sender<TaskId>) {
        let mut state = lock(&self.state);
        match &mut *state {
            State::Pending { wakers } => wakers.push((task, ping)),
            State::Resolved(_) | State::Failed(_) => {
                drop(state);
                let _ = ping.send(task);
            }
        }
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*lock(&self.state) {
            State::Pending { wakers } => format!("Pending({} wakers)", wakers.len()),
            State::Resolved(_) => "Resolved".into(),
            State::Failed(_) => "Failed".into(),
        };
        write!(f, "Dependency({state})")
    }
}

/// The producing side of a [`Dependency`]. Settles exactly once.
pub struct DependencyHandle {
    state: Arc<Mutex<State>>,
}

impl DependencyHandle {
    /// Settle with a node; wakes every subscriber.
    pub fn resolve(self, node: Node) {
        self.settle(State::Resolved(node));
    }

    /// Settle with an error; wakes every subscriber.
    pub fn reject(self, error: RenderError) {
        self.settle(State::Failed(error));
    }

    fn settle(self, next: State) {
        let wakers = {
            let mut state = lock(&self.state);
            let State::Pending { wakers } = &mut *state else {
                return;
            };
            let wakers = std::mem::take(wakers);
            *state = next;
            wakers
        };
        for (task, ping) in wakers {
            // A dropped receiver just means the request is gone.
            let _ = ping.send(task);
        }
    }
}

impl std::fmt::Debug for DependencyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DependencyHandle")
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Node;
    use crossbeam_channel::unbounded;

    #[test]
    fn poll_transitions_on_resolve() {
        let (dep, handle) = Dependency::new();
        assert!(matches!(dep.poll(), DependencyPoll::Pending));
        handle.resolve(Node::text("done"));
        match dep.poll() {
            DependencyPoll::Resolved(Node::Text(text)) => assert_eq!(&*text, "done"),
            other => panic!("unexpected poll state: {other:?}"),
        }
    }

    #[test]
    fn resolve_pings_subscribers() {
        let (dep, handle) = Dependency::new();
        let (tx, rx) = unbounded();
        dep.subscribe(TaskId::from_index(3), tx.clone());
        dep.subscribe(TaskId::from_index(7), tx);
        assert!(rx.try_recv().is_err());

        handle.resolve(Node::empty());
        let mut pinged: Vec<_> = rx.try_iter().collect();
        pinged.sort();
        assert_eq!(pinged, vec![TaskId::from_index(3), TaskId::from_index(7)]);
    }

    #[test]
    fn late_subscription_pings_immediately() {
        let (dep, handle) = Dependency::new();
        handle.resolve(Node::empty());
        let (tx, rx) = unbounded();
        dep.subscribe(TaskId::from_index(1), tx);
        assert_eq!(rx.try_recv().ok(), Some(TaskId::from_index(1)));
    }

    #[test]
    fn reject_reports_the_error() {
        let (dep, handle) = Dependency::new();
        handle.reject(RenderError::render("load failed"));
        match dep.poll() {
            DependencyPoll::Failed(err) => {
                assert!(err.to_string().contains("load failed"));
            }
            other => panic!("unexpected poll state: {other:?}"),
        }
    }

    #[test]
    fn settlement_crosses_threads() {
        let (dep, handle) = Dependency::new();
        let (tx, rx) = unbounded();
        dep.subscribe(TaskId::from_index(9), tx);
        std::thread::spawn(move || handle.resolve(Node::text("async")));
        let pinged = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(pinged, TaskId::from_index(9));
    }
}
