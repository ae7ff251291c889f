use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{AgentError, Result};

/// Lifecycle of one pane's or drawer's outstanding request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Idle,
    Pending,
    Succeeded,
    Failed(String),
}

/// Proof that the holder started the current request. Results carrying an
/// outdated ticket are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Per-operation replacement for a shared loading flag: each pane owns one,
/// so unrelated panes never block each other.
#[derive(Debug, Default)]
pub struct TaskHandle {
    status: TaskStatus,
    generation: u64,
}

impl TaskHandle {
    pub fn status(&self) -> &TaskStatus {
        &self.status
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    pub fn begin(&mut self) -> Result<Ticket> {
        if self.is_pending() {
            return Err(AgentError::Busy);
        }
        self.generation += 1;
        self.status = TaskStatus::Pending;
        Ok(Ticket(self.generation))
    }

    fn owns(&self, ticket: Ticket) -> bool {
        self.is_pending() && ticket.0 == self.generation
    }

    /// Returns `false` when the ticket is stale and nothing changed.
    pub fn succeed(&mut self, ticket: Ticket) -> bool {
        if !self.owns(ticket) {
            return false;
        }
        self.status = TaskStatus::Succeeded;
        true
    }

    pub fn fail(&mut self, ticket: Ticket, error: &AgentError) -> bool {
        if !self.owns(ticket) {
            return false;
        }
        self.status = TaskStatus::Failed(error.user_message());
        true
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// Settles a started request if the command future is dropped before it
/// publishes its result. Without it the owning handle would stay Pending.
pub(crate) struct TicketGuard<'a, T> {
    state: &'a Arc<Mutex<T>>,
    ticket: Ticket,
    armed: bool,
    cancel: fn(&mut T, Ticket),
}

impl<'a, T> TicketGuard<'a, T> {
    pub(crate) fn new(state: &'a Arc<Mutex<T>>, ticket: Ticket, cancel: fn(&mut T, Ticket)) -> Self {
        Self {
            state,
            ticket,
            armed: true,
            cancel,
        }
    }

    /// Hands the ticket back once the result is ready to publish.
    pub(crate) fn disarm(mut self) -> Ticket {
        self.armed = false;
        self.ticket
    }
}

impl<T> Drop for TicketGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            log::warn!("Request dropped before completion; releasing its task");
            (self.cancel)(&mut *self.state.lock(), self.ticket);
        }
    }
}
