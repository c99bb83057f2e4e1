//! Pending collective requests and per-buffer request slots

use std::fmt;

use crate::error::{ContractViolation, OptResult};

type Completion = Box<dyn FnOnce() -> OptResult<Vec<f64>> + Send>;

/// A started collective operation that owns its buffer until completion
pub struct Request {
    completion: RequestCompletion,
}

enum RequestCompletion {
    Ready(Vec<f64>),
    Deferred(Completion),
}

impl Request {
    /// A request that is already complete
    pub fn ready(data: Vec<f64>) -> Self {
        Self {
            completion: RequestCompletion::Ready(data),
        }
    }

    /// A request completed by running `completion` on wait
    pub fn deferred<F>(completion: F) -> Self
    where
        F: FnOnce() -> OptResult<Vec<f64>> + Send + 'static,
    {
        Self {
            completion: RequestCompletion::Deferred(Box::new(completion)),
        }
    }

    /// Block until the operation completes and hand the buffer back
    pub fn wait(self) -> OptResult<Vec<f64>> {
        match self.completion {
            RequestCompletion::Ready(data) => Ok(data),
            RequestCompletion::Deferred(completion) => completion(),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.completion {
            RequestCompletion::Ready(_) => "ready",
            RequestCompletion::Deferred(_) => "deferred",
        };
        f.debug_struct("Request").field("completion", &kind).finish()
    }
}

/// Observable state of a [`RequestSlot`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    /// Nothing in flight
    Idle,
    /// A request has been started and not waited on
    Pending,
    /// The request completed; its buffer has not been taken yet
    Done,
}

/// One buffer's request lifecycle: Idle → Pending → Done → Idle
///
/// Starting from anything but Idle is a contract violation.
#[derive(Debug)]
pub struct RequestSlot {
    label: String,
    state: SlotState,
}

#[derive(Debug)]
enum SlotState {
    Idle,
    Pending(Request),
    Done(Vec<f64>),
}

impl RequestSlot {
    /// An idle slot named `label` in error messages
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: SlotState::Idle,
        }
    }

    /// Name used in error messages
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current state
    pub fn state(&self) -> RequestState {
        match self.state {
            SlotState::Idle => RequestState::Idle,
            SlotState::Pending(_) => RequestState::Pending,
            SlotState::Done(_) => RequestState::Done,
        }
    }

    /// Whether a request is in flight
    pub fn is_pending(&self) -> bool {
        matches!(self.state, SlotState::Pending(_))
    }

    /// Issue a new request; `issue` only runs when the slot is Idle
    pub fn begin<F>(&mut self, issue: F) -> OptResult<()>
    where
        F: FnOnce() -> OptResult<Request>,
    {
        if !matches!(self.state, SlotState::Idle) {
            return Err(ContractViolation::RequestPending {
                what: self.label.clone(),
            }
            .into());
        }
        self.state = SlotState::Pending(issue()?);
        Ok(())
    }

    /// Block on the pending request, if any (Pending → Done)
    pub fn wait(&mut self) -> OptResult<()> {
        match std::mem::replace(&mut self.state, SlotState::Idle) {
            SlotState::Pending(request) => self.state = SlotState::Done(request.wait()?),
            other => self.state = other,
        }
        Ok(())
    }

    /// Take a completed buffer (Done → Idle)
    pub fn take(&mut self) -> Option<Vec<f64>> {
        match std::mem::replace(&mut self.state, SlotState::Idle) {
            SlotState::Done(data) => Some(data),
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Wait and take in one step; `None` when the slot was Idle
    pub fn complete(&mut self) -> OptResult<Option<Vec<f64>>> {
        self.wait()?;
        Ok(self.take())
    }
}
