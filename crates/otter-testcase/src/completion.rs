//! Single-assignment completion token.
//!
//! A task's outcome can arrive from two places: the lifecycle sequence
//! finishing, or an uncaught failure raised through the task's error
//! boundary. Both paths race for one [`CompletionToken`]; the first
//! [`claim`](CompletionToken::claim) moves it from `Pending` to `Settled` and
//! receives the only [`Settler`]. Every later claim gets `None`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::TestError;

/// Outcome delivered to the waiting runner: `None` means the test passed.
pub type Delivery = Option<TestError>;

/// Which path settled the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// The setUp/body/tearDown sequence completed (or timed out)
    Sequence,
    /// A failure arrived through the error boundary
    Uncaught,
}

enum State {
    Pending(oneshot::Sender<Delivery>),
    Settled(Channel),
}

/// Shared latch between the two completion paths of one task.
pub struct CompletionToken {
    task: Arc<str>,
    state: Mutex<State>,
}

/// Exclusive right to deliver the outcome, handed to the winning claimant.
#[must_use = "the outcome is only delivered by calling `deliver`"]
pub struct Settler {
    channel: Channel,
    tx: oneshot::Sender<Delivery>,
}

impl CompletionToken {
    /// Create a pending token and the receiver the runner waits on.
    pub fn new(task: impl Into<Arc<str>>) -> (Arc<Self>, oneshot::Receiver<Delivery>) {
        let (tx, rx) = oneshot::channel();
        let token = Self {
            task: task.into(),
            state: Mutex::new(State::Pending(tx)),
        };
        (Arc::new(token), rx)
    }

    /// Try to settle the token from `channel`. Returns `None` if the other
    /// path (or an earlier call) already won.
    pub fn claim(&self, channel: Channel) -> Option<Settler> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Settled(channel)) {
            State::Pending(tx) => Some(Settler { channel, tx }),
            settled @ State::Settled(_) => {
                *state = settled;
                None
            }
        }
    }

    /// The channel that settled this token, if any.
    pub fn settled_by(&self) -> Option<Channel> {
        match *self.state.lock() {
            State::Pending(_) => None,
            State::Settled(channel) => Some(channel),
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }
}

impl fmt::Debug for CompletionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionToken")
            .field("task", &self.task)
            .field("settled_by", &self.settled_by())
            .finish()
    }
}

impl Settler {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Hand the outcome to the runner.
    pub fn deliver(self, outcome: Delivery) {
        // The runner only stops waiting when it is dropped mid-task.
        let _ = self.tx.send(outcome);
    }
}
