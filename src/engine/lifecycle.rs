use std::collections::VecDeque;

use crate::engine::message::{ControlMessage, InitPayload, Submission};

/// Per-instance startup state.
///
/// The machine only ever moves forward: `Uninit` → `Initializing` →
/// `Ready`, or `Initializing` → `Failed`. Both end states are terminal; a
/// failed instantiation is never retried by the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Uninit,
    Initializing,
    Ready,
    Failed,
}

/// What the pipeline should do with a submission.
pub enum SubmitAction {
    /// First init payload: start asynchronous instantiation.
    Begin(InitPayload),
    /// Message buffered until the instance becomes ready.
    Queued,
    /// Instance is ready; dispatch immediately.
    Dispatch(ControlMessage),
    /// A second init payload for the same instance; single-shot contract
    /// violated. The payload is handed back for fault reporting.
    DuplicateInit(InitPayload),
    /// Message for a failed instance; dropped.
    Dropped(ControlMessage),
}

/// Gates one instance until its module is instantiated.
///
/// Control messages arriving while instantiation is in flight are buffered
/// FIFO and drained exactly once on completion, preserving arrival order.
/// Nothing is ever dropped before the terminal state is known, and nothing
/// is replayed twice: `complete` hands the queue out by value and leaves the
/// controller empty.
pub struct LifecycleController {
    state: LifecycleState,
    pending: VecDeque<ControlMessage>,
}

impl LifecycleController {
    pub fn new() -> Self {
        LifecycleController {
            state: LifecycleState::Uninit,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Routes one submission according to the current state.
    pub fn submit(&mut self, submission: Submission) -> SubmitAction {
        match submission {
            Submission::Init(payload) => match self.state {
                LifecycleState::Uninit => {
                    self.state = LifecycleState::Initializing;
                    SubmitAction::Begin(payload)
                }
                _ => SubmitAction::DuplicateInit(payload),
            },
            Submission::Control(msg) => match self.state {
                LifecycleState::Uninit | LifecycleState::Initializing => {
                    self.pending.push_back(msg);
                    SubmitAction::Queued
                }
                LifecycleState::Ready => SubmitAction::Dispatch(msg),
                LifecycleState::Failed => SubmitAction::Dropped(msg),
            },
        }
    }

    /// Finishes instantiation and drains the buffered messages in arrival
    /// order. On success the caller dispatches them; on failure it drops
    /// them (with a log entry) and the controller stays terminally failed.
    pub fn complete(&mut self, success: bool) -> VecDeque<ControlMessage> {
        debug_assert_eq!(self.state, LifecycleState::Initializing);
        self.state = if success {
            LifecycleState::Ready
        } else {
            LifecycleState::Failed
        };
        std::mem::take(&mut self.pending)
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::message::{ControlOp, Handle};

    fn control(handle: u32, op: ControlOp) -> Submission {
        Submission::Control(ControlMessage {
            handle: Handle(handle),
            op,
        })
    }

    #[test]
    fn test_messages_queue_until_ready_then_replay_in_order() {
        let mut lc = LifecycleController::new();
        lc.state = LifecycleState::Initializing;

        let ops = [
            ControlOp::SetGainTarget(0.1),
            ControlOp::SetGainTarget(0.2),
            ControlOp::SetGainTarget(0.3),
        ];
        for op in ops {
            assert!(matches!(lc.submit(control(7, op)), SubmitAction::Queued));
        }

        let drained = lc.complete(true);
        assert_eq!(lc.state(), LifecycleState::Ready);
        let replayed: Vec<ControlOp> = drained.into_iter().map(|m| m.op).collect();
        assert_eq!(replayed, ops);

        // Queue is discarded after the drain.
        assert_eq!(lc.pending_len(), 0);
    }

    #[test]
    fn test_ready_dispatches_immediately() {
        let mut lc = LifecycleController::new();
        lc.state = LifecycleState::Initializing;
        lc.complete(true);

        match lc.submit(control(7, ControlOp::Reset)) {
            SubmitAction::Dispatch(msg) => assert_eq!(msg.op, ControlOp::Reset),
            _ => panic!("expected immediate dispatch"),
        }
    }

    #[test]
    fn test_failed_is_terminal_and_drops() {
        let mut lc = LifecycleController::new();
        lc.state = LifecycleState::Initializing;
        lc.submit(control(7, ControlOp::Reset));

        let dropped = lc.complete(false);
        assert_eq!(lc.state(), LifecycleState::Failed);
        assert_eq!(dropped.len(), 1);

        assert!(matches!(
            lc.submit(control(7, ControlOp::Reset)),
            SubmitAction::Dropped(_)
        ));
        assert_eq!(lc.state(), LifecycleState::Failed);
    }
}
