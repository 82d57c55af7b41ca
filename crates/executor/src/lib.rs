//! Boundary to the motion-execution subsystem.
//!
//! The coordinator only ever sees this seam: it submits a timed-waypoint
//! goal, gets back a cancellable handle, and consumes an update stream that
//! terminates in exactly one of succeeded / aborted / canceled. The real
//! actuator driver and the in-process simulator both live behind
//! [`MotionExecutor`].

use async_trait::async_trait;
use tokio::sync::mpsc;

use shared::domain::{GoalId, JointVector};

mod sim;

pub use sim::SimExecutor;

/// One timed target along a goal. `time_from_start_secs` is cumulative from
/// goal start, strictly increasing across a trajectory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub positions: JointVector,
    pub time_from_start_secs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryGoal {
    pub id: GoalId,
    pub waypoints: Vec<Waypoint>,
}

/// Stream items for one goal. Terminal variants end the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum GoalUpdate {
    /// Intermediate actual positions.
    Feedback(JointVector),
    Succeeded,
    Aborted(String),
    Canceled,
}

impl GoalUpdate {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GoalUpdate::Feedback(_))
    }
}

/// Fire-and-forget cancellation for a submitted goal. Cloneable so the
/// coordinator can keep one while the update stream is driven elsewhere.
#[derive(Debug, Clone)]
pub struct GoalCanceller {
    cancel_tx: mpsc::Sender<()>,
}

impl GoalCanceller {
    /// Best-effort: the request is dropped if the executor already finished
    /// or a cancel is already pending. The caller never waits for an ack;
    /// the ack is the `Canceled` update on the stream.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.try_send(());
    }
}

/// A submitted, in-flight goal.
pub struct GoalHandle {
    id: GoalId,
    canceller: GoalCanceller,
    updates: mpsc::Receiver<GoalUpdate>,
}

impl GoalHandle {
    pub fn new(id: GoalId, cancel_tx: mpsc::Sender<()>, updates: mpsc::Receiver<GoalUpdate>) -> Self {
        Self {
            id,
            canceller: GoalCanceller { cancel_tx },
            updates,
        }
    }

    pub fn id(&self) -> GoalId {
        self.id
    }

    pub fn canceller(&self) -> GoalCanceller {
        self.canceller.clone()
    }

    pub fn into_updates(self) -> mpsc::Receiver<GoalUpdate> {
        self.updates
    }
}

#[async_trait]
pub trait MotionExecutor: Send + Sync {
    /// Submits a goal for execution. Errors here mean the goal was never
    /// admitted; once a handle is returned, the outcome arrives on the
    /// update stream instead.
    async fn submit(&self, goal: TrajectoryGoal) -> anyhow::Result<GoalHandle>;
}
