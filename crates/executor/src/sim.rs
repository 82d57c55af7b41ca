//! In-process interpolating executor.
//!
//! Stands in for the real actuator driver: tracks the last commanded joint
//! positions, walks each goal's waypoints with linear interpolation, and
//! publishes feedback on a fixed tick (100 ms by default, the period the
//! physical driver reports at). `time_scale` compresses simulated time so
//! tests can run long trajectories quickly.

use std::{sync::Arc, time::Duration};

use anyhow::bail;
use async_trait::async_trait;
use tokio::{
    sync::{mpsc, Mutex},
    time::MissedTickBehavior,
};
use tracing::debug;

use shared::domain::JointVector;

use crate::{GoalHandle, GoalUpdate, MotionExecutor, TrajectoryGoal, Waypoint};

const UPDATE_CHANNEL_CAPACITY: usize = 64;

pub struct SimExecutor {
    tick: Duration,
    time_scale: f64,
    positions: Arc<Mutex<JointVector>>,
}

impl SimExecutor {
    pub fn new() -> Self {
        Self::with_timing(Duration::from_millis(100), 1.0)
    }

    pub fn with_timing(tick: Duration, time_scale: f64) -> Self {
        Self {
            tick,
            time_scale,
            positions: Arc::new(Mutex::new(JointVector::zeroed())),
        }
    }

    pub async fn current_positions(&self) -> JointVector {
        *self.positions.lock().await
    }
}

impl Default for SimExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MotionExecutor for SimExecutor {
    async fn submit(&self, goal: TrajectoryGoal) -> anyhow::Result<GoalHandle> {
        let Some(last) = goal.waypoints.last() else {
            bail!("trajectory goal has no waypoints");
        };
        let total_secs = last.time_from_start_secs;
        let mut previous = 0.0;
        for waypoint in &goal.waypoints {
            let offset = waypoint.time_from_start_secs;
            if !offset.is_finite() || offset <= previous {
                bail!("waypoint time offsets must be finite and strictly increasing");
            }
            previous = offset;
        }

        let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        let goal_id = goal.id;
        let start = *self.positions.lock().await;

        debug!(%goal_id, waypoints = goal.waypoints.len(), total_secs, "starting simulated goal");
        tokio::spawn(run_goal(
            goal,
            start,
            total_secs,
            Arc::clone(&self.positions),
            self.tick,
            self.time_scale,
            update_tx,
            cancel_rx,
        ));

        Ok(GoalHandle::new(goal_id, cancel_tx, update_rx))
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_goal(
    goal: TrajectoryGoal,
    start: JointVector,
    total_secs: f64,
    positions: Arc<Mutex<JointVector>>,
    tick: Duration,
    time_scale: f64,
    update_tx: mpsc::Sender<GoalUpdate>,
    mut cancel_rx: mpsc::Receiver<()>,
) {
    let mut elapsed = 0.0;
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // An interval's first tick completes immediately; consume it so every
    // later tick represents one real period.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel_rx.recv() => {
                debug!(goal_id = %goal.id, "simulated goal canceled");
                let _ = update_tx.send(GoalUpdate::Canceled).await;
                return;
            }
            _ = ticker.tick() => {
                elapsed += tick.as_secs_f64() * time_scale;
                let sample = sample_trajectory(start, &goal.waypoints, elapsed);
                *positions.lock().await = sample;
                if update_tx.send(GoalUpdate::Feedback(sample)).await.is_err() {
                    // Nobody is listening anymore; stop actuating.
                    return;
                }
                if elapsed >= total_secs {
                    debug!(goal_id = %goal.id, "simulated goal reached final waypoint");
                    let _ = update_tx.send(GoalUpdate::Succeeded).await;
                    return;
                }
            }
        }
    }
}

fn sample_trajectory(start: JointVector, waypoints: &[Waypoint], t: f64) -> JointVector {
    let mut prev_positions = start;
    let mut prev_offset = 0.0;
    for waypoint in waypoints {
        if t <= waypoint.time_from_start_secs {
            let span = waypoint.time_from_start_secs - prev_offset;
            if span <= 0.0 {
                return waypoint.positions;
            }
            return lerp(prev_positions, waypoint.positions, (t - prev_offset) / span);
        }
        prev_positions = waypoint.positions;
        prev_offset = waypoint.time_from_start_secs;
    }
    prev_positions
}

fn lerp(from: JointVector, to: JointVector, alpha: f64) -> JointVector {
    let mut out = from;
    for (index, (a, b)) in from.as_slice().iter().zip(to.as_slice()).enumerate() {
        out.set(index, a + (b - a) * alpha);
    }
    out
}

#[cfg(test)]
#[path = "tests/sim_tests.rs"]
mod tests;
