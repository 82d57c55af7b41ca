//! Motion coordination core.
//!
//! A single [`Coordinator`] owns the authoritative joint positions, the
//! ordered pose list and the in-flight motion goal. Every session request
//! and every executor callback funnels through one mutex-guarded state so
//! concurrent admissions are linearized: a request arriving while a goal is
//! active supersedes it (last writer wins, nothing is rejected as "busy"),
//! and updates from a superseded goal are recognized by goal id and dropped
//! before they can corrupt the successor's state.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use executor::{GoalCanceller, GoalHandle, GoalUpdate, MotionExecutor, TrajectoryGoal, Waypoint};
use shared::{
    domain::{validate_duration, FavoritePose, GoalId, JointVector, Pose, RobotState, SessionId},
    error::CommandError,
    protocol::{ClientRequest, Outbound, ServerEvent},
};
use storage::FavoritesStore;

mod poses;

pub use poses::{parse_pose_lines, PoseStore};

/// Whether a goal came from `move_to_position` or `execute_trajectory`;
/// decides which completion/error event family is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MotionKind {
    Single,
    Sequence,
}

struct ActiveGoal {
    id: GoalId,
    canceller: GoalCanceller,
    kind: MotionKind,
    final_positions: JointVector,
}

struct State {
    positions: JointVector,
    poses: PoseStore,
    active: Option<ActiveGoal>,
}

#[derive(Clone)]
pub struct Coordinator {
    state: Arc<Mutex<State>>,
    executor: Arc<dyn MotionExecutor>,
    favorites: FavoritesStore,
    events: broadcast::Sender<Outbound>,
}

impl Coordinator {
    pub fn new(
        executor: Arc<dyn MotionExecutor>,
        favorites: FavoritesStore,
        events: broadcast::Sender<Outbound>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                positions: JointVector::zeroed(),
                poses: PoseStore::new(),
                active: None,
            })),
            executor,
            favorites,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> RobotState {
        let state = self.state.lock().await;
        RobotState {
            positions: state.positions,
            is_moving: state.active.is_some(),
        }
    }

    pub async fn pose_list(&self) -> Vec<Pose> {
        self.state.lock().await.poses.poses().to_vec()
    }

    /// Entry point for every session request. Failures never escape; they
    /// are converted to an error event targeted at the requester.
    pub async fn handle(&self, origin: SessionId, request: ClientRequest) {
        match request {
            ClientRequest::UpdateJoint {
                joint_index,
                position,
            } => self.update_joint(origin, joint_index, position).await,
            ClientRequest::SaveConfiguration { duration } => {
                if let Err(error) = self.save_configuration(origin, duration).await {
                    self.emit(Outbound::only(
                        origin,
                        ServerEvent::PoseError {
                            error: error.into(),
                        },
                    ));
                }
            }
            ClientRequest::SaveConfigurationFromFav { name, values } => {
                if let Err(error) = self.save_configuration_from_fav(origin, &name, &values).await
                {
                    self.emit(Outbound::only(
                        origin,
                        ServerEvent::PoseError {
                            error: error.into(),
                        },
                    ));
                }
            }
            ClientRequest::MoveToPosition {
                positions,
                duration,
            } => {
                if let Err(error) = self.move_to_position(&positions, duration).await {
                    self.emit(Outbound::only(
                        origin,
                        ServerEvent::MovementError {
                            error: error.into(),
                        },
                    ));
                }
            }
            ClientRequest::ExecuteTrajectory { trajectory_points } => {
                if let Err(error) = self.execute_trajectory(&trajectory_points).await {
                    self.emit(Outbound::only(
                        origin,
                        ServerEvent::TrajectoryError {
                            error: error.into(),
                        },
                    ));
                }
            }
            ClientRequest::StopMovement => self.stop_movement().await,
            ClientRequest::SaveFavoritePose { name, values } => {
                if let Err(error) = self.save_favorite_pose(&name, &values).await {
                    self.emit(Outbound::only(
                        origin,
                        ServerEvent::FavoritePoseError {
                            error: error.into(),
                        },
                    ));
                }
            }
            ClientRequest::UpdateFavoritePoses {
                old_name,
                new_name,
                values,
            } => {
                if let Err(error) = self
                    .update_favorite_poses(&old_name, &new_name, &values)
                    .await
                {
                    self.emit(Outbound::only(
                        origin,
                        ServerEvent::FavoritePoseError {
                            error: error.into(),
                        },
                    ));
                }
            }
            ClientRequest::DeleteFavoritePose { name } => {
                if let Err(error) = self.delete_favorite_pose(&name).await {
                    self.emit(Outbound::only(
                        origin,
                        ServerEvent::FavoritePoseError {
                            error: error.into(),
                        },
                    ));
                }
            }
            ClientRequest::GetFavoritePoses => match self.favorites.list().await {
                Ok(favorites) => {
                    self.emit(Outbound::only(
                        origin,
                        ServerEvent::FavoritePoses { favorites },
                    ));
                }
                Err(error) => {
                    self.emit(Outbound::only(
                        origin,
                        ServerEvent::FavoritePoseError {
                            error: CommandError::Persistence(error.to_string()).into(),
                        },
                    ));
                }
            },
            ClientRequest::ReorderPose { index, direction } => {
                self.pose_list_op(origin, |poses| poses.reorder(index, direction))
                    .await;
            }
            ClientRequest::ReplacePose { index, values } => {
                let pose = match Pose::from_values(&values) {
                    Ok(pose) => pose,
                    Err(error) => {
                        self.emit(Outbound::only(
                            origin,
                            ServerEvent::PoseError {
                                error: error.into(),
                            },
                        ));
                        return;
                    }
                };
                self.pose_list_op(origin, |poses| poses.replace(index, pose))
                    .await;
            }
            ClientRequest::DeletePose { index } => {
                self.pose_list_op(origin, |poses| poses.delete(index).map(|_| ()))
                    .await;
            }
            ClientRequest::DeleteAllPoses => {
                self.pose_list_op(origin, |poses| {
                    poses.clear();
                    Ok(())
                })
                .await;
            }
        }
    }

    /// Low-level slider edit: no motion, out-of-range indices silently
    /// ignored, echoed to every session except the sender (which already
    /// applied the value locally).
    async fn update_joint(&self, origin: SessionId, joint_index: usize, position: f64) {
        let mut state = self.state.lock().await;
        if !state.positions.set(joint_index, position) {
            debug!(joint_index, "ignoring out-of-range joint update");
            return;
        }
        self.emit(Outbound::except(
            origin,
            ServerEvent::JointUpdated {
                joint_index,
                position,
            },
        ));
    }

    async fn save_configuration(
        &self,
        origin: SessionId,
        duration: f64,
    ) -> Result<(), CommandError> {
        let mut state = self.state.lock().await;
        let pose = Pose::new(state.positions, duration)?;
        state.poses.push(pose);
        self.emit(Outbound::only(
            origin,
            ServerEvent::ConfigurationSaved {
                positions: pose.positions,
            },
        ));
        self.broadcast_pose_list(&state);
        Ok(())
    }

    async fn save_configuration_from_fav(
        &self,
        origin: SessionId,
        name: &str,
        values: &[f64],
    ) -> Result<(), CommandError> {
        let favorite = FavoritePose::from_values(name, values)?;
        let mut state = self.state.lock().await;
        state.poses.push(favorite.pose);
        self.emit(Outbound::only(
            origin,
            ServerEvent::ConfigurationSavedFromFav {
                positions: favorite.pose.positions,
            },
        ));
        self.broadcast_pose_list(&state);
        Ok(())
    }

    async fn pose_list_op<F>(&self, origin: SessionId, op: F)
    where
        F: FnOnce(&mut PoseStore) -> Result<(), CommandError>,
    {
        let mut state = self.state.lock().await;
        match op(&mut state.poses) {
            Ok(()) => self.broadcast_pose_list(&state),
            Err(error) => {
                self.emit(Outbound::only(
                    origin,
                    ServerEvent::PoseError {
                        error: error.into(),
                    },
                ));
            }
        }
    }

    async fn move_to_position(
        &self,
        positions: &[f64],
        duration: f64,
    ) -> Result<(), CommandError> {
        let target = JointVector::from_slice(positions)?;
        validate_duration(duration)?;
        let waypoints = vec![Waypoint {
            positions: target,
            time_from_start_secs: duration,
        }];
        self.admit(waypoints, MotionKind::Single).await
    }

    async fn execute_trajectory(&self, points: &[Vec<f64>]) -> Result<(), CommandError> {
        if points.is_empty() {
            return Err(CommandError::Validation(
                "trajectory has no points".into(),
            ));
        }
        let mut waypoints = Vec::with_capacity(points.len());
        let mut elapsed = 0.0;
        for (index, point) in points.iter().enumerate() {
            let pose = Pose::from_values(point).map_err(|error| {
                CommandError::Validation(format!("trajectory point {index}: {error}"))
            })?;
            // Cumulative offset: waypoint i is reached at the sum of the
            // durations of points 0..=i.
            elapsed += pose.duration_secs;
            waypoints.push(Waypoint {
                positions: pose.positions,
                time_from_start_secs: elapsed,
            });
        }
        self.admit(waypoints, MotionKind::Sequence).await
    }

    /// Admission: linearized under the state lock. An active goal is
    /// superseded, not queued behind: its cancellation is fire-and-forget
    /// and the new goal is submitted without waiting for the cancel ack.
    async fn admit(
        &self,
        waypoints: Vec<Waypoint>,
        kind: MotionKind,
    ) -> Result<(), CommandError> {
        let final_positions = match waypoints.last() {
            Some(last) => last.positions,
            None => {
                return Err(CommandError::Validation("goal has no waypoints".into()));
            }
        };
        let goal = TrajectoryGoal {
            id: GoalId::new(),
            waypoints,
        };
        let goal_id = goal.id;

        let mut state = self.state.lock().await;
        if let Some(previous) = state.active.take() {
            debug!(superseded = %previous.id, new = %goal_id, "preempting active goal");
            previous.canceller.cancel();
        }

        let handle = match self.executor.submit(goal).await {
            Ok(handle) => handle,
            Err(error) => {
                warn!(%goal_id, %error, "goal submission failed");
                // The previous goal (if any) was already canceled; make sure
                // no session is left believing the robot is still moving.
                self.emit(Outbound::all(ServerEvent::RobotStatus {
                    is_moving: false,
                }));
                return Err(CommandError::Execution(error.to_string()));
            }
        };

        state.active = Some(ActiveGoal {
            id: goal_id,
            canceller: handle.canceller(),
            kind,
            final_positions,
        });
        self.emit(Outbound::all(ServerEvent::RobotStatus { is_moving: true }));
        drop(state);

        info!(%goal_id, ?kind, "goal admitted");
        self.spawn_drive(handle);
        Ok(())
    }

    /// Requests cancellation of the current goal; the transition to idle
    /// happens when the executor's `Canceled` lands, not here. A stop while
    /// idle is a silent no-op.
    async fn stop_movement(&self) {
        let state = self.state.lock().await;
        match &state.active {
            Some(active) => {
                info!(goal_id = %active.id, "stop requested");
                active.canceller.cancel();
            }
            None => debug!("stop requested while idle, ignoring"),
        }
    }

    async fn save_favorite_pose(&self, name: &str, values: &[f64]) -> Result<(), CommandError> {
        let favorite = FavoritePose::from_values(name, values)?;
        self.favorites
            .save(&favorite)
            .await
            .map_err(|error| CommandError::Persistence(error.to_string()))?;
        self.emit(Outbound::all(ServerEvent::FavoritePoseSaved {
            name: favorite.name,
            values: favorite.pose.to_values(),
        }));
        Ok(())
    }

    async fn update_favorite_poses(
        &self,
        old_name: &str,
        new_name: &str,
        values: &[f64],
    ) -> Result<(), CommandError> {
        let replacement = FavoritePose::from_values(new_name, values)?;
        let replaced = self
            .favorites
            .rename(old_name, &replacement)
            .await
            .map_err(|error| CommandError::Persistence(error.to_string()))?;
        if replaced == 0 {
            // Known quirk kept from the observed system: renaming a missing
            // favorite rewrites the store unchanged and reports success.
            debug!(old_name, "favorite rename matched nothing");
        }
        self.emit(Outbound::all(ServerEvent::FavoritePoseUpdated {
            new_name: replacement.name,
            values: replacement.pose.to_values(),
        }));
        Ok(())
    }

    async fn delete_favorite_pose(&self, name: &str) -> Result<(), CommandError> {
        self.favorites
            .delete(name)
            .await
            .map_err(|error| CommandError::Persistence(error.to_string()))?;
        self.emit(Outbound::all(ServerEvent::FavoritePoseDeleted {
            name: name.to_string(),
        }));
        Ok(())
    }

    /// Wholesale replacement of the pose list from the flat text format.
    pub async fn import_poses(&self, body: &str) -> Result<usize, CommandError> {
        let poses = parse_pose_lines(body)?;
        let count = poses.len();
        let mut state = self.state.lock().await;
        state.poses.replace_all(poses);
        self.broadcast_pose_list(&state);
        Ok(count)
    }

    pub async fn export_poses(&self) -> String {
        let state = self.state.lock().await;
        let mut out = String::new();
        for line in state.poses.export_lines() {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    fn broadcast_pose_list(&self, state: &State) {
        self.emit(Outbound::all(ServerEvent::PoseList {
            poses: state.poses.poses().to_vec(),
        }));
    }

    /// One task per admitted goal: consumes its update stream and applies
    /// each update under the state lock, where the goal id is checked so a
    /// superseded goal's late updates are discarded.
    fn spawn_drive(&self, handle: GoalHandle) {
        let coordinator = self.clone();
        let goal_id = handle.id();
        let mut updates = handle.into_updates();
        tokio::spawn(async move {
            let mut saw_terminal = false;
            while let Some(update) = updates.recv().await {
                let terminal = update.is_terminal();
                coordinator.apply_goal_update(goal_id, update).await;
                if terminal {
                    saw_terminal = true;
                    break;
                }
            }
            if !saw_terminal {
                // The executor dropped the stream without a terminal update.
                // Treat it as an abort so the state machine cannot wedge in
                // MOVING with no goal left to report.
                warn!(%goal_id, "goal update stream ended without terminal outcome");
                coordinator
                    .apply_goal_update(goal_id, GoalUpdate::Aborted("executor went away".into()))
                    .await;
            }
        });
    }

    async fn apply_goal_update(&self, goal_id: GoalId, update: GoalUpdate) {
        let mut state = self.state.lock().await;
        let matches_active = state
            .active
            .as_ref()
            .is_some_and(|active| active.id == goal_id);
        if !matches_active {
            debug!(%goal_id, ?update, "dropping update for superseded goal");
            return;
        }

        match update {
            GoalUpdate::Feedback(positions) => {
                state.positions = positions;
                self.emit(Outbound::all(ServerEvent::JointPositionsUpdate(positions)));
            }
            GoalUpdate::Succeeded => {
                let Some(active) = state.active.take() else {
                    return;
                };
                state.positions = active.final_positions;
                let event = match active.kind {
                    MotionKind::Single => ServerEvent::MovementCompleted {
                        positions: state.positions,
                        success: true,
                    },
                    MotionKind::Sequence => ServerEvent::TrajectoryCompleted {
                        positions: state.positions,
                        success: true,
                    },
                };
                info!(%goal_id, "goal succeeded");
                self.emit(Outbound::all(event));
                self.emit(Outbound::all(ServerEvent::RobotStatus {
                    is_moving: false,
                }));
            }
            GoalUpdate::Aborted(reason) => {
                let Some(active) = state.active.take() else {
                    return;
                };
                // Positions stay at the last feedback value, not rolled back.
                let error = CommandError::Execution(reason.clone()).into();
                let event = match active.kind {
                    MotionKind::Single => ServerEvent::MovementError { error },
                    MotionKind::Sequence => ServerEvent::TrajectoryError { error },
                };
                warn!(%goal_id, reason, "goal aborted");
                self.emit(Outbound::all(event));
                self.emit(Outbound::all(ServerEvent::RobotStatus {
                    is_moving: false,
                }));
            }
            GoalUpdate::Canceled => {
                state.active = None;
                info!(%goal_id, "goal canceled");
                self.emit(Outbound::all(ServerEvent::MovementStopped));
                self.emit(Outbound::all(ServerEvent::RobotStatus {
                    is_moving: false,
                }));
            }
        }
    }

    fn emit(&self, outbound: Outbound) {
        // Send fails only when no session is connected; that is fine.
        let _ = self.events.send(outbound);
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "tests/poses_tests.rs"]
mod poses_tests;
