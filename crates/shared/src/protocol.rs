use serde::{Deserialize, Serialize};

use crate::{
    domain::{JointVector, Pose, SessionId},
    error::EventError,
};

fn default_save_duration() -> f64 {
    5.0
}

/// Requests a client session may send. Tagged exactly as the observed wire
/// traffic: snake_case event names, camelCase payload fields where the
/// original UI used them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    UpdateJoint {
        #[serde(rename = "jointIndex")]
        joint_index: usize,
        position: f64,
    },
    SaveConfiguration {
        #[serde(default = "default_save_duration")]
        duration: f64,
    },
    SaveConfigurationFromFav {
        name: String,
        values: Vec<f64>,
    },
    MoveToPosition {
        positions: Vec<f64>,
        duration: f64,
    },
    ExecuteTrajectory {
        #[serde(rename = "trajectoryPoints")]
        trajectory_points: Vec<Vec<f64>>,
    },
    StopMovement,
    SaveFavoritePose {
        name: String,
        values: Vec<f64>,
    },
    UpdateFavoritePoses {
        old_name: String,
        new_name: String,
        values: Vec<f64>,
    },
    DeleteFavoritePose {
        name: String,
    },
    GetFavoritePoses,
    ReorderPose {
        index: usize,
        direction: i32,
    },
    ReplacePose {
        index: usize,
        values: Vec<f64>,
    },
    DeletePose {
        index: usize,
    },
    DeleteAllPoses,
}

/// Events the server pushes to sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full vector snapshot, sent once on connect.
    JointPositions(JointVector),
    JointUpdated {
        #[serde(rename = "jointIndex")]
        joint_index: usize,
        position: f64,
    },
    RobotStatus {
        #[serde(rename = "isMoving")]
        is_moving: bool,
    },
    /// Executor-reported actual positions during an active goal.
    JointPositionsUpdate(JointVector),
    ConfigurationSaved {
        positions: JointVector,
    },
    ConfigurationSavedFromFav {
        positions: JointVector,
    },
    MovementCompleted {
        positions: JointVector,
        success: bool,
    },
    TrajectoryCompleted {
        positions: JointVector,
        success: bool,
    },
    MovementError {
        error: EventError,
    },
    TrajectoryError {
        error: EventError,
    },
    MovementStopped,
    FavoritePoseSaved {
        name: String,
        values: Vec<f64>,
    },
    FavoritePoseError {
        error: EventError,
    },
    FavoritePoseUpdated {
        new_name: String,
        values: Vec<f64>,
    },
    FavoritePoseDeleted {
        name: String,
    },
    FavoritePoses {
        favorites: Vec<crate::domain::FavoritePose>,
    },
    /// Authoritative ordered pose list, re-broadcast after every mutation.
    PoseList {
        poses: Vec<Pose>,
    },
    PoseError {
        error: EventError,
    },
}

/// Delivery audience for one broadcast event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    /// Everyone except the originating session (slider echoes).
    ExceptOrigin,
    /// The originating session only (acks and targeted errors).
    OriginOnly,
}

/// Envelope carried on the broadcast bus; each session's send task filters
/// by scope against its own id.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub origin: Option<SessionId>,
    pub scope: Scope,
    pub event: ServerEvent,
}

impl Outbound {
    pub fn all(event: ServerEvent) -> Self {
        Self {
            origin: None,
            scope: Scope::All,
            event,
        }
    }

    pub fn except(origin: SessionId, event: ServerEvent) -> Self {
        Self {
            origin: Some(origin),
            scope: Scope::ExceptOrigin,
            event,
        }
    }

    pub fn only(origin: SessionId, event: ServerEvent) -> Self {
        Self {
            origin: Some(origin),
            scope: Scope::OriginOnly,
            event,
        }
    }

    pub fn delivers_to(&self, session: SessionId) -> bool {
        match self.scope {
            Scope::All => true,
            Scope::ExceptOrigin => self.origin != Some(session),
            Scope::OriginOnly => self.origin == Some(session),
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
