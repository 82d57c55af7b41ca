use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CommandError;

/// Number of independently actuated joints on the mechanism.
pub const JOINT_COUNT: usize = 12;

/// Upper bound on a single pose duration, seconds. Durations live in (0, 60].
pub const MAX_POSE_DURATION_SECS: f64 = 60.0;

macro_rules! uuid_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_newtype!(GoalId);
uuid_newtype!(SessionId);

/// All twelve joint positions, index-addressed. Serializes as a bare JSON
/// array so the wire shape matches what the sliders send and receive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointVector(pub [f64; JOINT_COUNT]);

impl JointVector {
    pub fn zeroed() -> Self {
        Self([0.0; JOINT_COUNT])
    }

    pub fn from_slice(values: &[f64]) -> Result<Self, CommandError> {
        if values.len() != JOINT_COUNT {
            return Err(CommandError::Validation(format!(
                "expected {JOINT_COUNT} joint positions, got {}",
                values.len()
            )));
        }
        let mut positions = [0.0; JOINT_COUNT];
        positions.copy_from_slice(values);
        Ok(Self(positions))
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.0.get(index).copied()
    }

    /// Writes one joint slot. Out-of-range indices are reported as `false`
    /// and leave the vector untouched.
    pub fn set(&mut self, index: usize, value: f64) -> bool {
        match self.0.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Validates a pose duration against the (0, 60] second invariant.
pub fn validate_duration(duration_secs: f64) -> Result<(), CommandError> {
    if !duration_secs.is_finite()
        || duration_secs <= 0.0
        || duration_secs > MAX_POSE_DURATION_SECS
    {
        return Err(CommandError::Validation(format!(
            "duration must be in (0, {MAX_POSE_DURATION_SECS}] seconds, got {duration_secs}"
        )));
    }
    Ok(())
}

/// A complete joint target plus the time allotted to reach it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub positions: JointVector,
    #[serde(rename = "duration")]
    pub duration_secs: f64,
}

impl Pose {
    pub fn new(positions: JointVector, duration_secs: f64) -> Result<Self, CommandError> {
        validate_duration(duration_secs)?;
        Ok(Self {
            positions,
            duration_secs,
        })
    }

    /// Parses the flat `[v1, .., v12, duration]` shape used by favorites and
    /// trajectory points.
    pub fn from_values(values: &[f64]) -> Result<Self, CommandError> {
        if values.len() != JOINT_COUNT + 1 {
            return Err(CommandError::Validation(format!(
                "expected {} values (positions plus duration), got {}",
                JOINT_COUNT + 1,
                values.len()
            )));
        }
        let positions = JointVector::from_slice(&values[..JOINT_COUNT])?;
        Self::new(positions, values[JOINT_COUNT])
    }

    pub fn to_values(&self) -> Vec<f64> {
        let mut values = self.positions.as_slice().to_vec();
        values.push(self.duration_secs);
        values
    }
}

/// A durably persisted, named pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoritePose {
    pub name: String,
    #[serde(flatten)]
    pub pose: Pose,
}

impl FavoritePose {
    pub fn from_values(name: &str, values: &[f64]) -> Result<Self, CommandError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CommandError::Validation(
                "favorite pose name cannot be empty".into(),
            ));
        }
        // ':' is the name/values separator in the store file; a name
        // containing it would persist as a different, unmatchable name.
        if name.contains(':') {
            return Err(CommandError::Validation(
                "favorite pose name cannot contain ':'".into(),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            pose: Pose::from_values(values)?,
        })
    }
}

/// Snapshot of the authoritative robot state pushed to connecting sessions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub positions: JointVector,
    #[serde(rename = "isMoving")]
    pub is_moving: bool,
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
