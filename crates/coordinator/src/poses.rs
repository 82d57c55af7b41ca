//! In-memory ordered pose list with the flat text import/export format.

use shared::{
    domain::{Pose, JOINT_COUNT},
    error::CommandError,
};

#[derive(Debug, Default)]
pub struct PoseStore {
    poses: Vec<Pose>,
}

impl PoseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    pub fn push(&mut self, pose: Pose) {
        self.poses.push(pose);
    }

    /// Swaps a pose with its neighbour. `direction` is -1 (up) or +1 (down);
    /// anything landing out of bounds is an error, matching the list UI.
    pub fn reorder(&mut self, index: usize, direction: i32) -> Result<(), CommandError> {
        if !matches!(direction, -1 | 1) {
            return Err(CommandError::Validation(format!(
                "direction must be -1 or 1, got {direction}"
            )));
        }
        if index >= self.poses.len() {
            return Err(out_of_range(index, self.poses.len()));
        }
        let target = index as i64 + direction as i64;
        if target < 0 || target as usize >= self.poses.len() {
            return Err(out_of_range_target(target, self.poses.len()));
        }
        self.poses.swap(index, target as usize);
        Ok(())
    }

    pub fn replace(&mut self, index: usize, pose: Pose) -> Result<(), CommandError> {
        match self.poses.get_mut(index) {
            Some(slot) => {
                *slot = pose;
                Ok(())
            }
            None => Err(out_of_range(index, self.poses.len())),
        }
    }

    pub fn delete(&mut self, index: usize) -> Result<Pose, CommandError> {
        if index >= self.poses.len() {
            return Err(out_of_range(index, self.poses.len()));
        }
        Ok(self.poses.remove(index))
    }

    pub fn clear(&mut self) {
        self.poses.clear();
    }

    pub fn replace_all(&mut self, poses: Vec<Pose>) {
        self.poses = poses;
    }

    /// One comma-joined line per pose, values at three decimals, duration
    /// last. Round-trips through [`parse_pose_lines`].
    pub fn export_lines(&self) -> impl Iterator<Item = String> + '_ {
        self.poses.iter().map(|pose| {
            pose.to_values()
                .iter()
                .map(|v| format!("{v:.3}"))
                .collect::<Vec<_>>()
                .join(",")
        })
    }
}

fn out_of_range(index: usize, len: usize) -> CommandError {
    CommandError::Validation(format!("pose index {index} out of range (list has {len})"))
}

fn out_of_range_target(target: i64, len: usize) -> CommandError {
    CommandError::Validation(format!(
        "reorder target {target} out of range (list has {len})"
    ))
}

/// Parses an imported pose file: one pose per non-blank line, comma-separated
/// floats, the last field being the duration. Malformed or non-finite tokens
/// reject the whole import so NaN can never reach a motion command.
pub fn parse_pose_lines(body: &str) -> Result<Vec<Pose>, CommandError> {
    let mut poses = Vec::new();
    for (line_number, line) in body.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut values = Vec::with_capacity(JOINT_COUNT + 1);
        for token in line.split(',') {
            let value: f64 = token.trim().parse().map_err(|_| {
                CommandError::Validation(format!(
                    "line {}: '{}' is not a number",
                    line_number + 1,
                    token.trim()
                ))
            })?;
            if !value.is_finite() {
                return Err(CommandError::Validation(format!(
                    "line {}: non-finite value",
                    line_number + 1
                )));
            }
            values.push(value);
        }
        let pose = Pose::from_values(&values).map_err(|error| {
            CommandError::Validation(format!("line {}: {error}", line_number + 1))
        })?;
        poses.push(pose);
    }
    Ok(poses)
}
