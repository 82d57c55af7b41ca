//! Durable favorites repository.
//!
//! One favorite per line, `"<name>: v1, v2, ..., v12, duration"`, values at
//! three decimal places. Every mutation is a serialized read-modify-write of
//! the whole file committed by write-to-temp-then-rename, so concurrent
//! readers never observe a partial write.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::warn;

use shared::domain::{FavoritePose, Pose, JOINT_COUNT};

#[derive(Clone)]
pub struct FavoritesStore {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    // Serializes read-modify-write cycles; the atomic rename keeps readers
    // consistent, this keeps writers from losing each other's lines.
    write_lock: Mutex<()>,
}

impl FavoritesStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!(
                        "failed to create favorites directory '{}'",
                        parent.display()
                    )
                })?;
            }
        }
        Ok(Self {
            inner: Arc::new(Inner {
                path,
                write_lock: Mutex::new(()),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Parses the backing store. Malformed lines are skipped with a warning
    /// rather than failing the whole read; a missing file is an empty store.
    pub async fn list(&self) -> Result<Vec<FavoritePose>> {
        let raw = self.read_raw().await?;
        Ok(parse_store(&raw))
    }

    /// Appends one favorite. Duplicate names are permitted; `rename` and
    /// `delete` act on every line carrying the name.
    pub async fn save(&self, favorite: &FavoritePose) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        let mut raw = self.read_raw().await?;
        if !raw.is_empty() && !raw.ends_with('\n') {
            raw.push('\n');
        }
        raw.push_str(&format_line(favorite));
        raw.push('\n');
        self.commit(raw).await
    }

    /// Rewrites every line whose name matches `old_name` with the new
    /// favorite. No match is a silent no-op: the store is rewritten
    /// unchanged and no error is reported.
    pub async fn rename(&self, old_name: &str, replacement: &FavoritePose) -> Result<usize> {
        let _guard = self.inner.write_lock.lock().await;
        let raw = self.read_raw().await?;
        let mut replaced = 0;
        let lines: Vec<String> = raw
            .lines()
            .map(|line| {
                if line_name(line) == Some(old_name) {
                    replaced += 1;
                    format_line(replacement)
                } else {
                    line.to_string()
                }
            })
            .collect();
        self.commit(join_lines(lines)).await?;
        Ok(replaced)
    }

    /// Removes every line whose name matches. Returns how many were removed.
    pub async fn delete(&self, name: &str) -> Result<usize> {
        let _guard = self.inner.write_lock.lock().await;
        let raw = self.read_raw().await?;
        let mut removed = 0;
        let lines: Vec<String> = raw
            .lines()
            .filter(|line| {
                if line_name(line) == Some(name) {
                    removed += 1;
                    false
                } else {
                    true
                }
            })
            .map(str::to_string)
            .collect();
        self.commit(join_lines(lines)).await?;
        Ok(removed)
    }

    async fn read_raw(&self) -> Result<String> {
        match tokio::fs::read_to_string(&self.inner.path).await {
            Ok(raw) => Ok(raw),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(error) => Err(error).with_context(|| {
                format!("failed to read favorites file '{}'", self.inner.path.display())
            }),
        }
    }

    async fn commit(&self, contents: String) -> Result<()> {
        // Temp file in the same directory so the rename stays on one
        // filesystem and lands atomically.
        let tmp = self.inner.path.with_extension("txt.tmp");
        tokio::fs::write(&tmp, contents).await.with_context(|| {
            format!("failed to write favorites temp file '{}'", tmp.display())
        })?;
        tokio::fs::rename(&tmp, &self.inner.path)
            .await
            .with_context(|| {
                format!(
                    "failed to replace favorites file '{}'",
                    self.inner.path.display()
                )
            })
    }
}

fn join_lines(lines: Vec<String>) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

fn line_name(line: &str) -> Option<&str> {
    line.split_once(':').map(|(name, _)| name)
}

fn format_line(favorite: &FavoritePose) -> String {
    let values: Vec<String> = favorite
        .pose
        .to_values()
        .iter()
        .map(|v| format!("{v:.3}"))
        .collect();
    format!("{}: {}", favorite.name, values.join(", "))
}

fn parse_store(raw: &str) -> Vec<FavoritePose> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match parse_line(line) {
            Some(favorite) => Some(favorite),
            None => {
                warn!(line, "skipping malformed favorites line");
                None
            }
        })
        .collect()
}

fn parse_line(line: &str) -> Option<FavoritePose> {
    let (name, rest) = line.split_once(':')?;
    let values: Vec<f64> = rest
        .split(',')
        .map(|token| token.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if values.len() != JOINT_COUNT + 1 {
        return None;
    }
    let pose = Pose::from_values(&values).ok()?;
    FavoritePose::from_values(name, &pose.to_values()).ok()
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
