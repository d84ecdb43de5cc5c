// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User persistence: a JSON snapshot replaced atomically on save.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::user::UserKind;

/// Persisted state for a single logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    pub server: String,
    #[serde(default)]
    pub is_admin: bool,
    pub kind: UserKind,
    /// Refresh token, or the static admin token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Load a persisted user from a JSON file.
pub fn load(path: &Path) -> Result<PersistedUser> {
    let contents = std::fs::read_to_string(path)?;
    let user: PersistedUser = serde_json::from_str(&contents)?;
    Ok(user)
}

/// Save a persisted user to a JSON file, replacing any previous one.
///
/// The file holds a refresh token, so it is written owner-only (0600 on
/// Unix). Readers see either the old or the new contents; the staging file
/// is removed if anything fails.
pub fn save(path: &Path, user: &PersistedUser) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let prefix = format!(".{}.", path.file_name().unwrap_or_default().to_string_lossy());
    // NamedTempFile is created 0600 and deleted on drop unless persisted.
    let mut staged = tempfile::Builder::new().prefix(&prefix).suffix(".tmp").tempfile_in(dir)?;
    serde_json::to_writer_pretty(staged.as_file_mut(), user)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
