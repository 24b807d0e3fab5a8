// Session files - the connected account and the cart, stored as JSON under ~/.docmarket/

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use docmarket_core::Cart;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SESSION_FILE: &str = "session.json";
const CART_FILE: &str = "cart.json";

/// What `wallet connect` remembers between invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSession {
    pub account: String,
    pub chain_id: String,
    pub connected_at: DateTime<Utc>,
}

/// Get the default state directory path (~/.docmarket/)
///
/// `DOCMARKET_HOME` overrides the location.
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("DOCMARKET_HOME") {
        return Ok(PathBuf::from(dir));
    }

    #[cfg(unix)]
    let home = std::env::var("HOME")
        .map_err(|_| anyhow::anyhow!("HOME environment variable not set"))?;

    #[cfg(windows)]
    let home = std::env::var("USERPROFILE")
        .map_err(|_| anyhow::anyhow!("USERPROFILE environment variable not set"))?;

    Ok(PathBuf::from(home).join(".docmarket"))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse '{}'", path.display()))?;
    Ok(Some(value))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(path, &json)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(path, &json)?;
    }

    Ok(())
}

pub fn load_session(dir: &Path) -> Result<Option<SavedSession>> {
    read_json(&dir.join(SESSION_FILE))
}

pub fn save_session(dir: &Path, session: &SavedSession) -> Result<()> {
    write_json(&dir.join(SESSION_FILE), session)
}

/// Removes the session file. Missing files are fine.
pub fn clear_session(dir: &Path) -> Result<()> {
    let path = dir.join(SESSION_FILE);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove '{}'", path.display())),
    }
}

/// Loads the cart, or an empty one when none has been saved.
pub fn load_cart(dir: &Path) -> Result<Cart> {
    Ok(read_json(&dir.join(CART_FILE))?.unwrap_or_default())
}

pub fn save_cart(dir: &Path, cart: &Cart) -> Result<()> {
    write_json(&dir.join(CART_FILE), cart)
}
