pub mod check;
pub mod decide;
pub mod settings;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {what}: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid {what} JSON in {}", path.display()))
}
