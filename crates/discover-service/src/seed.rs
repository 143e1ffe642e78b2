//! Loading of seed events at startup.

use anyhow::{Context, Result};
use discover_core::{EventPayload, EventStore};
use std::path::Path;
use tracing::info;

/// Parse a JSON-lines document into event payloads
///
/// Blank lines are skipped. Line numbers in errors are 1-based.
pub fn parse_events(content: &str) -> Result<Vec<EventPayload>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| format!("invalid event on line {}", index + 1))
        })
        .collect()
}

/// Insert every event of a JSON-lines file into the store
pub async fn seed_store(store: &dyn EventStore, path: &Path) -> Result<usize> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read seed file {}", path.display()))?;

    let events = parse_events(&content)?;
    let inserted = store
        .insert(events)
        .await
        .with_context(|| format!("failed to store events from {}", path.display()))?;

    info!(path = %path.display(), events = inserted, "Seeded event store");
    Ok(inserted)
}

#[cfg(test)]
#[path = "seed_tests.rs"]
mod tests;
