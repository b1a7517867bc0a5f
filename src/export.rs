//! CSV export of persisted events.

use anyhow::Result;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::debug;

use crate::diff::Event;

/// Appends events as CSV rows to `path`, writing the header only when
/// the file does not exist yet.
pub fn append_events(path: &Path, events: &[Event]) -> Result<usize> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, rows = events.len(), "Appending CSV rows");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for event in events {
        writer.serialize(event)?;
    }
    writer.flush()?;

    Ok(events.len())
}
