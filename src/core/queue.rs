use std::collections::VecDeque;

use anyhow::{anyhow, bail};
use serde_json::Value;

use crate::models::download::{StoredItem, WorkItem};

/// Ordered FIFO of pending downloads. The at-most-one-downloading invariant
/// is enforced by the controller, which keeps the in-flight item *outside*
/// this sequence; `reinsert` is the only way back in.
#[derive(Debug, Default)]
pub struct DownloadQueue {
    list: VecDeque<WorkItem>,
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, item: WorkItem) {
        self.list.push_back(item);
    }

    pub fn dequeue_next(&mut self) -> Option<WorkItem> {
        self.list.pop_front()
    }

    pub fn has_next(&self) -> bool {
        !self.list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn get_by_id(&self, id: &str) -> Option<&WorkItem> {
        self.list.iter().find(|v| v.id == id)
    }

    /// Removes by identifier; a missing id is a no-op, not an error.
    pub fn remove(&mut self, id: &str) {
        if let Some(pos) = self.list.iter().position(|v| v.id == id) {
            self.list.remove(pos);
        }
    }

    /// Returns a failed or stopped item to the head of the queue so it is
    /// retried first. Never duplicates an id already present.
    pub fn reinsert(&mut self, item: WorkItem) {
        if self.list.iter().any(|v| v.id == item.id) {
            return;
        }
        self.list.push_front(item);
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> {
        self.list.iter()
    }

    /// Serializes the queue plus the in-flight item to the persisted state
    /// document: each item is an opaque JSON string, the downloading slot
    /// is the string "null" when idle.
    pub fn export_state(&self, downloading: Option<&WorkItem>) -> anyhow::Result<Value> {
        let mut downque = Vec::with_capacity(self.list.len());
        for item in &self.list {
            downque.push(Value::String(serde_json::to_string(&item.to_stored())?));
        }
        let downloading = match downloading {
            Some(item) => serde_json::to_string(&item.to_stored())?,
            None => "null".to_string(),
        };
        Ok(serde_json::json!({
            "downque": downque,
            "downloading": downloading,
        }))
    }

    /// Reconstructs a queue from a state document. The previously
    /// downloading item is re-inserted at the tail (no download survives a
    /// restart). Malformed entries are discarded silently; an invalid
    /// top-level structure is an error.
    pub fn import_state(json: &str) -> anyhow::Result<DownloadQueue> {
        let doc: Value =
            serde_json::from_str(json).map_err(|e| anyhow!("invalid state document: {}", e))?;
        let Some(entries) = doc.get("downque").and_then(Value::as_array) else {
            bail!("state document has no downque list");
        };

        let mut raw: Vec<&str> = entries.iter().filter_map(Value::as_str).collect();
        if let Some(downloading) = doc.get("downloading").and_then(Value::as_str) {
            raw.push(downloading);
        }

        let mut queue = DownloadQueue::new();
        for entry in raw {
            match serde_json::from_str::<StoredItem>(entry) {
                Ok(stored) if !stored.url.is_empty() => {
                    queue.enqueue(WorkItem::from_stored(stored));
                }
                _ => tracing::warn!("discarding malformed queue entry: {}", entry),
            }
        }
        Ok(queue)
    }
}
