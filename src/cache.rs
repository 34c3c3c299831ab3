//! Process-lifetime store for converted documents, served back in
//! fixed-size character windows.
//!
//! Tool responses are size-limited, so `read_as_markdown` stores its output
//! here and hands the caller an id; `get_markdown_segment` walks the entry
//! with `offset`/`next_offset` until `has_more` is false.
//!
//! Entries are write-once. Ids have the form `markdown_{n}` with `n` drawn
//! from a monotonic counter, so an id is never reused within a process.

use crate::config::SEGMENT_LENGTH;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

#[derive(Debug)]
struct Entry {
    seq: u64,
    content: Arc<str>,
    chars: usize,
}

/// Receipt for a stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    pub id: String,
    pub total_chars: usize,
}

impl Stored {
    /// Size in KiB of characters, rounded to two decimals.
    pub fn total_kb(&self) -> f64 {
        (self.total_chars as f64 / 1024.0 * 100.0).round() / 100.0
    }
}

/// One window of a cached entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub cache_id: String,
    pub segment: String,
    pub offset: usize,
    /// Characters in `segment`.
    pub length: usize,
    pub total_length: usize,
    pub has_more: bool,
    pub next_offset: Option<usize>,
    pub progress: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    #[error("Cache not found: {id}")]
    NotFound { id: String, available: Vec<String> },

    #[error("Offset {offset} is beyond content length {total}")]
    OutOfRange { offset: usize, total: usize },
}

/// Append-only, id-addressed text store.
#[derive(Debug)]
pub struct SegmentCache {
    entries: RwLock<HashMap<String, Entry>>,
    next_seq: AtomicU64,
    segment_length: usize,
}

impl Default for SegmentCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentCache {
    pub fn new() -> Self {
        Self::with_segment_length(SEGMENT_LENGTH)
    }

    /// Cache serving windows of `length` characters (at least 1).
    pub fn with_segment_length(length: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            segment_length: length.max(1),
        }
    }

    pub fn segment_length(&self) -> usize {
        self.segment_length
    }

    /// Store `content` under a fresh id.
    pub fn store(&self, content: impl Into<String>) -> Stored {
        let content: String = content.into();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("markdown_{seq}");
        let chars = content.chars().count();

        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.insert(
            id.clone(),
            Entry {
                seq,
                content: Arc::from(content),
                chars,
            },
        );
        debug!("Cached {id}: {chars} chars");

        Stored {
            id,
            total_chars: chars,
        }
    }

    /// Ids currently held, oldest first.
    pub fn ids(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let mut ids: Vec<(u64, &String)> = entries.iter().map(|(id, e)| (e.seq, id)).collect();
        ids.sort_unstable_by_key(|(seq, _)| *seq);
        ids.into_iter().map(|(_, id)| id.clone()).collect()
    }

    /// Window of `id` starting at character `offset`.
    ///
    /// An empty entry answers offset 0 with an empty final segment; any other
    /// offset at or past the end is out of range.
    pub fn fetch(&self, id: &str, offset: usize) -> Result<Segment, SegmentError> {
        let found = {
            let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
            entries
                .get(id)
                .map(|entry| (Arc::clone(&entry.content), entry.chars))
        };
        let Some((content, total)) = found else {
            return Err(SegmentError::NotFound {
                id: id.to_string(),
                available: self.ids(),
            });
        };

        if offset >= total && !(offset == 0 && total == 0) {
            return Err(SegmentError::OutOfRange { offset, total });
        }

        let segment: String = content
            .chars()
            .skip(offset)
            .take(self.segment_length)
            .collect();
        let length = segment.chars().count();
        let end = (offset + self.segment_length).min(total);
        let has_more = offset + self.segment_length < total;

        Ok(Segment {
            cache_id: id.to_string(),
            segment,
            offset,
            length,
            total_length: total,
            has_more,
            next_offset: has_more.then_some(offset + self.segment_length),
            progress: format!("{end}/{total} characters"),
        })
    }
}
