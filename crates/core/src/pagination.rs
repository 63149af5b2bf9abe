//! Pagination of oversized tool results.
//!
//! A result longer than the page size is stored whole under a short opaque id
//! and only its first page goes back to the model, followed by a hint telling
//! it how to fetch the next one. Pages are fixed-size character slices of the
//! stored text, so any page can be re-derived from the text alone.

use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Default page size, roughly 7,500 tokens.
pub const DEFAULT_MAX_RESULT_CHARS: usize = 30_000;

/// Errors from [`ResultPages::read`]. Reported to the model as text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaginationError {
    #[error("Result id \"{0}\" does not exist or has expired")]
    UnknownResult(String),

    #[error("Page {page} is out of range (this result has {total_pages} pages, use 1-{total_pages})")]
    PageOutOfRange { page: usize, total_pages: usize },
}

/// Store of paginated results, private to one tool registry.
#[derive(Debug)]
pub struct ResultPages {
    max_chars: usize,
    capacity: Option<usize>,
    entries: HashMap<String, String>,
    order: VecDeque<String>,
    last_result_id: Option<String>,
}

impl ResultPages {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
            capacity: None,
            entries: HashMap::new(),
            order: VecDeque::new(),
            last_result_id: None,
        }
    }

    /// Keep at most `capacity` results, evicting the oldest first.
    pub fn with_capacity(mut self, capacity: Option<usize>) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Whether `text` is too long to return in one piece.
    pub fn needs_pagination(&self, text: &str) -> bool {
        text.chars().count() > self.max_chars
    }

    /// Store `text` and return its first page with a continuation hint.
    pub fn paginate(&mut self, text: String) -> String {
        let result_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let total_chars = text.chars().count();
        let total_pages = self.total_pages(total_chars);
        let first_page = char_slice(&text, 0, self.max_chars).to_string();

        self.entries.insert(result_id.clone(), text);
        self.order.push_back(result_id.clone());
        self.last_result_id = Some(result_id.clone());
        self.evict();

        info!(
            result_id = %result_id,
            total_chars,
            total_pages,
            "Tool result paginated"
        );

        format!(
            "{first_page}\n\n[1/{total_pages}] Output truncated. Call read_more(result_id=\"{result_id}\", page=2) for the next page."
        )
    }

    /// Return page `page` (1-indexed) of a stored result.
    pub fn read(&self, result_id: &str, page: usize) -> Result<String, PaginationError> {
        let text = self
            .entries
            .get(result_id)
            .ok_or_else(|| PaginationError::UnknownResult(result_id.to_string()))?;

        let total_pages = self.total_pages(text.chars().count());
        if page < 1 || page > total_pages {
            return Err(PaginationError::PageOutOfRange { page, total_pages });
        }

        let content = char_slice(text, (page - 1) * self.max_chars, self.max_chars);
        if page == total_pages {
            return Ok(format!("{content}\n\n[{page}/{total_pages}] (last page)"));
        }

        let next = page + 1;
        Ok(format!(
            "{content}\n\n[{page}/{total_pages}] Call read_more(result_id=\"{result_id}\", page={next}) for the next page."
        ))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_result_id(&self) -> Option<&str> {
        self.last_result_id.as_deref()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.last_result_id = None;
        debug!("Paginated results cleared");
    }

    fn total_pages(&self, total_chars: usize) -> usize {
        total_chars.div_ceil(self.max_chars)
    }

    fn evict(&mut self) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while self.entries.len() > capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            debug!(result_id = %oldest, "Evicted paginated result");
        }
    }
}

/// Slice `len` characters starting at character `start`, on char boundaries.
fn char_slice(text: &str, start: usize, len: usize) -> &str {
    let mut indices = text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len()));
    let Some(begin) = indices.nth(start) else {
        return "";
    };
    let end = if len == 0 {
        begin
    } else {
        indices.nth(len - 1).unwrap_or(text.len())
    };
    &text[begin..end]
}
