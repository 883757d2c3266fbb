//! Engine configuration.

/// Bytes at the front of every page reserved for the pageLSN.
pub const PAGE_HEADER_SIZE: usize = 8;

/// Configuration shared by the log and recovery managers.
#[derive(Debug, Clone)]
pub struct Config {
    /// Size of a disk page in bytes, header included.
    pub page_size: usize,

    /// Largest payload one end-checkpoint record may carry.
    pub checkpoint_record_budget: usize,

    /// Whether to force the log after every append.
    pub flush_on_append: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: 4096,
            checkpoint_record_budget: 4096 - PAGE_HEADER_SIZE,
            flush_on_append: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the end-checkpoint payload budget.
    #[must_use]
    pub const fn checkpoint_record_budget(mut self, budget: usize) -> Self {
        self.checkpoint_record_budget = budget;
        self
    }

    /// Sets whether every append is flushed.
    #[must_use]
    pub const fn flush_on_append(mut self, value: bool) -> Self {
        self.flush_on_append = value;
        self
    }

    /// Bytes of a page available to callers.
    #[must_use]
    pub const fn effective_page_size(&self) -> usize {
        self.page_size - PAGE_HEADER_SIZE
    }

    /// Writes longer than this are logged as an undo-only/redo-only pair.
    #[must_use]
    pub const fn max_single_record_write(&self) -> usize {
        self.effective_page_size() / 2
    }
}
