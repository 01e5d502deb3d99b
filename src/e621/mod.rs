use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) mod fetcher;
pub(crate) mod filter;
pub(crate) mod history;
pub(crate) mod io;
pub(crate) mod query;
pub(crate) mod scheduler;
pub(crate) mod sender;

/// How many posts one page request asks for when the user has not set it.
pub(crate) const DEFAULT_BATCH_SIZE: u8 = 25;

/// Ceiling on retry-by-paging rounds within a single image search, the guard
/// against over-restrictive filters rejecting page after page.
pub(crate) const MAX_RECURSION_DEPTH: u32 = 10;

/// Ceiling on the page number the viewer will ever request.
pub(crate) const MAX_PAGES_TO_SEARCH: u16 = 100;

/// Fraction of the current batch that must be consumed before the next page
/// is speculatively fetched in the background.
pub(crate) const PREFETCH_THRESHOLD: f32 = 0.5;

/// Pause and page-visibility state, shared between the scheduler (which sets
/// it) and the fetcher (which aborts scans and skips prefetches on it). The
/// two axes are orthogonal: hiding the display does not pause playback, and
/// becoming visible again does not resume a paused show.
#[derive(Debug, Default)]
pub(crate) struct PlaybackFlags {
    paused: AtomicBool,
    hidden: AtomicBool,
}

impl PlaybackFlags {
    pub(crate) fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub(crate) fn hidden(&self) -> bool {
        self.hidden.load(Ordering::SeqCst)
    }

    pub(crate) fn set_hidden(&self, hidden: bool) {
        self.hidden.store(hidden, Ordering::SeqCst);
    }

    /// True when either axis suppresses fetching and display commits.
    pub(crate) fn suppressed(&self) -> bool {
        self.paused() || self.hidden()
    }
}
