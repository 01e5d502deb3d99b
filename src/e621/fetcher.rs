use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::e621::filter::{CandidateFilter, SkipCounts, Verdict};
use crate::e621::history::HistoryLog;
use crate::e621::query::{QueryBuilder, SearchSettings};
use crate::e621::sender::entries::PostEntry;
use crate::e621::sender::{RequestSender, SearchError};
use crate::e621::{MAX_PAGES_TO_SEARCH, MAX_RECURSION_DEPTH, PREFETCH_THRESHOLD, PlaybackFlags};

/// Where the fetcher gets its pages from. The production implementation is
/// [`RequestSender`]; tests inject an in-memory fixture. Clones are handed to
/// the detached prefetch task, hence the `Send + Sync + 'static` bounds.
pub(crate) trait PostsSource: Clone + Send + Sync + 'static {
    /// Fetches one page of posts for the given query.
    fn fetch_page(
        &self,
        query: &str,
        page: u16,
        limit: u8,
    ) -> impl Future<Output = Result<Vec<PostEntry>, SearchError>> + Send;
}

impl PostsSource for RequestSender {
    fn fetch_page(
        &self,
        query: &str,
        page: u16,
        limit: u8,
    ) -> impl Future<Output = Result<Vec<PostEntry>, SearchError>> + Send {
        let sender = self.clone();
        let query = query.to_string();
        async move { Ok(sender.bulk_search(&query, page, limit).await?.posts) }
    }
}

/// Outcome of one image search, normalized so the scheduler never sees an
/// error: transport failures, ceilings, and pause aborts all fold into
/// `NoResult`, while an empty first page keeps its own variant because the
/// UI surfaces it as an empty state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FetchOutcome {
    /// The file URL of an accepted post, already appended to the history.
    Image(String),
    /// Nothing admissible this round; the scheduler waits for the next tick.
    NoResult,
    /// The very first page of a fresh query was empty.
    NoImages,
}

/// Result of scanning the current batch for an admissible post.
enum BatchScan {
    Accepted { url: String, id: i64, score: i64 },
    /// Every remaining candidate was rejected.
    Exhausted,
    /// Playback was paused or the display hidden mid-scan.
    Aborted,
}

/// One page of API results cached for sequential consumption, plus at most
/// one speculatively fetched next page. Owned exclusively by the fetcher; the
/// recorded query string marks which filter configuration the pages belong
/// to, and every page fetched under a different query is worthless.
#[derive(Debug, Default)]
struct BatchCache {
    posts: Vec<PostEntry>,
    index: usize,
    page: u16,
    query: String,
    prefetched: Option<(Vec<PostEntry>, u16)>,
}

impl BatchCache {
    fn has_remaining(&self) -> bool {
        !self.posts.is_empty() && self.index < self.posts.len()
    }

    /// Whether a batch has been installed since the last reset.
    fn is_primed(&self) -> bool {
        !self.posts.is_empty()
    }

    fn consumed_ratio(&self) -> f32 {
        if self.posts.is_empty() {
            return 0.0;
        }
        self.index as f32 / self.posts.len() as f32
    }

    /// Repoints the cache at a different query, dropping every page that was
    /// fetched under the old one.
    fn reset(&mut self, query: &str) {
        self.posts.clear();
        self.index = 0;
        self.page = 1;
        self.query = query.to_string();
        self.prefetched = None;
    }

    /// Drops the current page and any speculative one but keeps the query.
    /// Used when a page yielded only rejections and the search moves on.
    fn clear_posts(&mut self) {
        self.posts.clear();
        self.index = 0;
        self.prefetched = None;
    }

    fn install(&mut self, posts: Vec<PostEntry>, page: u16) {
        self.posts = posts;
        self.index = 0;
        self.page = page;
    }

    /// Moves the speculative page into the current slot, if one is queued.
    fn promote_prefetch(&mut self) -> bool {
        match self.prefetched.take() {
            Some((posts, page)) => {
                self.install(posts, page);
                true
            }
            None => false,
        }
    }
}

/// The acquisition engine: serves the scheduler from the batch cache, pages
/// through the API when the cache runs dry, and keeps at most one speculative
/// prefetch in flight. All cache, history, and prefetch state lives here;
/// nothing about a session survives the fetcher.
pub(crate) struct Fetcher<S: PostsSource> {
    source: S,
    settings: SearchSettings,
    query_builder: QueryBuilder,
    filter: CandidateFilter,
    batch: BatchCache,
    history: HistoryLog,
    flags: Arc<PlaybackFlags>,
    /// Single-flight marker for the background prefetch task.
    prefetch: Option<JoinHandle<Option<(Vec<PostEntry>, u16)>>>,
}

impl<S: PostsSource> Fetcher<S> {
    pub(crate) fn new(source: S, settings: SearchSettings, flags: Arc<PlaybackFlags>) -> Self {
        Fetcher {
            filter: CandidateFilter::new(&settings),
            source,
            settings,
            query_builder: QueryBuilder::default(),
            batch: BatchCache::default(),
            history: HistoryLog::default(),
            flags,
            prefetch: None,
        }
    }

    pub(crate) fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub(crate) fn history_mut(&mut self) -> &mut HistoryLog {
        &mut self.history
    }

    /// Replaces the settings snapshot after the settings collaborator signaled
    /// a change (preset switch, settings save). Always invalidates the query
    /// memo; a batch-size change additionally drops all pagination state since
    /// the old page boundaries no longer line up with the new ones.
    pub(crate) fn apply_settings(&mut self, settings: SearchSettings) {
        let batch_size_changed = settings.batch_size != self.settings.batch_size;
        self.filter = CandidateFilter::new(&settings);
        self.settings = settings;
        self.query_builder.invalidate();
        if batch_size_changed {
            trace!("Batch size changed, dropping cached pages");
            self.prefetch = None;
            self.batch = BatchCache::default();
        }
    }

    /// Searches for the next admissible image URL.
    ///
    /// Serves from the cached batch when it has candidates left, promotes the
    /// prefetched page when the batch runs dry, and only then pages through
    /// the API. A page with no admissible post advances to the next page with
    /// a bumped depth counter; the page and depth ceilings keep that retry
    /// loop finite. Every failure is normalized here, nothing escapes.
    pub(crate) async fn next_image_url(&mut self) -> FetchOutcome {
        let mut depth: u32 = 0;
        let mut forced_page: Option<u16> = None;

        loop {
            let query = self.query_builder.build(&self.settings);
            if self.batch.query != query {
                trace!(
                    "Query changed, resetting batch cache (old: \"{}\", new: \"{query}\")",
                    self.batch.query
                );
                self.prefetch = None;
                self.batch.reset(&query);
                forced_page = None;
            }

            if !self.batch.has_remaining() {
                if self.batch.prefetched.is_none() {
                    self.settle_prefetch().await;
                }
                if self.batch.promote_prefetch() {
                    trace!(
                        "Promoted prefetched batch (page {}, {} posts)",
                        self.batch.page,
                        self.batch.posts.len()
                    );
                } else {
                    let page = forced_page.unwrap_or_else(|| {
                        if self.batch.is_primed() { self.batch.page + 1 } else { 1 }
                    });
                    forced_page = None;
                    if page > MAX_PAGES_TO_SEARCH {
                        error!("Max pages ({MAX_PAGES_TO_SEARCH}) reached, giving up this search");
                        return FetchOutcome::NoResult;
                    }
                    if depth > MAX_RECURSION_DEPTH {
                        error!("Max search depth ({MAX_RECURSION_DEPTH}) reached, giving up this search");
                        return FetchOutcome::NoResult;
                    }

                    trace!(
                        "Fetching page {page} (depth: {depth}, limit: {}, history size: {})",
                        self.settings.batch_size,
                        self.history.len()
                    );
                    match self.source.fetch_page(&query, page, self.settings.batch_size).await {
                        Ok(posts) if posts.is_empty() => {
                            return if page == 1 {
                                info!("The current filters matched no posts at all");
                                FetchOutcome::NoImages
                            } else {
                                trace!("Page {page} came back empty, pagination exhausted");
                                FetchOutcome::NoResult
                            };
                        }
                        Ok(posts) => {
                            trace!("Received {} posts for page {page}", posts.len());
                            self.batch.install(posts, page);
                        }
                        Err(err) => {
                            error!("Failed to fetch page {page}: {err}");
                            return FetchOutcome::NoResult;
                        }
                    }
                }
            }

            match self.scan_batch() {
                BatchScan::Accepted { url, id, score } => {
                    trace!("Accepted post {id} (score: {score})");
                    self.history.append(url.clone(), id);
                    if self.batch.consumed_ratio() >= PREFETCH_THRESHOLD {
                        self.maybe_spawn_prefetch();
                    }
                    return FetchOutcome::Image(url);
                }
                BatchScan::Aborted => {
                    trace!("Search aborted, playback paused or display hidden");
                    return FetchOutcome::NoResult;
                }
                BatchScan::Exhausted => {
                    let next_page = self.batch.page + 1;
                    trace!(
                        "No admissible post on page {}, advancing to page {next_page}",
                        self.batch.page
                    );
                    self.prefetch = None;
                    self.batch.clear_posts();
                    depth += 1;
                    forced_page = Some(next_page);
                }
            }
        }
    }

    /// Scans the current batch from its consumption index for the first
    /// admissible post. The index is only advanced on an acceptance, so a
    /// paused scan resumes exactly where it left off.
    fn scan_batch(&mut self) -> BatchScan {
        let mut skipped = SkipCounts::default();
        let start = self.batch.index;

        for i in start..self.batch.posts.len() {
            if self.flags.suppressed() {
                trace!("Scan aborted at index {i}");
                return BatchScan::Aborted;
            }
            match self.filter.judge(&self.batch.posts[i], self.history.seen()) {
                Verdict::Accept => {
                    let post = &self.batch.posts[i];
                    // judge never accepts a post without a file URL
                    let url = post.file.url.clone().unwrap();
                    let id = post.id;
                    let score = post.score.total;
                    self.batch.index = i + 1;
                    if skipped.total() > 0 {
                        trace!("Skipped {} posts before accepting ({skipped})", skipped.total());
                    }
                    return BatchScan::Accepted { url, id, score };
                }
                Verdict::Skip(reason) => {
                    trace!("Post {} skipped: {reason:?}", self.batch.posts[i].id);
                    skipped.bump(reason);
                }
            }
        }

        if self.flags.suppressed() {
            return BatchScan::Aborted;
        }
        trace!(
            "Scanned {} candidates without a match ({skipped})",
            self.batch.posts.len() - start
        );
        BatchScan::Exhausted
    }

    /// Fires the speculative fetch of the next page. At most one prefetch is
    /// ever outstanding; its failures are logged and swallowed, never
    /// propagated to the foreground search.
    fn maybe_spawn_prefetch(&mut self) {
        if self.prefetch.is_some() || self.batch.prefetched.is_some() {
            return;
        }
        if self.flags.suppressed() {
            return;
        }
        if !self.batch.is_primed() || self.batch.query.is_empty() {
            return;
        }

        let source = self.source.clone();
        let query = self.batch.query.clone();
        let page = self.batch.page + 1;
        let limit = self.settings.batch_size;
        trace!("Prefetching page {page} in the background (limit: {limit})");
        self.prefetch = Some(tokio::spawn(async move {
            match source.fetch_page(&query, page, limit).await {
                Ok(posts) => {
                    trace!("Prefetch of page {page} finished with {} posts", posts.len());
                    Some((posts, page))
                }
                Err(err) => {
                    warn!("Prefetch of page {page} failed: {err}");
                    None
                }
            }
        }));
    }

    /// Waits for the outstanding prefetch and queues its result. Only called
    /// once the current batch has run dry, at which point the awaited page is
    /// exactly the one needed next; an empty or failed result is dropped and
    /// the regular fetch path takes over.
    async fn settle_prefetch(&mut self) {
        let Some(handle) = self.prefetch.take() else {
            return;
        };
        match handle.await {
            Ok(Some((posts, page))) if !posts.is_empty() => {
                if self.batch.prefetched.is_none() {
                    self.batch.prefetched = Some((posts, page));
                }
            }
            Ok(_) => {}
            Err(err) => warn!("Prefetch task failed: {err}"),
        }
    }
}
