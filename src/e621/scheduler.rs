use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::e621::PlaybackFlags;
use crate::e621::fetcher::{FetchOutcome, Fetcher, PostsSource};
use crate::e621::query::SearchSettings;
use crate::e621::sender::SearchError;

/// The image behind an accepted URL could not be loaded.
#[derive(Debug, Error)]
#[error("failed to load image: {0}")]
pub(crate) struct ImageLoadError(#[from] pub(crate) SearchError);

/// Where accepted images end up. The production implementation preloads over
/// the network and prints to the terminal; tests record what was shown.
/// `show` must be infallible since the URL was already preloaded.
pub(crate) trait ImageSink {
    /// Loads the image bytes before the display commit, so a slow or broken
    /// URL never blanks the screen.
    fn preload(&mut self, url: &str) -> impl Future<Output = Result<(), ImageLoadError>> + Send;
    fn show(&mut self, url: &str);
    fn show_empty_state(&mut self);
    fn clear_empty_state(&mut self);
}

/// User intents delivered from the input thread.
#[derive(Debug, Clone)]
pub(crate) enum Command {
    TogglePause,
    Next,
    Previous,
    SetHidden(bool),
    /// A preset switch or settings save: the new search snapshot plus the
    /// refresh interval that goes with it.
    ApplySettings(SearchSettings, Duration),
    Quit,
}

/// Owns the playback loop: fires a search every refresh interval, commits the
/// result to the display, and handles user commands in between. Ticks and
/// commands interleave cooperatively on one task, so a command never observes
/// a half-finished tick.
pub(crate) struct Scheduler<S: PostsSource, D: ImageSink> {
    fetcher: Fetcher<S>,
    display: D,
    flags: Arc<PlaybackFlags>,
    commands: flume::Receiver<Command>,
    refresh_rate: Duration,
    /// Reentrancy guard so navigation commands cannot start a second search.
    searching: bool,
    first_image_loaded: bool,
}

impl<S: PostsSource, D: ImageSink> Scheduler<S, D> {
    pub(crate) fn new(
        fetcher: Fetcher<S>,
        display: D,
        flags: Arc<PlaybackFlags>,
        commands: flume::Receiver<Command>,
        refresh_rate: Duration,
    ) -> Self {
        Scheduler {
            fetcher,
            display,
            flags,
            commands,
            refresh_rate,
            searching: false,
            first_image_loaded: false,
        }
    }

    /// Runs until a quit command arrives or every command sender is gone.
    /// The tick timer is disarmed while playback is suppressed and re-armed
    /// from scratch by whichever command lifts the suppression.
    pub(crate) async fn run(mut self) {
        info!("Playback started (refresh every {:?})", self.refresh_rate);
        self.tick(false).await;
        let mut next_tick = Instant::now() + self.refresh_rate;
        let commands = self.commands.clone();

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_tick), if !self.flags.suppressed() => {
                    self.tick(false).await;
                    next_tick = Instant::now() + self.refresh_rate;
                }
                command = commands.recv_async() => {
                    match command {
                        Ok(Command::Quit) | Err(_) => {
                            info!("Playback stopped");
                            return;
                        }
                        Ok(command) => {
                            if self.handle_command(command).await {
                                next_tick = Instant::now() + self.refresh_rate;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Applies one command. Returns whether the tick timer should restart.
    async fn handle_command(&mut self, command: Command) -> bool {
        trace!("Handling command {command:?}");
        match command {
            Command::TogglePause => {
                if self.flags.paused() {
                    self.unpause(false).await
                } else {
                    self.pause();
                    false
                }
            }
            Command::Next => self.next_image().await,
            Command::Previous => self.previous_image(),
            Command::SetHidden(hidden) => self.set_hidden(hidden).await,
            Command::ApplySettings(settings, refresh_rate) => {
                info!("Search settings changed, refresh every {refresh_rate:?}");
                self.fetcher.apply_settings(settings);
                self.refresh_rate = refresh_rate;
                if !self.flags.suppressed() {
                    self.tick(false).await;
                }
                true
            }
            Command::Quit => unreachable!("quit is handled by the run loop"),
        }
    }

    /// One playback round: search, preload, commit. A suppression that lands
    /// while the preload is in flight discards the commit but keeps the
    /// history entry, so resuming continues from the same spot.
    async fn tick(&mut self, skip_search: bool) {
        if skip_search || self.searching {
            return;
        }
        self.searching = true;

        match self.fetcher.next_image_url().await {
            FetchOutcome::Image(url) => match self.display.preload(&url).await {
                Ok(()) => {
                    if self.flags.suppressed() {
                        trace!("Playback suppressed during preload, not committing {url}");
                    } else {
                        self.display.clear_empty_state();
                        self.display.show(&url);
                        self.fetcher.history_mut().reset_cursor();
                        self.first_image_loaded = true;
                    }
                }
                Err(err) => warn!("Dropping {url}: {err}"),
            },
            FetchOutcome::NoImages => {
                warn!("The current filters matched nothing, showing the empty state");
                self.display.show_empty_state();
            }
            FetchOutcome::NoResult => trace!("No image this round"),
        }

        self.searching = false;
    }

    fn pause(&mut self) {
        self.flags.set_paused(true);
        self.searching = false;
        info!("Playback paused");
    }

    /// Resumes playback with an immediate round unless `skip_search`. Refused
    /// while a search is running so the guard flag is not clobbered.
    async fn unpause(&mut self, skip_search: bool) -> bool {
        if self.searching {
            trace!("Unpause ignored while a search is running");
            return false;
        }
        self.flags.set_paused(false);
        info!("Playback resumed");
        self.tick(skip_search).await;
        true
    }

    /// Steps back through the history. Navigating backward always pauses,
    /// since an automatic advance would immediately yank the user forward.
    fn previous_image(&mut self) -> bool {
        if !self.flags.paused() {
            self.pause();
        }
        if let Some(url) = self.fetcher.history_mut().go_back().map(str::to_string) {
            self.display.show(&url);
        }
        false
    }

    /// Steps forward through the history, resuming playback once the newest
    /// entry is on screen again. From the newest entry this is a plain resume
    /// with a fresh search.
    async fn next_image(&mut self) -> bool {
        if self.fetcher.history().at_newest() {
            return self.unpause(false).await;
        }
        if let Some(url) = self.fetcher.history_mut().go_forward().map(str::to_string) {
            self.display.show(&url);
        }
        if self.fetcher.history().at_newest() {
            // back at the live edge, resume without burning a search on it
            return self.unpause(true).await;
        }
        false
    }

    /// Tracks display visibility. Becoming visible re-arms the timer and, if
    /// nothing was ever shown, searches right away instead of waiting out a
    /// full interval in front of a blank screen.
    async fn set_hidden(&mut self, hidden: bool) -> bool {
        self.flags.set_hidden(hidden);
        if hidden {
            trace!("Display hidden, playback suspended");
            return false;
        }
        trace!("Display visible again");
        if self.flags.paused() {
            return false;
        }
        if !self.first_image_loaded {
            self.tick(false).await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::e621::DEFAULT_BATCH_SIZE;
    use crate::e621::sender::entries::{FileEntry, PostEntry, ScoreEntry};

    #[derive(Clone, Default)]
    struct PageSource {
        pages: Arc<Mutex<HashMap<u16, Vec<PostEntry>>>>,
    }

    impl PostsSource for PageSource {
        fn fetch_page(
            &self,
            _query: &str,
            page: u16,
            _limit: u8,
        ) -> impl Future<Output = Result<Vec<PostEntry>, SearchError>> + Send {
            let pages = self.pages.clone();
            async move { Ok(pages.lock().unwrap().get(&page).cloned().unwrap_or_default()) }
        }
    }

    #[derive(Default)]
    struct SinkState {
        shown: Vec<String>,
        empty_state: bool,
        pause_on_preload: Option<Arc<PlaybackFlags>>,
    }

    /// Records display commits; optionally flips the pause flag during the
    /// preload to model input landing mid-download.
    #[derive(Clone, Default)]
    struct RecordingSink {
        state: Arc<Mutex<SinkState>>,
    }

    impl ImageSink for RecordingSink {
        fn preload(&mut self, _url: &str) -> impl Future<Output = Result<(), ImageLoadError>> + Send {
            let state = self.state.clone();
            async move {
                if let Some(flags) = &state.lock().unwrap().pause_on_preload {
                    flags.set_paused(true);
                }
                Ok(())
            }
        }

        fn show(&mut self, url: &str) {
            self.state.lock().unwrap().shown.push(url.to_string());
        }

        fn show_empty_state(&mut self) {
            self.state.lock().unwrap().empty_state = true;
        }

        fn clear_empty_state(&mut self) {
            self.state.lock().unwrap().empty_state = false;
        }
    }

    fn post(id: i64) -> PostEntry {
        PostEntry {
            id,
            file: FileEntry {
                url: Some(format!("https://static1/{id}.png")),
            },
            tags: Default::default(),
            score: ScoreEntry { total: 1 },
        }
    }

    fn settings() -> SearchSettings {
        SearchSettings {
            allowed_filetypes: vec![".png".to_string()],
            batch_size: DEFAULT_BATCH_SIZE,
            ..SearchSettings::default()
        }
    }

    fn scheduler(
        pages: Vec<(u16, Vec<PostEntry>)>,
    ) -> (Scheduler<PageSource, RecordingSink>, RecordingSink, Arc<PlaybackFlags>, flume::Sender<Command>)
    {
        let source = PageSource {
            pages: Arc::new(Mutex::new(pages.into_iter().collect())),
        };
        let flags = Arc::new(PlaybackFlags::default());
        let fetcher = Fetcher::new(source, settings(), flags.clone());
        let sink = RecordingSink::default();
        let (tx, rx) = flume::unbounded();
        let scheduler =
            Scheduler::new(fetcher, sink.clone(), flags.clone(), rx, Duration::from_secs(3600));
        (scheduler, sink, flags, tx)
    }

    #[tokio::test]
    async fn tick_commits_and_resets_the_cursor() {
        let (mut scheduler, sink, _flags, _tx) = scheduler(vec![(1, vec![post(1)])]);

        scheduler.tick(false).await;

        let state = sink.state.lock().unwrap();
        assert_eq!(state.shown, vec!["https://static1/1.png"]);
        assert!(scheduler.fetcher.history().at_newest());
        assert!(scheduler.first_image_loaded);
    }

    #[tokio::test]
    async fn pause_during_preload_suppresses_the_commit() {
        let (mut scheduler, sink, flags, _tx) = scheduler(vec![(1, vec![post(1)])]);
        sink.state.lock().unwrap().pause_on_preload = Some(flags);

        scheduler.tick(false).await;

        let state = sink.state.lock().unwrap();
        assert!(state.shown.is_empty());
        // the entry stays logged so resuming picks up where the search left off
        assert_eq!(scheduler.fetcher.history().len(), 1);
        assert_eq!(scheduler.fetcher.history().cursor(), -1);
    }

    #[tokio::test]
    async fn empty_results_show_the_empty_state_until_filters_broaden() {
        let source = PageSource::default();
        let flags = Arc::new(PlaybackFlags::default());
        let fetcher = Fetcher::new(source.clone(), settings(), flags.clone());
        let sink = RecordingSink::default();
        let (_tx, rx) = flume::unbounded();
        let mut scheduler =
            Scheduler::new(fetcher, sink.clone(), flags, rx, Duration::from_secs(3600));

        scheduler.tick(false).await;
        assert!(sink.state.lock().unwrap().empty_state);

        // broadened filters find a post, the empty state comes down with it
        source.pages.lock().unwrap().insert(1, vec![post(1)]);
        scheduler
            .handle_command(Command::ApplySettings(
                SearchSettings {
                    tags: vec!["canine".to_string()],
                    ..settings()
                },
                Duration::from_secs(10),
            ))
            .await;

        let state = sink.state.lock().unwrap();
        assert!(!state.empty_state);
        assert_eq!(state.shown, vec!["https://static1/1.png"]);
    }

    #[tokio::test]
    async fn backward_navigation_pauses_and_shows_older_entries() {
        let (mut scheduler, sink, flags, _tx) =
            scheduler(vec![(1, vec![post(1), post(2)])]);

        scheduler.tick(false).await;
        scheduler.tick(false).await;
        assert_eq!(sink.state.lock().unwrap().shown.len(), 2);

        scheduler.handle_command(Command::Previous).await;
        assert!(flags.paused());
        assert_eq!(
            sink.state.lock().unwrap().shown.last().unwrap(),
            "https://static1/1.png"
        );

        // forward returns to the newest entry and resumes without a new search
        scheduler.handle_command(Command::Next).await;
        assert!(!flags.paused());
        assert_eq!(
            sink.state.lock().unwrap().shown.last().unwrap(),
            "https://static1/2.png"
        );
    }

    #[tokio::test]
    async fn toggle_pause_stops_and_resumes() {
        let (mut scheduler, sink, flags, _tx) = scheduler(vec![(1, vec![post(1), post(2)])]);

        scheduler.tick(false).await;
        assert!(!scheduler.handle_command(Command::TogglePause).await);
        assert!(flags.paused());

        // resuming runs an immediate round
        assert!(scheduler.handle_command(Command::TogglePause).await);
        assert!(!flags.paused());
        assert_eq!(sink.state.lock().unwrap().shown.len(), 2);
    }

    #[tokio::test]
    async fn becoming_visible_before_any_image_triggers_a_search() {
        let (mut scheduler, sink, _flags, _tx) = scheduler(vec![(1, vec![post(1)])]);

        assert!(!scheduler.handle_command(Command::SetHidden(true)).await);
        assert!(sink.state.lock().unwrap().shown.is_empty());

        assert!(scheduler.handle_command(Command::SetHidden(false)).await);
        assert_eq!(sink.state.lock().unwrap().shown.len(), 1);
    }

    #[tokio::test]
    async fn queued_commands_run_before_the_loop_exits() {
        let (scheduler, sink, _flags, tx) = scheduler(vec![(1, vec![post(1), post(2)])]);

        tx.send(Command::ApplySettings(
            SearchSettings {
                tags: vec!["equine".to_string()],
                ..settings()
            },
            Duration::from_secs(3600),
        ))
        .unwrap();
        tx.send(Command::Quit).unwrap();

        scheduler.run().await;
        // the initial round plus the one fired by the settings change
        assert_eq!(sink.state.lock().unwrap().shown.len(), 2);
    }
}
