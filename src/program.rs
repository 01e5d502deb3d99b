use std::env::current_dir;
use std::future::Future;
use std::sync::Arc;

use anyhow::Error;
use console::{Key, Term, style};
use dialoguer::{Confirm, Select};

use crate::e621::PlaybackFlags;
use crate::e621::fetcher::Fetcher;
use crate::e621::io::{Config, Login, Preset, load_presets};
use crate::e621::scheduler::{Command, ImageLoadError, ImageSink, Scheduler};
use crate::e621::sender::RequestSender;

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// Shows accepted images in the terminal: the bytes are preloaded over the
/// network and the URL is printed for the terminal's link handling. The empty
/// state is a one-shot notice that stays up until results return.
struct TerminalDisplay {
    request_sender: RequestSender,
    empty_state: bool,
}

impl TerminalDisplay {
    fn new(request_sender: RequestSender) -> Self {
        TerminalDisplay {
            request_sender,
            empty_state: false,
        }
    }
}

impl ImageSink for TerminalDisplay {
    fn preload(&mut self, url: &str) -> impl Future<Output = Result<(), ImageLoadError>> + Send {
        let request_sender = self.request_sender.clone();
        let url = url.to_string();
        async move {
            let bytes = request_sender.get_bytes_from_url(&url).await?;
            trace!("Preloaded {} bytes for {url}", bytes.len());
            Ok(())
        }
    }

    fn show(&mut self, url: &str) {
        info!("Now showing {}", style(url).color256(39).italic());
    }

    fn show_empty_state(&mut self) {
        if !self.empty_state {
            info!("Nothing matches the current filters, switch presets or edit your settings.");
            self.empty_state = true;
        }
    }

    fn clear_empty_state(&mut self) {
        self.empty_state = false;
    }
}

/// A program class that handles the flow of the viewer user experience and
/// steps of execution.
pub(crate) struct Program;

impl Program {
    /// Creates a new instance of the program.
    pub(crate) fn new() -> Self {
        Self
    }

    /// Runs the viewer program.
    pub(crate) async fn run(&self) -> Result<(), Error> {
        Term::stdout().set_title("e621 autoviewer");
        trace!("Starting e621 autoviewer...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);
        if let Ok(current_dir) = current_dir() {
            trace!("Program Working Directory: {}", current_dir.display());
        }

        let mut config = Config::load()?;
        if config.debug() {
            info!("Debug mode is on, full trace output is written to {}", crate::LOG_NAME);
        }

        let login = Login::load()?;
        trace!("Login information loaded...");
        trace!("Login Username: {}", login.username());
        trace!("Login API Key: {}", "*".repeat(login.api_key().len()));

        let presets = load_presets()?;
        trace!("Loaded {} preset(s)...", presets.len());

        self.confirm_adult_mode(&mut config)?;
        let preset_index = self.select_preset(&presets)?;
        let preset = &presets[preset_index];
        info!("Starting with preset \"{}\"", preset.name());

        let request_sender = RequestSender::new(&login)?;
        trace!("Sending authenticated requests: {}", request_sender.is_authenticated());

        let settings = config.search_settings(preset);
        request_sender.set_adult_base(settings.adult_content);
        let refresh_rate = preset.refresh_interval();

        let flags = Arc::new(PlaybackFlags::default());
        let fetcher = Fetcher::new(request_sender.clone(), settings, flags.clone());
        let display = TerminalDisplay::new(request_sender.clone());

        let (command_tx, command_rx) = flume::unbounded();
        self.spawn_input_thread(command_tx, config, presets, preset_index, request_sender);
        self.print_key_help();

        Scheduler::new(fetcher, display, flags, command_rx, refresh_rate)
            .run()
            .await;

        info!("Exiting at user request...");
        Ok(())
    }

    /// Asks whether presets that request adult content may actually get it.
    /// The answer overrides the config's switch for this session only.
    fn confirm_adult_mode(&self, config: &mut Config) -> Result<(), Error> {
        let adult_mode = Confirm::new()
            .with_prompt("Enable adult content for presets that request it?")
            .default(config.adult_mode())
            .interact()?;
        config.set_adult_mode(adult_mode);
        trace!("Adult mode: {adult_mode}");

        Ok(())
    }

    /// Lets the user pick the starting preset. Skipped when there is only one.
    fn select_preset(&self, presets: &[Preset]) -> Result<usize, Error> {
        if presets.len() <= 1 {
            return Ok(0);
        }

        let names: Vec<&str> = presets.iter().map(Preset::name).collect();
        let index = Select::new()
            .with_prompt("Which preset should play first?")
            .items(&names)
            .default(0)
            .interact()?;

        Ok(index)
    }

    fn print_key_help(&self) {
        info!("Keys: space pause/resume, n/→ next, p/← previous, v hide/unhide, [ ] switch preset, q quit");
    }

    /// Reads keystrokes on a blocking thread and turns them into commands.
    /// Preset switches are resolved here so the scheduler only ever sees a
    /// finished settings snapshot.
    fn spawn_input_thread(
        &self,
        commands: flume::Sender<Command>,
        config: Config,
        presets: Vec<Preset>,
        mut preset_index: usize,
        request_sender: RequestSender,
    ) {
        // the thread lives as long as the process; the handle is not needed
        let _ = tokio::task::spawn_blocking(move || {
            let term = Term::stdout();
            let mut hidden = false;

            loop {
                let key = match term.read_key() {
                    Ok(key) => key,
                    Err(err) => {
                        warn!("Failed to read key input: {err}");
                        let _ = commands.send(Command::Quit);
                        return;
                    }
                };

                let command = match key {
                    Key::Char(' ') => Command::TogglePause,
                    Key::Char('n') | Key::ArrowRight => Command::Next,
                    Key::Char('p') | Key::ArrowLeft => Command::Previous,
                    Key::Char('v') => {
                        hidden = !hidden;
                        Command::SetHidden(hidden)
                    }
                    Key::Char(']') => {
                        preset_index = (preset_index + 1) % presets.len();
                        switch_preset(&config, &presets[preset_index], &request_sender)
                    }
                    Key::Char('[') => {
                        preset_index = (preset_index + presets.len() - 1) % presets.len();
                        switch_preset(&config, &presets[preset_index], &request_sender)
                    }
                    Key::Char('q') | Key::Escape => {
                        let _ = commands.send(Command::Quit);
                        return;
                    }
                    _ => continue,
                };

                if commands.send(command).is_err() {
                    return;
                }
            }
        });
    }
}

/// Builds the settings change for a newly selected preset. The base URL is
/// switched here since the rating rule depends on the preset.
fn switch_preset(config: &Config, preset: &Preset, request_sender: &RequestSender) -> Command {
    info!("Switching to preset \"{}\"", preset.name());
    let settings = config.search_settings(preset);
    request_sender.set_adult_base(settings.adult_content);

    Command::ApplySettings(settings, preset.refresh_interval())
}
