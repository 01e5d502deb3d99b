use std::fs::{read_to_string, write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};
use serde_json::{from_str, to_string_pretty};

use crate::e621::DEFAULT_BATCH_SIZE;
use crate::e621::query::SearchSettings;

/// Name of the configuration file.
pub(crate) const CONFIG_NAME: &str = "config.json";

/// Name of the login file.
pub(crate) const LOGIN_NAME: &str = "login.json";

/// Name of the preset list file.
pub(crate) const PRESETS_NAME: &str = "presets.json";

/// Refresh interval used when a preset supplies none or a nonsensical one.
const DEFAULT_REFRESH_SECS: f64 = 10.0;

/// Config that is used to do general setup. Global tag lists apply to every
/// preset and are merged in front of the preset's own.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct Config {
    /// File URL suffixes the viewer will accept (e.g ".png", ".jpg").
    #[serde(rename = "allowedFiletypes", default = "default_allowed_filetypes")]
    allowed_filetypes: Vec<String>,
    /// Tags required in every search, regardless of preset.
    #[serde(rename = "globalTags", default)]
    global_tags: Vec<String>,
    /// Tags excluded from every search, regardless of preset.
    #[serde(rename = "globalBlacklist", default)]
    global_blacklist: Vec<String>,
    /// Tags every shown post must carry, regardless of preset.
    #[serde(rename = "globalWhitelist", default)]
    global_whitelist: Vec<String>,
    /// Master switch for unrestricted content; presets opt in individually.
    #[serde(rename = "adultMode", default)]
    adult_mode: bool,
    /// How many posts one page request asks for.
    #[serde(rename = "batchSize", default = "default_batch_size")]
    batch_size: u8,
    /// Whether to note at startup that full trace output is in the log file.
    #[serde(default)]
    debug: bool,
}

fn default_allowed_filetypes() -> Vec<String> {
    [".png", ".jpg", ".jpeg", ".gif"]
        .iter()
        .map(|e| (*e).to_string())
        .collect()
}

fn default_batch_size() -> u8 {
    DEFAULT_BATCH_SIZE
}

impl Config {
    /// Loads the config file, creating a default one if it doesn't exist.
    pub(crate) fn load() -> Result<Self, Error> {
        let path = Path::new(CONFIG_NAME);
        let mut config = if path.exists() {
            from_str(&read_to_string(path)?)
                .with_context(|| format!("Failed to parse {CONFIG_NAME}"))?
        } else {
            let config = Config::default();
            write(path, to_string_pretty(&config)?)?;
            info!("The config file was created with default values.");
            config
        };

        if config.batch_size == 0 {
            warn!("A batch size of 0 is not usable, falling back to {DEFAULT_BATCH_SIZE}");
            config.batch_size = DEFAULT_BATCH_SIZE;
        }

        Ok(config)
    }

    /// Master switch for unrestricted content.
    pub(crate) fn adult_mode(&self) -> bool {
        self.adult_mode
    }

    pub(crate) fn set_adult_mode(&mut self, adult_mode: bool) {
        self.adult_mode = adult_mode;
    }

    pub(crate) fn debug(&self) -> bool {
        self.debug
    }

    /// Combines the global settings with `preset` into the snapshot a search
    /// runs under. Unrestricted content requires both the global switch and
    /// the preset's own opt-in.
    pub(crate) fn search_settings(&self, preset: &Preset) -> SearchSettings {
        SearchSettings {
            tags: merge_tags(&self.global_tags, &preset.tags),
            blacklist: merge_tags(&self.global_blacklist, &preset.blacklist),
            whitelist: merge_tags(&self.global_whitelist, &preset.whitelist),
            allowed_filetypes: self.allowed_filetypes.clone(),
            adult_content: self.adult_mode && preset.adult_content,
            batch_size: self.batch_size,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            allowed_filetypes: default_allowed_filetypes(),
            global_tags: Vec::new(),
            global_blacklist: Vec::new(),
            global_whitelist: Vec::new(),
            adult_mode: false,
            batch_size: default_batch_size(),
            debug: false,
        }
    }
}

/// Global tags come first, then the preset's whitespace-separated tag string
/// split into single tags. Empty entries on either side are dropped.
fn merge_tags(global: &[String], preset: &str) -> Vec<String> {
    global
        .iter()
        .filter(|tag| !tag.is_empty())
        .cloned()
        .chain(preset.split_whitespace().map(str::to_string))
        .collect()
}

/// `Login` contains all login information for authenticating with the API.
#[derive(Serialize, Deserialize, Clone)]
pub(crate) struct Login {
    /// Username of user.
    #[serde(rename = "Username")]
    username: String,
    /// The password hash (also known as the API key) for the user.
    #[serde(rename = "APIKey")]
    api_key: String,
}

impl Login {
    /// Username of user.
    pub(crate) fn username(&self) -> &str {
        &self.username
    }

    /// The password hash (also known as the API key) for the user.
    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Loads the login file or creates an empty one if it doesn't exist.
    pub(crate) fn load() -> Result<Self, Error> {
        let login_path = Path::new(LOGIN_NAME);
        if login_path.exists() {
            Ok(from_str(&read_to_string(login_path)?)
                .with_context(|| format!("Failed to parse {LOGIN_NAME}"))?)
        } else {
            let login = Login::default();
            login.create_login()?;
            Ok(login)
        }
    }

    /// Checks if the login user and password is empty.
    pub(crate) fn is_empty(&self) -> bool {
        self.username.is_empty() || self.api_key.is_empty()
    }

    /// Creates a new login file.
    fn create_login(&self) -> Result<(), Error> {
        write(LOGIN_NAME, to_string_pretty(self)?)?;

        info!("The login file was created.");
        info!("Give your username and API hash key if you want authenticated requests.");
        info!(
            "Do not give out your API hash unless you trust this software completely, always treat your API hash like your own password."
        );

        Ok(())
    }
}

impl Default for Login {
    fn default() -> Self {
        Login {
            username: String::new(),
            api_key: String::new(),
        }
    }
}

/// One named search the user can switch to at runtime. Tag fields hold
/// whitespace-separated tag strings the way they are typed.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct Preset {
    #[serde(rename = "presetName")]
    name: String,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    blacklist: String,
    #[serde(default)]
    whitelist: String,
    /// Seconds between automatic image advances.
    #[serde(rename = "refreshRate", default = "default_refresh_rate")]
    refresh_rate: f64,
    /// Whether this preset opts into unrestricted content.
    #[serde(rename = "adultContent", default)]
    adult_content: bool,
}

fn default_refresh_rate() -> f64 {
    DEFAULT_REFRESH_SECS
}

impl Preset {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// The refresh rate as a duration, guarding against zero, negative, and
    /// non-finite values from a hand-edited preset file.
    pub(crate) fn refresh_interval(&self) -> Duration {
        if self.refresh_rate.is_finite() && self.refresh_rate > 0.0 {
            Duration::from_secs_f64(self.refresh_rate)
        } else {
            warn!(
                "Preset \"{}\" has an unusable refresh rate ({}), using {DEFAULT_REFRESH_SECS}s",
                self.name, self.refresh_rate
            );
            Duration::from_secs_f64(DEFAULT_REFRESH_SECS)
        }
    }
}

impl Default for Preset {
    fn default() -> Self {
        Preset {
            name: String::from("Default"),
            tags: String::new(),
            blacklist: String::new(),
            whitelist: String::new(),
            refresh_rate: default_refresh_rate(),
            adult_content: false,
        }
    }
}

/// Loads the preset list, creating a single-default file if it doesn't exist.
/// An existing but empty list is padded with the default preset so there is
/// always something to play.
pub(crate) fn load_presets() -> Result<Vec<Preset>, Error> {
    let path = Path::new(PRESETS_NAME);
    let mut presets: Vec<Preset> = if path.exists() {
        from_str(&read_to_string(path)?)
            .with_context(|| format!("Failed to parse {PRESETS_NAME}"))?
    } else {
        let presets = vec![Preset::default()];
        write(path, to_string_pretty(&presets)?)?;
        info!("The preset file was created with a single default preset.");
        presets
    };

    if presets.is_empty() {
        warn!("The preset file contains no presets, using the default preset");
        presets.push(Preset::default());
    }

    Ok(presets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_tags_keep_global_entries_first() {
        let global = vec!["canine".to_string(), String::new(), "feral".to_string()];
        let merged = merge_tags(&global, "  wolf   forest ");
        assert_eq!(merged, vec!["canine", "feral", "wolf", "forest"]);
    }

    #[test]
    fn adult_content_requires_both_opt_ins() {
        let preset: Preset =
            from_str(r#"{"presetName": "Wolves", "adultContent": true}"#).unwrap();

        let safe_config = Config::default();
        assert!(!safe_config.search_settings(&preset).adult_content);

        let mut adult_config = Config::default();
        adult_config.set_adult_mode(true);
        assert!(adult_config.search_settings(&preset).adult_content);

        let tame_preset = Preset::default();
        assert!(!adult_config.search_settings(&tame_preset).adult_content);
    }

    #[test]
    fn settings_snapshot_combines_global_and_preset_lists() {
        let config: Config = from_str(
            r#"{
                "globalTags": ["rating:safe"],
                "globalBlacklist": ["gore"],
                "batchSize": 50
            }"#,
        )
        .unwrap();
        let preset: Preset = from_str(
            r#"{"presetName": "Wolves", "tags": "wolf forest", "blacklist": "human"}"#,
        )
        .unwrap();

        let settings = config.search_settings(&preset);
        assert_eq!(settings.tags, vec!["rating:safe", "wolf", "forest"]);
        assert_eq!(settings.blacklist, vec!["gore", "human"]);
        assert!(settings.whitelist.is_empty());
        assert_eq!(settings.batch_size, 50);
        assert_eq!(settings.allowed_filetypes, default_allowed_filetypes());
    }

    #[test]
    fn bare_config_file_parses_to_defaults() {
        let config: Config = from_str("{}").unwrap();
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert!(!config.adult_mode());
        assert!(!config.debug());
        assert_eq!(config.allowed_filetypes, default_allowed_filetypes());
    }

    #[test]
    fn unusable_refresh_rates_fall_back_to_the_default() {
        let zero: Preset = from_str(r#"{"presetName": "A", "refreshRate": 0.0}"#).unwrap();
        assert_eq!(zero.refresh_interval(), Duration::from_secs(10));

        let negative: Preset = from_str(r#"{"presetName": "B", "refreshRate": -3.5}"#).unwrap();
        assert_eq!(negative.refresh_interval(), Duration::from_secs(10));

        let sane: Preset = from_str(r#"{"presetName": "C", "refreshRate": 2.5}"#).unwrap();
        assert_eq!(sane.refresh_interval(), Duration::from_secs_f64(2.5));
    }
}
