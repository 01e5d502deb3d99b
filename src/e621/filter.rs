use std::collections::HashSet;
use std::fmt;

use crate::e621::query::SearchSettings;
use crate::e621::sender::entries::PostEntry;

/// Why a candidate was passed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SkipReason {
    MissingUrl,
    DisallowedFiletype,
    AlreadySeen,
    NotWhitelisted,
}

/// The verdict for a single candidate post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Accept,
    Skip(SkipReason),
}

/// Counts of skipped candidates by reason over one batch scan, kept for the
/// scan summary logs.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SkipCounts {
    missing_url: u32,
    wrong_filetype: u32,
    already_seen: u32,
    not_whitelisted: u32,
}

impl SkipCounts {
    pub(crate) fn bump(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::MissingUrl => self.missing_url += 1,
            SkipReason::DisallowedFiletype => self.wrong_filetype += 1,
            SkipReason::AlreadySeen => self.already_seen += 1,
            SkipReason::NotWhitelisted => self.not_whitelisted += 1,
        }
    }

    pub(crate) fn total(&self) -> u32 {
        self.missing_url + self.wrong_filetype + self.already_seen + self.not_whitelisted
    }
}

impl fmt::Display for SkipCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no url: {}, wrong filetype: {}, already in history: {}, not whitelisted: {}",
            self.missing_url, self.wrong_filetype, self.already_seen, self.not_whitelisted
        )
    }
}

/// Per-post admissibility policy. Conditions are checked in a fixed order and
/// the first failure wins; the paused/hidden abort check happens in the
/// fetcher's scan loop before this is consulted at all.
#[derive(Debug)]
pub(crate) struct CandidateFilter {
    allowed_filetypes: Vec<String>,
    whitelist: Vec<String>,
}

impl CandidateFilter {
    pub(crate) fn new(settings: &SearchSettings) -> Self {
        CandidateFilter {
            allowed_filetypes: settings.allowed_filetypes.clone(),
            whitelist: settings.whitelist.clone(),
        }
    }

    /// Judges one candidate: file URL present, allowed filetype, not already
    /// in the history, and every whitelist tag present among the post's tags.
    /// An empty whitelist accepts unconditionally at that step.
    pub(crate) fn judge(&self, post: &PostEntry, seen: &HashSet<i64>) -> Verdict {
        let Some(url) = post.file.url.as_deref() else {
            return Verdict::Skip(SkipReason::MissingUrl);
        };
        if !self.filetype_allowed(url) {
            return Verdict::Skip(SkipReason::DisallowedFiletype);
        }
        if seen.contains(&post.id) {
            return Verdict::Skip(SkipReason::AlreadySeen);
        }
        if self.whitelist.is_empty() {
            return Verdict::Accept;
        }

        let post_tags: HashSet<&str> = post.tags.values().flatten().map(String::as_str).collect();
        if self.whitelist.iter().all(|tag| post_tags.contains(tag.as_str())) {
            Verdict::Accept
        } else {
            Verdict::Skip(SkipReason::NotWhitelisted)
        }
    }

    /// The extension is everything after the last dot of the URL and must
    /// match an allowed suffix exactly; a URL without a dot never matches.
    fn filetype_allowed(&self, url: &str) -> bool {
        match url.rfind('.') {
            Some(dot) => self.allowed_filetypes.iter().any(|ext| ext == &url[dot..]),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::e621::sender::entries::FileEntry;

    fn filter(whitelist: &[&str]) -> CandidateFilter {
        CandidateFilter::new(&SearchSettings {
            whitelist: whitelist.iter().map(|e| e.to_string()).collect(),
            allowed_filetypes: vec![".png".to_string(), ".jpg".to_string()],
            ..SearchSettings::default()
        })
    }

    fn post(id: i64, url: Option<&str>, tags: &[&str]) -> PostEntry {
        let mut entry = PostEntry {
            id,
            file: FileEntry {
                url: url.map(str::to_string),
            },
            ..PostEntry::default()
        };
        entry
            .tags
            .insert("general".to_string(), tags.iter().map(|e| e.to_string()).collect());
        entry
    }

    #[test]
    fn missing_url_is_always_rejected() {
        let seen = HashSet::new();
        let verdict = filter(&[]).judge(&post(1, None, &["canine"]), &seen);
        assert_eq!(verdict, Verdict::Skip(SkipReason::MissingUrl));
    }

    #[test]
    fn wrong_filetype_is_rejected() {
        let seen = HashSet::new();
        let verdict = filter(&[]).judge(&post(1, Some("https://static1/a.webm"), &[]), &seen);
        assert_eq!(verdict, Verdict::Skip(SkipReason::DisallowedFiletype));

        let verdict = filter(&[]).judge(&post(1, Some("https://static1/no-extension"), &[]), &seen);
        assert_eq!(verdict, Verdict::Skip(SkipReason::DisallowedFiletype));
    }

    #[test]
    fn seen_post_is_rejected_even_when_whitelisted() {
        let mut seen = HashSet::new();
        seen.insert(7);
        let candidate = post(7, Some("https://static1/a.png"), &["canine"]);
        let verdict = filter(&["canine"]).judge(&candidate, &seen);
        assert_eq!(verdict, Verdict::Skip(SkipReason::AlreadySeen));
    }

    #[test]
    fn empty_whitelist_accepts_unconditionally() {
        let seen = HashSet::new();
        let verdict = filter(&[]).judge(&post(1, Some("https://static1/a.png"), &[]), &seen);
        assert_eq!(verdict, Verdict::Accept);
    }

    #[test]
    fn whitelist_must_be_fully_present_across_groups() {
        let seen = HashSet::new();
        let mut candidate = post(1, Some("https://static1/a.png"), &["canine"]);
        candidate
            .tags
            .insert("species".to_string(), vec!["wolf".to_string()]);

        assert_eq!(
            filter(&["canine", "wolf"]).judge(&candidate, &seen),
            Verdict::Accept
        );
        assert_eq!(
            filter(&["canine", "dragon"]).judge(&candidate, &seen),
            Verdict::Skip(SkipReason::NotWhitelisted)
        );
    }
}
