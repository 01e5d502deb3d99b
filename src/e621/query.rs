//! Builds the canonical tag-filter expression sent to the posts endpoint.

/// Media types the viewer can never display, excluded server-side so pages
/// are not wasted on posts that would only be filtered out again locally.
const FIXED_EXCLUSIONS: [&str; 2] = ["-filetype:webm", "-filetype:mp4"];

/// A snapshot of everything that shapes a search, combined from the global
/// settings and the active preset. The fetcher owns one and replaces it
/// wholesale when the settings collaborator signals a change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SearchSettings {
    /// Required tags (global first, then preset), already split and trimmed.
    pub(crate) tags: Vec<String>,
    /// Excluded tags, negated into the query string.
    pub(crate) blacklist: Vec<String>,
    /// Tags every accepted post must carry, checked client-side per post.
    pub(crate) whitelist: Vec<String>,
    /// Allowed trailing dot-suffixes of the file URL (".png", ".jpg", ...).
    pub(crate) allowed_filetypes: Vec<String>,
    /// Whether this search may use the unrestricted base URL.
    pub(crate) adult_content: bool,
    /// How many posts one page request asks for.
    pub(crate) batch_size: u8,
}

/// Derives and memoizes the query string. The memo is cleared only through
/// [`QueryBuilder::invalidate`], which every settings mutation must trigger;
/// the fetcher compares outputs across calls to decide whether its cached
/// pagination state is still valid, so a stale memo would poison the cache.
#[derive(Debug, Default)]
pub(crate) struct QueryBuilder {
    memo: Option<String>,
}

impl QueryBuilder {
    /// Returns the query string for `settings`, computing it on the first
    /// call after an invalidation. Concatenation order is fixed: required
    /// tags, negated blacklist tags, fixed exclusions.
    pub(crate) fn build(&mut self, settings: &SearchSettings) -> String {
        if let Some(memo) = &self.memo {
            return memo.clone();
        }

        let mut parts = settings.tags.clone();
        parts.extend(settings.blacklist.iter().map(|tag| format!("-{tag}")));
        parts.extend(FIXED_EXCLUSIONS.iter().map(|tag| (*tag).to_string()));
        let query = parts.join(" ");
        trace!("Built query string \"{query}\"");
        self.memo = Some(query.clone());
        query
    }

    /// Clears the memo. Must be called on any settings or preset mutation.
    pub(crate) fn invalidate(&mut self) {
        self.memo = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(tags: &[&str], blacklist: &[&str]) -> SearchSettings {
        SearchSettings {
            tags: tags.iter().map(|e| e.to_string()).collect(),
            blacklist: blacklist.iter().map(|e| e.to_string()).collect(),
            ..SearchSettings::default()
        }
    }

    #[test]
    fn concatenation_order_is_pinned() {
        let mut builder = QueryBuilder::default();
        let query = builder.build(&settings(&["canine", "feral"], &["gore"]));
        assert_eq!(query, "canine feral -gore -filetype:webm -filetype:mp4");
    }

    #[test]
    fn memo_holds_until_invalidated() {
        let mut builder = QueryBuilder::default();
        let first = builder.build(&settings(&["canine"], &[]));

        // A changed configuration is not picked up until the memo is cleared.
        let stale = builder.build(&settings(&["equine"], &[]));
        assert_eq!(first, stale);

        builder.invalidate();
        let fresh = builder.build(&settings(&["equine"], &[]));
        assert_eq!(fresh, "equine -filetype:webm -filetype:mp4");
    }

    #[test]
    fn empty_configuration_still_excludes_videos() {
        let mut builder = QueryBuilder::default();
        assert_eq!(
            builder.build(&SearchSettings::default()),
            "-filetype:webm -filetype:mp4"
        );
    }
}
