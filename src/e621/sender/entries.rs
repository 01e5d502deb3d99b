use std::collections::BTreeMap;

use serde::Deserialize;

/// The response wrapper returned by a bulk `posts.json` search.
#[derive(Deserialize, Default, Clone, Debug)]
pub(crate) struct BulkPostEntry {
    #[serde(default)]
    pub(crate) posts: Vec<PostEntry>,
}

/// A single post from the posts endpoint, trimmed to the fields the viewer reads.
#[derive(Deserialize, Default, Clone, Debug)]
pub(crate) struct PostEntry {
    /// The unique identifier of the post.
    pub(crate) id: i64,
    /// The file the post points at.
    #[serde(default)]
    pub(crate) file: FileEntry,
    /// Tag groups keyed by category name ("general", "artist", ...), each an
    /// ordered list of tag strings.
    #[serde(default)]
    pub(crate) tags: BTreeMap<String, Vec<String>>,
    /// The voting score of the post.
    #[serde(default)]
    pub(crate) score: ScoreEntry,
}

#[derive(Deserialize, Default, Clone, Debug)]
pub(crate) struct FileEntry {
    /// Direct file URL. Null when the post is hidden from the current login.
    pub(crate) url: Option<String>,
}

#[derive(Deserialize, Default, Clone, Debug)]
pub(crate) struct ScoreEntry {
    #[serde(default)]
    pub(crate) total: i64,
}
