use std::collections::HashSet;

/// Append-only log of every accepted result, with a navigable cursor.
///
/// The cursor is a non-positive offset from the newest entry: 0 is the newest,
/// -1 the one before it, resolving to `length + cursor - 1` in the entry list.
/// Entries are never mutated or removed; unbounded growth over a session is an
/// accepted tradeoff since each entry is one URL and one id, and the seen-set
/// doubles as the duplicate filter for incoming candidates.
#[derive(Debug, Default)]
pub(crate) struct HistoryLog {
    entries: Vec<(String, i64)>,
    seen: HashSet<i64>,
    cursor: i64,
}

impl HistoryLog {
    /// Records a freshly accepted post. The cursor moves one step back because
    /// the new entry is not on screen yet; the scheduler resets it to 0 once
    /// the image is actually displayed.
    pub(crate) fn append(&mut self, url: String, id: i64) {
        self.entries.push((url, id));
        self.seen.insert(id);
        self.cursor -= 1;
    }

    /// Identifiers of every post ever accepted this session.
    pub(crate) fn seen(&self) -> &HashSet<i64> {
        &self.seen
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn cursor(&self) -> i64 {
        self.cursor
    }

    /// Whether the cursor sits on the newest entry.
    pub(crate) fn at_newest(&self) -> bool {
        self.cursor == 0
    }

    /// Snaps the cursor back to the newest entry after a display commit.
    pub(crate) fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    /// Resolves the cursor to an index into the entry list, if it lands on a
    /// stored entry.
    fn position(&self) -> Option<usize> {
        let index = self.entries.len() as i64 + self.cursor - 1;
        (0..self.entries.len() as i64)
            .contains(&index)
            .then_some(index as usize)
    }

    fn current_url(&self) -> Option<&str> {
        self.position().map(|index| self.entries[index].0.as_str())
    }

    /// Steps one entry further into the past. No-op at the oldest entry.
    pub(crate) fn go_back(&mut self) -> Option<&str> {
        if self.cursor > -(self.entries.len() as i64) + 1 {
            self.cursor -= 1;
            self.current_url()
        } else {
            info!("Already at the oldest history entry");
            None
        }
    }

    /// Steps one entry toward the newest. No-op at the newest entry.
    pub(crate) fn go_forward(&mut self) -> Option<&str> {
        if self.cursor < 0 {
            self.cursor += 1;
            self.current_url()
        } else {
            info!("Already at the newest history entry");
            None
        }
    }
}
