//! Queue entries and the change tuples `queueDiff` returns.

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagOverrides {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub genre: Option<String>,
}

impl TagOverrides {
    pub fn is_empty(&self) -> bool {
        self.artist.is_none() && self.album.is_none() && self.title.is_none() && self.genre.is_none()
    }

    /// Iterate the set tag/value pairs, in the fixed order the replicator
    /// applies them: artist, album, title, genre.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("artist", self.artist.as_deref()),
            ("album", self.album.as_deref()),
            ("title", self.title.as_deref()),
            ("genre", self.genre.as_deref()),
        ]
        .into_iter()
        .filter_map(|(tag, value)| value.map(|v| (tag, v)))
    }
}

/// A track reference resolvable by the daemon, plus optional tag
/// overrides for streamed entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub file: String,
    pub tags: TagOverrides,
}

impl QueueEntry {
    pub fn is_stream(&self) -> bool {
        self.file.contains("http")
    }
}

/// One change returned by `queueDiff(sinceVersion)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueChange {
    pub pos: u32,
    pub file: String,
    pub tags: TagOverrides,
}

impl QueueChange {
    pub fn is_stream(&self) -> bool {
        self.file.contains("http")
    }
}
