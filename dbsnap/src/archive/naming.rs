//! Archive file naming: `backup_<db>_<YYYY-MM-DD>_<HH-MM-SS>[_<n>].json.gz`.

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

pub const ARCHIVE_PREFIX: &str = "backup_";
pub const ARCHIVE_EXTENSION: &str = ".json.gz";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const TIMESTAMP_LEN: usize = "YYYY-MM-DD_HH-MM-SS".len();

/// Parsed form of an archive file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub database: String,
    pub timestamp: NaiveDateTime,
    /// 1 for the plain name, 2.. for same-second collisions
    pub sequence: u32,
}

impl ArchiveName {
    /// Name for an archive created at `at`, truncated to the second.
    pub fn new(database: &str, at: DateTime<Utc>) -> Self {
        let naive = at.naive_utc();
        Self {
            database: database.to_string(),
            timestamp: naive.with_nanosecond(0).unwrap_or(naive),
            sequence: 1,
        }
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn file_name(&self) -> String {
        let stamp = self.timestamp.format(TIMESTAMP_FORMAT);
        if self.sequence > 1 {
            format!(
                "{ARCHIVE_PREFIX}{}_{stamp}_{}{ARCHIVE_EXTENSION}",
                self.database, self.sequence
            )
        } else {
            format!("{ARCHIVE_PREFIX}{}_{stamp}{ARCHIVE_EXTENSION}", self.database)
        }
    }

    /// Parse a file name, returning `None` for anything that does not follow
    /// the archive naming convention. Database names may contain underscores,
    /// so the timestamp is located from the right.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name
            .strip_prefix(ARCHIVE_PREFIX)?
            .strip_suffix(ARCHIVE_EXTENSION)?;

        if let Some(parsed) = Self::parse_stem(stem, 1) {
            return Some(parsed);
        }

        let (rest, seq) = stem.rsplit_once('_')?;
        let sequence: u32 = seq.parse().ok().filter(|n| *n >= 2)?;
        Self::parse_stem(rest, sequence)
    }

    fn parse_stem(stem: &str, sequence: u32) -> Option<Self> {
        if stem.len() < TIMESTAMP_LEN + 2 || !stem.is_char_boundary(stem.len() - TIMESTAMP_LEN) {
            return None;
        }
        let (head, stamp) = stem.split_at(stem.len() - TIMESTAMP_LEN);
        let database = head.strip_suffix('_')?;
        if database.is_empty() {
            return None;
        }
        let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
        Some(Self {
            database: database.to_string(),
            timestamp,
            sequence,
        })
    }
}

pub fn is_archive_name(file_name: &str) -> bool {
    ArchiveName::parse(file_name).is_some()
}
