use serde::{Serialize, Serializer};
use std::fmt;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

pub const DATE_TIME_COLUMN: &str = "Date/Time";
pub const ARTIST_COLUMN: &str = "Artist";
pub const SONG_NAME_COLUMN: &str = "Song Name";
pub const REQUIRED_COLUMNS: [&str; 3] = [DATE_TIME_COLUMN, ARTIST_COLUMN, SONG_NAME_COLUMN];

// Only ever written to the Date/Time column, where a real value is never blank.
pub const NULL_MARKER: &str = "";

pub(crate) const CANONICAL_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(PrimitiveDateTime);

impl Timestamp {
    pub fn from_datetime(datetime: PrimitiveDateTime) -> Option<Self> {
        if !(1..=9999).contains(&datetime.year()) {
            return None;
        }
        let truncated = datetime.replace_nanosecond(0).ok()?;
        Some(Self(truncated))
    }

    pub fn datetime(self) -> PrimitiveDateTime {
        self.0
    }

    pub fn date(self) -> Date {
        self.0.date()
    }

    pub fn hour(self) -> u8 {
        self.0.hour()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self.0.format(CANONICAL_FORMAT).map_err(|_| fmt::Error)?;
        f.write_str(&rendered)
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlayEvent {
    pub played_at: Option<Timestamp>,
    pub artist: String,
    pub song_name: String,
    pub extra: Vec<String>,
}

impl PlayEvent {
    pub fn new(played_at: Option<Timestamp>, artist: &str, song_name: &str) -> Self {
        Self {
            played_at,
            artist: artist.to_string(),
            song_name: song_name.to_string(),
            extra: Vec::new(),
        }
    }

    pub fn to_record(&self) -> Vec<String> {
        let mut record = Vec::with_capacity(3 + self.extra.len());
        record.push(
            self.played_at
                .map(|ts| ts.to_string())
                .unwrap_or_else(|| NULL_MARKER.to_string()),
        );
        record.push(self.artist.clone());
        record.push(self.song_name.clone());
        record.extend(self.extra.iter().cloned());
        record
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    extra: Vec<String>,
}

impl Schema {
    pub fn new(extra: Vec<String>) -> Self {
        Self { extra }
    }

    pub fn extra_columns(&self) -> &[String] {
        &self.extra
    }

    pub fn header(&self) -> Vec<String> {
        REQUIRED_COLUMNS
            .iter()
            .map(|column| column.to_string())
            .chain(self.extra.iter().cloned())
            .collect()
    }

    pub fn same_columns(&self, other: &Schema) -> bool {
        if self.extra.len() != other.extra.len() {
            return false;
        }
        let mut ours: Vec<&str> = self.extra.iter().map(String::as_str).collect();
        let mut theirs: Vec<&str> = other.extra.iter().map(String::as_str).collect();
        ours.sort_unstable();
        theirs.sort_unstable();
        ours == theirs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanonicalDataset {
    pub schema: Schema,
    pub events: Vec<PlayEvent>,
}

impl CanonicalDataset {
    pub fn new(schema: Schema, events: Vec<PlayEvent>) -> Self {
        Self { schema, events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn to_table(&self) -> Vec<Vec<String>> {
        let mut table = Vec::with_capacity(self.events.len() + 1);
        table.push(self.schema.header());
        table.extend(self.events.iter().map(PlayEvent::to_record));
        table
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { header, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.rows.is_empty()
    }
}
