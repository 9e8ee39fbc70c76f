use crate::error::{PipelineError, Result};
use crate::model::{
    ARTIST_COLUMN, CanonicalDataset, DATE_TIME_COLUMN, PlayEvent, REQUIRED_COLUMNS, RawTable,
    SONG_NAME_COLUMN, Schema,
};
use crate::normalize::normalize_timestamp;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

pub const DEFAULT_IDENTIFIER_COLUMN: &str = "URI";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DedupPolicy {
    #[default]
    Exact,
    Folded,
}

impl DedupPolicy {
    pub fn label(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Folded => "folded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub dedup: DedupPolicy,
    pub identifier_columns: Vec<String>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            dedup: DedupPolicy::Exact,
            identifier_columns: vec![DEFAULT_IDENTIFIER_COLUMN.to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub existing_rows: usize,
    pub increment_rows: usize,
    pub blank_rows_skipped: usize,
    pub unparsed_timestamps: usize,
    pub duplicates_removed: usize,
    pub total_rows: usize,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub dataset: CanonicalDataset,
    pub report: MergeReport,
}

#[derive(Debug, Clone)]
pub(crate) struct Conformed {
    pub dataset: CanonicalDataset,
    pub blank_rows_skipped: usize,
    pub unparsed_timestamps: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum ConformError {
    #[error("duplicate columns: {}", .0.join(", "))]
    DuplicateColumns(Vec<String>),
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("column {0:?} is blank or padded with whitespace")]
    UnaddressableColumn(String),
    #[error("column {0:?} is an identifier column")]
    IdentifierColumn(String),
    #[error("row {row} has {found} cells, header has {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
}

pub(crate) fn conform(
    table: &RawTable,
    identifier_columns: &[String],
    skip_blank_rows: bool,
) -> std::result::Result<Conformed, ConformError> {
    let header: Vec<&str> = table.header.iter().map(|name| name.trim()).collect();
    check_duplicates(&header)?;

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| find_column(&header, column).is_none())
        .map(|column| column.to_string())
        .collect();
    let (Some(date_idx), Some(artist_idx), Some(song_idx)) = (
        find_column(&header, DATE_TIME_COLUMN),
        find_column(&header, ARTIST_COLUMN),
        find_column(&header, SONG_NAME_COLUMN),
    ) else {
        return Err(ConformError::MissingColumns(missing));
    };

    let extra_idx: Vec<usize> = header
        .iter()
        .enumerate()
        .filter(|&(_, &name)| {
            !name.is_empty()
                && !REQUIRED_COLUMNS.contains(&name)
                && !is_identifier(identifier_columns, name)
        })
        .map(|(idx, _)| idx)
        .collect();
    let schema = Schema::new(
        extra_idx
            .iter()
            .map(|idx| header[*idx].to_string())
            .collect(),
    );

    let mut events = Vec::with_capacity(table.rows.len());
    let mut blank_rows_skipped = 0;
    let mut unparsed_timestamps = 0;
    for row in &table.rows {
        if skip_blank_rows && row.iter().all(|value| value.trim().is_empty()) {
            blank_rows_skipped += 1;
            continue;
        }

        let raw_time = cell_at(row, date_idx);
        let played_at = normalize_timestamp(&raw_time);
        if played_at.is_none() && !raw_time.trim().is_empty() {
            debug!(value = %raw_time, "unparsed play time mapped to null");
            unparsed_timestamps += 1;
        }

        events.push(PlayEvent {
            played_at,
            artist: cell_at(row, artist_idx),
            song_name: cell_at(row, song_idx),
            extra: extra_idx.iter().map(|idx| cell_at(row, *idx)).collect(),
        });
    }

    Ok(Conformed {
        dataset: CanonicalDataset::new(schema, events),
        blank_rows_skipped,
        unparsed_timestamps,
    })
}

pub(crate) fn check_writable(
    dataset: &CanonicalDataset,
    identifier_columns: &[String],
) -> std::result::Result<(), ConformError> {
    let extra = dataset.schema.extra_columns();
    if let Some(name) = extra
        .iter()
        .find(|name| name.trim().is_empty() || name.trim() != name.as_str())
    {
        return Err(ConformError::UnaddressableColumn(name.clone()));
    }

    let header = dataset.schema.header();
    let names: Vec<&str> = header.iter().map(String::as_str).collect();
    check_duplicates(&names)?;

    if let Some(name) = extra
        .iter()
        .find(|name| is_identifier(identifier_columns, name))
    {
        return Err(ConformError::IdentifierColumn(name.clone()));
    }

    if let Some((row, event)) = dataset
        .events
        .iter()
        .enumerate()
        .find(|(_, event)| event.extra.len() != extra.len())
    {
        return Err(ConformError::RaggedRow {
            row: row + 1,
            expected: header.len(),
            found: REQUIRED_COLUMNS.len() + event.extra.len(),
        });
    }
    Ok(())
}

fn check_duplicates(header: &[&str]) -> std::result::Result<(), ConformError> {
    let mut seen = HashSet::new();
    let duplicated: Vec<String> = header
        .iter()
        .filter(|name| !name.is_empty() && !seen.insert(**name))
        .map(|name| name.to_string())
        .collect();
    if duplicated.is_empty() {
        Ok(())
    } else {
        Err(ConformError::DuplicateColumns(duplicated))
    }
}

fn is_identifier(identifier_columns: &[String], name: &str) -> bool {
    identifier_columns.iter().any(|id| id.trim() == name)
}

fn find_column(header: &[&str], column: &str) -> Option<usize> {
    header.iter().position(|name| *name == column)
}

fn cell_at(row: &[String], idx: usize) -> String {
    row.get(idx).cloned().unwrap_or_default()
}

/// Existing rows come first, so the historical copy of a duplicate survives.
pub fn merge(
    existing: Option<CanonicalDataset>,
    increment: &RawTable,
    options: &MergeOptions,
) -> Result<MergeOutcome> {
    let existing_rows = existing.as_ref().map_or(0, CanonicalDataset::len);

    if increment.is_empty() {
        if let Some(dataset) = existing {
            return Ok(unchanged(dataset, 0));
        }
        return Err(PipelineError::SchemaMismatch(String::from(
            "increment has no header and there is no existing dataset",
        )));
    }

    let conformed = conform(increment, &options.identifier_columns, true)
        .map_err(|err| PipelineError::SchemaMismatch(err.to_string()))?;
    if conformed.unparsed_timestamps > 0 {
        warn!(
            count = conformed.unparsed_timestamps,
            "increment play times could not be parsed and were set to null"
        );
    }
    let incoming = conformed.dataset;
    let increment_rows = incoming.len();

    let (schema, mut events) = match existing {
        Some(dataset) if incoming.is_empty() => {
            return Ok(unchanged(dataset, conformed.blank_rows_skipped));
        }
        Some(dataset) => {
            if !dataset.schema.same_columns(&incoming.schema) {
                return Err(PipelineError::SchemaMismatch(format!(
                    "passthrough columns [{}] do not match canonical [{}]",
                    incoming.schema.extra_columns().join(", "),
                    dataset.schema.extra_columns().join(", ")
                )));
            }
            let aligned = align_events(incoming, &dataset.schema);
            let mut events = dataset.events;
            events.extend(aligned);
            (dataset.schema, events)
        }
        None => (incoming.schema, incoming.events),
    };

    let before = events.len();
    events = dedup_events(events, options.dedup);
    let duplicates_removed = before - events.len();
    sort_newest_first(&mut events);

    let report = MergeReport {
        existing_rows,
        increment_rows,
        blank_rows_skipped: conformed.blank_rows_skipped,
        unparsed_timestamps: conformed.unparsed_timestamps,
        duplicates_removed,
        total_rows: events.len(),
    };
    info!(
        existing = report.existing_rows,
        increment = report.increment_rows,
        duplicates = report.duplicates_removed,
        total = report.total_rows,
        dedup = options.dedup.label(),
        "merged increment"
    );

    Ok(MergeOutcome {
        dataset: CanonicalDataset::new(schema, events),
        report,
    })
}

fn unchanged(dataset: CanonicalDataset, blank_rows_skipped: usize) -> MergeOutcome {
    info!(rows = dataset.len(), "increment is empty; dataset unchanged");
    let report = MergeReport {
        existing_rows: dataset.len(),
        blank_rows_skipped,
        total_rows: dataset.len(),
        ..MergeReport::default()
    };
    MergeOutcome { dataset, report }
}

fn align_events(incoming: CanonicalDataset, target: &Schema) -> Vec<PlayEvent> {
    if incoming.schema == *target {
        return incoming.events;
    }
    let source_positions: HashMap<&str, usize> = incoming
        .schema
        .extra_columns()
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.as_str(), idx))
        .collect();
    let order: Vec<usize> = target
        .extra_columns()
        .iter()
        .filter_map(|name| source_positions.get(name.as_str()).copied())
        .collect();

    incoming
        .events
        .into_iter()
        .map(|mut event| {
            event.extra = order
                .iter()
                .map(|idx| event.extra.get(*idx).cloned().unwrap_or_default())
                .collect();
            event
        })
        .collect()
}

pub fn dedup_events(events: Vec<PlayEvent>, policy: DedupPolicy) -> Vec<PlayEvent> {
    let mut out = Vec::with_capacity(events.len());
    match policy {
        DedupPolicy::Exact => {
            let mut seen: HashSet<PlayEvent> = HashSet::with_capacity(events.len());
            for event in events {
                if !seen.contains(&event) {
                    seen.insert(event.clone());
                    out.push(event);
                }
            }
        }
        DedupPolicy::Folded => {
            let mut seen: HashSet<FoldedKey> = HashSet::with_capacity(events.len());
            for event in events {
                if seen.insert(FoldedKey::from_event(&event)) {
                    out.push(event);
                }
            }
        }
    }
    out
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct FoldedKey {
    played_at: Option<String>,
    cells: Vec<String>,
}

impl FoldedKey {
    fn from_event(event: &PlayEvent) -> Self {
        let cells = [&event.artist, &event.song_name]
            .into_iter()
            .chain(event.extra.iter())
            .map(|value| fold_text(value))
            .collect();
        Self {
            played_at: event.played_at.map(|ts| ts.to_string()),
            cells,
        }
    }
}

pub fn fold_text(value: &str) -> String {
    let composed: String = value.nfkc().collect();
    composed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn sort_newest_first(events: &mut [PlayEvent]) {
    events.sort_by(|a, b| compare_newest_first(a, b));
}

fn compare_newest_first(a: &PlayEvent, b: &PlayEvent) -> Ordering {
    match (a.played_at, b.played_at) {
        (Some(left), Some(right)) => right.cmp(&left),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Timestamp;
    use crate::normalize::normalize_timestamp;
    use proptest::prop_assert_eq;

    fn ts(raw: &str) -> Option<Timestamp> {
        normalize_timestamp(raw)
    }

    fn table(header: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            header.iter().map(|name| name.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|value| value.to_string()).collect())
                .collect(),
        )
    }

    fn base_dataset() -> CanonicalDataset {
        CanonicalDataset::new(
            Schema::default(),
            vec![PlayEvent::new(ts("2024-01-01T00:00:00Z"), "A", "S")],
        )
    }

    #[test]
    fn identical_rows_collapse_and_new_rows_append() {
        let increment = table(
            &["Date/Time", "Artist", "Song Name"],
            &[
                &["2024-01-01T00:00:00Z", "A", "S"],
                &["2024-01-02T00:00:00Z", "B", "T"],
            ],
        );

        let outcome =
            merge(Some(base_dataset()), &increment, &MergeOptions::default()).expect("merge");

        assert_eq!(outcome.dataset.len(), 2);
        assert_eq!(outcome.report.duplicates_removed, 1);
        assert_eq!(outcome.dataset.events[0].artist, "B");
        assert_eq!(outcome.dataset.events[1].artist, "A");
    }

    #[test]
    fn duplicates_match_after_normalization() {
        let increment = table(
            &["Date/Time", "Artist", "Song Name"],
            &[&["January 1, 2024 at 12:00AM", "A", "S"]],
        );

        let outcome =
            merge(Some(base_dataset()), &increment, &MergeOptions::default()).expect("merge");

        assert_eq!(outcome.dataset, base_dataset());
    }

    #[test]
    fn empty_increment_is_a_no_op() {
        let existing = CanonicalDataset::new(
            Schema::default(),
            vec![
                PlayEvent::new(ts("2024-01-01T00:00:00Z"), "A", "S"),
                PlayEvent::new(ts("2024-06-01T00:00:00Z"), "B", "T"),
            ],
        );
        let increment = table(&["URI", "Date/Time", "Artist", "Song Name"], &[]);

        let outcome =
            merge(Some(existing.clone()), &increment, &MergeOptions::default()).expect("merge");
        assert_eq!(outcome.dataset, existing);

        let outcome = merge(Some(existing.clone()), &RawTable::default(), &MergeOptions::default())
            .expect("merge");
        assert_eq!(outcome.dataset, existing);
    }

    #[test]
    fn blank_increment_rows_are_skipped() {
        let increment = table(
            &["Date/Time", "Artist", "Song Name"],
            &[&["", "", ""], &["  ", "", " "], &["2024-05-01T10:00:00Z", "C", "U"]],
        );

        let outcome = merge(None, &increment, &MergeOptions::default()).expect("merge");

        assert_eq!(outcome.dataset.len(), 1);
        assert_eq!(outcome.report.blank_rows_skipped, 2);
    }

    #[test]
    fn identifier_column_is_dropped() {
        let increment = table(
            &["URI", "Date/Time", "Artist", "Song Name", "Album"],
            &[&["spotify:track:1", "July 6, 2025 at 2:30PM", "A", "S", "LP"]],
        );

        let first = merge(None, &increment, &MergeOptions::default()).expect("first merge");
        assert_eq!(
            first.dataset.schema.header(),
            vec!["Date/Time", "Artist", "Song Name", "Album"]
        );
        assert_eq!(
            first.dataset.events[0].to_record(),
            vec!["2025-07-06T14:30:00Z", "A", "S", "LP"]
        );

        let second =
            merge(Some(first.dataset), &increment, &MergeOptions::default()).expect("second");
        assert_eq!(second.dataset.len(), 1);
        assert!(
            !second
                .dataset
                .schema
                .header()
                .iter()
                .any(|column| column == "URI")
        );
    }

    #[test]
    fn passthrough_columns_realign_by_name() {
        let existing = merge(
            None,
            &table(
                &["Date/Time", "Artist", "Song Name", "Album", "Genre"],
                &[&["2024-01-01T00:00:00Z", "A", "S", "LP", "Rock"]],
            ),
            &MergeOptions::default(),
        )
        .expect("seed");
        let increment = table(
            &["Genre", "Song Name", "Album", "Artist", "Date/Time"],
            &[&["Jazz", "T", "EP", "B", "2024-02-01T00:00:00Z"]],
        );

        let outcome =
            merge(Some(existing.dataset), &increment, &MergeOptions::default()).expect("merge");

        assert_eq!(
            outcome.dataset.events[0].to_record(),
            vec!["2024-02-01T00:00:00Z", "B", "T", "EP", "Jazz"]
        );
    }

    #[test]
    fn missing_required_column_is_a_schema_mismatch() {
        let increment = table(&["Date/Time", "Artist"], &[&["2024-01-01T00:00:00Z", "A"]]);

        let err = merge(Some(base_dataset()), &increment, &MergeOptions::default())
            .expect_err("mismatch");

        assert!(matches!(err, PipelineError::SchemaMismatch(_)));
        assert!(err.to_string().contains("Song Name"), "unexpected: {err}");
    }

    #[test]
    fn diverging_passthrough_columns_are_a_schema_mismatch() {
        let increment = table(
            &["Date/Time", "Artist", "Song Name", "Album"],
            &[&["2024-01-01T00:00:00Z", "A", "S", "LP"]],
        );

        let err = merge(Some(base_dataset()), &increment, &MergeOptions::default())
            .expect_err("mismatch");

        assert!(matches!(err, PipelineError::SchemaMismatch(_)));
    }

    #[test]
    fn duplicate_header_names_are_rejected() {
        let increment = table(
            &["Date/Time", "Artist", "Song Name", "Artist"],
            &[&["2024-01-01T00:00:00Z", "A", "S", "A"]],
        );

        let err = merge(None, &increment, &MergeOptions::default()).expect_err("mismatch");
        assert!(err.to_string().contains("duplicate columns"), "unexpected: {err}");
    }

    #[test]
    fn conform_reports_typed_header_problems() {
        let missing = table(&["Date/Time", "URI"], &[]);
        assert_eq!(
            conform(&missing, &[], false).map(|_| ()),
            Err(ConformError::MissingColumns(vec![
                String::from("Artist"),
                String::from("Song Name"),
            ]))
        );

        let doubled = table(&["Date/Time", "Artist", " Artist ", "Song Name"], &[]);
        assert_eq!(
            conform(&doubled, &[], false).map(|_| ()),
            Err(ConformError::DuplicateColumns(vec![String::from("Artist")]))
        );
    }

    #[test]
    fn unparseable_times_become_null_and_sort_last() {
        let increment = table(
            &["Date/Time", "Artist", "Song Name"],
            &[
                &["not a date", "X", "Y"],
                &["2024-01-01", "A", "S"],
                &["2024-03-01", "B", "T"],
            ],
        );

        let outcome = merge(None, &increment, &MergeOptions::default()).expect("merge");
        let times: Vec<String> = outcome
            .dataset
            .events
            .iter()
            .map(|event| event.to_record()[0].clone())
            .collect();

        assert_eq!(
            times,
            vec!["2024-03-01T00:00:00Z", "2024-01-01T00:00:00Z", ""]
        );
        assert_eq!(outcome.report.unparsed_timestamps, 1);
    }

    #[test]
    fn sort_keeps_relative_order_of_ties() {
        let mut events = vec![
            PlayEvent::new(ts("2024-01-01T00:00:00Z"), "first", "x"),
            PlayEvent::new(None, "null-a", "x"),
            PlayEvent::new(ts("2024-01-01T00:00:00Z"), "second", "x"),
            PlayEvent::new(None, "null-b", "x"),
        ];

        sort_newest_first(&mut events);

        let artists: Vec<&str> = events.iter().map(|event| event.artist.as_str()).collect();
        assert_eq!(artists, vec!["first", "second", "null-a", "null-b"]);
    }

    #[test]
    fn folded_dedup_ignores_case_and_spacing() {
        let existing = CanonicalDataset::new(
            Schema::default(),
            vec![PlayEvent::new(ts("2024-01-01T00:00:00Z"), "The Band", "Song")],
        );
        let increment = table(
            &["Date/Time", "Artist", "Song Name"],
            &[&["2024-01-01T00:00:00Z", " the  BAND", "song "]],
        );

        let exact =
            merge(Some(existing.clone()), &increment, &MergeOptions::default()).expect("exact");
        assert_eq!(exact.dataset.len(), 2);

        let folded = merge(
            Some(existing),
            &increment,
            &MergeOptions {
                dedup: DedupPolicy::Folded,
                ..MergeOptions::default()
            },
        )
        .expect("folded");
        assert_eq!(folded.dataset.len(), 1);
        assert_eq!(folded.dataset.events[0].artist, "The Band");
    }

    #[test]
    fn fold_text_applies_compatibility_forms() {
        assert_eq!(fold_text("  Ｂｅｙｏｎｃé\tLive "), "beyoncé live");
    }

    fn event_strategy() -> impl proptest::strategy::Strategy<Value = PlayEvent> {
        use proptest::prelude::*;
        (
            proptest::option::of(0i64..2_000_000_000),
            "[A-C]{1,2}",
            "[s-u]{1,2}",
        )
            .prop_map(|(seconds, artist, song)| {
                let played_at = seconds.and_then(|secs| {
                    let utc = time::OffsetDateTime::from_unix_timestamp(secs).ok()?;
                    Timestamp::from_datetime(time::PrimitiveDateTime::new(utc.date(), utc.time()))
                });
                PlayEvent::new(played_at, &artist, &song)
            })
    }

    fn to_raw(dataset: &CanonicalDataset) -> RawTable {
        let mut rows = dataset.to_table();
        let header = rows.remove(0);
        RawTable::new(header, rows)
    }

    proptest::proptest! {
        #[test]
        fn merging_a_dataset_with_itself_changes_nothing(
            events in proptest::collection::vec(event_strategy(), 0..40)
        ) {
            let seed = RawTable::new(
                Schema::default().header(),
                events.iter().map(PlayEvent::to_record).collect(),
            );
            let canonical = merge(None, &seed, &MergeOptions::default()).expect("seed").dataset;

            let merged = merge(Some(canonical.clone()), &to_raw(&canonical), &MergeOptions::default())
                .expect("merge");

            prop_assert_eq!(merged.dataset, canonical);
        }

        #[test]
        fn merged_output_has_no_duplicates_and_is_sorted(
            history in proptest::collection::vec(event_strategy(), 0..30),
            recent in proptest::collection::vec(event_strategy(), 0..30),
        ) {
            let existing = CanonicalDataset::new(Schema::default(), history.clone());
            let increment = RawTable::new(
                Schema::default().header(),
                recent.iter().map(PlayEvent::to_record).collect(),
            );

            let merged = merge(Some(existing), &increment, &MergeOptions::default())
                .expect("merge")
                .dataset;

            let unique: HashSet<&PlayEvent> = merged.events.iter().collect();
            prop_assert_eq!(unique.len(), merged.len());
            for event in history.iter().chain(recent.iter()) {
                proptest::prop_assert!(merged.events.contains(event));
            }
            for pair in merged.events.windows(2) {
                proptest::prop_assert!(compare_newest_first(&pair[0], &pair[1]) != Ordering::Greater);
            }
        }
    }
}
