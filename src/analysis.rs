use crate::model::{CanonicalDataset, PlayEvent, Timestamp};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use time::{Date, Duration, PrimitiveDateTime};

const DEFAULT_TOP_COUNT: usize = 10;
const DEFAULT_ROLLING_WINDOW: usize = 7;
const WEEKDAY_LABELS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnalysisPeriod {
    Days30,
    Days90,
    Days365,
    AllTime,
}

impl AnalysisPeriod {
    pub fn label(self) -> &'static str {
        match self {
            Self::Days30 => "Last 30 days",
            Self::Days90 => "Last 90 days",
            Self::Days365 => "Last 365 days",
            Self::AllTime => "All Time",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::Days30 => Self::Days90,
            Self::Days90 => Self::Days365,
            Self::Days365 => Self::AllTime,
            Self::AllTime => Self::Days30,
        }
    }

    pub fn days(self) -> Option<i64> {
        match self {
            Self::Days30 => Some(30),
            Self::Days90 => Some(90),
            Self::Days365 => Some(365),
            Self::AllTime => None,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.trim_end_matches("days").trim_end_matches('d') {
            "30" => Some(Self::Days30),
            "90" => Some(Self::Days90),
            "365" => Some(Self::Days365),
            "all" | "all-time" | "alltime" | "lifetime" => Some(Self::AllTime),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisQuery {
    pub period: AnalysisPeriod,
    pub top_count: usize,
    pub rolling_window: usize,
}

impl Default for AnalysisQuery {
    fn default() -> Self {
        Self {
            period: AnalysisPeriod::Days365,
            top_count: DEFAULT_TOP_COUNT,
            rolling_window: DEFAULT_ROLLING_WINDOW,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyMetrics {
    pub total_plays: u64,
    pub unique_artists: u64,
    pub unique_songs: u64,
    pub avg_daily_plays: f64,
    pub most_active_hour: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtistPlays {
    pub artist: String,
    pub plays: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SongPlays {
    pub song_name: String,
    pub artist: String,
    pub plays: u64,
}

impl SongPlays {
    pub fn label(&self) -> String {
        format!("{} - {}", self.song_name, self.artist)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyPoint {
    #[serde(serialize_with = "serialize_date")]
    pub date: Date,
    pub plays: u64,
    pub rolling_avg: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSnapshot {
    pub period: AnalysisPeriod,
    pub newest_play: Option<Timestamp>,
    pub metrics: KeyMetrics,
    pub top_artists: Vec<ArtistPlays>,
    pub top_songs: Vec<SongPlays>,
    pub hourly: [u64; 24],
    pub weekday: [u64; 7],
    pub daily: Vec<DailyPoint>,
}

impl AnalysisSnapshot {
    pub fn weekday_label(index: usize) -> &'static str {
        WEEKDAY_LABELS.get(index).copied().unwrap_or("?")
    }
}

/// The period window ends at the newest play, not at the current clock.
pub fn analyze(dataset: &CanonicalDataset, query: &AnalysisQuery) -> AnalysisSnapshot {
    let newest_play = dataset.events.iter().filter_map(|event| event.played_at).max();
    let cutoff = match (query.period.days(), newest_play) {
        (Some(days), Some(newest)) => Some(
            newest
                .datetime()
                .checked_sub(Duration::days(days))
                .unwrap_or(PrimitiveDateTime::MIN),
        ),
        _ => None,
    };

    let in_period: Vec<&PlayEvent> = dataset
        .events
        .iter()
        .filter(|event| match (query.period.days(), cutoff) {
            (None, _) => true,
            (Some(_), Some(cutoff)) => event
                .played_at
                .is_some_and(|played_at| played_at.datetime() >= cutoff),
            (Some(_), None) => false,
        })
        .collect();

    let mut hourly = [0_u64; 24];
    let mut weekday = [0_u64; 7];
    let mut by_artist: HashMap<&str, u64> = HashMap::new();
    let mut by_song: HashMap<(&str, &str), u64> = HashMap::new();
    for event in &in_period {
        *by_artist.entry(event.artist.as_str()).or_default() += 1;
        *by_song
            .entry((event.song_name.as_str(), event.artist.as_str()))
            .or_default() += 1;
        if let Some(played_at) = event.played_at {
            hourly[usize::from(played_at.hour())] += 1;
            let day = played_at.date().weekday().number_days_from_monday();
            weekday[usize::from(day)] += 1;
        }
    }

    let unique_songs = in_period
        .iter()
        .map(|event| event.song_name.as_str())
        .collect::<HashSet<_>>()
        .len() as u64;

    let metrics = KeyMetrics {
        total_plays: in_period.len() as u64,
        unique_artists: by_artist.len() as u64,
        unique_songs,
        avg_daily_plays: average_daily_plays(&in_period, query.period),
        most_active_hour: most_active_hour(&hourly),
    };

    let mut top_artists: Vec<ArtistPlays> = by_artist
        .into_iter()
        .map(|(artist, plays)| ArtistPlays {
            artist: artist.to_string(),
            plays,
        })
        .collect();
    top_artists.sort_by(|a, b| compare_ranked(a.plays, &a.artist, b.plays, &b.artist));
    top_artists.truncate(query.top_count);

    let mut top_songs: Vec<SongPlays> = by_song
        .into_iter()
        .map(|((song_name, artist), plays)| SongPlays {
            song_name: song_name.to_string(),
            artist: artist.to_string(),
            plays,
        })
        .collect();
    top_songs.sort_by(|a, b| {
        compare_ranked(a.plays, &a.song_name, b.plays, &b.song_name).then_with(|| {
            a.artist
                .to_ascii_lowercase()
                .cmp(&b.artist.to_ascii_lowercase())
        })
    });
    top_songs.truncate(query.top_count);

    AnalysisSnapshot {
        period: query.period,
        newest_play,
        metrics,
        top_artists,
        top_songs,
        hourly,
        weekday,
        daily: build_daily_series(&dataset.events, query.rolling_window),
    }
}

fn average_daily_plays(events: &[&PlayEvent], period: AnalysisPeriod) -> f64 {
    if events.is_empty() {
        return 0.0;
    }
    let days = match period.days() {
        Some(days) => days,
        None => {
            let times = events.iter().filter_map(|event| event.played_at);
            let (Some(first), Some(last)) = (times.clone().min(), times.max()) else {
                return 0.0;
            };
            (last.datetime() - first.datetime()).whole_days() + 1
        }
    };
    events.len() as f64 / days as f64
}

/// Lowest hour wins a tie.
fn most_active_hour(hourly: &[u64; 24]) -> Option<u8> {
    let mut best: Option<(u8, u64)> = None;
    for (hour, count) in (0_u8..).zip(hourly.iter().copied()) {
        if count == 0 {
            continue;
        }
        if best.is_none_or(|(_, top)| count > top) {
            best = Some((hour, count));
        }
    }
    best.map(|(hour, _)| hour)
}

fn compare_ranked(a_plays: u64, a_name: &str, b_plays: u64, b_name: &str) -> Ordering {
    b_plays.cmp(&a_plays).then_with(|| {
        a_name
            .to_ascii_lowercase()
            .cmp(&b_name.to_ascii_lowercase())
    })
}

fn build_daily_series(events: &[PlayEvent], window: usize) -> Vec<DailyPoint> {
    let mut per_day: BTreeMap<Date, u64> = BTreeMap::new();
    for played_at in events.iter().filter_map(|event| event.played_at) {
        *per_day.entry(played_at.date()).or_default() += 1;
    }

    let counts: Vec<(Date, u64)> = per_day.into_iter().collect();
    let window = window.max(1);
    let lead = (window - 1) / 2;
    counts
        .iter()
        .enumerate()
        .map(|(idx, (date, plays))| {
            let end = idx + lead;
            let rolling_avg = if end < counts.len() && end + 1 >= window {
                let sum: u64 = counts[end + 1 - window..=end]
                    .iter()
                    .map(|(_, count)| count)
                    .sum();
                Some(sum as f64 / window as f64)
            } else {
                None
            };
            DailyPoint {
                date: *date,
                plays: *plays,
                rolling_avg,
            }
        })
        .collect()
}

fn serialize_date<S>(date: &Date, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(date)
}
