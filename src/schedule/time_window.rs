use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::InvalidTimeWindow;

pub const MINUTES_PER_DAY: u16 = 24 * 60;
pub const MIDDAY: u16 = 12 * 60;

/// Half-open interval of minutes since midnight: `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: u16,
    pub end: u16,
}

impl Span {
    /// Touching spans (`a.end == b.start`) do not overlap
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

static MORNING: [Span; 1] = [Span { start: 0, end: MIDDAY }];
static AFTERNOON: [Span; 1] = [Span { start: MIDDAY, end: MINUTES_PER_DAY }];
static ALL_DAY: [Span; 2] = [
    Span { start: 0, end: MIDDAY },
    Span { start: MIDDAY, end: MINUTES_PER_DAY },
];

/// When a task (or slot, or substitute) is busy.
///
/// The two half days meet at midday without overlapping, which is what lets a
/// helper hold one morning task and one afternoon task on a split day. An
/// all-day window blocks both halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeWindow {
    Range(Span),
    Morning,
    Afternoon,
    AllDay,
}

impl TimeWindow {
    /// Parses `HH:MM-HH:MM` or one of the all-day / half-day markers
    pub fn parse(input: &str) -> Result<Self, InvalidTimeWindow> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(InvalidTimeWindow::new(input, "empty"));
        }

        let lower = trimmed.to_lowercase();
        match lower.as_str() {
            "all-day" | "allday" | "all day" | "ganztags" | "ganztägig" => {
                return Ok(TimeWindow::AllDay)
            }
            "morning" | "am" | "vormittag" | "vormittags" => return Ok(TimeWindow::Morning),
            "afternoon" | "pm" | "nachmittag" | "nachmittags" => {
                return Ok(TimeWindow::Afternoon)
            }
            _ => {}
        }

        let (start, end) =
            split_range(&lower).ok_or_else(|| InvalidTimeWindow::new(input, "expected HH:MM-HH:MM"))?;
        let start = parse_time_to_minutes(start, false)
            .ok_or_else(|| InvalidTimeWindow::new(input, "invalid start time"))?;
        let end = parse_time_to_minutes(end, true)
            .ok_or_else(|| InvalidTimeWindow::new(input, "invalid end time"))?;
        if end <= start {
            return Err(InvalidTimeWindow::new(input, "end must be after start"));
        }

        Ok(TimeWindow::Range(Span { start, end }))
    }

    pub fn spans(&self) -> &[Span] {
        match self {
            TimeWindow::Range(span) => std::slice::from_ref(span),
            TimeWindow::Morning => &MORNING,
            TimeWindow::Afternoon => &AFTERNOON,
            TimeWindow::AllDay => &ALL_DAY,
        }
    }

    /// Smallest span covering the whole window
    pub fn bounds(&self) -> Span {
        let spans = self.spans();
        let start = spans.iter().map(|s| s.start).min().unwrap_or(0);
        let end = spans.iter().map(|s| s.end).max().unwrap_or(0);
        Span { start, end }
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.spans()
            .iter()
            .any(|a| other.spans().iter().any(|b| a.overlaps(b)))
    }

    pub fn is_all_day(&self) -> bool {
        matches!(self, TimeWindow::AllDay)
    }

    /// True if `other` lies entirely inside this window
    pub fn contains(&self, other: &TimeWindow) -> bool {
        self.bounds().contains(&other.bounds())
    }
}

pub fn overlaps(a: &TimeWindow, b: &TimeWindow) -> bool {
    a.overlaps(b)
}

fn split_range(s: &str) -> Option<(&str, &str)> {
    for sep in ["-", "–", " bis "] {
        if let Some((start, end)) = s.split_once(sep) {
            return Some((start.trim(), end.trim()));
        }
    }
    None
}

/// Parses a time string (HH:MM) to minutes since midnight.
/// `24:00` is only accepted as the end of a range.
fn parse_time_to_minutes(time_str: &str, is_end: bool) -> Option<u16> {
    let (hours, minutes) = time_str.split_once(':')?;
    if !is_clock_field(hours) || !is_clock_field(minutes) || minutes.len() != 2 {
        return None;
    }
    let hours: u16 = hours.parse().ok()?;
    let minutes: u16 = minutes.parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    if hours == 24 && minutes == 0 && is_end {
        return Some(MINUTES_PER_DAY);
    }
    if hours >= 24 {
        return None;
    }
    Some(hours * 60 + minutes)
}

fn is_clock_field(field: &str) -> bool {
    !field.is_empty() && field.len() <= 2 && field.chars().all(|c| c.is_ascii_digit())
}

/// Formats minutes since midnight to time string (HH:MM)
pub fn minutes_to_time_string(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeWindow::Range(span) => write!(
                f,
                "{}-{}",
                minutes_to_time_string(span.start),
                minutes_to_time_string(span.end)
            ),
            TimeWindow::Morning => f.write_str("morning"),
            TimeWindow::Afternoon => f.write_str("afternoon"),
            TimeWindow::AllDay => f.write_str("all-day"),
        }
    }
}

impl std::str::FromStr for TimeWindow {
    type Err = InvalidTimeWindow;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeWindow::parse(s)
    }
}

impl Serialize for TimeWindow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeWindow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TimeWindow::parse(&raw).map_err(serde::de::Error::custom)
    }
}
