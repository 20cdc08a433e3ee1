//! Turn Sequencing
//!
//! Pure functions over the phase cycle:
//!
//! ```text
//! Creation ─► Night ─► Dawn ─► Day ─► Sunset ─► Night ─► ...
//!                               ▲
//!                        date increments here
//! ```
//!
//! plus the computation of a turn's wall-clock end from the configured
//! cut-offs. Full phases (Night, Day) end at a time of day on an allowed
//! weekday; half phases (Dawn, Sunset) last a fixed duration; Creation stays
//! open until the moderator closes it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc, Weekday};
use serde::{Serialize, Deserialize};

/// Date counter of the first turn.
pub const FIRST_DATE: i32 = 0;

/// Entering this phase increments the date.
pub const DATE_INCREMENT_PHASE: Phase = Phase::Day;

/// Game phase.
///
/// Variant order is the order of phases inside one date, so deriving `Ord`
/// on [`TurnKey`] sorts turns chronologically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Role assignment, before the first night.
    Creation,
    /// Voting and election.
    Day,
    /// Vote resolution.
    Sunset,
    /// Powers are recorded.
    Night,
    /// Night actions are resolved.
    Dawn,
}

impl Phase {
    /// Phase following this one in the cycle.
    pub fn next(self) -> Phase {
        match self {
            Phase::Creation => Phase::Night,
            Phase::Night => Phase::Dawn,
            Phase::Dawn => Phase::Day,
            Phase::Day => Phase::Sunset,
            Phase::Sunset => Phase::Night,
        }
    }

    /// Dawn, Sunset and Creation are half phases: nobody acts in them.
    pub fn is_half(self) -> bool {
        matches!(self, Phase::Dawn | Phase::Sunset | Phase::Creation)
    }

    /// Single letter code, as used in archived dumps.
    pub fn code(self) -> char {
        match self {
            Phase::Creation => 'C',
            Phase::Night => 'N',
            Phase::Dawn => 'W',
            Phase::Day => 'D',
            Phase::Sunset => 'S',
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Creation => "Creation",
            Phase::Night => "Night",
            Phase::Dawn => "Dawn",
            Phase::Day => "Day",
            Phase::Sunset => "Sunset",
        };
        f.write_str(name)
    }
}

/// Identity of a turn inside one game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TurnKey {
    /// Date counter.
    pub date: i32,
    /// Phase within the date.
    pub phase: Phase,
}

impl TurnKey {
    /// Create a key.
    pub const fn new(date: i32, phase: Phase) -> Self {
        Self { date, phase }
    }

    /// The first turn of every game.
    pub const fn first() -> Self {
        Self::new(FIRST_DATE, Phase::Creation)
    }

    /// Following turn.
    pub fn next(self) -> Self {
        let phase = self.phase.next();
        let date = if phase == DATE_INCREMENT_PHASE { self.date + 1 } else { self.date };
        Self::new(date, phase)
    }

    /// Preceding turn, `None` for the first one.
    pub fn prev(self) -> Option<Self> {
        match self.phase {
            Phase::Creation => None,
            Phase::Night if self.date == FIRST_DATE => Some(Self::first()),
            Phase::Night => Some(Self::new(self.date, Phase::Sunset)),
            Phase::Dawn => Some(Self::new(self.date, Phase::Night)),
            Phase::Day => Some(Self::new(self.date - 1, Phase::Dawn)),
            Phase::Sunset => Some(Self::new(self.date, Phase::Day)),
        }
    }

    /// Whole days elapsed since the game began.
    pub fn full_days_from_start(self) -> i32 {
        self.date - FIRST_DATE
    }
}

impl fmt::Display for TurnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.phase, self.date)
    }
}

/// A turn with its time window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Turn identity.
    pub key: TurnKey,
    /// Start instant.
    pub begin: DateTime<Utc>,
    /// End instant; open for the last turn of an unfinished game.
    pub end: Option<DateTime<Utc>>,
}

impl Turn {
    /// Whether the turn is over at `now`.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end.map_or(false, |end| now >= end)
    }
}

// =============================================================================
// SCHEDULE
// =============================================================================

/// Wall-clock schedule of the phases.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnSchedule {
    /// Time of day at which nights end.
    pub night_end: NaiveTime,
    /// Time of day at which days end.
    pub day_end: NaiveTime,
    /// Length of Dawn and Sunset.
    pub half_phase: Duration,
    /// Weekdays on which a full phase may end. Empty means every day.
    pub allowed_weekdays: Vec<Weekday>,
    /// Offset of the village's local time from UTC, in minutes.
    pub utc_offset_minutes: i32,
}

impl Default for TurnSchedule {
    fn default() -> Self {
        Self {
            night_end: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            day_end: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN),
            half_phase: Duration::zero(),
            allowed_weekdays: Vec::new(),
            utc_offset_minutes: 0,
        }
    }
}

impl TurnSchedule {
    /// Create schedule from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let time = |name: &str, fallback: NaiveTime| {
            std::env::var(name)
                .ok()
                .and_then(|v| NaiveTime::parse_from_str(v.trim(), "%H:%M").ok())
                .unwrap_or(fallback)
        };

        Self {
            night_end: time("LUPUS_NIGHT_END", defaults.night_end),
            day_end: time("LUPUS_DAY_END", defaults.day_end),
            half_phase: std::env::var("LUPUS_HALF_PHASE_SECS")
                .ok()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .map(Duration::seconds)
                .unwrap_or(defaults.half_phase),
            allowed_weekdays: std::env::var("LUPUS_WEEKDAYS")
                .map(|v| parse_weekdays(&v))
                .unwrap_or(defaults.allowed_weekdays),
            utc_offset_minutes: std::env::var("LUPUS_UTC_OFFSET_MINUTES")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.utc_offset_minutes),
        }
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }

    /// Build a turn starting at `begin`, deriving its end.
    ///
    /// Once the game is over every new turn is left open.
    pub fn set_begin_end(&self, key: TurnKey, begin: DateTime<Utc>, game_over: bool) -> Turn {
        let end = if game_over {
            None
        } else {
            match key.phase {
                Phase::Creation => None,
                Phase::Night => Some(self.advance_to_time(begin, self.night_end)),
                Phase::Day => Some(self.advance_to_time(begin, self.day_end)),
                Phase::Dawn | Phase::Sunset => Some(begin + self.half_phase),
            }
        };
        Turn { key, begin, end }
    }

    /// Next instant after `now` whose local time is `target` on an allowed
    /// weekday.
    pub fn advance_to_time(&self, now: DateTime<Utc>, target: NaiveTime) -> DateTime<Utc> {
        let offset = self.offset();
        let local = now.with_timezone(&offset);
        let mut date = local.date_naive();
        if local.time() >= target {
            date = date.succ_opt().unwrap_or(date);
        }
        if !self.allowed_weekdays.is_empty() {
            for _ in 0..7 {
                if self.allowed_weekdays.contains(&date.weekday()) {
                    break;
                }
                date = date.succ_opt().unwrap_or(date);
            }
        }
        let naive = date.and_time(target);
        match offset.from_local_datetime(&naive).single() {
            Some(at) => at.with_timezone(&Utc),
            None => Utc.from_utc_datetime(&naive),
        }
    }
}

/// Parse a comma separated weekday list ("Mon,Wed,fri"); unknown names are
/// skipped.
pub fn parse_weekdays(value: &str) -> Vec<Weekday> {
    value
        .split(',')
        .filter_map(|name| Weekday::from_str(name.trim()).ok())
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
