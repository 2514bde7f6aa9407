//! Trading-session clock.
//!
//! Bridges wall-clock time to the simulator's first time step: how much of
//! "day one" is still tradable, and whether day one is today or the next
//! session. Weekends are non-trading days; exchange holidays are not modelled.

use crate::errors::{EngineError, EngineResult};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    PreMarket,
    InSession,
    AfterHours,
    NonTradingDay,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreMarket => write!(f, "pre-market"),
            Self::InSession => write!(f, "in session"),
            Self::AfterHours => write!(f, "after hours"),
            Self::NonTradingDay => write!(f, "non-trading day"),
        }
    }
}

/// Market session boundaries in the exchange's local time.
#[derive(Debug, Clone, Copy)]
pub struct MarketSession {
    offset: FixedOffset,
    open: NaiveTime,
    close: NaiveTime,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SessionContext {
    pub state: SessionState,
    /// Tradable fraction of day one, in [0, 1].
    pub first_day_fraction: f64,
    pub today: NaiveDate,
    pub first_day: NaiveDate,
    pub first_day_is_today: bool,
    pub minutes_remaining: f64,
    /// Set when the fraction came from the caller instead of the clock.
    pub fraction_overridden: bool,
}

impl MarketSession {
    pub fn new(utc_offset_minutes: i32, open: NaiveTime, close: NaiveTime) -> EngineResult<Self> {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or_else(|| {
            EngineError::Config(format!("invalid market UTC offset: {utc_offset_minutes} minutes"))
        })?;
        if open >= close {
            return Err(EngineError::Config("session open must precede close".into()));
        }
        Ok(Self { offset, open, close })
    }

    #[inline]
    pub fn session_minutes(&self) -> f64 {
        (self.close - self.open).num_seconds() as f64 / 60.0
    }

    pub fn context_at(&self, now: DateTime<Utc>) -> SessionContext {
        let local = now.with_timezone(&self.offset);
        let today = local.date_naive();
        let time = local.time();

        let (state, first_day, fraction, minutes_remaining) = if !is_trading_day(today) {
            (SessionState::NonTradingDay, next_trading_day(today), 1.0, 0.0)
        } else if time < self.open {
            (SessionState::PreMarket, today, 1.0, self.session_minutes())
        } else if time < self.close {
            let remaining = (self.close - time).num_seconds() as f64 / 60.0;
            let fraction = (remaining / self.session_minutes()).clamp(0.0, 1.0);
            (SessionState::InSession, today, fraction, remaining)
        } else {
            (SessionState::AfterHours, next_trading_day(today), 1.0, 0.0)
        };

        tracing::debug!(%state, %today, %first_day, fraction, "session context");

        SessionContext {
            state,
            first_day_fraction: fraction,
            today,
            first_day,
            first_day_is_today: first_day == today,
            minutes_remaining,
            fraction_overridden: false,
        }
    }
}

impl SessionContext {
    /// Replace the clock-derived fraction with one supplied by the session
    /// collaborator. Clamped to [0, 1]; non-finite values are ignored.
    pub fn with_fraction_override(mut self, fraction: Option<f64>) -> Self {
        if let Some(f) = fraction.filter(|f| f.is_finite()) {
            self.first_day_fraction = f.clamp(0.0, 1.0);
            self.fraction_overridden = true;
        }
        self
    }

    pub fn calendar(&self, expiration: Option<NaiveDate>) -> DayCalendar {
        DayCalendar {
            today: self.today,
            first_day: self.first_day,
            expiration,
        }
    }
}

#[inline]
pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn next_trading_day(date: NaiveDate) -> NaiveDate {
    let mut next = date + Duration::days(1);
    while !is_trading_day(next) {
        next += Duration::days(1);
    }
    next
}

/// Maps simulated day indices to calendar dates.
///
/// Day 0 is "now" (immediate fills); day k >= 1 is the k-th simulated day,
/// with day 1 being day one of the session context.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct DayCalendar {
    pub today: NaiveDate,
    pub first_day: NaiveDate,
    pub expiration: Option<NaiveDate>,
}

impl DayCalendar {
    pub fn date_for_day(&self, day: u32) -> NaiveDate {
        if day == 0 {
            return self.today;
        }
        self.first_day + Duration::days(i64::from(day) - 1)
    }

    /// Simulated days from day one through expiration, inclusive.
    pub fn days_until_expiration(&self) -> Option<i64> {
        self.expiration
            .map(|exp| (exp - self.first_day).num_days() + 1)
    }
}

/// Human-readable phrase for a simulated day: "immediately", "today",
/// "tomorrow" or "N days", annotated with the date when a calendar is known.
pub fn describe_day(day: u32, calendar: Option<&DayCalendar>) -> String {
    if day == 0 {
        return "immediately".to_string();
    }
    match calendar {
        Some(cal) => {
            let date = cal.date_for_day(day);
            let offset = (date - cal.today).num_days();
            format!("{} ({})", relative_phrase(offset), date.format("%a %b %-d"))
        }
        // Without a calendar day one is assumed to be today
        None => relative_phrase(i64::from(day) - 1),
    }
}

fn relative_phrase(days_from_today: i64) -> String {
    match days_from_today {
        i64::MIN..=0 => "today".to_string(),
        1 => "tomorrow".to_string(),
        n => format!("{n} days"),
    }
}
