use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tracing::{debug, info};

use crate::bot::Bot;
use crate::broker::BacktestBroker;
use crate::config::InstrumentSpec;
use crate::error::{Result, TradeError};
use crate::models::Granularity;

const MORNING_START: (u32, u32) = (9, 1);
const NIGHT_START: (u32, u32) = (21, 1);

/// One daily trading window. `end <= start` means the window runs past
/// midnight into the next calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SessionWindow {
    fn spans_midnight(&self) -> bool {
        self.end <= self.start
    }

    fn bounds(&self, date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
        let start = date.and_time(self.start);
        let end = if self.spans_midnight() {
            (date + chrono::Duration::days(1)).and_time(self.end)
        } else {
            date.and_time(self.end)
        };
        (start, end)
    }

    fn duration_hours(&self) -> f64 {
        let base = NaiveDate::from_ymd_opt(2000, 1, 3).expect("fixed date");
        let (start, end) = self.bounds(base);
        (end - start).num_seconds() as f64 / 3600.0
    }
}

fn time(hm: (u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(hm.0, hm.1, 0).expect("valid session time")
}

/// Builds the per-day replay windows for an instrument.
///
/// A single-session instrument needs exactly one stop time, a dual-session
/// one exactly two (morning stop first). Anything else is a configuration
/// defect and fails before the replay starts.
pub fn session_windows(spec: &InstrumentSpec) -> Result<Vec<SessionWindow>> {
    let stops = spec.validated_stops()?;
    let mismatch = |need: usize| {
        TradeError::InvalidSession(format!(
            "expected {need} stop time(s), got {}",
            stops.len()
        ))
    };
    match (spec.morning, spec.night) {
        (true, false) => {
            let [stop] = stops[..] else {
                return Err(mismatch(1));
            };
            Ok(vec![SessionWindow {
                start: time(MORNING_START),
                end: time(stop),
            }])
        }
        (false, true) => {
            let [stop] = stops[..] else {
                return Err(mismatch(1));
            };
            Ok(vec![SessionWindow {
                start: time(NIGHT_START),
                end: time(stop),
            }])
        }
        (true, true) => {
            let [morning_stop, night_stop] = stops[..] else {
                return Err(mismatch(2));
            };
            Ok(vec![
                SessionWindow {
                    start: time(MORNING_START),
                    end: time(morning_stop),
                },
                SessionWindow {
                    start: time(NIGHT_START),
                    end: time(night_stop),
                },
            ])
        }
        (false, false) => Err(TradeError::InvalidSession(
            "instrument trades neither session".to_string(),
        )),
    }
}

fn weekdays(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start
        .iter_days()
        .take_while(move |d| *d <= end)
        .filter(|d| d.weekday().num_days_from_monday() < 5)
}

/// Total session hours across the date range, skipping weekends. Used as the
/// progress denominator before the replay starts.
pub fn expected_session_hours(
    start: NaiveDate,
    end: NaiveDate,
    windows: &[SessionWindow],
) -> f64 {
    let per_day: f64 = windows.iter().map(|w| w.duration_hours()).sum();
    weekdays(start, end).count() as f64 * per_day
}

/// Replays one instrument through its session windows.
///
/// For every non-weekend date: load the date's minute buffer once, then walk
/// each window at the step granularity, reloading the second buffer whenever
/// the simulated hour changes, and tick the bot. The strategy's reset hook
/// runs after the date's last window.
pub fn run_replay(
    bot: &mut Bot,
    broker: &BacktestBroker,
    start: NaiveDate,
    end: NaiveDate,
    windows: &[SessionWindow],
    step: Granularity,
) -> anyhow::Result<()> {
    let instrument = bot.instrument().to_string();
    let step_delta = chrono::Duration::milliseconds(step.interval_millis());
    let total_hours = expected_session_hours(start, end, windows);
    let mut done_hours = 0.0;

    info!(instrument = %instrument, %start, %end, total_hours, "replay starting");

    for date in weekdays(start, end).collect::<Vec<_>>() {
        broker.fill_minute_buffer(&instrument, date)?;
        let mut loaded_date = date;

        let mut last_window_end = None;
        let mut loaded_hour: Option<NaiveDateTime> = None;
        for window in windows {
            let (period_start, period_end) = window.bounds(date);
            let mut t = period_start;
            while t <= period_end {
                // a window past midnight needs the next day's minute rows
                if t.date() != loaded_date {
                    broker.fill_minute_buffer(&instrument, t.date())?;
                    loaded_date = t.date();
                }
                let hour = t
                    .date()
                    .and_hms_opt(t.hour(), 0, 0)
                    .expect("top of hour exists");
                if loaded_hour != Some(hour) {
                    broker.fill_second_buffer(&instrument, hour)?;
                    loaded_hour = Some(hour);
                    done_hours += 1.0;
                    debug!(instrument = %instrument, done_hours, total_hours, "replay progress");
                }
                bot.update(t)?;
                t += step_delta;
            }
            last_window_end = Some(period_end);
        }

        if let Some(day_end) = last_window_end {
            bot.reset(day_end)?;
        }
        info!(instrument = %instrument, date = %date, done_hours, total_hours, "replay day finished");
    }

    info!(instrument = %instrument, "replay finished");
    Ok(())
}
