//! Recurring deny windows.
//!
//! Occurrences are generated in the window's local wall-clock time and
//! converted to UTC per occurrence, so DST shifts move the UTC instant but
//! never the local start time. Local times that fall into a DST gap are
//! shifted forward by one hour; ambiguous times resolve to the earlier
//! instant.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::{Candidate, Gate, Rule};
use crate::domain::{DenyWindow, Frequency};
use crate::error::PolicyConfigError;
use crate::policy::Sourced;

fn to_utc(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

/// Starts spaced by a fixed number of days.
fn stepped(
    start: NaiveDateTime,
    from: NaiveDateTime,
    to: NaiveDateTime,
    step_days: i64,
) -> Vec<NaiveDateTime> {
    let skip = ((from - start).num_days() / step_days - 1).max(0);
    let mut at = start + Duration::days(skip * step_days);
    let mut out = Vec::new();
    while at <= to {
        if at >= from {
            out.push(at);
        }
        at += Duration::days(step_days);
    }
    out
}

impl DenyWindow {
    pub fn tz(&self) -> Result<Tz, PolicyConfigError> {
        self.time_zone
            .parse::<Tz>()
            .map_err(|_| PolicyConfigError::UnknownTimeZone(self.time_zone.clone()))
    }

    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            "deny window"
        } else {
            &self.name
        }
    }

    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        self.tz()?;
        if let Some(end) = self.dtend {
            if end <= self.dtstart {
                return Err(PolicyConfigError::DenyWindowEndsBeforeStart {
                    name: self.label().to_string(),
                });
            }
        }
        match &self.recurrence {
            None if self.dtend.is_none() => Err(PolicyConfigError::DenyWindowUnbounded {
                name: self.label().to_string(),
            }),
            Some(rec) if rec.interval == 0 => Err(PolicyConfigError::InvalidInterval),
            _ => Ok(()),
        }
    }

    fn duration(&self) -> Option<Duration> {
        self.dtend.map(|end| end - self.dtstart)
    }

    /// Upper bound on the spacing between two occurrences.
    fn period(&self) -> Duration {
        match &self.recurrence {
            None => Duration::zero(),
            Some(rec) => {
                let interval = i64::from(rec.interval.max(1));
                match rec.frequency {
                    Frequency::Daily => Duration::days(interval),
                    Frequency::Weekly => Duration::weeks(interval),
                    Frequency::Monthly => Duration::days(31 * interval),
                }
            }
        }
    }

    /// Nominal local occurrence starts within `[from, to]`, ignoring `until`.
    fn occurrences(&self, from: NaiveDateTime, to: NaiveDateTime) -> Vec<NaiveDateTime> {
        let start = self.dtstart;
        let Some(rec) = &self.recurrence else {
            return if start >= from && start <= to {
                vec![start]
            } else {
                Vec::new()
            };
        };
        let interval = i64::from(rec.interval.max(1));
        let mut out = Vec::new();

        match rec.frequency {
            Frequency::Daily => return stepped(start, from, to, interval),
            Frequency::Weekly if rec.by_weekday.is_empty() => {
                return stepped(start, from, to, 7 * interval)
            }
            Frequency::Weekly => {
                let mut days: Vec<i64> = rec
                    .by_weekday
                    .iter()
                    .map(|d| i64::from(d.num_days_from_monday()))
                    .collect();
                days.sort_unstable();
                days.dedup();

                let week0 = start.date()
                    - Duration::days(i64::from(start.weekday().num_days_from_monday()));
                let weeks_before = (from.date() - week0).num_days() / 7;
                let mut week = ((weeks_before / interval) - 1).max(0) * interval;
                loop {
                    let monday = week0 + Duration::weeks(week);
                    if monday.and_time(start.time()) > to {
                        break;
                    }
                    for day in &days {
                        let at = (monday + Duration::days(*day)).and_time(start.time());
                        if at >= start && at >= from && at <= to {
                            out.push(at);
                        }
                    }
                    week += interval;
                }
            }
            Frequency::Monthly => {
                let Some(first) = start.date().with_day(1) else {
                    return out;
                };
                let months_before = i64::from(from.year() - start.year()) * 12
                    + i64::from(from.month()) - i64::from(start.month());
                let mut month = ((months_before / interval) - 1).max(0) * interval;
                loop {
                    let Some(month_start) = u32::try_from(month)
                        .ok()
                        .and_then(|m| first.checked_add_months(Months::new(m)))
                    else {
                        break;
                    };
                    if month_start.and_time(start.time()) > to {
                        break;
                    }
                    // Months without the start's day of month are skipped.
                    if let Some(day) = month_start.with_day(start.day()) {
                        let at = day.and_time(start.time());
                        if at >= from && at <= to {
                            out.push(at);
                        }
                    }
                    month += interval;
                }
            }
        }
        out
    }

    /// Whether `now` falls inside any occurrence of this window.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        let Ok(tz) = self.tz() else {
            return false;
        };
        let local_now = now.with_timezone(&tz).naive_local();
        let slack = Duration::days(2);
        let reach = self.duration().unwrap_or_else(Duration::zero).max(self.period()) + slack;
        let starts = self.occurrences(local_now - reach, local_now + self.period() + slack);
        let until = self.recurrence.as_ref().and_then(|r| r.until);

        starts.iter().enumerate().any(|(i, start)| {
            if until.is_some_and(|u| *start > u) {
                return false;
            }
            let begins = to_utc(tz, *start);
            if begins > now {
                return false;
            }
            let ends = match self.duration() {
                Some(d) => to_utc(tz, *start + d),
                None => match starts.get(i + 1) {
                    Some(next) => to_utc(tz, *next),
                    None => return false,
                },
            };
            now < ends
        })
    }
}

/// Blocks every candidate while any window is active.
#[derive(Debug, Clone)]
pub struct DenyWindowGate {
    pub windows: Vec<Sourced<DenyWindow>>,
    pub now: DateTime<Utc>,
}

impl DenyWindowGate {
    pub fn check(&self) -> Gate {
        match self.windows.iter().find(|w| w.rule.is_active_at(self.now)) {
            Some(active) => Gate::Blocked(format!(
                "denied by window '{}' (policy {})",
                active.rule.label(),
                active.policy_id
            )),
            None => Gate::Open,
        }
    }
}

impl<C: Candidate> Rule<C> for DenyWindowGate {
    fn name(&self) -> &'static str {
        "deny_window"
    }

    fn pre_validate(&self) -> Gate {
        self.check()
    }
}
