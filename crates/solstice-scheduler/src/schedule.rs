//! Next-run computation for job schedules.
//!
//! Pure functions from (schedule, reference time) to the next fire time in
//! epoch milliseconds. Calendar schedules are evaluated with the `cron`
//! crate in the schedule's timezone; fixed and interval schedules are plain
//! arithmetic.

use std::str::FromStr;

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use rand::Rng;
use tracing::warn;

use solstice_store::Schedule;

use crate::config::MIN_REFIRE_GAP_MS;

/// Compute the next fire time for `schedule` strictly after `from_ms`.
///
/// - `At` yields its fixed timestamp; one-shot lifecycle (never re-firing)
///   is the policy layer's job, not the calculator's.
/// - `Every` yields `from_ms + every_ms`.
/// - `Cron` yields the next matching instant in the schedule's timezone
///   (UTC when unset), plus a uniform random stagger in `[0, stagger_ms)`
///   unless the schedule is marked exact. The stagger re-rolls on every
///   call; it only smooths load, so instability across recomputes is fine.
///
/// Returns `None` for unparseable cron expressions or timezones (with a
/// warning), or when the expression has no future fire time.
pub fn next_run(schedule: &Schedule, from_ms: i64) -> Option<i64> {
    match schedule {
        Schedule::At { at_ms } => Some(*at_ms),
        Schedule::Every { every_ms } => Some(from_ms.saturating_add(*every_ms)),
        Schedule::Cron {
            expr,
            tz,
            stagger_ms,
            exact,
        } => {
            let base = next_cron_run(expr, tz.as_deref(), from_ms)?;
            let jitter = if *stagger_ms > 0 && !exact {
                rand::thread_rng().gen_range(0..*stagger_ms)
            } else {
                0
            };
            Some(base + jitter)
        }
    }
}

/// Maintenance variant of [`next_run`]: cron results are floored to
/// `floor_ms + MIN_REFIRE_GAP_MS`, so a run finishing in the same second as
/// its next calendar slot cannot spin-loop the timer across DST edges.
pub fn next_run_with_floor(schedule: &Schedule, from_ms: i64, floor_ms: i64) -> Option<i64> {
    let next = next_run(schedule, from_ms)?;
    match schedule {
        Schedule::Cron { .. } => Some(next.max(floor_ms + MIN_REFIRE_GAP_MS)),
        _ => Some(next),
    }
}

/// Evaluate a cron expression in `tz` and return the next match after
/// `from_ms`.
fn next_cron_run(expr: &str, tz: Option<&str>, from_ms: i64) -> Option<i64> {
    let tz: Tz = match tz {
        Some(name) => match name.parse() {
            Ok(tz) => tz,
            Err(_) => {
                warn!(tz = %name, "unknown timezone in cron schedule");
                return None;
            }
        },
        None => chrono_tz::UTC,
    };

    let normalized = normalize_cron_expr(expr);
    let parsed = match cron::Schedule::from_str(&normalized) {
        Ok(s) => s,
        Err(e) => {
            warn!(expr = %expr, error = %e, "invalid cron expression");
            return None;
        }
    };

    let from = Utc.timestamp_millis_opt(from_ms).single()?.with_timezone(&tz);
    parsed.after(&from).next().map(|dt| dt.timestamp_millis())
}

/// Accept the common 5-field form by prepending a seconds field.
fn normalize_cron_expr(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}
