//! Utility functions used throughout Vaxload.

use regex::Regex;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time;
use url::Url;

use crate::{VaxloadError, CANCELED};

/// Parse a string representing a time span and return the number of seconds.
///
/// Can be specified as an integer, indicating seconds. Or can use integers
/// together with one or more of "h", "m", and "s", in that order, indicating
/// "hours", "minutes", and "seconds".
///
/// Valid formats include: 20, 20s, 3m, 2h, 1h20m, 3h30m10s, etc. This is the
/// format accepted by the `--run-time` option.
///
/// # Example
/// ```rust
/// use vaxload::util;
///
/// // 1 hour 2 minutes and 3 seconds is 3,723 seconds.
/// assert_eq!(util::parse_timespan("1h2m3s"), 3_723);
///
/// // 45 seconds is 45 seconds.
/// assert_eq!(util::parse_timespan("45"), 45);
///
/// // Invalid value is 0 seconds.
/// assert_eq!(util::parse_timespan("foo"), 0);
/// ```
pub fn parse_timespan(time_str: &str) -> usize {
    match usize::from_str(time_str) {
        // If an integer is passed in, assume it's seconds.
        Ok(t) => {
            trace!("{} is integer: {} seconds", time_str, t);
            t
        }
        // Otherwise use a regex to extract hours, minutes and seconds from string.
        Err(_) => {
            let re = Regex::new(r"((?P<hours>\d+?)h)?((?P<minutes>\d+?)m)?((?P<seconds>\d+?)s)?")
                .unwrap();
            let time_matches = re.captures(time_str).unwrap();
            let hours = match time_matches.name("hours") {
                Some(_) => usize::from_str(&time_matches["hours"]).unwrap(),
                None => 0,
            };
            let minutes = match time_matches.name("minutes") {
                Some(_) => usize::from_str(&time_matches["minutes"]).unwrap(),
                None => 0,
            };
            let seconds = match time_matches.name("seconds") {
                Some(_) => usize::from_str(&time_matches["seconds"]).unwrap(),
                None => 0,
            };
            let total = hours * 60 * 60 + minutes * 60 + seconds;
            trace!(
                "{} hours {} minutes {} seconds: {} seconds",
                hours,
                minutes,
                seconds,
                total
            );
            total
        }
    }
}

/// Parse a pause range of the form "MIN-MAX" (or a bare "N") into an inclusive
/// range of seconds, as accepted by the `--pause` option.
///
/// # Example
/// ```rust
/// use vaxload::util;
///
/// // A range pauses between the two bounds.
/// assert_eq!(util::parse_pause("3-10"), Some((3, 10)));
///
/// // A bare integer is a fixed pause.
/// assert_eq!(util::parse_pause("5"), Some((5, 5)));
///
/// // An inverted or unparseable range is rejected.
/// assert_eq!(util::parse_pause("10-3"), None);
/// assert_eq!(util::parse_pause("quick"), None);
/// ```
pub fn parse_pause(pause_str: &str) -> Option<(u64, u64)> {
    let (min, max) = match pause_str.split_once('-') {
        Some((min_str, max_str)) => (
            u64::from_str(min_str.trim()).ok()?,
            u64::from_str(max_str.trim()).ok()?,
        ),
        None => {
            let fixed = u64::from_str(pause_str.trim()).ok()?;
            (fixed, fixed)
        }
    };
    if min > max {
        None
    } else {
        Some((min, max))
    }
}

/// Calculate median for a BTreeMap of usizes.
///
/// The Median is the "middle" of a sorted list of numbers. The list is
/// comprised of two parts: the integer value on the left, and the number of
/// occurrences of the integer on the right. For example (5, 1) indicates that
/// the integer "5" is included 1 time.
///
/// The function requires three parameters the metrics aggregation already has
/// while building the BTreeMap: the total occurrences of all integers, the
/// smallest integer, and the largest integer in the list, avoiding extra
/// passes while a load test is running.
///
/// # Example
/// ```rust
/// use std::collections::BTreeMap;
/// use vaxload::util;
///
/// let mut btree: BTreeMap<usize, usize> = BTreeMap::new();
/// btree.insert(1, 1);
/// btree.insert(99, 1);
/// btree.insert(100, 1);
///
/// // Median (middle) value in this list of 3 integers is 99.
/// assert_eq!(util::median(&btree, 3, 1, 100), 99);
/// ```
pub fn median(
    btree: &BTreeMap<usize, usize>,
    total_elements: usize,
    min: usize,
    max: usize,
) -> usize {
    let mut total_count: usize = 0;
    let half_elements: usize = (total_elements as f64 / 2.0).round() as usize;
    for (value, counter) in btree {
        total_count += counter;
        if total_count >= half_elements {
            // We're working with rounded values, it's possible the median is greater
            // than the max response time, or smaller than the min response time --
            // in these cases return the actual values.
            if *value > max {
                return max;
            } else if *value < min {
                return min;
            } else {
                return *value;
            }
        }
    }
    0
}

/// Truncate strings when they're too long to display.
///
/// If a string is longer than the specified max length, this function removes
/// the extra characters and replaces the last two with a double-period
/// ellipsis.
///
/// # Example
/// ```rust
/// use vaxload::util;
///
/// // All but 22 characters are truncated, with ".." appended.
/// assert_eq!(
///     util::truncate_string("POST /sessions/42/patients/7/hpv/vaccinations", 24),
///     "POST /sessions/42/pati.."
/// );
///
/// // Short enough request names are returned unchanged.
/// assert_eq!(util::truncate_string("GET /users/sign_in", 24), "GET /users/sign_in");
/// ```
pub fn truncate_string(str_to_truncate: &str, max_length: usize) -> String {
    if str_to_truncate.char_indices().count() > max_length {
        match str_to_truncate.char_indices().nth(max_length - 2) {
            None => str_to_truncate.to_string(),
            Some((idx, _)) => format!("{}..", &str_to_truncate[..idx]),
        }
    } else {
        str_to_truncate.to_string()
    }
}

/// Sleep for a specified duration, minus the time spent doing other things.
///
/// Tracks the time spent since the last sleep through the returned
/// [`tokio::time::Instant`], so a loop that sleeps with this helper completes
/// each iteration in a consistent amount of time regardless of how much work
/// happened between sleeps.
pub async fn sleep_minus_drift(
    duration: std::time::Duration,
    drift: tokio::time::Instant,
) -> tokio::time::Instant {
    match duration.checked_sub(drift.elapsed()) {
        Some(delay) if delay.as_nanos() > 0 => tokio::time::sleep(delay).await,
        _ => debug!("sleep_minus_drift: drift was greater than or equal to duration, not sleeping"),
    };
    tokio::time::Instant::now()
}

/// Determine if a timer expired, with second granularity.
///
/// If the timer was started more than `run_time` seconds ago return `true`,
/// otherwise return `false`. A `run_time` of 0 never expires.
pub fn timer_expired(started: time::Instant, run_time: usize) -> bool {
    run_time > 0 && started.elapsed().as_secs() >= run_time as u64
}

/// Determine if a timer expired, with millisecond granularity.
///
/// If the timer was started more than `elapsed` milliseconds ago return `true`,
/// otherwise return `false`. An `elapsed` of 0 never expires.
pub fn ms_timer_expired(started: time::Instant, elapsed: usize) -> bool {
    elapsed > 0 && started.elapsed().as_millis() >= elapsed as u128
}

/// Helper function to determine if a host can be parsed.
///
/// # Example
/// ```rust
/// use vaxload::util;
///
/// // Hostname is a valid URL.
/// assert_eq!(util::is_valid_host("http://localhost/").is_ok(), true);
///
/// // IP is a valid URL.
/// assert_eq!(util::is_valid_host("http://127.0.0.1").is_ok(), true);
///
/// // Protocol is required.
/// assert_eq!(util::is_valid_host("example.com/").is_ok(), false);
/// ```
pub fn is_valid_host(host: &str) -> Result<bool, VaxloadError> {
    Url::parse(host).map_err(|parse_error| VaxloadError::InvalidHost {
        host: host.to_string(),
        detail: "Invalid host.".to_string(),
        parse_error,
    })?;
    Ok(true)
}

// Internal helper to configure the control-c handler. Shutdown cleanly on the first
// ctrl-c. Exit abruptly on the second ctrl-c.
pub(crate) fn setup_ctrlc_handler() {
    match ctrlc::set_handler(move || {
        // We've caught a ctrl-c, determine if it's the first time or an additional time.
        if *CANCELED.read().unwrap() {
            warn!("caught another ctrl-c, exiting immediately...");
            std::process::exit(1);
        } else {
            warn!("caught ctrl-c, stopping...");
            let mut canceled = CANCELED.write().unwrap();
            *canceled = true;
        }
    }) {
        Ok(_) => (),
        Err(e) => {
            // When running in tests, reset CANCELED with each new test allowing testing
            // of the ctrl-c handler.
            let mut canceled = CANCELED.write().unwrap();
            *canceled = false;
            info!("reset ctrl-c handler: {}", e);
        }
    }
}
