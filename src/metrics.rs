//! Metrics collected and aggregated while the load test runs.
//!
//! User threads send a [`MetricMessage`] over an unbounded flume channel for
//! every request made and every patient iteration finished. The parent
//! process aggregates requests into [`RequestMetricAggregate`]s keyed by
//! `METHOD name`, iterations into one [`ScenarioMetricAggregate`] per
//! programme, and failed requests into [`ErrorMetric`]s. Aggregation happens
//! in the parent so user threads spend all their time generating load.
//!
//! When the [`LoadTestMetrics`] object is viewed with [`std::fmt::Display`],
//! the aggregates are rendered as tables.

use chrono::prelude::*;
use http::StatusCode;
use itertools::Itertools;
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::{f32, fmt};

use crate::data::Programme;
use crate::flow::IterationOutcome;
use crate::util;

/// Used to send metrics from user threads to the parent process.
#[derive(Debug, Clone)]
pub enum MetricMessage {
    Request(RequestMetric),
    Iteration(IterationMetric),
}

/// The HTTP methods the load test issues. Form submissions follow the
/// method declared by the form, everything else is a GET.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Method::Get => write!(fmt, "GET"),
            Method::Post => write!(fmt, "POST"),
        }
    }
}

/// Everything tracked about a single request.
///
/// The session object builds one of these for each request it sends, and
/// forwards it to the parent when the response has been read. The `name` is
/// the request path with numeric ids collapsed, so requests against different
/// patients aggregate together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetric {
    /// How many milliseconds the load test had been running when the request was made.
    pub elapsed: u64,
    /// The method being used (ie, Get, Post).
    pub method: Method,
    /// The aggregation name of the request, such as `/sessions/:id/patients`.
    pub name: String,
    /// The full URL that was requested.
    pub url: String,
    /// The final URL returned, after redirects.
    pub final_url: String,
    /// Whether the request was redirected.
    pub redirected: bool,
    /// How many milliseconds the request took.
    pub response_time: u64,
    /// The HTTP response code (0 if the request never returned one).
    pub status_code: u16,
    /// Whether or not the request was successful.
    pub success: bool,
    /// Which user thread made the request.
    pub user: usize,
    /// The optional error caused by this request.
    pub error: String,
}

impl RequestMetric {
    pub(crate) fn new(method: Method, name: &str, url: &str, elapsed: u128, user: usize) -> Self {
        RequestMetric {
            elapsed: elapsed as u64,
            method,
            name: name.to_string(),
            url: url.to_string(),
            final_url: "".to_string(),
            redirected: false,
            response_time: 0,
            status_code: 0,
            success: true,
            user,
            error: "".to_string(),
        }
    }

    // Record the final URL returned.
    pub(crate) fn set_final_url(&mut self, final_url: &str) {
        self.final_url = final_url.to_string();
        if self.final_url != self.url {
            self.redirected = true;
        }
    }

    // Record how long the request took.
    pub(crate) fn set_response_time(&mut self, response_time: u128) {
        self.response_time = response_time as u64;
    }

    // Record the returned status code.
    pub(crate) fn set_status_code(&mut self, status_code: StatusCode) {
        self.status_code = status_code.as_u16();
    }
}

/// Metrics collected about a method-name pair, (for example `GET /sessions/:id/patients`).
///
/// [`RequestMetric`]s are sent by user threads to the parent process where
/// they are aggregated together into this structure and stored in
/// [`LoadTestMetrics::requests`].
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct RequestMetricAggregate {
    /// The request name for which metrics are being collected.
    pub name: String,
    /// The method for which metrics are being collected.
    pub method: Method,
    /// Per-response-time counters, tracking how often requests return with this response time.
    ///
    /// All response times between 1 and 100ms are stored without any rounding. Response
    /// times between 100 and 500ms are rounded to the nearest 10ms and then stored.
    /// Response times between 500 and 1000ms are rounded to the nearest 100ms. Response
    /// times larger than 1000ms are rounded to the nearest 1000ms.
    pub response_times: BTreeMap<usize, usize>,
    /// The shortest response time seen so far, not rounded.
    pub min_response_time: usize,
    /// The longest response time seen so far, not rounded.
    pub max_response_time: usize,
    /// A running total of all response times seen for this method-name pair.
    pub total_response_time: usize,
    /// A count of how many requests have been tracked for this method-name pair.
    pub response_time_counter: usize,
    /// Per-status-code counters, tracking how often each response code was returned.
    pub status_code_counts: HashMap<u16, usize>,
    /// How many of these requests were counted as successful.
    pub success_count: usize,
    /// How many of these requests were counted as failed.
    pub fail_count: usize,
}

impl RequestMetricAggregate {
    pub(crate) fn new(name: &str, method: Method) -> Self {
        trace!("new request aggregate: {} {}", method, name);
        RequestMetricAggregate {
            name: name.to_string(),
            method,
            response_times: BTreeMap::new(),
            min_response_time: 0,
            max_response_time: 0,
            total_response_time: 0,
            response_time_counter: 0,
            status_code_counts: HashMap::new(),
            success_count: 0,
            fail_count: 0,
        }
    }

    /// Track response time.
    pub(crate) fn set_response_time(&mut self, response_time: u64) {
        // Perform this conversion only once, then re-use throughout this function.
        let response_time_usize = response_time as usize;

        // Update minimum if this one is fastest yet.
        if self.min_response_time == 0
            || (response_time_usize > 0 && response_time_usize < self.min_response_time)
        {
            self.min_response_time = response_time_usize;
        }

        // Update maximum if this one is slowest yet.
        if response_time_usize > self.max_response_time {
            self.max_response_time = response_time_usize;
        }

        // Update total_response time, adding in this one.
        self.total_response_time += response_time_usize;

        // Each time we store a new response time, increment counter by one.
        self.response_time_counter += 1;

        // Round the response time so we can combine similar times together and
        // minimize required memory to store them.
        // No rounding for 1-100ms response times.
        let rounded_response_time = if response_time < 100 {
            response_time_usize
        }
        // Round to nearest 10 for 100-500ms response times.
        else if response_time < 500 {
            ((response_time as f64 / 10.0).round() * 10.0) as usize
        }
        // Round to nearest 100 for 500-1000ms response times.
        else if response_time < 1000 {
            ((response_time as f64 / 100.0).round() * 100.0) as usize
        }
        // Round to nearest 1000 for all larger response times.
        else {
            ((response_time as f64 / 1000.0).round() * 1000.0) as usize
        };

        let counter = match self.response_times.get(&rounded_response_time) {
            // We've seen this response_time before, increment counter.
            Some(c) => *c + 1,
            // First time we've seen this response time, initialize counter.
            None => 1,
        };
        self.response_times.insert(rounded_response_time, counter);
        debug!("incremented {} counter: {}", rounded_response_time, counter);
    }

    /// Increment counter for status code, creating new counter if first time seeing status code.
    pub(crate) fn set_status_code(&mut self, status_code: u16) {
        let counter = match self.status_code_counts.get(&status_code) {
            Some(c) => *c + 1,
            None => 1,
        };
        self.status_code_counts.insert(status_code, counter);
    }
}

impl Ord for RequestMetricAggregate {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.method, &self.name).cmp(&(&other.method, &other.name))
    }
}

impl PartialOrd for RequestMetricAggregate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The metrics sent to the parent each time a user finishes one patient
/// iteration, successfully or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationMetric {
    /// How many milliseconds the load test had been running when the iteration finished.
    pub elapsed: u64,
    /// The programme this iteration belongs to.
    pub programme: Programme,
    /// How many milliseconds the iteration took.
    pub run_time: u64,
    /// How the iteration ended.
    pub outcome: IterationOutcome,
    /// Which user thread ran the iteration.
    pub user: usize,
}

/// Aggregated per-programme iteration metrics.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ScenarioMetricAggregate {
    /// The programme this scenario drives.
    pub programme: Programme,
    /// Per-run-time counters, tracking how long iterations take, with the same
    /// rounding as request response times.
    pub times: BTreeMap<usize, usize>,
    /// The quickest iteration seen so far.
    pub min_time: usize,
    /// The slowest iteration seen so far.
    pub max_time: usize,
    /// Total combined iteration times seen so far.
    pub total_time: usize,
    /// How many iterations have finished, with any outcome.
    pub counter: usize,
    /// Iterations that registered, recorded consent as needed, and vaccinated.
    pub completed: usize,
    /// Iterations skipped because the patient search matched nothing.
    pub skipped_not_found: usize,
    /// Iterations skipped because attendance was already registered.
    pub skipped_already_registered: usize,
    /// Iterations skipped because no vaccine batch was offered.
    pub skipped_no_batch: usize,
    /// Iterations that ended in a flow error.
    pub failed: usize,
}

impl ScenarioMetricAggregate {
    pub(crate) fn new(programme: Programme) -> Self {
        ScenarioMetricAggregate {
            programme,
            times: BTreeMap::new(),
            min_time: 0,
            max_time: 0,
            total_time: 0,
            counter: 0,
            completed: 0,
            skipped_not_found: 0,
            skipped_already_registered: 0,
            skipped_no_batch: 0,
            failed: 0,
        }
    }

    /// Total iterations skipped for any reason.
    pub fn skipped(&self) -> usize {
        self.skipped_not_found + self.skipped_already_registered + self.skipped_no_batch
    }

    /// Track one finished iteration.
    pub(crate) fn record(&mut self, run_time: u64, outcome: &IterationOutcome) {
        let time_usize = run_time as usize;

        if self.min_time == 0 || (time_usize > 0 && time_usize < self.min_time) {
            self.min_time = time_usize;
        }
        if time_usize > self.max_time {
            self.max_time = time_usize;
        }
        self.total_time += time_usize;
        self.counter += 1;

        match outcome {
            IterationOutcome::Completed => self.completed += 1,
            IterationOutcome::PatientNotFound => self.skipped_not_found += 1,
            IterationOutcome::AlreadyRegistered => self.skipped_already_registered += 1,
            IterationOutcome::NoBatchAvailable => self.skipped_no_batch += 1,
            IterationOutcome::Failed => self.failed += 1,
        }

        // Iteration times are rounded the same way request response times are.
        let rounded_time = if run_time < 100 {
            time_usize
        } else if run_time < 500 {
            ((run_time as f64 / 10.0).round() * 10.0) as usize
        } else if run_time < 1000 {
            ((run_time as f64 / 100.0).round() * 100.0) as usize
        } else {
            ((run_time as f64 / 1000.0).round() * 1000.0) as usize
        };

        let counter = match self.times.get(&rounded_time) {
            Some(c) => *c + 1,
            None => 1,
        };
        self.times.insert(rounded_time, counter);
    }
}

/// For tracking and counting errors detected during a load test.
///
/// Multiple errors that share the same request method, the same request name,
/// and the same error text are contained within a single ErrorMetric object,
/// with `occurrences` indicating how many times this error was seen.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ErrorMetric {
    /// The method that resulted in an error.
    pub method: Method,
    /// The name of the request.
    pub name: String,
    /// The error string.
    pub error: String,
    /// A counter reflecting how many times this error occurred.
    pub occurrences: usize,
}

impl ErrorMetric {
    pub(crate) fn new(method: Method, name: String, error: String) -> Self {
        ErrorMetric {
            method,
            name,
            error,
            occurrences: 0,
        }
    }
}

/// All request aggregates, keyed by `METHOD name`.
pub type RequestMetrics = HashMap<String, RequestMetricAggregate>;

/// All scenario aggregates, keyed by programme.
pub type ScenarioMetrics = BTreeMap<Programme, ScenarioMetricAggregate>;

/// All error aggregates, keyed by `error.method.name`.
pub type ErrorMetrics = BTreeMap<String, ErrorMetric>;

/// All metrics collected during a load test.
///
/// Returned by [`LoadTest::execute()`](../struct.LoadTest.html#method.execute)
/// when a load test finishes, and displayed in tables with [`std::fmt::Display`].
#[derive(Clone, Debug, Default)]
pub struct LoadTestMetrics {
    /// An optional system timestamp indicating when the load test started.
    pub started: Option<DateTime<Local>>,
    /// Total number of seconds the load test ran.
    pub duration: usize,
    /// Total number of users launched during this load test.
    pub users: usize,
    /// Tracks details about each request made during the load test.
    pub requests: RequestMetrics,
    /// Tracks details about each programme's iterations.
    pub scenarios: ScenarioMetrics,
    /// Tracks and counts each time an error is detected during the load test.
    pub errors: ErrorMetrics,
    /// Flag indicating whether or not these are the final metrics.
    pub(crate) final_metrics: bool,
    /// Flag indicating whether or not to display status_codes.
    pub(crate) display_status_codes: bool,
    /// Flag indicating whether or not to display metrics when the test ends.
    pub(crate) display_metrics: bool,
}

impl LoadTestMetrics {
    /// Aggregate one request metric received from a user thread.
    pub(crate) fn record_request(&mut self, request: RequestMetric) {
        let key = format!("{} {}", request.method, request.name);
        let aggregate = self
            .requests
            .entry(key)
            .or_insert_with(|| RequestMetricAggregate::new(&request.name, request.method));
        aggregate.set_response_time(request.response_time);
        if request.status_code > 0 {
            aggregate.set_status_code(request.status_code);
        }
        if request.success {
            aggregate.success_count += 1;
        } else {
            aggregate.fail_count += 1;
            self.record_error(&request);
        }
    }

    /// Aggregate one iteration metric received from a user thread.
    pub(crate) fn record_iteration(&mut self, iteration: IterationMetric) {
        let aggregate = self
            .scenarios
            .entry(iteration.programme)
            .or_insert_with(|| ScenarioMetricAggregate::new(iteration.programme));
        aggregate.record(iteration.run_time, &iteration.outcome);
    }

    // Failed requests also aggregate into the error summary, keyed by the
    // combination of error text, method and name.
    fn record_error(&mut self, request: &RequestMetric) {
        let error_text = if request.error.is_empty() {
            format!("{}: {}", request.status_code, request.name)
        } else {
            request.error.clone()
        };
        let error_key = format!("{}.{}.{}", error_text, request.method, request.name);
        let mut error_metric = match self.errors.get(&error_key) {
            Some(error_metric) => error_metric.clone(),
            None => ErrorMetric::new(request.method, request.name.clone(), error_text),
        };
        error_metric.occurrences += 1;
        self.errors.insert(error_key, error_metric);
    }

    /// Consume and display all collected metrics from a completed load test.
    pub fn print(&self) {
        if self.display_metrics {
            info!("printing final metrics after {} seconds...", self.duration);
            print!("{}", self);
        }
    }

    /// Prepares a table of requests and fails.
    pub(crate) fn fmt_requests(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // If there's nothing to display, exit immediately.
        if self.requests.is_empty() {
            return Ok(());
        }

        writeln!(
            fmt,
            "\n === PER REQUEST METRICS ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>13} | {:>14} | {:>8} | {:>7}",
            "Name", "# reqs", "# fails", "req/s", "fail/s"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        let mut aggregate_fail_count = 0;
        let mut aggregate_total_count = 0;
        for (request_key, request) in self.requests.iter().sorted() {
            let total_count = request.success_count + request.fail_count;
            let fail_percent = if request.fail_count > 0 {
                request.fail_count as f32 / total_count as f32 * 100.0
            } else {
                0.0
            };
            let (reqs, fails) =
                per_second_calculations(self.duration, total_count, request.fail_count);
            let reqs_precision = determine_precision(reqs);
            let fails_precision = determine_precision(fails);
            // Compress 100.0 and 0.0 to 100 and 0 respectively to save width.
            if fail_percent as usize == 100 || fail_percent as usize == 0 {
                writeln!(
                    fmt,
                    " {:<24} | {:>13} | {:>14} | {:>8.reqs_p$} | {:>7.fails_p$}",
                    util::truncate_string(request_key, 24),
                    total_count.to_formatted_string(&Locale::en),
                    format!(
                        "{} ({}%)",
                        request.fail_count.to_formatted_string(&Locale::en),
                        fail_percent as usize
                    ),
                    reqs,
                    fails,
                    reqs_p = reqs_precision,
                    fails_p = fails_precision,
                )?;
            } else {
                writeln!(
                    fmt,
                    " {:<24} | {:>13} | {:>14} | {:>8.reqs_p$} | {:>7.fails_p$}",
                    util::truncate_string(request_key, 24),
                    total_count.to_formatted_string(&Locale::en),
                    format!(
                        "{} ({:.1}%)",
                        request.fail_count.to_formatted_string(&Locale::en),
                        fail_percent
                    ),
                    reqs,
                    fails,
                    reqs_p = reqs_precision,
                    fails_p = fails_precision,
                )?;
            }
            aggregate_total_count += total_count;
            aggregate_fail_count += request.fail_count;
        }
        if self.requests.len() > 1 {
            let aggregate_fail_percent = if aggregate_fail_count > 0 {
                aggregate_fail_count as f32 / aggregate_total_count as f32 * 100.0
            } else {
                0.0
            };
            writeln!(
                fmt,
                " -------------------------+---------------+----------------+----------+--------"
            )?;
            let (reqs, fails) =
                per_second_calculations(self.duration, aggregate_total_count, aggregate_fail_count);
            let reqs_precision = determine_precision(reqs);
            let fails_precision = determine_precision(fails);
            // Compress 100.0 and 0.0 to 100 and 0 respectively to save width.
            if aggregate_fail_percent as usize == 100 || aggregate_fail_percent as usize == 0 {
                writeln!(
                    fmt,
                    " {:<24} | {:>13} | {:>14} | {:>8.reqs_p$} | {:>7.fails_p$}",
                    "Aggregated",
                    aggregate_total_count.to_formatted_string(&Locale::en),
                    format!(
                        "{} ({}%)",
                        aggregate_fail_count.to_formatted_string(&Locale::en),
                        aggregate_fail_percent as usize
                    ),
                    reqs,
                    fails,
                    reqs_p = reqs_precision,
                    fails_p = fails_precision,
                )?;
            } else {
                writeln!(
                    fmt,
                    " {:<24} | {:>13} | {:>14} | {:>8.reqs_p$} | {:>7.fails_p$}",
                    "Aggregated",
                    aggregate_total_count.to_formatted_string(&Locale::en),
                    format!(
                        "{} ({:.1}%)",
                        aggregate_fail_count.to_formatted_string(&Locale::en),
                        aggregate_fail_percent
                    ),
                    reqs,
                    fails,
                    reqs_p = reqs_precision,
                    fails_p = fails_precision,
                )?;
            }
        }

        Ok(())
    }

    /// Prepares a table of response times.
    pub(crate) fn fmt_response_times(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // If there's nothing to display, exit immediately.
        if self.requests.is_empty() {
            return Ok(());
        }

        let mut aggregate_response_times: BTreeMap<usize, usize> = BTreeMap::new();
        let mut aggregate_total_response_time: usize = 0;
        let mut aggregate_response_time_counter: usize = 0;
        let mut aggregate_min_response_time: usize = 0;
        let mut aggregate_max_response_time: usize = 0;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>11} | {:>10} | {:>10} | {:>11}",
            "Name", "Avg (ms)", "Min", "Max", "Median"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        for (request_key, request) in self.requests.iter().sorted() {
            let average = match request.response_time_counter {
                0 => 0.0,
                _ => request.total_response_time as f32 / request.response_time_counter as f32,
            };
            let average_precision = determine_precision(average);

            aggregate_response_times =
                merge_times(aggregate_response_times, request.response_times.clone());
            aggregate_total_response_time += &request.total_response_time;
            aggregate_response_time_counter += &request.response_time_counter;
            aggregate_min_response_time =
                update_min_time(aggregate_min_response_time, request.min_response_time);
            aggregate_max_response_time =
                update_max_time(aggregate_max_response_time, request.max_response_time);

            writeln!(
                fmt,
                " {:<24} | {:>11.avg_precision$} | {:>10} | {:>11} | {:>10}",
                util::truncate_string(request_key, 24),
                average,
                format_number(request.min_response_time),
                format_number(request.max_response_time),
                format_number(util::median(
                    &request.response_times,
                    request.response_time_counter,
                    request.min_response_time,
                    request.max_response_time
                )),
                avg_precision = average_precision,
            )?;
        }
        if self.requests.len() > 1 {
            let average = match aggregate_response_time_counter {
                0 => 0.0,
                _ => aggregate_total_response_time as f32 / aggregate_response_time_counter as f32,
            };
            let average_precision = determine_precision(average);

            writeln!(
                fmt,
                " -------------------------+-------------+------------+-------------+-----------"
            )?;
            writeln!(
                fmt,
                " {:<24} | {:>11.avg_precision$} | {:>10} | {:>11} | {:>10}",
                "Aggregated",
                average,
                format_number(aggregate_min_response_time),
                format_number(aggregate_max_response_time),
                format_number(util::median(
                    &aggregate_response_times,
                    aggregate_response_time_counter,
                    aggregate_min_response_time,
                    aggregate_max_response_time
                )),
                avg_precision = average_precision,
            )?;
        }

        Ok(())
    }

    /// Prepares a table of slowest response times within several percentiles.
    pub(crate) fn fmt_percentiles(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only include percentiles when displaying the final metrics report.
        if !self.final_metrics || self.requests.is_empty() {
            return Ok(());
        }

        let mut aggregate_response_times: BTreeMap<usize, usize> = BTreeMap::new();
        let mut aggregate_response_time_counter: usize = 0;
        let mut aggregate_min_response_time: usize = 0;
        let mut aggregate_max_response_time: usize = 0;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " Slowest page load within specified percentile of requests (in ms):"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>6} | {:>6} | {:>6} | {:>6} | {:>6} | {:>6}",
            "Name", "50%", "75%", "98%", "99%", "99.9%", "99.99%"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        for (request_key, request) in self.requests.iter().sorted() {
            aggregate_response_times =
                merge_times(aggregate_response_times, request.response_times.clone());
            aggregate_response_time_counter += &request.response_time_counter;
            aggregate_min_response_time =
                update_min_time(aggregate_min_response_time, request.min_response_time);
            aggregate_max_response_time =
                update_max_time(aggregate_max_response_time, request.max_response_time);
            writeln!(
                fmt,
                " {:<24} | {:>6} | {:>6} | {:>6} | {:>6} | {:>6} | {:>6}",
                util::truncate_string(request_key, 24),
                calculate_response_time_percentile(
                    &request.response_times,
                    request.response_time_counter,
                    request.min_response_time,
                    request.max_response_time,
                    0.5
                ),
                calculate_response_time_percentile(
                    &request.response_times,
                    request.response_time_counter,
                    request.min_response_time,
                    request.max_response_time,
                    0.75
                ),
                calculate_response_time_percentile(
                    &request.response_times,
                    request.response_time_counter,
                    request.min_response_time,
                    request.max_response_time,
                    0.98
                ),
                calculate_response_time_percentile(
                    &request.response_times,
                    request.response_time_counter,
                    request.min_response_time,
                    request.max_response_time,
                    0.99
                ),
                calculate_response_time_percentile(
                    &request.response_times,
                    request.response_time_counter,
                    request.min_response_time,
                    request.max_response_time,
                    0.999
                ),
                calculate_response_time_percentile(
                    &request.response_times,
                    request.response_time_counter,
                    request.min_response_time,
                    request.max_response_time,
                    0.9999
                ),
            )?;
        }
        if self.requests.len() > 1 {
            writeln!(
                fmt,
                " -------------------------+--------+--------+--------+--------+--------+-------"
            )?;
            writeln!(
                fmt,
                " {:<24} | {:>6} | {:>6} | {:>6} | {:>6} | {:>6} | {:>6}",
                "Aggregated",
                calculate_response_time_percentile(
                    &aggregate_response_times,
                    aggregate_response_time_counter,
                    aggregate_min_response_time,
                    aggregate_max_response_time,
                    0.5
                ),
                calculate_response_time_percentile(
                    &aggregate_response_times,
                    aggregate_response_time_counter,
                    aggregate_min_response_time,
                    aggregate_max_response_time,
                    0.75
                ),
                calculate_response_time_percentile(
                    &aggregate_response_times,
                    aggregate_response_time_counter,
                    aggregate_min_response_time,
                    aggregate_max_response_time,
                    0.98
                ),
                calculate_response_time_percentile(
                    &aggregate_response_times,
                    aggregate_response_time_counter,
                    aggregate_min_response_time,
                    aggregate_max_response_time,
                    0.99
                ),
                calculate_response_time_percentile(
                    &aggregate_response_times,
                    aggregate_response_time_counter,
                    aggregate_min_response_time,
                    aggregate_max_response_time,
                    0.999
                ),
                calculate_response_time_percentile(
                    &aggregate_response_times,
                    aggregate_response_time_counter,
                    aggregate_min_response_time,
                    aggregate_max_response_time,
                    0.9999
                ),
            )?;
        }

        Ok(())
    }

    /// Prepares a table of iterations per programme.
    pub(crate) fn fmt_scenarios(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // If there's nothing to display, exit immediately.
        if self.scenarios.is_empty() {
            return Ok(());
        }

        writeln!(
            fmt,
            "\n === PER SCENARIO METRICS ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>11} | {:>11} | {:>10} | {:>8}",
            "Name", "# iters", "# complete", "# skipped", "# failed"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        let mut aggregate_counter = 0;
        let mut aggregate_completed = 0;
        let mut aggregate_skipped = 0;
        let mut aggregate_failed = 0;
        for scenario in self.scenarios.values() {
            writeln!(
                fmt,
                " {:<24} | {:>11} | {:>11} | {:>10} | {:>8}",
                scenario.programme.to_string(),
                scenario.counter.to_formatted_string(&Locale::en),
                scenario.completed.to_formatted_string(&Locale::en),
                scenario.skipped().to_formatted_string(&Locale::en),
                scenario.failed.to_formatted_string(&Locale::en),
            )?;
            aggregate_counter += scenario.counter;
            aggregate_completed += scenario.completed;
            aggregate_skipped += scenario.skipped();
            aggregate_failed += scenario.failed;
        }
        if self.scenarios.len() > 1 {
            writeln!(
                fmt,
                " -------------------------+-------------+-------------+------------+---------"
            )?;
            writeln!(
                fmt,
                " {:<24} | {:>11} | {:>11} | {:>10} | {:>8}",
                "Aggregated",
                aggregate_counter.to_formatted_string(&Locale::en),
                aggregate_completed.to_formatted_string(&Locale::en),
                aggregate_skipped.to_formatted_string(&Locale::en),
                aggregate_failed.to_formatted_string(&Locale::en),
            )?;
        }

        // A second table breaks down skip reasons, but only when something was
        // actually skipped.
        if aggregate_skipped > 0 {
            writeln!(
                fmt,
                " ------------------------------------------------------------------------------"
            )?;
            writeln!(
                fmt,
                " {:<24} | {:>14} | {:>17} | {:>14}",
                "Name", "not found", "still registered", "no batches"
            )?;
            writeln!(
                fmt,
                " ------------------------------------------------------------------------------"
            )?;
            for scenario in self.scenarios.values() {
                writeln!(
                    fmt,
                    " {:<24} | {:>14} | {:>17} | {:>14}",
                    scenario.programme.to_string(),
                    scenario.skipped_not_found.to_formatted_string(&Locale::en),
                    scenario
                        .skipped_already_registered
                        .to_formatted_string(&Locale::en),
                    scenario.skipped_no_batch.to_formatted_string(&Locale::en),
                )?;
            }
        }

        Ok(())
    }

    /// Prepares a table of iteration times per programme.
    pub(crate) fn fmt_scenario_times(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // If there's nothing to display, exit immediately.
        if self.scenarios.is_empty() {
            return Ok(());
        }

        let mut aggregate_times: BTreeMap<usize, usize> = BTreeMap::new();
        let mut aggregate_total_time: usize = 0;
        let mut aggregate_time_counter: usize = 0;
        let mut aggregate_min_time: usize = 0;
        let mut aggregate_max_time: usize = 0;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>11} | {:>10} | {:>10} | {:>11}",
            "Name", "Avg (ms)", "Min", "Max", "Median"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        for scenario in self.scenarios.values() {
            let average = match scenario.counter {
                0 => 0.0,
                _ => scenario.total_time as f32 / scenario.counter as f32,
            };
            let average_precision = determine_precision(average);

            aggregate_times = merge_times(aggregate_times, scenario.times.clone());
            aggregate_total_time += scenario.total_time;
            aggregate_time_counter += scenario.counter;
            aggregate_min_time = update_min_time(aggregate_min_time, scenario.min_time);
            aggregate_max_time = update_max_time(aggregate_max_time, scenario.max_time);

            writeln!(
                fmt,
                " {:<24} | {:>11.avg_precision$} | {:>10} | {:>11} | {:>10}",
                scenario.programme.to_string(),
                average,
                format_number(scenario.min_time),
                format_number(scenario.max_time),
                format_number(util::median(
                    &scenario.times,
                    scenario.counter,
                    scenario.min_time,
                    scenario.max_time
                )),
                avg_precision = average_precision,
            )?;
        }
        if self.scenarios.len() > 1 {
            let average = match aggregate_time_counter {
                0 => 0.0,
                _ => aggregate_total_time as f32 / aggregate_time_counter as f32,
            };
            let average_precision = determine_precision(average);

            writeln!(
                fmt,
                " -------------------------+-------------+------------+-------------+-----------"
            )?;
            writeln!(
                fmt,
                " {:<24} | {:>11.avg_precision$} | {:>10} | {:>11} | {:>10}",
                "Aggregated",
                average,
                format_number(aggregate_min_time),
                format_number(aggregate_max_time),
                format_number(util::median(
                    &aggregate_times,
                    aggregate_time_counter,
                    aggregate_min_time,
                    aggregate_max_time
                )),
                avg_precision = average_precision,
            )?;
        }

        Ok(())
    }

    /// Prepares a table of status codes.
    pub(crate) fn fmt_status_codes(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // If there's nothing to display, exit immediately.
        if !self.display_status_codes || self.requests.is_empty() {
            return Ok(());
        }

        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " {:<24} | {:>51} ", "Name", "Status codes")?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        let mut aggregated_status_code_counts: HashMap<u16, usize> = HashMap::new();
        for (request_key, request) in self.requests.iter().sorted() {
            let codes = prepare_status_codes(
                &request.status_code_counts,
                &mut Some(&mut aggregated_status_code_counts),
            );

            writeln!(
                fmt,
                " {:<24} | {:>51}",
                util::truncate_string(request_key, 24),
                codes,
            )?;
        }
        writeln!(
            fmt,
            " -------------------------+----------------------------------------------------"
        )?;
        let codes = prepare_status_codes(&aggregated_status_code_counts, &mut None);
        writeln!(fmt, " {:<24} | {:>51} ", "Aggregated", codes)?;

        Ok(())
    }

    /// Prepares a table of errors.
    pub(crate) fn fmt_errors(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only include errors when displaying the final metrics report, and if there are
        // errors to display.
        if !self.final_metrics || self.errors.is_empty() {
            return Ok(());
        }

        // Write the errors into a vector which can then be sorted by occurrences.
        let mut errors: Vec<(usize, String)> = Vec::new();
        for error in self.errors.values() {
            errors.push((
                error.occurrences,
                format!("{} {}: {}", error.method, error.name, error.error),
            ));
        }

        writeln!(
            fmt,
            "\n === ERRORS ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " {:<11} | Error", "Count")?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;

        // Reverse sort errors to display the error occurring the most first.
        for (occurrences, error) in errors.iter().sorted().rev() {
            writeln!(fmt, " {:<12}  {}", format_number(*occurrences), error)?;
        }

        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;

        Ok(())
    }
}

impl fmt::Display for LoadTestMetrics {
    // Formats from zero to seven tables of data, depending on what data is
    // contained and which flags are set.
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_scenarios(fmt)?;
        self.fmt_scenario_times(fmt)?;
        self.fmt_requests(fmt)?;
        self.fmt_response_times(fmt)?;
        self.fmt_percentiles(fmt)?;
        self.fmt_status_codes(fmt)?;
        self.fmt_errors(fmt)
    }
}

/// Helper to calculate requests and fails per seconds.
pub(crate) fn per_second_calculations(duration: usize, total: usize, fail: usize) -> (f32, f32) {
    let requests_per_second;
    let fails_per_second;
    if duration == 0 {
        requests_per_second = 0.0;
        fails_per_second = 0.0;
    } else {
        requests_per_second = total as f32 / duration as f32;
        fails_per_second = fail as f32 / duration as f32;
    }
    (requests_per_second, fails_per_second)
}

fn determine_precision(value: f32) -> usize {
    if value < 1000.0 {
        2
    } else {
        0
    }
}

/// Format large number in locale appropriate style.
pub(crate) fn format_number(number: usize) -> String {
    (number).to_formatted_string(&Locale::en)
}

/// A helper function that merges together response-time counters.
pub(crate) fn merge_times(
    mut global_response_times: BTreeMap<usize, usize>,
    local_response_times: BTreeMap<usize, usize>,
) -> BTreeMap<usize, usize> {
    for (response_time, count) in &local_response_times {
        let counter = match global_response_times.get(response_time) {
            Some(c) => *c + count,
            None => *count,
        };
        global_response_times.insert(*response_time, counter);
    }
    global_response_times
}

/// A helper function to update the global minimum time based on local time.
pub(crate) fn update_min_time(mut global_min: usize, min: usize) -> usize {
    if global_min == 0 || (min > 0 && min < global_min) {
        global_min = min;
    }
    global_min
}

/// A helper function to update the global maximum time based on local time.
pub(crate) fn update_max_time(mut global_max: usize, max: usize) -> usize {
    if global_max < max {
        global_max = max;
    }
    global_max
}

/// Get the response time that a certain number of percent of the requests finished within.
pub(crate) fn calculate_response_time_percentile(
    response_times: &BTreeMap<usize, usize>,
    total_requests: usize,
    min: usize,
    max: usize,
    percent: f32,
) -> String {
    let percentile_request = (total_requests as f32 * percent).round() as usize;

    let mut total_count: usize = 0;
    for (value, counter) in response_times {
        total_count += counter;
        if total_count >= percentile_request {
            if *value < min {
                return format_number(min);
            } else if *value > max {
                return format_number(max);
            } else {
                return format_number(*value);
            }
        }
    }
    format_number(0)
}

/// Helper to count and aggregate seen status codes.
pub(crate) fn prepare_status_codes(
    status_code_counts: &HashMap<u16, usize>,
    aggregate_counts: &mut Option<&mut HashMap<u16, usize>>,
) -> String {
    let mut codes: String = "".to_string();
    for (status_code, count) in status_code_counts {
        if codes.is_empty() {
            codes = format!(
                "{} [{}]",
                count.to_formatted_string(&Locale::en),
                status_code
            );
        } else {
            codes = format!(
                "{}, {} [{}]",
                codes.clone(),
                count.to_formatted_string(&Locale::en),
                status_code
            );
        }
        if let Some(aggregate_status_code_counts) = aggregate_counts.as_mut() {
            let new_count;
            if let Some(existing_status_code_count) = aggregate_status_code_counts.get(status_code)
            {
                new_count = *existing_status_code_count + *count;
            } else {
                new_count = *count;
            }
            aggregate_status_code_counts.insert(*status_code, new_count);
        }
    }
    codes
}
