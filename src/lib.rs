//! # Vaxload
//!
//! Vaxload is a load testing tool for the web application behind a school-aged
//! immunisation service. It drives the same forms a nursing team works through
//! on a vaccination session day, using [`reqwest`](https://docs.rs/reqwest/) to
//! provide a convenient HTTP client and [`tokio`](https://docs.rs/tokio/) to
//! run one asynchronous user per simulated nurse.
//!
//! Each user signs in once and then works through a batch of patients read from
//! a per-programme CSV data file. For every patient the user:
//!
//!  1. searches the session patient list and registers the patient as attending;
//!  2. records a phoned parental consent response, unless the patient page
//!     already shows consent was given;
//!  3. records the vaccination against the first vaccine batch offered.
//!
//! Patients who can not be found, are already registered, or have no vaccine
//! batch available are skipped and counted, matching what a nurse would see in
//! the real service.
//!
//! ## Patient data
//!
//! Patient records are loaded from one CSV file per programme in the directory
//! named by `--data-dir` (defaulting to `data`). The file for the `hpv`
//! programme is `hpv-vaccination-data.csv`, and likewise for `flu`, `menacwy`
//! and `tdipv`. Each row holds the patient's name, date of birth, address,
//! parent contact details, and the session the patient belongs to.
//!
//! Each active programme becomes one scenario. A scenario runs one iteration
//! per patient record, capped by `--iterations`, and shares those iterations
//! between `--users` simulated nurses. When neither option is set, each
//! programme falls back to its built-in plan (for example `hpv` runs 300
//! iterations across 10 users). Never are more users launched than there are
//! iterations to run.
//!
//! ## Running a load test
//!
//! Point Vaxload at the host being tested, with credentials for a nurse
//! account:
//!
//! ```bash
//! $ vaxload --host https://sais.example.com \
//!     --username nurse.joy@example.com --password secret \
//!     --programmes hpv --users 4 --iterations 24
//! ```
//!
//! While running, Vaxload logs its progress:
//!
//! ```bash
//! 15:42:46 [ INFO] Output verbosity level: INFO
//! 15:42:46 [ INFO] Logfile verbosity level: WARN
//! 15:42:46 [ INFO] global host configured: https://sais.example.com
//! 15:42:46 [ INFO] entering load test phase: Starting
//! 15:42:46 [ INFO] launching user 1 from hpv with 6 patients...
//! 15:42:46 [ INFO] launching user 2 from hpv with 6 patients...
//! 15:42:46 [ INFO] launching user 3 from hpv with 6 patients...
//! 15:42:47 [ INFO] launching user 4 from hpv with 6 patients...
//! 15:42:47 [ INFO] launched 4 users...
//! 15:42:47 [ INFO] entering load test phase: Running
//! 15:44:02 [ INFO] all users have completed their iterations
//! 15:44:02 [ INFO] entering load test phase: Stopping
//! 15:44:02 [ INFO] stopping after 76 seconds...
//! 15:44:02 [ INFO] waiting for users to exit
//! 15:44:02 [ INFO] exiting user 2 from hpv...
//! 15:44:02 [ INFO] exiting user 1 from hpv...
//! 15:44:02 [ INFO] exiting user 4 from hpv...
//! 15:44:02 [ INFO] exiting user 3 from hpv...
//! 15:44:02 [ INFO] printing final metrics after 76 seconds...
//! ```
//!
//! When the test completes, the final metrics break down what happened per
//! scenario, with iterations that were skipped split out by why:
//!
//! ```bash
//!  === PER SCENARIO METRICS ===
//!  ------------------------------------------------------------------------------
//!  Name                     |     # iters |  # complete |  # skipped | # failed
//!  ------------------------------------------------------------------------------
//!  hpv                      |          24 |          21 |          3 |        0
//!  ------------------------------------------------------------------------------
//!  Name                     |      not found | still registered |     no batches
//!  ------------------------------------------------------------------------------
//!  hpv                      |              1 |                2 |              0
//!  ------------------------------------------------------------------------------
//!  Name                     |    Avg (ms) |        Min |        Max |      Median
//!  ------------------------------------------------------------------------------
//!  hpv                      |    9,621.53 |      4,102 |      13,588 |      9,443
//! ```
//!
//! Further tables break the same load test down per request, with paths
//! normalized so that, for example, every patient page rolls up into
//! `/sessions/:id/patients/:id/hpv`:
//!
//! ```bash
//!  === PER REQUEST METRICS ===
//!  ------------------------------------------------------------------------------
//!  Name                     |        # reqs |        # fails |    req/s |  fail/s
//!  ------------------------------------------------------------------------------
//!  GET /users/sign-in       |             4 |         0 (0%) |     0.05 |    0.00
//!  POST /users/sign-in      |             4 |         0 (0%) |     0.05 |    0.00
//!  GET /sessions/:id/pati.. |            45 |         0 (0%) |     0.59 |    0.00
//!  POST /sessions/:id/pat.. |           187 |         2 (1%) |     2.46 |    0.02
//!  -------------------------+---------------+----------------+----------+--------
//!  Aggregated               |           240 |       2 (0.8%) |     3.15 |    0.02
//! ```
//!
//! Response times, percentiles, status codes and collected errors follow in the
//! same format. Failed requests never halt a user: they are counted, logged to
//! `--error-log` if enabled, and the iteration carries on or is recorded as
//! failed depending on what broke.
//!
//! ## Request logging
//!
//! Every failed request can be written as JSON to the file named by
//! `--error-log`. When `--debug-log` is enabled, the failing response headers
//! and body are recorded alongside, which is usually enough to work out what
//! the server objected to without re-running the test.
//!
//! ## License
//!
//! Copyright 2020-21 Jeremy Andrews
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! you may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//! <http://www.apache.org/licenses/LICENSE-2.0>
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

#[macro_use]
extern crate log;

pub mod config;
pub mod data;
pub mod flow;
pub mod logger;
pub mod metrics;
pub mod page;
pub mod session;
mod user;
pub mod util;

use chrono::prelude::*;
use gumdrop::Options;
use itertools::Itertools;
use lazy_static::lazy_static;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::RwLock;
use std::{cmp, fmt, io, time};
use tokio::runtime::Runtime;
use url::Url;

use crate::config::Configuration;
use crate::data::{PatientRecord, Programme};
use crate::logger::{LoggerJoinHandle, LoggerTx};
use crate::metrics::{LoadTestMetrics, MetricMessage};
use crate::session::PageSession;
use crate::user::UserCommand;

/// Constant defining the default milliseconds between launching users.
const DEFAULT_HATCH_DELAY: u64 = 100;

/// Constant defining the default directory patient data files are loaded from.
const DEFAULT_DATA_DIR: &str = "data";

lazy_static! {
    // CANCELED flips to true the first time ctrl-c is caught, so the parent can
    // shut the load test down cleanly and still display metrics.
    pub(crate) static ref CANCELED: RwLock<bool> = RwLock::new(false);
}

/// An enumeration of all errors a [`LoadTest`](./struct.LoadTest.html) can return.
#[derive(Debug)]
pub enum VaxloadError {
    /// Wraps a [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    Io(io::Error),
    /// Wraps a [`reqwest::Error`](https://docs.rs/reqwest/*/reqwest/struct.Error.html).
    Reqwest(reqwest::Error),
    /// Wraps a [`csv::Error`](https://docs.rs/csv/*/csv/struct.Error.html).
    Csv(csv::Error),
    /// Failed to parse a hostname.
    InvalidHost {
        /// The invalid hostname that caused this error.
        host: String,
        /// An optional explanation of the error.
        detail: String,
        /// Wraps a [`url::ParseError`](https://docs.rs/url/*/url/enum.ParseError.html).
        parse_error: url::ParseError,
    },
    /// Invalid option or value specified, may only be invalid in context.
    InvalidOption {
        /// The invalid option that caused this error, may be only invalid in context.
        option: String,
        /// The invalid value that caused this error, may be only invalid in context.
        value: String,
        /// An optional explanation of the error.
        detail: String,
    },
}
/// Implement a helper to provide a text description of all possible types of errors.
impl VaxloadError {
    fn describe(&self) -> &str {
        match *self {
            VaxloadError::Io(_) => "io::Error",
            VaxloadError::Reqwest(_) => "reqwest::Error",
            VaxloadError::Csv(_) => "csv::Error",
            VaxloadError::InvalidHost { .. } => "failed to parse hostname",
            VaxloadError::InvalidOption { .. } => "invalid option or value specified",
        }
    }
}

/// Implement format trait to allow displaying errors.
impl fmt::Display for VaxloadError {
    // Implement display of error with `{}` marker.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            VaxloadError::Io(ref source) => {
                write!(f, "VaxloadError: {} ({})", self.describe(), source)
            }
            VaxloadError::Reqwest(ref source) => {
                write!(f, "VaxloadError: {} ({})", self.describe(), source)
            }
            VaxloadError::Csv(ref source) => {
                write!(f, "VaxloadError: {} ({})", self.describe(), source)
            }
            VaxloadError::InvalidHost {
                ref parse_error, ..
            } => write!(f, "VaxloadError: {} ({})", self.describe(), parse_error),
            _ => write!(f, "VaxloadError: {}", self.describe()),
        }
    }
}

// Define the lower level source of this error, if any.
impl std::error::Error for VaxloadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            VaxloadError::Io(ref source) => Some(source),
            VaxloadError::Reqwest(ref source) => Some(source),
            VaxloadError::Csv(ref source) => Some(source),
            VaxloadError::InvalidHost {
                ref parse_error, ..
            } => Some(parse_error),
            _ => None,
        }
    }
}

/// Auto-convert Reqwest errors.
impl From<reqwest::Error> for VaxloadError {
    fn from(err: reqwest::Error) -> VaxloadError {
        VaxloadError::Reqwest(err)
    }
}

/// Auto-convert IO errors.
impl From<io::Error> for VaxloadError {
    fn from(err: io::Error) -> VaxloadError {
        VaxloadError::Io(err)
    }
}

/// Auto-convert CSV errors.
impl From<csv::Error> for VaxloadError {
    fn from(err: csv::Error) -> VaxloadError {
        VaxloadError::Csv(err)
    }
}

#[derive(Clone, Debug, PartialEq)]
/// A [`LoadTest`](./struct.LoadTest.html) moves through each of the following phases
/// during a complete load test.
pub enum LoadTestPhase {
    /// Users are launching and beginning to generate load.
    Starting,
    /// All users have launched and are working through their batches of patients.
    Running,
    /// Users are stopping.
    Stopping,
    /// Exiting the load test.
    Shutdown,
}

/// One active programme's share of the load test: the patient records loaded
/// from its data file, and how many users work through them.
struct Scenario {
    /// The programme all of these patients are being vaccinated under.
    programme: Programme,
    /// Patient records, truncated to the number of iterations that will run.
    records: Vec<PatientRecord>,
    /// How many records the data file held before truncation.
    available: usize,
    /// How many users share this programme's records.
    users: usize,
}

#[derive(Debug)]
/// A batch of patient records waiting for a user thread to be launched for it.
struct PendingUser {
    /// The programme this user registers, consents and vaccinates for.
    programme: Programme,
    /// The patient records this user works through, one per iteration.
    batch: Vec<PatientRecord>,
}

#[derive(Debug)]
/// Internal global run state for the load test.
struct LoadTestRunState {
    /// A timestamp tracking when the previous user was launched.
    spawn_user_timer: time::Instant,
    /// How many milliseconds until the next user should be launched.
    spawn_user_in_ms: usize,
    /// This variable accounts for time spent doing things which is then subtracted from
    /// the time sleeping to avoid an unintentional drift in events that are supposed to
    /// happen regularly.
    drift_timer: tokio::time::Instant,
    /// The host being load tested, parsed once and cloned into each user session.
    base_url: Url,
    /// Batches of patient records not yet handed to a launched user.
    pending_users: VecDeque<PendingUser>,
    /// Unbounded sender cloned into every user thread to send metrics to the parent.
    metrics_tx: flume::Sender<MetricMessage>,
    /// Unbounded receiver used by the parent to receive metrics from users.
    metrics_rx: flume::Receiver<MetricMessage>,
    /// Optional join handle for the logger thread, if enabled.
    logger_handle: LoggerJoinHandle,
    /// Optional unbounded sender from all users to the logger thread, if enabled.
    logger_tx: LoggerTx,
    /// Collection of all user threads so they can be stopped later.
    users: Vec<tokio::task::JoinHandle<()>>,
    /// All unbounded senders to allow communication with user threads.
    user_channels: Vec<flume::Sender<UserCommand>>,
}

/// Global internal state for the load test.
pub struct LoadTest {
    /// Configuration object holding options set when launching the load test.
    configuration: Configuration,
    /// One scenario per active programme with a non-empty data file.
    scenarios: Vec<Scenario>,
    /// How long (in seconds) the load test should run, 0 when only bounded by
    /// the available iterations.
    run_time: usize,
    /// Which phase the load test is currently operating in.
    phase: LoadTestPhase,
    /// When the load test started.
    started: Option<time::Instant>,
    /// All metrics merged together.
    metrics: LoadTestMetrics,
}

impl LoadTest {
    /// Load configuration from the command line and initialize a
    /// [`LoadTest`](./struct.LoadTest.html).
    ///
    /// # Example
    /// ```rust
    /// use vaxload::LoadTest;
    ///
    /// let load_test = LoadTest::initialize();
    /// ```
    pub fn initialize() -> Result<LoadTest, VaxloadError> {
        Ok(LoadTest {
            configuration: Configuration::parse_args_default_or_exit(),
            scenarios: Vec::new(),
            run_time: 0,
            phase: LoadTestPhase::Starting,
            started: None,
            metrics: LoadTestMetrics::default(),
        })
    }

    /// Initialize a [`LoadTest`](./struct.LoadTest.html) with an already loaded
    /// configuration.
    ///
    /// This is generally used by tests.
    ///
    /// # Example
    /// ```rust
    /// use vaxload::LoadTest;
    /// use vaxload::config::Configuration;
    /// use gumdrop::Options;
    ///
    /// let configuration = Configuration::parse_args_default_or_exit();
    /// let load_test = LoadTest::initialize_with_config(configuration);
    /// ```
    pub fn initialize_with_config(configuration: Configuration) -> Result<LoadTest, VaxloadError> {
        Ok(LoadTest {
            configuration,
            scenarios: Vec::new(),
            run_time: 0,
            phase: LoadTestPhase::Starting,
            started: None,
            metrics: LoadTestMetrics::default(),
        })
    }

    /// Execute the [`LoadTest`](./struct.LoadTest.html).
    ///
    /// # Example
    /// ```rust,no_run
    /// use vaxload::{LoadTest, VaxloadError};
    ///
    /// fn main() -> Result<(), VaxloadError> {
    ///     LoadTest::initialize()?.execute()?.print();
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn execute(mut self) -> Result<LoadTestMetrics, VaxloadError> {
        // If version flag is set, display package name and version and exit.
        if self.configuration.version {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            std::process::exit(0);
        }

        // Initialize the logger.
        self.configuration.initialize_logger();

        // Validate the configuration.
        self.configuration.validate()?;

        // Build one scenario per active programme, loading its patient records.
        self.prepare_load_test()?;

        // Display scenarios, then exit.
        if self.configuration.list {
            self.print_scenarios();
            std::process::exit(0);
        }

        // A valid host is required to actually generate load.
        self.validate_host()?;
        info!("global host configured: {}", self.configuration.host);

        // Configure the validated run time.
        self.set_run_time()?;

        let rt = Runtime::new().unwrap();
        self = rt.block_on(self.start_load_test())?;

        Ok(self.metrics)
    }

    // Returns Ok(()) if there's a valid host, VaxloadError with details if not.
    fn validate_host(&mut self) -> Result<(), VaxloadError> {
        if self.configuration.host.is_empty() {
            return Err(VaxloadError::InvalidOption {
                option: "--host".to_string(),
                value: "".to_string(),
                detail: "A host must be defined via the --host option.".to_string(),
            });
        }
        util::is_valid_host(&self.configuration.host)?;
        Ok(())
    }

    fn set_run_time(&mut self) -> Result<(), VaxloadError> {
        self.run_time = util::parse_timespan(&self.configuration.run_time);
        Ok(())
    }

    // Load patient records for every active programme and determine how many
    // users and iterations each programme runs.
    fn prepare_load_test(&mut self) -> Result<(), VaxloadError> {
        let data_dir = PathBuf::from(
            self.configuration
                .data_dir
                .clone()
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
        );

        for programme in self.configuration.active_programmes() {
            let mut records = data::load_records(&data_dir, programme)?;
            let available = records.len();
            let plan = programme.plan();
            // A programme can not run more iterations than it has patient records.
            let iterations = cmp::min(
                self.configuration.iterations.unwrap_or(plan.iterations),
                available,
            );
            if iterations == 0 {
                warn!("no patient records for {}, skipping scenario", programme);
                continue;
            }
            // Nor can it run more users than iterations.
            let users = cmp::min(self.configuration.users.unwrap_or(plan.users), iterations);
            debug!(
                "{}: {} users sharing {} of {} available patient records",
                programme, users, iterations, available
            );
            records.truncate(iterations);
            self.scenarios.push(Scenario {
                programme,
                records,
                available,
                users,
            });
        }

        if self.scenarios.is_empty() {
            return Err(VaxloadError::InvalidOption {
                option: "--data-dir".to_string(),
                value: data_dir.display().to_string(),
                detail: format!(
                    "no patient records found for any active programme ({})",
                    self.configuration.active_programmes().iter().join(", ")
                ),
            });
        }

        Ok(())
    }

    // Display one line per scenario, invoked by the --list option.
    fn print_scenarios(&self) {
        println!("Available scenarios:");
        for scenario in &self.scenarios {
            println!(
                " - {} ({} users, {} iterations, {} patient records)",
                scenario.programme,
                scenario.users,
                scenario.records.len(),
                scenario.available
            );
        }
    }

    fn set_phase(&mut self, run_state: &mut LoadTestRunState, phase: LoadTestPhase) {
        // There's nothing to do if already in the specified phase.
        if self.phase == phase {
            return;
        }

        // The drift timer starts at 0 any time the phase is changed.
        run_state.drift_timer = tokio::time::Instant::now();

        info!("entering load test phase: {:?}", &phase);

        // Update the current phase.
        self.phase = phase;
    }

    // Update metrics showing how long the load test has been running.
    fn update_duration(&mut self) {
        if let Some(started) = self.started {
            self.metrics.duration = started.elapsed().as_secs() as usize;
        } else {
            self.metrics.duration = 0;
        }
    }

    // Receive metrics from user threads. If flush is true all metrics will be
    // received regardless of how long it takes. If flush is false, metrics will
    // only be received for up to 400 ms before exiting to continue on the next
    // call to this function.
    async fn receive_metrics(
        &mut self,
        run_state: &mut LoadTestRunState,
        flush: bool,
    ) -> Result<bool, VaxloadError> {
        let mut received_message = false;
        let mut message = run_state.metrics_rx.try_recv();

        // Main loop wakes up every 500ms, so don't spend more than 400ms receiving metrics.
        let receive_timeout = 400;
        let receive_started = time::Instant::now();

        while message.is_ok() {
            received_message = true;
            match message.unwrap() {
                MetricMessage::Request(request_metric) => {
                    self.metrics.record_request(request_metric);
                }
                MetricMessage::Iteration(iteration_metric) => {
                    self.metrics.record_iteration(iteration_metric);
                }
            }
            // Unless flushing all metrics, break out of the receive loop after the timeout.
            if !flush && util::ms_timer_expired(receive_started, receive_timeout) {
                break;
            }
            message = run_state.metrics_rx.try_recv();
        }

        Ok(received_message)
    }

    // Prepare the run state used while spawning and running user threads.
    async fn initialize_load_test(&mut self) -> Result<LoadTestRunState, VaxloadError> {
        // Parse the host once, each user session clones it.
        let base_url = Url::parse(&self.configuration.host).map_err(|parse_error| {
            VaxloadError::InvalidHost {
                host: self.configuration.host.to_string(),
                detail: "failed to parse --host".to_string(),
                parse_error,
            }
        })?;

        // Create a single channel used to send metrics from user threads
        // to parent thread.
        let (metrics_tx, metrics_rx): (
            flume::Sender<MetricMessage>,
            flume::Receiver<MetricMessage>,
        ) = flume::unbounded();

        // If enabled, spawn a logger thread.
        let (logger_handle, logger_tx) = self.configuration.setup_loggers().await?;

        // Share each scenario's records between its users, one batch per user.
        let mut pending_users = VecDeque::new();
        for scenario in &self.scenarios {
            for batch in data::share_between(scenario.records.clone(), scenario.users) {
                pending_users.push_back(PendingUser {
                    programme: scenario.programme,
                    batch,
                });
            }
        }

        let run_state = LoadTestRunState {
            spawn_user_timer: time::Instant::now(),
            spawn_user_in_ms: 0,
            drift_timer: tokio::time::Instant::now(),
            base_url,
            pending_users,
            metrics_tx,
            metrics_rx,
            logger_handle,
            logger_tx,
            users: Vec::new(),
            user_channels: Vec::new(),
        };

        // Catch ctrl-c to allow clean shutdown to display metrics.
        util::setup_ctrlc_handler();

        // Record when the load test officially started.
        self.started = Some(time::Instant::now());

        // Only display metrics and status codes if enabled.
        self.metrics.display_metrics = !self.configuration.no_print_metrics;
        self.metrics.display_status_codes = !self.configuration.no_status_codes;

        Ok(run_state)
    }

    // Launch user threads to generate load, with a delay between each.
    async fn spawn_users(&mut self, run_state: &mut LoadTestRunState) -> Result<(), VaxloadError> {
        // Determine if it's time to spawn a user.
        if run_state.spawn_user_in_ms == 0
            || util::ms_timer_expired(run_state.spawn_user_timer, run_state.spawn_user_in_ms)
        {
            if let Some(pending_user) = run_state.pending_users.pop_front() {
                // Reset the spawn timer.
                run_state.spawn_user_timer = time::Instant::now();
                run_state.spawn_user_in_ms = self
                    .configuration
                    .hatch_delay
                    .unwrap_or(DEFAULT_HATCH_DELAY) as usize;

                // We number threads from 1 as they're human-visible (in the logs),
                // whereas metrics.users starts at 0.
                let thread_number = self.metrics.users + 1;

                let session = PageSession::new(
                    thread_number,
                    &self.configuration,
                    run_state.base_url.clone(),
                    self.started.unwrap(),
                    Some(run_state.metrics_tx.clone()),
                    run_state.logger_tx.clone(),
                )?;

                // Create a per-thread channel allowing parent thread to control child threads.
                let (parent_sender, thread_receiver): (
                    flume::Sender<UserCommand>,
                    flume::Receiver<UserCommand>,
                ) = flume::unbounded();
                run_state.user_channels.push(parent_sender);

                // Launch a new user.
                let user = tokio::spawn(user::user_main(
                    thread_number,
                    pending_user.programme,
                    pending_user.batch,
                    session,
                    self.configuration.clone(),
                    thread_receiver,
                ));

                run_state.users.push(user);
                self.metrics.users += 1;
            }
        } else {
            let sleep_duration = time::Duration::from_millis(run_state.spawn_user_in_ms as u64);
            debug!("sleeping {:?}...", sleep_duration);
            run_state.drift_timer =
                util::sleep_minus_drift(sleep_duration, run_state.drift_timer).await;
        }

        // If all users have been spawned, move onto the next phase.
        if run_state.pending_users.is_empty() {
            // Pause a tenth of a second waiting for the final user to fully start up.
            tokio::time::sleep(time::Duration::from_millis(100)).await;

            info!("launched {} users...", self.metrics.users);

            self.set_phase(run_state, LoadTestPhase::Running);
            // Also record a formattable timestamp, for human readable reports.
            self.metrics.started = Some(Local::now());
        }

        Ok(())
    }

    // Let the load test run until the timer expires, the test is canceled, or
    // every user has worked through its batch, and then trigger a shut down.
    async fn monitor_users(
        &mut self,
        run_state: &mut LoadTestRunState,
    ) -> Result<(), VaxloadError> {
        // Exit if run_time timer expires.
        if util::timer_expired(self.started.unwrap(), self.run_time) {
            self.set_phase(run_state, LoadTestPhase::Stopping);
        // Exit once every user has finished its batch of patients.
        } else if run_state.users.iter().all(|user| user.is_finished()) {
            info!("all users have completed their iterations");
            self.set_phase(run_state, LoadTestPhase::Stopping);
        } else {
            // Subtract the time spent doing other things, running the main parent loop twice
            // per second.
            run_state.drift_timer = util::sleep_minus_drift(
                time::Duration::from_millis(500),
                run_state.drift_timer,
            )
            .await;
        }

        Ok(())
    }

    async fn stop_users(&mut self, run_state: &mut LoadTestRunState) -> Result<(), VaxloadError> {
        info!("stopping after {} seconds...", self.metrics.duration);

        for (index, send_to_user) in run_state.user_channels.iter().enumerate() {
            // A user that already finished its batch has dropped its receiver, that
            // is not an error.
            match send_to_user.send(UserCommand::Exit) {
                Ok(_) => debug!("telling user {} to exit", index),
                Err(_) => debug!("user {} already exited", index),
            }
        }
        info!("waiting for users to exit");

        // Take the users vector out of the LoadTestRunState object so it can be
        // consumed by futures::future::join_all().
        let users = std::mem::take(&mut run_state.users);
        futures::future::join_all(users).await;
        debug!("all users exited");

        // If the logger thread is enabled, tell it to flush and exit.
        if run_state.logger_handle.is_some() {
            if let Err(e) = run_state.logger_tx.clone().unwrap().send(None) {
                warn!("unexpected error telling logger thread to exit: {}", e);
            };
            // Take the logger out of the LoadTestRunState object so it can be
            // consumed by tokio::join!().
            let logger = std::mem::take(&mut run_state.logger_handle);
            let _ = tokio::join!(logger.unwrap());
        }

        // Collect the final metrics received from users. Set the second parameter to
        // true, ensuring all metrics are received no matter how long that takes.
        let _received_message = self.receive_metrics(run_state, true).await?;

        Ok(())
    }

    // The parent loop, running from the Starting phase until the Shutdown phase.
    async fn start_load_test(mut self) -> Result<LoadTest, VaxloadError> {
        // The LoadTestRunState is used while spawning and running the
        // user threads that generate the load test.
        let mut run_state = self
            .initialize_load_test()
            .await
            .expect("failed to initialize LoadTestRunState");

        loop {
            match self.phase {
                // In the Starting phase, launch user threads with a delay between each.
                LoadTestPhase::Starting => {
                    self.update_duration();
                    self.spawn_users(&mut run_state).await?;
                }
                // In the Running phase, users work through their batches of patients.
                LoadTestPhase::Running => {
                    self.update_duration();
                    self.monitor_users(&mut run_state).await?;
                }
                // In the Stopping phase, stop all user threads and collect final metrics.
                LoadTestPhase::Stopping => {
                    self.update_duration();
                    self.stop_users(&mut run_state).await?;
                    // Percentiles and errors are only displayed when the load test is finished.
                    self.metrics.final_metrics = true;
                    self.set_phase(&mut run_state, LoadTestPhase::Shutdown);
                }
                // By reaching the Shutdown phase, break out of the parent loop.
                LoadTestPhase::Shutdown => break,
            }

            // Regularly synchronize metrics.
            self.receive_metrics(&mut run_state, false).await?;

            // Gracefully exit loop if ctrl-c is caught.
            if self.phase != LoadTestPhase::Shutdown && *CANCELED.read().unwrap() {
                // Cleanly stop the load test.
                self.set_phase(&mut run_state, LoadTestPhase::Stopping);
            }
        }

        Ok(self)
    }
}
