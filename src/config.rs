//! Functions and structures related to configuring a load test.
//!
//! The load test is configured at run time by passing in the options and
//! flags defined by the [`Configuration`] structure, parsed with
//! [`gumdrop`](https://docs.rs/gumdrop/).

use gumdrop::Options;
use serde::{Deserialize, Serialize};
use simplelog::*;
use std::path::PathBuf;
use std::str::FromStr;
use strum::IntoEnumIterator;

use crate::data::Programme;
use crate::util;
use crate::VaxloadError;

/// Runtime options available when launching a load test.
///
/// Help is generated for all of these options by passing a `-h` flag.
#[derive(Options, Debug, Clone, Default, Serialize, Deserialize)]
#[options(
    help = r#"Vaxload drives a school-aged immunisation service through its nurse-facing
web forms: signing in, registering patient attendance, recording consent
responses, and recording vaccinations.

The following runtime options are available when launching a load test:"#
)]
pub struct Configuration {
    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Prints version information
    #[options(short = "V")]
    pub version: bool,
    /// Lists all scenarios and exits
    // Add a blank line after this option
    #[options(short = "l", help = "Lists all scenarios and exits\n")]
    pub list: bool,

    /// Defines host to load test (ie http://staging.vaccinations.example)
    #[options(short = "H")]
    pub host: String,
    /// Defines which programmes to run (ie hpv,flu)
    #[options(no_short, meta = "LIST")]
    pub programmes: Option<Programmes>,
    /// Directory holding per-programme data files (default: data)
    #[options(no_short, meta = "DIR")]
    pub data_dir: Option<String>,
    /// Sets concurrent users per programme (default: per-programme plan)
    #[options(short = "u")]
    pub users: Option<usize>,
    /// Caps patient iterations per programme (default: per-programme plan)
    #[options(no_short, meta = "COUNT")]
    pub iterations: Option<usize>,
    /// Stops load test after (30s, 20m, 3h, 1h30m, etc)
    // Add a blank line and then a 'Target service:' header after this option
    #[options(
        short = "t",
        meta = "TIME",
        help = "Stops load test after (30s, 20m, 3h, 1h30m, etc)\n\nTarget service:"
    )]
    pub run_time: String,

    /// Sets service sign-in email
    #[options(no_short, meta = "EMAIL")]
    pub username: String,
    /// Sets service sign-in password
    #[options(no_short, meta = "PASSWORD")]
    pub password: String,
    /// Sets HTTP Basic Auth user
    #[options(no_short, meta = "USER")]
    pub auth_user: Option<String>,
    /// Sets HTTP Basic Auth password
    #[options(no_short, meta = "PASSWORD")]
    pub auth_password: Option<String>,
    /// Seconds between wizard form submissions (default: 1)
    #[options(no_short, meta = "SECONDS")]
    pub step_delay: Option<u64>,
    /// Milliseconds between user launches (default: 100)
    #[options(no_short, meta = "MS")]
    pub hatch_delay: Option<u64>,
    /// Random pause between iterations in seconds (ie 3-10)
    #[options(no_short, meta = "MIN-MAX")]
    pub pause: Option<String>,
    /// Per-request timeout in seconds (default: 60)
    #[options(no_short, meta = "SECONDS")]
    pub timeout: Option<u64>,
    /// Accepts invalid TLS certificates
    // Add a blank line and then a 'Logging:' header after this option
    #[options(no_short, help = "Accepts invalid TLS certificates\n\nLogging:")]
    pub accept_invalid_certs: bool,

    /// Enables log file and sets name
    #[options(no_short, meta = "NAME")]
    pub log_file: String,
    /// Increases log file level (-g, -gg, etc)
    #[options(short = "g", count)]
    pub log_level: u8,
    /// Decreases verbosity (-q, -qq, etc)
    #[options(count, short = "q")]
    pub quiet: u8,
    /// Increases verbosity (-v, -vv, etc)
    #[options(count, short = "v")]
    pub verbose: u8,
    /// Sets error log file name
    #[options(no_short, meta = "NAME")]
    pub error_log: String,
    /// Sets debug log file name
    // Add a blank line and then a 'Metrics:' header after this option
    #[options(
        no_short,
        meta = "NAME",
        help = "Sets debug log file name\n\nMetrics:"
    )]
    pub debug_log: String,

    /// Doesn't display metrics at end of load test
    #[options(no_short)]
    pub no_print_metrics: bool,
    /// Doesn't display status codes table
    #[options(no_short)]
    pub no_status_codes: bool,
}

/// Auto-configured by gumdrop when parsing the `--programmes` option.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Programmes {
    pub active: Vec<Programme>,
}

/// Implement [`FromStr`] to convert a `"hpv,flu"` comma separated string to a
/// vector of programmes.
impl FromStr for Programmes {
    type Err = VaxloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut active: Vec<Programme> = Vec::new();
        // Multiple programmes can be defined as a comma separated list.
        for line in s.split(',') {
            // Ignore white space and case.
            let name = line.trim().to_lowercase();
            match Programme::from_str(&name) {
                Ok(programme) => active.push(programme),
                Err(_) => {
                    // Logger isn't initialized yet, provide helpful debug output.
                    eprintln!("ERROR: invalid `configuration.programmes` value: '{}'", line);
                    eprintln!("  Expected format: --programmes \"hpv,flu,menacwy,tdipv\"");
                    return Err(VaxloadError::InvalidOption {
                        option: "`configuration.programmes`".to_string(),
                        value: line.to_string(),
                        detail: "invalid `configuration.programmes` value.".to_string(),
                    });
                }
            }
        }
        Ok(Programmes { active })
    }
}

impl Configuration {
    /// Validate the configured values before the load test starts.
    pub(crate) fn validate(&self) -> Result<(), VaxloadError> {
        // Quiet and verbose are mutually exclusive.
        if self.verbose > 0 && self.quiet > 0 {
            return Err(VaxloadError::InvalidOption {
                option: "`configuration.verbose`".to_string(),
                value: self.verbose.to_string(),
                detail: "`configuration.verbose` can not be set together with `configuration.quiet`."
                    .to_string(),
            });
        }

        // A load test with no users would do nothing.
        if let Some(users) = self.users {
            if users == 0 {
                return Err(VaxloadError::InvalidOption {
                    option: "`configuration.users`".to_string(),
                    value: users.to_string(),
                    detail: "`configuration.users` must be set to at least 1.".to_string(),
                });
            }
        }

        // A load test with no iterations would load data and exit.
        if let Some(iterations) = self.iterations {
            if iterations == 0 {
                return Err(VaxloadError::InvalidOption {
                    option: "`configuration.iterations`".to_string(),
                    value: iterations.to_string(),
                    detail: "`configuration.iterations` must be set to at least 1.".to_string(),
                });
            }
        }

        // A timeout of zero seconds would fail every request.
        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err(VaxloadError::InvalidOption {
                    option: "`configuration.timeout`".to_string(),
                    value: timeout.to_string(),
                    detail: "`configuration.timeout` must be set to at least 1 second.".to_string(),
                });
            }
        }

        // The pause range has to parse and can't be inverted.
        if let Some(pause) = self.pause.as_deref() {
            if util::parse_pause(pause).is_none() {
                return Err(VaxloadError::InvalidOption {
                    option: "`configuration.pause`".to_string(),
                    value: pause.to_string(),
                    detail: "expected format: --pause \"MIN-MAX\" in seconds, with MIN <= MAX."
                        .to_string(),
                });
            }
        }

        Ok(())
    }

    /// Resolve the programmes to run: the `--programmes` subset when given,
    /// otherwise every programme with a plan.
    pub(crate) fn active_programmes(&self) -> Vec<Programme> {
        match &self.programmes {
            Some(programmes) => programmes.active.clone(),
            None => Programme::iter().collect(),
        }
    }

    /// Optionally initialize the logger which writes to standard out and/or to
    /// a configurable log file.
    pub(crate) fn initialize_logger(&self) {
        // Configure stdout output level.
        let debug_level = match self.verbose {
            0 => match self.quiet {
                0 => LevelFilter::Info,
                _ => LevelFilter::Warn,
            },
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Configure log file level.
        let log_level = match self.log_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Open the log file if configured.
        let log_file: Option<PathBuf> = if !self.log_file.is_empty() {
            Some(PathBuf::from(&self.log_file))
        // Otherwise disable the log.
        } else {
            None
        };

        if let Some(log_to_file) = log_file {
            match CombinedLogger::init(vec![
                SimpleLogger::new(debug_level, Config::default()),
                WriteLogger::new(
                    log_level,
                    Config::default(),
                    std::fs::File::create(&log_to_file).unwrap(),
                ),
            ]) {
                Ok(_) => (),
                Err(e) => {
                    info!("failed to initialize CombinedLogger: {}", e);
                }
            }
            info!("Writing to log file: {}", log_to_file.display());
        } else {
            match CombinedLogger::init(vec![SimpleLogger::new(debug_level, Config::default())]) {
                Ok(_) => (),
                Err(e) => {
                    info!("failed to initialize CombinedLogger: {}", e);
                }
            }
        }

        info!("Output verbosity level: {}", debug_level);
        info!("Logfile verbosity level: {}", log_level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programmes_from_str() {
        let programmes: Programmes = "hpv,flu".parse().unwrap();
        assert_eq!(programmes.active, vec![Programme::Hpv, Programme::Flu]);

        // White space and case are ignored.
        let programmes: Programmes = " HPV , tdipv ".parse().unwrap();
        assert_eq!(programmes.active, vec![Programme::Hpv, Programme::Tdipv]);

        // Unknown programmes are rejected.
        assert!("polio".parse::<Programmes>().is_err());
        assert!("hpv,".parse::<Programmes>().is_err());
    }

    #[test]
    fn all_programmes_by_default() {
        let configuration = Configuration::default();
        assert_eq!(
            configuration.active_programmes(),
            vec![
                Programme::Hpv,
                Programme::Flu,
                Programme::Menacwy,
                Programme::Tdipv
            ]
        );

        let subset = Configuration {
            programmes: Some("menacwy".parse().unwrap()),
            ..Configuration::default()
        };
        assert_eq!(subset.active_programmes(), vec![Programme::Menacwy]);
    }

    #[test]
    fn validation() {
        // The defaults are valid.
        assert!(Configuration::default().validate().is_ok());

        let zero_users = Configuration {
            users: Some(0),
            ..Configuration::default()
        };
        assert!(zero_users.validate().is_err());

        let noisy_and_quiet = Configuration {
            verbose: 1,
            quiet: 1,
            ..Configuration::default()
        };
        assert!(noisy_and_quiet.validate().is_err());

        let inverted_pause = Configuration {
            pause: Some("10-3".to_string()),
            ..Configuration::default()
        };
        assert!(inverted_pause.validate().is_err());

        let zero_timeout = Configuration {
            timeout: Some(0),
            ..Configuration::default()
        };
        assert!(zero_timeout.validate().is_err());
    }
}
