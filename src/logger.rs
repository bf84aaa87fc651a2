//! Optional logging thread.
//!
//! Two side logs can be enabled through run-time options, each written as
//! JSON lines by a dedicated logger thread:
//!  - `--error-log`: one line per failed request, the full
//!    [`RequestMetric`](crate::metrics::RequestMetric) as recorded;
//!  - `--debug-log`: failure context captured by the session when a request
//!    goes wrong, a [`DebugEntry`](crate::session::DebugEntry) with the
//!    request, the returned headers, and the returned body.
//!
//! When either log is enabled the thread is launched before users spawn and
//! a channel is cloned into every user session. The thread writes through
//! Tokio's asynchronous [`BufWriter`], and exits when the parent sends an
//! empty message during shutdown.

use serde_json::json;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::io::BufWriter;

use crate::config::Configuration;
use crate::metrics::RequestMetric;
use crate::session::DebugEntry;
use crate::VaxloadError;

/// The logger thread accepts any of the following types of messages, and
/// writes them to the correct log file.
#[derive(Debug, serde::Deserialize, serde::Serialize)]
pub enum LogMessage {
    /// A failed request, written to the error log.
    Error(RequestMetric),
    /// Failure context, written to the debug log.
    Debug(DebugEntry),
}

/// How the parent holds on to the logger thread, if one is running.
pub(crate) type LoggerJoinHandle = Option<tokio::task::JoinHandle<Result<(), VaxloadError>>>;
/// How user threads send messages to the logger thread, if one is running.
pub(crate) type LoggerTx = Option<flume::Sender<Option<LogMessage>>>;

impl Configuration {
    /// Spawn the logger thread if any side log is enabled, returning its join
    /// handle and the channel user threads log through.
    pub(crate) async fn setup_loggers(&self) -> Result<(LoggerJoinHandle, LoggerTx), VaxloadError> {
        if self.error_log.is_empty() && self.debug_log.is_empty() {
            return Ok((None, None));
        }
        let (logger_tx, logger_rx) = flume::unbounded();
        let configuration = self.clone();
        let logger_handle = tokio::spawn(configuration.logger_main(logger_rx));
        Ok((Some(logger_handle), Some(logger_tx)))
    }

    /// Logger thread, opens the configured log files and waits for messages
    /// from user threads.
    pub(crate) async fn logger_main(
        self: Configuration,
        receiver: flume::Receiver<Option<LogMessage>>,
    ) -> Result<(), VaxloadError> {
        // If an error log is configured, prepare an asynchronous buffered file writer.
        let mut error_file = None;
        if !self.error_log.is_empty() {
            error_file = match File::create(&self.error_log).await {
                Ok(f) => {
                    info!("writing failed requests to error_log: {}", &self.error_log);
                    Some(BufWriter::with_capacity(64 * 1024, f))
                }
                Err(e) => {
                    panic!("failed to create error_log ({}): {}", self.error_log, e);
                }
            }
        }

        // If a debug log is configured, prepare an asynchronous buffered file writer
        // with a bigger buffer as entries carry response bodies.
        let mut debug_file = None;
        if !self.debug_log.is_empty() {
            debug_file = match File::create(&self.debug_log).await {
                Ok(f) => {
                    info!("writing failure context to debug_log: {}", &self.debug_log);
                    Some(BufWriter::with_capacity(8 * 1024 * 1024, f))
                }
                Err(e) => {
                    panic!("failed to create debug_log ({}): {}", self.debug_log, e);
                }
            }
        }

        // Loop waiting for and writing log messages from user threads.
        while let Ok(message) = receiver.recv_async().await {
            if let Some(log_message) = message {
                let (file, file_path, formatted_log) = match log_message {
                    LogMessage::Error(request_metric) => (
                        error_file.as_mut(),
                        &self.error_log,
                        json!(request_metric).to_string(),
                    ),
                    LogMessage::Debug(debug_entry) => (
                        debug_file.as_mut(),
                        &self.debug_log,
                        json!(debug_entry).to_string(),
                    ),
                };
                if let Some(file) = file {
                    // Start with a line feed instead of ending with a line feed to more
                    // gracefully handle pages too large to fit in the BufWriter.
                    match file.write(format!("\n{}", formatted_log).as_ref()).await {
                        Ok(_) => (),
                        Err(e) => {
                            warn!("failed to write to {}: {}", file_path, e);
                        }
                    }
                }
            } else {
                // Empty message means it's time to exit.
                break;
            }
        }

        // Cleanup and flush all logs to disk.
        if let Some(file) = error_file.as_mut() {
            info!("flushing error_log: {}", &self.error_log);
            let _ = file.flush().await;
        }
        if let Some(file) = debug_file.as_mut() {
            info!("flushing debug_log: {}", &self.debug_log);
            let _ = file.flush().await;
        }

        Ok(())
    }
}
