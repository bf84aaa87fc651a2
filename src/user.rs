use rand::Rng;
use std::time::{self, Duration};

use crate::config::Configuration;
use crate::data::{PatientRecord, Programme};
use crate::flow::{self, IterationOutcome};
use crate::metrics::{IterationMetric, MetricMessage};
use crate::session::PageSession;
use crate::util;

/// Commands the parent can send to user threads.
#[derive(Debug)]
pub(crate) enum UserCommand {
    /// Stop as soon as the current iteration finishes.
    Exit,
}

/// One virtual user: sign in once, then work through the assigned batch of
/// patient records until the batch is exhausted or the parent says stop.
pub(crate) async fn user_main(
    thread_number: usize,
    programme: Programme,
    batch: Vec<PatientRecord>,
    mut session: PageSession,
    config: Configuration,
    thread_receiver: flume::Receiver<UserCommand>,
) {
    info!(
        "launching user {} from {} with {} patients...",
        thread_number,
        programme,
        batch.len()
    );

    // Sign in once, everything after rides the session cookie. A user that
    // can't sign in exits instead of hammering the sign-in page with every
    // later request.
    if let Err(e) = flow::authorise::sign_in(&mut session, &config.username, &config.password).await
    {
        error!("user {} unable to sign in: {}", thread_number, e);
        info!("exiting user {} from {}...", thread_number, programme);
        return;
    }

    let step_delay = Duration::from_secs(config.step_delay.unwrap_or(1));
    let pause = config.pause.as_deref().and_then(util::parse_pause);

    'iterations: for record in &batch {
        // Exit before starting another patient if message received from parent.
        if received_exit(&thread_receiver) {
            break 'iterations;
        }

        let started = time::Instant::now();
        let outcome = match flow::run_patient_flow(&mut session, record, step_delay).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "[user {}]: iteration for '{}' failed: {}",
                    thread_number,
                    record.full_name(),
                    e
                );
                IterationOutcome::Failed
            }
        };
        debug!(
            "[user {}]: {} iteration {}",
            thread_number, programme, outcome
        );

        let iteration_metric = IterationMetric {
            elapsed: session.started.elapsed().as_millis() as u64,
            programme,
            run_time: started.elapsed().as_millis() as u64,
            outcome,
            user: thread_number,
        };
        // Best effort metrics.
        if let Some(parent) = session.metrics_tx.clone() {
            let _ = parent.send(MetricMessage::Iteration(iteration_metric));
        }

        if received_exit(&thread_receiver) {
            break 'iterations;
        }

        // If a pause is configured, wait a random time before the next patient.
        if let Some((min, max)) = pause {
            // Total time left to wait before the next iteration.
            let mut wait_time = rand::rng().random_range(min * 1_000..=max * 1_000);
            // Never sleep more than 500 milliseconds, allowing a pausing user
            // to shut down quickly when the load test ends.
            let maximum_sleep_time = 500;

            while wait_time > 0 {
                // Exit immediately if message received from parent.
                if received_exit(&thread_receiver) {
                    break 'iterations;
                }

                // Wake regularly to detect if the load test has shut down.
                let sleep_duration = if wait_time > maximum_sleep_time {
                    wait_time -= maximum_sleep_time;
                    Duration::from_millis(maximum_sleep_time)
                } else {
                    let sleep_duration = Duration::from_millis(wait_time);
                    wait_time = 0;
                    sleep_duration
                };

                debug!(
                    "user {} from {} sleeping {:?} ...",
                    thread_number, programme, sleep_duration
                );

                tokio::time::sleep(sleep_duration).await;
            }
        }
    }

    info!("exiting user {} from {}...", thread_number, programme);
}

// Determine if the parent has sent a UserCommand::Exit message.
fn received_exit(thread_receiver: &flume::Receiver<UserCommand>) -> bool {
    matches!(thread_receiver.try_recv(), Ok(UserCommand::Exit))
}
