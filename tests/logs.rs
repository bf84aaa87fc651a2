use httpmock::{Method::GET, Method::POST, Mock, MockServer};
use std::fmt;

mod common;

use vaxload::data::Programme;
use vaxload::metrics::LoadTestMetrics;

// Paths used in load tests performed during these tests.
const SIGN_IN_PATH: &str = "/users/sign-in";
const PATIENTS_PATH: &str = "/sessions/1/patients";
const REGISTER_PATH: &str = "/sessions/1/patients/7/register";
const PATIENT_PATH: &str = "/sessions/1/patients/7/hpv";
const CONSENT_NEW_PATH: &str = "/sessions/1/patients/7/hpv/consent-responses/new";
const CONSENT_WHO_PATH: &str = "/sessions/1/patients/7/hpv/consent-responses/who";
const CONSENT_PARENT_DETAILS_PATH: &str =
    "/sessions/1/patients/7/hpv/consent-responses/parent-details";
const CONSENT_ROUTE_PATH: &str = "/sessions/1/patients/7/hpv/consent-responses/route";
const CONSENT_AGREE_PATH: &str = "/sessions/1/patients/7/hpv/consent-responses/agree";
const CONSENT_QUESTIONS_PATH: &str = "/sessions/1/patients/7/hpv/consent-responses/questions";
const CONSENT_CONFIRM_PATH: &str = "/sessions/1/patients/7/hpv/consent-responses/confirm";
const VACCINATIONS_NEW_PATH: &str = "/sessions/1/patients/7/hpv/vaccinations/new";
const VACCINATIONS_BATCH_PATH: &str = "/sessions/1/patients/7/hpv/vaccinations/batch";
const VACCINATIONS_CONFIRM_PATH: &str = "/sessions/1/patients/7/hpv/vaccinations/confirm";

// Indexes to the mocks that are validated.
const POST_CONSENT_WHO_KEY: usize = 5;
const POST_VACCINATIONS_CONFIRM_KEY: usize = 12;

// How many patient records each test runs through.
const PATIENTS: usize = 2;

// There are multiple test variations in this file.
enum TestType {
    // Test with the error log enabled.
    ErrorLog,
    // Test with the debug log enabled.
    DebugLog,
    // Test with the error log and debug log both enabled.
    ErrorAndDebugLog,
}

// Implement fmt::Display for TestType to uniquely name the log files generated
// by each test. This is necessary as tests run in parallel.
impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let printable = match *self {
            TestType::ErrorLog => "error",
            TestType::DebugLog => "debug",
            TestType::ErrorAndDebugLog => "error-and-debug",
        };
        write!(f, "{}", printable)
    }
}

// Build a page for one consent wizard step, carrying the form the next step
// submits.
fn consent_step_page(next_action: &str) -> String {
    format!(
        r#"<form action="{}" method="post"><input type="hidden" name="authenticity_token" value="step-token" /></form>"#,
        next_action
    )
}

// All tests in this file run against common endpoints. The "who" consent step
// answers 500, but its body still carries the next step's form: the wizard
// logs the failure and carries on, so every iteration still completes.
fn setup_mock_server_endpoints(server: &MockServer) -> Vec<Mock> {
    vec![
        server.mock(|when, then| {
            when.method(GET).path(SIGN_IN_PATH);
            then.status(200).body(
                r#"<form action="/users/sign-in" method="post">
                     <input type="hidden" name="authenticity_token" value="sign-in-token" />
                   </form>"#,
            );
        }),
        server.mock(|when, then| {
            when.method(POST).path(SIGN_IN_PATH);
            then.status(200).body("<h1>Today's sessions</h1>");
        }),
        server.mock(|when, then| {
            when.method(GET).path(PATIENTS_PATH);
            then.status(200).body(
                r#"<form action="/sessions/1/patients" method="get">
                     <input class="nhsuk-input" name="search[q]" value="" />
                   </form>
                   <div class="nhsuk-card">
                     <h3><a href="/sessions/1/patients/7/hpv">Test Patient</a></h3>
                     <form action="/sessions/1/patients/7/register" method="post">
                       <input type="hidden" name="state" value="attending" />
                     </form>
                   </div>"#,
            );
        }),
        server.mock(|when, then| {
            when.method(POST).path(REGISTER_PATH);
            then.status(200).body("");
        }),
        // No consent tag and no triage form: the wizard starts directly with
        // a new consent response.
        server.mock(|when, then| {
            when.method(GET).path(PATIENT_PATH);
            then.status(200).body(
                r#"<strong class="nhsuk-tag nhsuk-tag--blue">No response</strong>
                   <form action="/sessions/1/patients/7/hpv/vaccinations/new" method="post">
                     <input type="hidden" name="authenticity_token" value="vaccinate-token" />
                   </form>"#,
            );
        }),
        // Store in vector at POST_CONSENT_WHO_KEY: the failing step.
        server.mock(|when, then| {
            when.method(POST).path(CONSENT_WHO_PATH);
            then.status(500)
                .body(consent_step_page(CONSENT_PARENT_DETAILS_PATH));
        }),
        server.mock(|when, then| {
            when.method(GET).path(CONSENT_NEW_PATH);
            then.status(200).body(consent_step_page(CONSENT_WHO_PATH));
        }),
        server.mock(|when, then| {
            when.method(POST).path(CONSENT_PARENT_DETAILS_PATH);
            then.status(200).body(consent_step_page(CONSENT_ROUTE_PATH));
        }),
        server.mock(|when, then| {
            when.method(POST).path(CONSENT_ROUTE_PATH);
            then.status(200).body(consent_step_page(CONSENT_AGREE_PATH));
        }),
        server.mock(|when, then| {
            when.method(POST).path(CONSENT_AGREE_PATH);
            then.status(200)
                .body(consent_step_page(CONSENT_QUESTIONS_PATH));
        }),
        server.mock(|when, then| {
            when.method(POST).path(CONSENT_QUESTIONS_PATH);
            then.status(200)
                .body(consent_step_page(CONSENT_CONFIRM_PATH));
        }),
        server.mock(|when, then| {
            when.method(POST).path(CONSENT_CONFIRM_PATH);
            then.status(200).body("");
        }),
        // Store in vector at POST_VACCINATIONS_CONFIRM_KEY: proof the
        // iteration finished.
        server.mock(|when, then| {
            when.method(POST).path(VACCINATIONS_CONFIRM_PATH);
            then.status(200).body("");
        }),
        server.mock(|when, then| {
            when.method(POST).path(VACCINATIONS_NEW_PATH);
            then.status(200).body(
                r#"<form action="/sessions/1/patients/7/hpv/vaccinations/batch" method="post">
                     <input class="nhsuk-checkboxes__input" type="checkbox" name="batch_id" value="AB1234" />
                   </form>"#,
            );
        }),
        server.mock(|when, then| {
            when.method(POST).path(VACCINATIONS_BATCH_PATH);
            then.status(200).body(
                r#"<form action="/sessions/1/patients/7/hpv/vaccinations/confirm" method="post"></form>"#,
            );
        }),
    ]
}

// Helper to confirm all variations generate appropriate results.
fn validate_load_test(
    test_type: &TestType,
    metrics: &LoadTestMetrics,
    mock_endpoints: &[Mock],
    error_log: &str,
    debug_log: &str,
) {
    // The failing step was hit once per patient, and every iteration still
    // completed.
    assert!(mock_endpoints[POST_CONSENT_WHO_KEY].hits() == PATIENTS);
    assert!(mock_endpoints[POST_VACCINATIONS_CONFIRM_KEY].hits() == PATIENTS);
    let scenario = metrics
        .scenarios
        .get(&Programme::Hpv)
        .expect("hpv scenario must have recorded iterations");
    assert!(scenario.completed == PATIENTS);
    assert!(scenario.failed == 0);

    // The 500s were aggregated per request and as errors.
    let who_metrics = metrics
        .requests
        .get("POST /sessions/:id/patients/:id/hpv/consent-responses/who")
        .unwrap();
    assert!(who_metrics.success_count == 0);
    assert!(who_metrics.fail_count == PATIENTS);
    assert!(metrics.errors.len() == 1);
    for error in metrics.errors.values() {
        assert!(error.occurrences == PATIENTS);
    }

    match test_type {
        TestType::ErrorLog => {
            // Error log file must exist and not be empty.
            assert!(std::path::Path::new(error_log).exists());
            assert!(common::file_length(error_log) > 0);
            // Debug log file must not exist.
            assert!(!std::path::Path::new(debug_log).exists());
        }
        TestType::DebugLog => {
            // Debug log file must exist and not be empty.
            assert!(std::path::Path::new(debug_log).exists());
            assert!(common::file_length(debug_log) > 0);
            // Error log file must not exist.
            assert!(!std::path::Path::new(error_log).exists());
        }
        TestType::ErrorAndDebugLog => {
            // Both log files must exist and not be empty.
            assert!(std::path::Path::new(error_log).exists());
            assert!(common::file_length(error_log) > 0);
            assert!(std::path::Path::new(debug_log).exists());
            assert!(common::file_length(debug_log) > 0);
        }
    }
}

// Helper to run all standalone tests.
fn run_standalone_test(test_type: TestType) {
    // Name all artifacts for the test variation, as tests run in parallel.
    let error_log = format!("{}-error.log", test_type);
    let debug_log = format!("{}-debug.log", test_type);
    let test_name = format!("logs-{}", test_type);

    // Start the mock server.
    let server = MockServer::start();

    // Setup the endpoints needed for this test on the mock server.
    let mock_endpoints = setup_mock_server_endpoints(&server);

    let mut configuration_flags = match test_type {
        TestType::ErrorLog => vec!["--error-log", &error_log],
        TestType::DebugLog => vec!["--debug-log", &debug_log],
        TestType::ErrorAndDebugLog => {
            vec!["--error-log", &error_log, "--debug-log", &debug_log]
        }
    };
    configuration_flags.extend(vec!["--programmes", "hpv"]);

    let data_dir = common::write_hpv_data_dir(&test_name, PATIENTS);
    configuration_flags.extend(vec!["--data-dir", &data_dir]);
    let configuration = common::build_configuration(&server, configuration_flags);

    // Run the load test as configured.
    let metrics = common::run_load_test(configuration);
    common::cleanup_data_dir(&data_dir);

    // Confirm that the load test ran correctly.
    validate_load_test(&test_type, &metrics, &mock_endpoints, &error_log, &debug_log);

    common::cleanup_files(vec![&error_log, &debug_log]);
}

#[test]
// Test that failed requests are written to the error log.
fn test_error_log() {
    run_standalone_test(TestType::ErrorLog);
}

#[test]
// Test that failure context is written to the debug log.
fn test_debug_log() {
    run_standalone_test(TestType::DebugLog);
}

#[test]
// Test that both logs can be enabled at the same time.
fn test_error_and_debug_log() {
    run_standalone_test(TestType::ErrorAndDebugLog);
}
