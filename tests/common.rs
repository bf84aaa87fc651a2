use gumdrop::Options;
use httpmock::MockServer;
use std::io::{self, BufRead};

use vaxload::config::Configuration;
use vaxload::metrics::LoadTestMetrics;
use vaxload::LoadTest;

/// Not all functions are used by all tests, so we enable allow(dead_code) to avoid
/// compiler warnings during testing.

/// The following options are configured by default, if not set to a custom value:
///  --host <mock-server>
///  --users 1
///  --hatch-delay 0
///  --step-delay 0
///  --username nurse@example.com
///  --password secret
///  --no-print-metrics
pub fn build_configuration(server: &MockServer, custom: Vec<&str>) -> Configuration {
    // Start with an empty configuration.
    let mut configuration: Vec<&str> = vec![];
    // Declare server_url here no matter what, so its lifetime is sufficient when needed.
    let server_url = server.base_url();

    // Merge in all custom options first.
    configuration.extend_from_slice(&custom);

    // Default to using mock server if not otherwise configured.
    if !configuration.contains(&"--host") {
        configuration.extend_from_slice(&["--host", &server_url]);
    }

    // Default to testing with 1 user if not otherwise configured.
    if !configuration.contains(&"--users") {
        configuration.extend_from_slice(&["--users", "1"]);
    }

    // Default to launching users without a delay if not otherwise configured.
    if !configuration.contains(&"--hatch-delay") {
        configuration.extend_from_slice(&["--hatch-delay", "0"]);
    }

    // Default to submitting wizard forms without a pause if not otherwise configured.
    if !configuration.contains(&"--step-delay") {
        configuration.extend_from_slice(&["--step-delay", "0"]);
    }

    // Default to credentials the mock server accepts if not otherwise configured.
    if !configuration.contains(&"--username") {
        configuration.extend_from_slice(&["--username", "nurse@example.com"]);
    }
    if !configuration.contains(&"--password") {
        configuration.extend_from_slice(&["--password", "secret"]);
    }

    // Default to not spamming test output with metrics tables.
    if !configuration.contains(&"--no-print-metrics") {
        configuration.push("--no-print-metrics");
    }

    // Parse these options to generate a Configuration.
    Configuration::parse_args_default(&configuration)
        .expect("failed to parse options and generate a configuration")
}

/// Run the actual load test, returning the LoadTestMetrics.
pub fn run_load_test(configuration: Configuration) -> LoadTestMetrics {
    LoadTest::initialize_with_config(configuration)
        .expect("failed to initialize load test")
        .execute()
        .expect("load test failed")
}

/// Helper to write a per-test data directory holding an hpv data file with the
/// requested number of patients, all attending session 1. Directory names are
/// unique per test as tests run in parallel.
#[allow(dead_code)]
pub fn write_hpv_data_dir(test_name: &str, patients: usize) -> String {
    let data_dir = format!("vaxload-{}-data", test_name);
    std::fs::create_dir_all(&data_dir).expect("failed to create data directory");

    let mut csv = String::from("programme,forename,surname,date_of_birth,address_line_1,address_line_2,address_town,address_postcode,parent_name,parent_relationship,parent_email,parent_phone,session_id\n");
    for patient in 0..patients {
        csv.push_str(&format!(
            "hpv,Test{},Patient,2012-01-30,{} High Street,,Leeds,LS1 1AA,Parent{} Patient,mother,parent{}@example.com,07700900{:03},1\n",
            patient,
            patient + 1,
            patient,
            patient,
            patient
        ));
    }
    std::fs::write(
        std::path::Path::new(&data_dir).join("hpv-vaccination-data.csv"),
        csv,
    )
    .expect("failed to write data file");

    data_dir
}

/// Helper to delete a per-test data directory, if existing.
#[allow(dead_code)]
pub fn cleanup_data_dir(data_dir: &str) {
    if std::path::Path::new(data_dir).exists() {
        std::fs::remove_dir_all(data_dir).expect("failed to remove data directory");
    }
}

/// Helper to count the number of lines in a test artifact.
#[allow(dead_code)]
pub fn file_length(file_name: &str) -> usize {
    if let Ok(file) = std::fs::File::open(std::path::Path::new(file_name)) {
        io::BufReader::new(file).lines().count()
    } else {
        0
    }
}

/// Helper to delete test artifacts, if existing.
#[allow(dead_code)]
pub fn cleanup_files(files: Vec<&str>) {
    for file in files {
        if std::path::Path::new(file).exists() {
            std::fs::remove_file(file).expect("failed to remove file");
        }
    }
}
