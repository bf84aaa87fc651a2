//! Patient test data and per-programme scenario plans.
//!
//! Each vaccination programme is driven by its own CSV data file, one row per
//! patient to vaccinate. The rows are parsed once at startup into a shared
//! read-only `Vec`, then shared between the launched users in near-even
//! batches so every configured user has patient records to work through.

use std::io;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::VaxloadError;

/// The vaccination programmes the target service manages.
///
/// Each programme is one load-test scenario, with its own data file and its
/// own default plan. The lowercase name is used everywhere: on the command
/// line, in data-file names, and in the CSV rows themselves.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumIter, EnumString, Eq, Hash, PartialEq, PartialOrd,
    Ord, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Programme {
    /// Human papillomavirus, offered to year 8.
    Hpv,
    /// Seasonal influenza, offered to all years.
    Flu,
    /// Meningococcal ACWY, offered to years 9 and 10.
    Menacwy,
    /// Tetanus, diphtheria and polio booster, offered to years 9 and 10.
    Tdipv,
}

impl Programme {
    /// The name of the programme's data file inside `--data-dir`.
    pub fn data_file(&self) -> String {
        format!("{}-vaccination-data.csv", self)
    }

    /// The built-in scenario plan: how many users to launch and how many
    /// patient records to work through. Both can be overridden from the
    /// command line, and both are capped by the number of records actually
    /// present in the data file.
    pub fn plan(&self) -> ScenarioPlan {
        match self {
            Programme::Hpv => ScenarioPlan {
                users: 10,
                iterations: 300,
            },
            Programme::Flu => ScenarioPlan {
                users: 20,
                iterations: 600,
            },
            Programme::Menacwy => ScenarioPlan {
                users: 5,
                iterations: 150,
            },
            Programme::Tdipv => ScenarioPlan {
                users: 5,
                iterations: 150,
            },
        }
    }
}

/// How many users a scenario launches and how many iterations they share.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScenarioPlan {
    /// Number of users working through the scenario in parallel.
    pub users: usize,
    /// Total number of patient records processed across all users.
    pub iterations: usize,
}

/// One row of a programme's data file: the patient to search for, the parent
/// details entered while recording consent, and the session the patient is
/// expected to attend.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PatientRecord {
    pub programme: Programme,
    pub forename: String,
    pub surname: String,
    pub date_of_birth: String,
    #[serde(default)]
    pub address_line_1: String,
    #[serde(default)]
    pub address_line_2: String,
    #[serde(default)]
    pub address_town: String,
    #[serde(default)]
    pub address_postcode: String,
    pub parent_name: String,
    /// The target service rejects "other" when a consent response is recorded
    /// over the phone, so rows carrying it are normalised to "guardian" at
    /// construction. All other values pass through unchanged.
    #[serde(deserialize_with = "normalise_relationship")]
    pub parent_relationship: String,
    pub parent_email: String,
    pub parent_phone: String,
    pub session_id: String,
}

impl PatientRecord {
    /// The full name submitted to the patient search form.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.forename, self.surname)
    }
}

fn normalise_relationship<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let relationship = String::deserialize(deserializer)?;
    if relationship == "other" {
        Ok("guardian".to_string())
    } else {
        Ok(relationship)
    }
}

/// Load all patient records for a programme from `<data-dir>/<programme>-vaccination-data.csv`.
pub fn load_records(data_dir: &Path, programme: Programme) -> Result<Vec<PatientRecord>, VaxloadError> {
    let path = data_dir.join(programme.data_file());
    let file = std::fs::File::open(&path).map_err(|err| {
        error!("failed to open data file {}: {}", path.display(), err);
        VaxloadError::Io(err)
    })?;
    records_from_reader(file)
}

/// Parse patient records from any reader producing CSV with a header row.
pub fn records_from_reader<R: io::Read>(reader: R) -> Result<Vec<PatientRecord>, VaxloadError> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut records = Vec::new();
    for row in csv_reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

/// Split a list of items into batches of `batch_size`, preserving order.
///
/// Every batch except possibly the last contains exactly `batch_size` items,
/// and concatenating the batches reproduces the original list. Used to give
/// each user its own slice of a scenario's records.
///
/// # Example
/// ```rust
/// use vaxload::data::split_into_batches;
///
/// let batches = split_into_batches(vec![1, 2, 3, 4, 5], 2);
/// assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);
/// ```
pub fn split_into_batches<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    if batch_size == 0 {
        return vec![items];
    }
    let mut batches = Vec::with_capacity((items.len() + batch_size - 1) / batch_size);
    let mut batch = Vec::with_capacity(batch_size);
    for item in items {
        batch.push(item);
        if batch.len() == batch_size {
            batches.push(std::mem::replace(&mut batch, Vec::with_capacity(batch_size)));
        }
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}

/// Share a list of items between `users` near-evenly, preserving order.
///
/// Produces exactly one batch per user whenever there are at least as many
/// items as users: the first `items.len() % users` batches hold one item more
/// than the rest. With fewer items than users each batch holds a single item,
/// so a batch is never empty. Concatenating the batches reproduces the
/// original list.
///
/// # Example
/// ```rust
/// use vaxload::data::share_between;
///
/// let batches = share_between(vec![1, 2, 3, 4, 5, 6], 4);
/// assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5], vec![6]]);
/// ```
pub fn share_between<T>(items: Vec<T>, users: usize) -> Vec<Vec<T>> {
    if users == 0 {
        return vec![items];
    }
    let base = items.len() / users;
    let extra = items.len() % users;
    // The first `extra` batches take `base + 1` items, the rest take `base`.
    let mut larger = items;
    let rest = larger.split_off(extra * (base + 1));
    let mut batches = split_into_batches(larger, base + 1);
    if base > 0 {
        batches.append(&mut split_into_batches(rest, base));
    }
    batches
}
