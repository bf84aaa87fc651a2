//! The page flows driven against the vaccination service.
//!
//! Each load test iteration walks one patient record through the same steps
//! a nurse would: search for the patient and register their attendance,
//! record a consent response when the patient doesn't have one yet, and
//! record the vaccination itself. The flows only talk to the service through
//! the [`PageClient`] trait, so the sequencing here can be exercised against
//! scripted pages without a server.

pub(crate) mod authorise;
pub(crate) mod consent;
pub(crate) mod register;
pub(crate) mod vaccinate;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data::PatientRecord;
use crate::page::{self, Form, Page};
use crate::session::PageClient;
use crate::VaxloadError;

/// How one patient iteration ended.
///
/// Skips are not failures: a missing patient, an attendance registered by an
/// earlier run, or an empty vaccine fridge are all states the target service
/// can legitimately be in. They are counted separately so a load test run
/// reports how much real work it performed.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum IterationOutcome {
    /// The patient was registered, consented where needed, and vaccinated.
    Completed,
    /// The patient search matched no cards.
    PatientNotFound,
    /// The patient's attendance was already registered.
    AlreadyRegistered,
    /// The vaccination form offered no vaccine batch.
    NoBatchAvailable,
    /// A step failed hard enough to abandon the patient.
    Failed,
}

impl fmt::Display for IterationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationOutcome::Completed => write!(f, "completed"),
            IterationOutcome::PatientNotFound => write!(f, "patient not found"),
            IterationOutcome::AlreadyRegistered => write!(f, "already registered"),
            IterationOutcome::NoBatchAvailable => write!(f, "no batch available"),
            IterationOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Errors that abort a single patient iteration, or for
/// [`SignInFailed`](FlowError::SignInFailed) an entire user thread.
#[derive(Debug)]
pub enum FlowError {
    /// Sign-in did not produce an authenticated session.
    SignInFailed {
        /// The URL the failure was detected on.
        url: String,
        /// What went wrong.
        detail: String,
    },
    /// A page arrived without a form the flow has to submit.
    MissingForm {
        /// The URL of the page missing the form.
        url: String,
        /// The action fragment the form was looked up by.
        form: String,
    },
    /// A page arrived in a state the flow cannot make sense of.
    UnexpectedPage {
        /// The URL of the offending page.
        url: String,
        /// What went wrong.
        detail: String,
    },
    /// The transport layer failed outright.
    Request(VaxloadError),
}

impl FlowError {
    fn describe(&self) -> &str {
        match self {
            FlowError::SignInFailed { .. } => "failed to sign in",
            FlowError::MissingForm { .. } => "expected form not present on page",
            FlowError::UnexpectedPage { .. } => "unexpected page state",
            FlowError::Request(_) => "request failed",
        }
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::SignInFailed { url, detail } => {
                write!(f, "{}: {} ({})", self.describe(), detail, url)
            }
            FlowError::MissingForm { url, form } => {
                write!(f, "{} '{}': {}", self.describe(), form, url)
            }
            FlowError::UnexpectedPage { url, detail } => {
                write!(f, "{}: {} ({})", self.describe(), detail, url)
            }
            FlowError::Request(e) => write!(f, "{}: {}", self.describe(), e),
        }
    }
}

impl std::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FlowError::Request(e) => Some(e),
            _ => None,
        }
    }
}

/// Auto-convert transport errors into flow errors.
impl From<VaxloadError> for FlowError {
    fn from(e: VaxloadError) -> Self {
        FlowError::Request(e)
    }
}

/// A patient located by the search flow, carrying the programme page the
/// consent and vaccination steps operate on.
#[derive(Debug)]
pub struct Patient {
    /// Numeric id parsed from the patient link.
    pub id: u64,
    /// Path of the patient's programme page, such as `/sessions/42/patients/7/hpv`.
    pub path: String,
    /// The programme page as most recently fetched.
    pub page: Page,
}

// Locate a form the flow cannot continue without.
pub(crate) fn require_form(page: &Page, action_fragment: &str) -> Result<Form, FlowError> {
    page::find_form(&page.html, action_fragment).ok_or_else(|| FlowError::MissingForm {
        url: page.url.clone(),
        form: action_fragment.to_string(),
    })
}

/// Walk one patient record through the full flow: register attendance, record
/// consent when none is recorded yet, record the vaccination.
///
/// Request failures inside the consent wizard are logged and counted but do
/// not abandon the patient; pages that leave the flow without a form to
/// submit do, failing the iteration.
pub async fn run_patient_flow<C: PageClient>(
    client: &mut C,
    record: &PatientRecord,
    step_delay: Duration,
) -> Result<IterationOutcome, FlowError> {
    let mut patient = match register::register_attendance(client, record).await? {
        register::RegisterOutcome::Registered(patient) => patient,
        register::RegisterOutcome::NotFound => {
            info!("no patient card found for '{}', skipping", record.full_name());
            return Ok(IterationOutcome::PatientNotFound);
        }
        register::RegisterOutcome::AlreadyRegistered => {
            info!(
                "'{}' already registered as attending, skipping",
                record.full_name()
            );
            return Ok(IterationOutcome::AlreadyRegistered);
        }
    };

    if consent::requires_consent(&patient.page) {
        consent::record_consent(client, record, &patient, step_delay).await?;
        // The wizard finishes on its confirmation page, pick the programme
        // page back up for the vaccination form.
        patient.page = client.fetch(&patient.path).await?;
    }

    match vaccinate::record_vaccination(client, &patient, step_delay).await? {
        vaccinate::VaccinateOutcome::Recorded => Ok(IterationOutcome::Completed),
        vaccinate::VaccinateOutcome::NoBatch => {
            info!(
                "no vaccine batch available for '{}', skipping",
                record.full_name()
            );
            Ok(IterationOutcome::NoBatchAvailable)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted [`PageClient`] used by the flow tests: returns canned pages
    //! in order and records every request made.

    use std::collections::VecDeque;

    use async_trait::async_trait;
    use http::StatusCode;

    use crate::page::{Form, Page};
    use crate::session::PageClient;
    use crate::VaxloadError;

    pub(crate) struct ScriptedClient {
        pages: VecDeque<Page>,
        /// Every request made, in order: "GET path" or "POST action" together
        /// with the submitted fields.
        pub(crate) requests: Vec<(String, Vec<(String, String)>)>,
    }

    impl ScriptedClient {
        pub(crate) fn new(pages: Vec<Page>) -> Self {
            ScriptedClient {
                pages: pages.into(),
                requests: Vec::new(),
            }
        }

        /// Build a canned page.
        pub(crate) fn page(status: u16, url: &str, html: &str) -> Page {
            Page {
                url: url.to_string(),
                status: StatusCode::from_u16(status).unwrap(),
                html: html.to_string(),
            }
        }

        fn next_page(&mut self) -> Page {
            self.pages
                .pop_front()
                .expect("scripted client ran out of pages")
        }
    }

    #[async_trait]
    impl PageClient for ScriptedClient {
        async fn fetch(&mut self, path: &str) -> Result<Page, VaxloadError> {
            self.requests.push((format!("GET {}", path), Vec::new()));
            Ok(self.next_page())
        }

        async fn submit(
            &mut self,
            form: &Form,
            extra: &[(&str, &str)],
        ) -> Result<Page, VaxloadError> {
            let mut fields = form.fields.clone();
            for (field, value) in extra {
                fields.push((field.to_string(), value.to_string()));
            }
            self.requests.push((
                format!("{} {}", form.method.to_uppercase(), form.action),
                fields,
            ));
            Ok(self.next_page())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedClient;
    use super::*;
    use crate::data::Programme;

    pub(crate) fn test_record() -> PatientRecord {
        PatientRecord {
            programme: Programme::Hpv,
            forename: "Jo".to_string(),
            surname: "Bloggs".to_string(),
            date_of_birth: "2012-01-30".to_string(),
            address_line_1: "1 High Street".to_string(),
            address_line_2: "".to_string(),
            address_town: "London".to_string(),
            address_postcode: "SW1A 1AA".to_string(),
            parent_name: "Sam Bloggs".to_string(),
            parent_relationship: "guardian".to_string(),
            parent_email: "sam@example.com".to_string(),
            parent_phone: "07700900000".to_string(),
            session_id: "42".to_string(),
        }
    }

    const PATIENT_LIST: &str = r#"
        <form action="/sessions/42/patients" method="get">
          <input class="nhsuk-input" name="search[q]" value="" />
        </form>"#;

    const SEARCH_RESULTS: &str = r#"
        <div class="nhsuk-card">
          <h3><a href="/sessions/42/patients/7/hpv">Jo Bloggs</a></h3>
          <form action="/sessions/42/patients/7/register" method="post">
            <input type="hidden" name="state" value="attending" />
          </form>
        </div>"#;

    const PATIENT_CONSENTED: &str = r#"
        <strong class="nhsuk-tag nhsuk-tag--aqua-green">Consent given</strong>
        <form action="/sessions/42/patients/7/hpv/vaccinations/new" method="post">
          <input type="hidden" name="vaccinate_form[programme]" value="hpv" />
        </form>"#;

    const BATCH_PAGE: &str = r#"
        <form action="/sessions/42/patients/7/hpv/vaccinations/batch" method="post">
          <input class="nhsuk-checkboxes__input" type="checkbox" name="batch_id" value="AB1234" />
        </form>"#;

    const VACCINATE_CONFIRM: &str = r#"
        <form action="/sessions/42/patients/7/hpv/vaccinations/confirm" method="post"></form>"#;

    #[tokio::test]
    async fn completes_without_consent_wizard() {
        // Consent is already recorded, so the wizard is skipped entirely.
        let mut client = ScriptedClient::new(vec![
            ScriptedClient::page(200, "/sessions/42/patients", PATIENT_LIST),
            ScriptedClient::page(200, "/sessions/42/patients", SEARCH_RESULTS),
            ScriptedClient::page(200, "/sessions/42/patients/7/register", ""),
            ScriptedClient::page(200, "/sessions/42/patients/7/hpv", PATIENT_CONSENTED),
            ScriptedClient::page(200, "/sessions/42/patients/7/hpv/vaccinations/new", BATCH_PAGE),
            ScriptedClient::page(
                200,
                "/sessions/42/patients/7/hpv/vaccinations/batch",
                VACCINATE_CONFIRM,
            ),
            ScriptedClient::page(200, "/sessions/42/patients/7/hpv", ""),
        ]);

        let outcome = run_patient_flow(&mut client, &test_record(), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(outcome, IterationOutcome::Completed);

        // No consent-responses request was ever made.
        assert!(client
            .requests
            .iter()
            .all(|(request, _)| !request.contains("consent-responses")));
        // The batch checkbox value was submitted.
        let (_, batch_fields) = &client.requests[5];
        assert!(batch_fields.contains(&("batch_id".to_string(), "AB1234".to_string())));
    }

    #[tokio::test]
    async fn patient_not_found_is_a_skip() {
        let mut client = ScriptedClient::new(vec![
            ScriptedClient::page(200, "/sessions/42/patients", PATIENT_LIST),
            ScriptedClient::page(
                200,
                "/sessions/42/patients",
                "<html><body>No results</body></html>",
            ),
        ]);

        let outcome = run_patient_flow(&mut client, &test_record(), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(outcome, IterationOutcome::PatientNotFound);
        assert_eq!(client.requests.len(), 2);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(IterationOutcome::Completed.to_string(), "completed");
        assert_eq!(
            IterationOutcome::NoBatchAvailable.to_string(),
            "no batch available"
        );
    }
}
