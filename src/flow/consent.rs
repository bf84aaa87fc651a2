//! Recording a consent response over the phone.
//!
//! The service's consent wizard is a fixed sequence of small forms. The
//! sequence here submits each one with literal values, simulating a nurse
//! phoning the parent and recording verbal consent. An HTTP error in any
//! step has already been logged and counted by the session when the page
//! comes back, the wizard carries on with whatever page it got, and only
//! stops early when a page turns up without the form the next step needs.

use std::time::Duration;

use tokio::time::sleep;

use crate::data::PatientRecord;
use crate::flow::{require_form, FlowError, Patient};
use crate::page::{self, Page};
use crate::session::PageClient;

/// Whether the programme page calls for recording a consent response.
///
/// The service shows an aqua-green "Consent given" tag once a response is on
/// file; any other tag colour (refused, conflicting, none yet) means the
/// wizard has to run.
pub(crate) fn requires_consent(page: &Page) -> bool {
    !page::consent_given(&page.html)
}

/// Run the consent wizard for one patient, one form per step, pausing the
/// configured step delay between submissions.
pub(crate) async fn record_consent<C: PageClient>(
    client: &mut C,
    record: &PatientRecord,
    patient: &Patient,
    step_delay: Duration,
) -> Result<(), FlowError> {
    // Save triage notes first, when the page offers them.
    if let Some(form) = page::find_form(&patient.page.html, "/triage") {
        let triage = [
            ("triage[status]", "ready_to_vaccinate"),
            ("triage[notes]", ""),
        ];
        client.submit(&form, &triage).await?;
    }
    sleep(step_delay).await;

    // Start a new consent response.
    let page = client
        .fetch(&format!("{}/consent-responses/new", patient.path))
        .await?;
    sleep(step_delay).await;

    // Who is giving consent.
    let form = require_form(&page, "/who")?;
    let who = [
        ("consent_form[parent_name]", record.parent_name.as_str()),
        (
            "consent_form[parent_relationship]",
            record.parent_relationship.as_str(),
        ),
    ];
    let page = client.submit(&form, &who).await?;
    sleep(step_delay).await;

    // How to reach them.
    let form = require_form(&page, "/parent-details")?;
    let details = [
        ("consent_form[parent_email]", record.parent_email.as_str()),
        ("consent_form[parent_phone]", record.parent_phone.as_str()),
    ];
    let page = client.submit(&form, &details).await?;
    sleep(step_delay).await;

    // How the response was obtained.
    let form = require_form(&page, "/route")?;
    let page = client
        .submit(&form, &[("consent_form[route]", "phone")])
        .await?;
    sleep(step_delay).await;

    // The decision itself.
    let form = require_form(&page, "/agree")?;
    let page = client
        .submit(&form, &[("consent_form[response]", "given")])
        .await?;
    sleep(step_delay).await;

    // Health questions, all answered no.
    let form = require_form(&page, "/questions")?;
    let page = client
        .submit(&form, &[("consent_form[health_answers]", "no")])
        .await?;
    sleep(step_delay).await;

    // Confirm the recorded response.
    let form = require_form(&page, "/confirm")?;
    client.submit(&form, &[]).await?;
    sleep(step_delay).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::testing::ScriptedClient;
    use crate::flow::tests::test_record;

    const PATIENT_PATH: &str = "/sessions/42/patients/7/hpv";

    fn patient(html: &str) -> Patient {
        Patient {
            id: 7,
            path: PATIENT_PATH.to_string(),
            page: ScriptedClient::page(200, PATIENT_PATH, html),
        }
    }

    fn wizard_page(step: &str) -> Page {
        ScriptedClient::page(
            200,
            &format!("{}/consent-responses/{}", PATIENT_PATH, step),
            &format!(
                r#"<form action="{}/consent-responses/{}" method="post"></form>"#,
                PATIENT_PATH, step
            ),
        )
    }

    #[test]
    fn consent_tag_decides() {
        let given = patient(r#"<strong class="nhsuk-tag nhsuk-tag--aqua-green">Consent given</strong>"#);
        assert!(!requires_consent(&given.page));

        let refused = patient(r#"<strong class="nhsuk-tag nhsuk-tag--red">Refused</strong>"#);
        assert!(requires_consent(&refused.page));

        // No tags at all also means a response has to be recorded.
        let untagged = patient("<h1>Jo Bloggs</h1>");
        assert!(requires_consent(&untagged.page));
    }

    #[tokio::test]
    async fn wizard_submits_every_step() {
        let patient = patient(&format!(
            r#"<form action="{}/triage" method="post"></form>"#,
            "/sessions/42/patients/7"
        ));
        let mut client = ScriptedClient::new(vec![
            ScriptedClient::page(200, "/sessions/42/patients/7/triage", ""),
            wizard_page("who"),
            wizard_page("parent-details"),
            wizard_page("route"),
            wizard_page("agree"),
            wizard_page("questions"),
            wizard_page("confirm"),
            ScriptedClient::page(200, PATIENT_PATH, ""),
        ]);

        record_consent(&mut client, &test_record(), &patient, Duration::ZERO)
            .await
            .unwrap();

        let requests: Vec<&str> = client
            .requests
            .iter()
            .map(|(request, _)| request.as_str())
            .collect();
        assert_eq!(
            requests,
            vec![
                "POST /sessions/42/patients/7/triage",
                "GET /sessions/42/patients/7/hpv/consent-responses/new",
                "POST /sessions/42/patients/7/hpv/consent-responses/who",
                "POST /sessions/42/patients/7/hpv/consent-responses/parent-details",
                "POST /sessions/42/patients/7/hpv/consent-responses/route",
                "POST /sessions/42/patients/7/hpv/consent-responses/agree",
                "POST /sessions/42/patients/7/hpv/consent-responses/questions",
                "POST /sessions/42/patients/7/hpv/consent-responses/confirm",
            ]
        );

        // The parent details from the record rode along on the right steps.
        let (_, who_fields) = &client.requests[2];
        assert!(who_fields.contains(&(
            "consent_form[parent_name]".to_string(),
            "Sam Bloggs".to_string()
        )));
        assert!(who_fields.contains(&(
            "consent_form[parent_relationship]".to_string(),
            "guardian".to_string()
        )));
        let (_, route_fields) = &client.requests[4];
        assert!(route_fields.contains(&("consent_form[route]".to_string(), "phone".to_string())));
    }

    #[tokio::test]
    async fn triage_is_skipped_when_absent() {
        let patient = patient("<h1>Jo Bloggs</h1>");
        let mut client = ScriptedClient::new(vec![
            wizard_page("who"),
            wizard_page("parent-details"),
            wizard_page("route"),
            wizard_page("agree"),
            wizard_page("questions"),
            wizard_page("confirm"),
            ScriptedClient::page(200, PATIENT_PATH, ""),
        ]);

        record_consent(&mut client, &test_record(), &patient, Duration::ZERO)
            .await
            .unwrap();

        // Seven requests: no triage submission, the wizard went straight to
        // starting a new consent response.
        assert_eq!(client.requests.len(), 7);
        assert_eq!(
            client.requests[0].0,
            "GET /sessions/42/patients/7/hpv/consent-responses/new"
        );
    }

    #[tokio::test]
    async fn wizard_stops_when_a_form_is_missing() {
        let patient = patient("<h1>Jo Bloggs</h1>");
        // The route step comes back as an error page with no form on it.
        let mut client = ScriptedClient::new(vec![
            wizard_page("who"),
            wizard_page("parent-details"),
            ScriptedClient::page(500, PATIENT_PATH, "<h1>Something went wrong</h1>"),
        ]);

        let error = record_consent(&mut client, &test_record(), &patient, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(error, FlowError::MissingForm { .. }));
    }
}
