//! Recording a vaccination.

use std::time::Duration;

use tokio::time::sleep;

use crate::flow::{require_form, FlowError, Patient};
use crate::page;
use crate::session::PageClient;

/// How the vaccination steps ended.
#[derive(Debug)]
pub(crate) enum VaccinateOutcome {
    /// All three steps went through, the vaccination is recorded.
    Recorded,
    /// The batch page offered no vaccine batch to pick.
    NoBatch,
}

/// Record a vaccination for a registered, consented patient: the wizard form
/// with fixed identity-check and pre-screening answers, the batch selection,
/// and the final confirmation.
pub(crate) async fn record_vaccination<C: PageClient>(
    client: &mut C,
    patient: &Patient,
    step_delay: Duration,
) -> Result<VaccinateOutcome, FlowError> {
    // The wizard form sits on the programme page once the patient is ready.
    let form = require_form(&patient.page, "/vaccinations/new")?;
    let wizard = [
        ("vaccinate_form[identity_confirmed]", "true"),
        ("vaccinate_form[pre_screened]", "true"),
        ("vaccinate_form[method]", "intramuscular"),
        ("vaccinate_form[site]", "left_arm_upper"),
    ];
    let page = client.submit(&form, &wizard).await?;
    sleep(step_delay).await;

    // Pick the first batch on offer, scraped from its checkbox.
    let batch = match page::first_batch_value(&page.html) {
        Some(batch) => batch,
        None => return Ok(VaccinateOutcome::NoBatch),
    };
    let form = require_form(&page, "/batch")?;
    let page = client.submit(&form, &[("batch_id", batch.as_str())]).await?;
    sleep(step_delay).await;

    // Confirm.
    let form = require_form(&page, "/confirm")?;
    client.submit(&form, &[]).await?;
    sleep(step_delay).await;

    Ok(VaccinateOutcome::Recorded)
}
