//! Finding a patient in a session and registering their attendance.

use crate::data::PatientRecord;
use crate::flow::{require_form, FlowError, Patient};
use crate::page;
use crate::session::PageClient;

/// What the search and registration steps found.
#[derive(Debug)]
pub(crate) enum RegisterOutcome {
    /// The patient was found and attendance has just been registered.
    Registered(Patient),
    /// The search matched no patient cards.
    NotFound,
    /// The first card carried no registration form, attendance was already
    /// registered by an earlier run.
    AlreadyRegistered,
}

/// Search the record's session for the patient by full name and register
/// them as attending.
///
/// The patient id is parsed from the card's link, whose path also serves as
/// the programme page the rest of the flow operates on.
pub(crate) async fn register_attendance<C: PageClient>(
    client: &mut C,
    record: &PatientRecord,
) -> Result<RegisterOutcome, FlowError> {
    // The session's patient list carries the search form at the top. The
    // search form's own action is this same path, so it's always the first
    // form matched.
    let list_path = format!("/sessions/{}/patients", record.session_id);
    let list = client.fetch(&list_path).await?;
    let search_form = require_form(&list, &list_path)?;

    let full_name = record.full_name();
    let results = client
        .submit(&search_form, &[("search[q]", full_name.as_str())])
        .await?;

    let card = match page::first_patient_card(&results.html) {
        Some(card) => card,
        None => return Ok(RegisterOutcome::NotFound),
    };
    let id = match page::patient_id_from_path(&card.patient_path) {
        Some(id) => id,
        None => {
            return Err(FlowError::UnexpectedPage {
                url: results.url,
                detail: format!("patient link '{}' has no numeric id", card.patient_path),
            });
        }
    };
    let form = match card.register_form {
        Some(form) => form,
        None => return Ok(RegisterOutcome::AlreadyRegistered),
    };

    // Mark the patient as attending today's session. The form carries its
    // state in hidden fields, nothing to add.
    client.submit(&form, &[]).await?;

    let page = client.fetch(&card.patient_path).await?;
    Ok(RegisterOutcome::Registered(Patient {
        id,
        path: card.patient_path,
        page,
    }))
}
