//! Scraping helpers for the target service's HTML.
//!
//! The vaccination service has no API surface, the "protocol" is its rendered
//! HTML. Every selector the load test depends on lives in this module, so a
//! markup change in the target service is fixed in exactly one place. The
//! flows only ever see the structured values extracted here.

use http::StatusCode;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref INPUT_TAG: Regex = Regex::new(r"<input[^>]*>").unwrap();
    static ref ATTR_NAME: Regex = Regex::new(r#"name=['"]([^'"]*)['"]"#).unwrap();
    static ref ATTR_VALUE: Regex = Regex::new(r#"value=['"]([^'"]*)['"]"#).unwrap();
    static ref ATTR_CLASS: Regex = Regex::new(r#"class=['"]([^'"]*)['"]"#).unwrap();
    static ref PATIENT_LINK: Regex =
        Regex::new(r#"href=['"](/sessions/[^'"]*/patients/[^'"]*)['"]"#).unwrap();
    static ref CONSENT_TAG: Regex =
        Regex::new(r#"(?s)<strong[^>]*class=['"][^'"]*nhsuk-tag--aqua-green[^'"]*['"][^>]*>(.*?)</strong>"#)
            .unwrap();
}

/// The current page of the simulated browser: where it ended up, the response
/// status, and the HTML to scrape the next step's form from. Threaded by value
/// through the flow functions, never shared between users.
#[derive(Clone, Debug)]
pub struct Page {
    /// Final URL, after any redirects.
    pub url: String,
    /// HTTP status of the final response.
    pub status: StatusCode,
    /// Response body.
    pub html: String,
}

impl Page {
    /// Whether the response status was in the 2xx range.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// A form located in a page, ready to submit: where it posts to, the method
/// it declares, and every named input value it carries (including the hidden
/// Rails `authenticity_token` and `_method` fields).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Form {
    pub action: String,
    pub method: String,
    pub fields: Vec<(String, String)>,
}

impl Form {
    /// The value of a named field, if the form carries one.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Locate the first form whose action contains `action_fragment` and collect
/// its input values. Returns `None` if no such form is on the page.
pub fn find_form(html: &str, action_fragment: &str) -> Option<Form> {
    let form_re = Regex::new(&format!(
        r#"(?s)<form[^>]*action=['"]([^'"]*{}[^'"]*)['"][^>]*>(.*?)</form>"#,
        regex::escape(action_fragment)
    ))
    .unwrap();
    let captures = form_re.captures(html)?;
    let action = captures[1].to_string();
    let body = captures[2].to_string();

    // The method attribute sits inside the opening form tag, which the action
    // capture splits in two. Re-scan the matched tag for it.
    let form_tag = captures[0]
        .split('>')
        .next()
        .unwrap_or_default()
        .to_string();
    let method = match Regex::new(r#"method=['"]([^'"]*)['"]"#)
        .unwrap()
        .captures(&form_tag)
    {
        Some(method) => method[1].to_lowercase(),
        None => "get".to_string(),
    };

    let mut fields = Vec::new();
    for input in INPUT_TAG.find_iter(&body) {
        let tag = input.as_str();
        if let (Some(name), Some(value)) = (ATTR_NAME.captures(tag), ATTR_VALUE.captures(tag)) {
            fields.push((name[1].to_string(), value[1].to_string()));
        }
    }

    Some(Form {
        action,
        method,
        fields,
    })
}

/// Use a regular expression to get the value of a named input element.
pub fn get_input_value(html: &str, name: &str) -> Option<String> {
    for input in INPUT_TAG.find_iter(html) {
        let tag = input.as_str();
        if let Some(tag_name) = ATTR_NAME.captures(tag) {
            if &tag_name[1] == name {
                return ATTR_VALUE.captures(tag).map(|value| value[1].to_string());
            }
        }
    }
    None
}

/// The first patient card on a search-results page: the link to the patient's
/// programme page, and the attendance-registration form if the patient has not
/// already been registered.
#[derive(Clone, Debug)]
pub struct PatientCard {
    /// Path of the patient link, such as `/sessions/42/patients/7/hpv`.
    pub patient_path: String,
    /// The "register present" form, absent once attendance is recorded.
    pub register_form: Option<Form>,
}

/// Scan a search-results page for its first patient card.
///
/// Cards are delimited by the `nhsuk-card` class. Returns `None` when the
/// search matched nothing, or when the first card carries no patient link.
pub fn first_patient_card(html: &str) -> Option<PatientCard> {
    const CARD_MARKER: &str = r#"class="nhsuk-card"#;
    let start = html.find(CARD_MARKER)?;
    let rest = &html[start..];
    let end = rest[CARD_MARKER.len()..]
        .find(CARD_MARKER)
        .map(|offset| offset + CARD_MARKER.len())
        .unwrap_or(rest.len());
    let card = &rest[..end];

    let patient_path = PATIENT_LINK.captures(card).map(|link| link[1].to_string())?;
    let register_form = find_form(card, "/register");
    Some(PatientCard {
        patient_path,
        register_form,
    })
}

/// Extract the numeric patient id from a patient link: the fourth path
/// segment, `/sessions/42/patients/7/hpv` giving `7`.
pub fn patient_id_from_path(path: &str) -> Option<u64> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .nth(3)?
        .parse()
        .ok()
}

/// Whether the page shows an aqua-green tag reading "Consent given". When it
/// does, the consent workflow is skipped for this patient.
pub fn consent_given(html: &str) -> bool {
    CONSENT_TAG
        .captures_iter(html)
        .any(|tag| tag[1].contains("Consent given"))
}

/// The value of the first batch checkbox on a batch-selection page, or `None`
/// if the page offers no batches.
pub fn first_batch_value(html: &str) -> Option<String> {
    for input in INPUT_TAG.find_iter(html) {
        let tag = input.as_str();
        if let Some(class) = ATTR_CLASS.captures(tag) {
            if class[1].split_whitespace().any(|c| c == "nhsuk-checkboxes__input") {
                return ATTR_VALUE.captures(tag).map(|value| value[1].to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGN_IN_PAGE: &str = r#"
        <html><body>
        <form class="nhsuk-form" action="/users/sign-in" method="post">
          <input type="hidden" name="authenticity_token" value="tok123" autocomplete="off" />
          <input class="nhsuk-input" id="user_email" name="user[email]" type="email" />
          <input class="nhsuk-input" id="user_password" name="user[password]" type="password" />
          <button class="nhsuk-button">Log in</button>
        </form>
        </body></html>"#;

    const SEARCH_RESULTS: &str = r#"
        <html><body>
        <div class="nhsuk-card app-card">
          <h3><a href="/sessions/42/patients/7/hpv">Jo Bloggs</a></h3>
          <form action="/sessions/42/patients/7/register" method="post">
            <input type="hidden" name="authenticity_token" value="tok456" />
            <input type="hidden" name="state" value="attending" />
            <button>Attending</button>
          </form>
        </div>
        <div class="nhsuk-card app-card">
          <h3><a href="/sessions/42/patients/9/hpv">Jo Bloggson</a></h3>
        </div>
        </body></html>"#;

    const ALREADY_REGISTERED: &str = r#"
        <div class="nhsuk-card app-card">
          <h3><a href="/sessions/42/patients/7/hpv">Jo Bloggs</a></h3>
          <strong class="nhsuk-tag">Attending</strong>
        </div>"#;

    #[test]
    fn form_with_hidden_fields() {
        let form = find_form(SIGN_IN_PAGE, "/users/sign-in").unwrap();
        assert_eq!(form.action, "/users/sign-in");
        assert_eq!(form.method, "post");
        assert_eq!(form.field("authenticity_token"), Some("tok123"));

        // Not on the page at all.
        assert!(find_form(SIGN_IN_PAGE, "/users/password").is_none());
    }

    #[test]
    fn form_without_method_defaults_to_get() {
        let html = r#"<form action="/search"><input name="q" value="" /></form>"#;
        let form = find_form(html, "/search").unwrap();
        assert_eq!(form.method, "get");
    }

    #[test]
    fn input_value() {
        assert_eq!(
            get_input_value(SIGN_IN_PAGE, "authenticity_token"),
            Some("tok123".to_string())
        );
        assert_eq!(get_input_value(SIGN_IN_PAGE, "missing"), None);
    }

    #[test]
    fn first_card_with_registration_form() {
        let card = first_patient_card(SEARCH_RESULTS).unwrap();
        assert_eq!(card.patient_path, "/sessions/42/patients/7/hpv");

        let form = card.register_form.unwrap();
        assert_eq!(form.action, "/sessions/42/patients/7/register");
        assert_eq!(form.field("state"), Some("attending"));
    }

    #[test]
    fn first_card_already_registered() {
        let card = first_patient_card(ALREADY_REGISTERED).unwrap();
        assert_eq!(card.patient_path, "/sessions/42/patients/7/hpv");
        assert!(card.register_form.is_none());
    }

    #[test]
    fn no_cards_on_page() {
        assert!(first_patient_card("<html><body>No results</body></html>").is_none());
    }

    #[test]
    fn card_without_patient_link() {
        let html = r#"<div class="nhsuk-card">Nothing to see</div>"#;
        assert!(first_patient_card(html).is_none());
    }

    #[test]
    fn patient_id_parsing() {
        assert_eq!(patient_id_from_path("/sessions/42/patients/7/hpv"), Some(7));
        assert_eq!(patient_id_from_path("/sessions/1/patients/31337/flu"), Some(31337));
        assert_eq!(patient_id_from_path("/sessions/42/patients"), None);
        assert_eq!(patient_id_from_path("/sessions/42/patients/seven/hpv"), None);
    }

    #[test]
    fn consent_tag_detection() {
        let given = r#"<strong class="nhsuk-tag nhsuk-tag--aqua-green">Consent given</strong>"#;
        assert!(consent_given(given));

        // The tag text can carry extra markup around the phrase.
        let nested =
            r#"<strong class="nhsuk-tag nhsuk-tag--aqua-green"><span>Consent given</span></strong>"#;
        assert!(consent_given(nested));

        // A different tag colour does not count, nor does a page with no tags.
        let refused = r#"<strong class="nhsuk-tag nhsuk-tag--red">Refused</strong>"#;
        assert!(!consent_given(refused));
        assert!(!consent_given("<html><body></body></html>"));

        // An aqua-green tag with other text does not count.
        let other = r#"<strong class="nhsuk-tag nhsuk-tag--aqua-green">Triage started</strong>"#;
        assert!(!consent_given(other));
    }

    #[test]
    fn batch_checkbox() {
        let html = r#"
            <form action="/batch" method="post">
              <input class="nhsuk-checkboxes__input" type="checkbox" name="batch_id" value="AB1234" />
              <input class="nhsuk-checkboxes__input" type="checkbox" name="batch_id" value="CD5678" />
            </form>"#;
        assert_eq!(first_batch_value(html), Some("AB1234".to_string()));
        assert_eq!(first_batch_value("<p>No batches in stock.</p>"), None);
    }
}
