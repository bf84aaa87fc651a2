//! Signing a user session into the vaccination service.

use crate::flow::{require_form, FlowError};
use crate::page;
use crate::session::PageClient;

/// Where the service's sign-in form lives.
const SIGN_IN_PATH: &str = "/users/sign-in";

/// Sign the session into the service with the configured credentials.
///
/// Runs once per user thread before its first iteration. A thread that can't
/// sign in doesn't run at all: every later step would just produce redirects
/// back to this form, drowning the metrics in meaningless requests.
pub(crate) async fn sign_in<C: PageClient>(
    client: &mut C,
    username: &str,
    password: &str,
) -> Result<(), FlowError> {
    let page = client.fetch(SIGN_IN_PATH).await?;
    if !page.is_success() {
        return Err(FlowError::SignInFailed {
            url: page.url,
            detail: format!("sign-in page returned status {}", page.status),
        });
    }

    let form = require_form(&page, SIGN_IN_PATH)?;
    let credentials = [("user[email]", username), ("user[password]", password)];
    let signed_in = client.submit(&form, &credentials).await?;

    if !signed_in.is_success() {
        return Err(FlowError::SignInFailed {
            url: signed_in.url,
            detail: format!("sign-in submission returned status {}", signed_in.status),
        });
    }
    // Rejected credentials render the sign-in form again.
    if page::find_form(&signed_in.html, SIGN_IN_PATH).is_some() {
        return Err(FlowError::SignInFailed {
            url: signed_in.url,
            detail: "still on the sign-in page, check --username and --password".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::testing::ScriptedClient;

    const SIGN_IN_PAGE: &str = r#"
        <form action="/users/sign-in" method="post">
          <input type="hidden" name="authenticity_token" value="tok123" />
          <input name="user[email]" type="email" />
          <input name="user[password]" type="password" />
        </form>"#;

    #[tokio::test]
    async fn submits_credentials() {
        let mut client = ScriptedClient::new(vec![
            ScriptedClient::page(200, "/users/sign-in", SIGN_IN_PAGE),
            ScriptedClient::page(200, "/dashboard", "<h1>Welcome</h1>"),
        ]);

        sign_in(&mut client, "nurse@example.com", "secret")
            .await
            .unwrap();

        let (request, fields) = &client.requests[1];
        assert_eq!(request, "POST /users/sign-in");
        assert!(fields.contains(&("user[email]".to_string(), "nurse@example.com".to_string())));
        assert!(fields.contains(&("user[password]".to_string(), "secret".to_string())));
        // The form's own hidden token rides along.
        assert!(fields.contains(&("authenticity_token".to_string(), "tok123".to_string())));
    }

    #[tokio::test]
    async fn rejected_credentials_fail() {
        // The service answers a bad sign-in by rendering the form again.
        let mut client = ScriptedClient::new(vec![
            ScriptedClient::page(200, "/users/sign-in", SIGN_IN_PAGE),
            ScriptedClient::page(200, "/users/sign-in", SIGN_IN_PAGE),
        ]);

        let error = sign_in(&mut client, "nurse@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(error, FlowError::SignInFailed { .. }));
    }

    #[tokio::test]
    async fn missing_form_fails() {
        let mut client = ScriptedClient::new(vec![ScriptedClient::page(
            200,
            "/users/sign-in",
            "<h1>Maintenance</h1>",
        )]);

        let error = sign_in(&mut client, "nurse@example.com", "secret")
            .await
            .unwrap_err();
        assert!(matches!(error, FlowError::MissingForm { .. }));
    }
}
