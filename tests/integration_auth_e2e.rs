//! Drives a running server end to end. Start it with a scratch database, then:
//! `cargo test --test integration_auth_e2e -- --ignored`

use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

struct TestContext {
    client: reqwest::Client,
    base_url: String,
}

impl TestContext {
    fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .cookie_store(true)
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap(),
            base_url: std::env::var("E2E_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3000".to_string()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get_timestamp() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    }

    async fn csrf_token(&self) -> String {
        let response = self.client.get(self.url("/login")).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        response
            .cookies()
            .find(|c| c.name() == "csrf_token")
            .map(|c| c.value().to_string())
            .expect("login page should issue a CSRF cookie")
    }
}

#[tokio::test]
#[ignore = "requires a running server"]
async fn test_signup_session_and_logout() {
    let context = TestContext::new();
    let email = format!("e2e_{}@example.com", TestContext::get_timestamp());
    let csrf = context.csrf_token().await;

    // Step 1: signup signs the user in
    let response = context
        .client
        .post(context.url("/signup"))
        .form(&[
            ("name", "E2E User"),
            ("email", email.as_str()),
            ("password", "SecurePass123!@#"),
            ("csrf_token", csrf.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 303, "Signup failed");
    assert!(response.headers().get("x-request-id").is_some());

    // Step 2: the session cookie opens the account page and the API
    let response = context.client.get(context.url("/account")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = context.client.get(context.url("/api/me")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["credential"], "session");

    // Step 3: members are not admins
    let response = context.client.get(context.url("/admin")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 403);

    // Step 4: logout without the CSRF secret is refused
    let response = context.client.post(context.url("/logout")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let response = context
        .client
        .post(context.url("/logout"))
        .header("x-csrf-token", csrf.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 303);

    // Step 5: the session is gone
    let response = context.client.get(context.url("/account")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 303);
    assert_eq!(
        response.headers().get("location").unwrap(),
        "/login?return_to=%2Faccount"
    );
}

#[tokio::test]
#[ignore = "requires a running server"]
async fn test_bad_login_is_generic() {
    let context = TestContext::new();
    let csrf = context.csrf_token().await;

    let response = context
        .client
        .post(context.url("/login"))
        .form(&[
            ("email", "nobody@example.com"),
            ("password", "whatever-it-is"),
            ("csrf_token", csrf.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let page = response.text().await.unwrap();
    assert!(page.contains("Invalid email or password"));
}
