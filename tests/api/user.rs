use rstest::rstest;
use uuid::Uuid;

use crate::utils::spawn_app;

#[tokio::test]
async fn registration_returns_201_and_a_usable_token() {
    let app = spawn_app().await;

    let body = serde_json::json!({
        "name": "Pat Doe",
        "email": "pat@example.com",
        "password": "p4ssw0rd-for-tests",
    });
    let response = app.post_json("/api/auth/register", None, &body).await;
    assert_eq!(201, response.status().as_u16());
    let payload = response.json::<serde_json::Value>().await.unwrap();
    assert_eq!("user", payload["user"]["role"]);
    let token = payload["token"].as_str().unwrap().to_string();

    let me = app.get("/api/auth/me", Some(&token)).await;
    assert_eq!(200, me.status().as_u16());
    let profile = me.json::<serde_json::Value>().await.unwrap();
    assert_eq!("pat@example.com", profile["email"]);
    // Non-doctors carry no slot ledger
    assert!(profile.get("availableSlots").is_none());
}

#[tokio::test]
async fn registering_the_same_email_twice_returns_400_and_keeps_one_record() {
    let app = spawn_app().await;
    let body = serde_json::json!({
        "name": "Pat Doe",
        "email": "pat@example.com",
        "password": "p4ssw0rd-for-tests",
    });

    let first = app.post_json("/api/auth/register", None, &body).await;
    assert_eq!(201, first.status().as_u16());

    let second = app.post_json("/api/auth/register", None, &body).await;
    assert_eq!(400, second.status().as_u16());
    let payload = second.json::<serde_json::Value>().await.unwrap();
    assert_eq!("User with this email already exists", payload["message"]);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = $1")
        .bind("pat@example.com")
        .fetch_one(&app.db_pool)
        .await
        .expect("Failed to count users.");
    assert_eq!(1, count);
}

#[rstest]
#[case("")]
#[case("not-a-role")]
#[tokio::test]
async fn registering_with_an_unknown_role_returns_400(#[case] role: &str) {
    let app = spawn_app().await;

    let body = serde_json::json!({
        "name": "Pat Doe",
        "email": "pat@example.com",
        "password": "p4ssw0rd-for-tests",
        "role": role,
    });
    let response = app.post_json("/api/auth/register", None, &body).await;

    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn login_with_valid_credentials_returns_a_usable_token() {
    let app = spawn_app().await;
    let register = serde_json::json!({
        "name": "Pat Doe",
        "email": "pat@example.com",
        "password": "p4ssw0rd-for-tests",
    });
    app.post_json("/api/auth/register", None, &register).await;

    let body = serde_json::json!({
        "email": "pat@example.com",
        "password": "p4ssw0rd-for-tests",
    });
    let response = app.post_json("/api/auth/login", None, &body).await;

    assert_eq!(200, response.status().as_u16());
    let payload = response.json::<serde_json::Value>().await.unwrap();
    assert_eq!("Login successful", payload["message"]);
    assert_eq!("pat@example.com", payload["user"]["email"]);
    assert_eq!("user", payload["user"]["role"]);

    // The freshly issued token authenticates follow-up requests
    let token = payload["token"].as_str().unwrap();
    let me = app.get("/api/auth/me", Some(token)).await;
    assert_eq!(200, me.status().as_u16());
    let profile = me.json::<serde_json::Value>().await.unwrap();
    assert_eq!("Pat Doe", profile["name"]);
}

#[tokio::test]
async fn login_with_the_wrong_password_returns_400() {
    let app = spawn_app().await;
    let register = serde_json::json!({
        "name": "Pat Doe",
        "email": "pat@example.com",
        "password": "p4ssw0rd-for-tests",
    });
    app.post_json("/api/auth/register", None, &register).await;

    let body = serde_json::json!({
        "email": "pat@example.com",
        "password": "definitely-wrong",
    });
    let response = app.post_json("/api/auth/login", None, &body).await;

    assert_eq!(400, response.status().as_u16());
    let payload = response.json::<serde_json::Value>().await.unwrap();
    assert_eq!("Invalid email or password", payload["message"]);
}

#[tokio::test]
async fn requests_without_a_bearer_token_are_rejected() {
    let app = spawn_app().await;

    let response = app.get("/api/auth/me", None).await;

    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn tokens_for_deleted_accounts_are_rejected() {
    let app = spawn_app().await;
    let user = app.register("Pat Doe", "user", None).await;

    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user.id)
        .execute(&app.db_pool)
        .await
        .expect("Failed to delete user.");

    let response = app.get("/api/auth/me", Some(&user.token)).await;
    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn doctor_profile_includes_specialization_and_slots() {
    let app = spawn_app().await;
    let doctor = app
        .register("Dr Alice", "doctor", Some("cardiology"))
        .await;

    let body = serde_json::json!({ "date": "2024-06-01", "times": ["09:00"] });
    let published = app
        .post_json("/api/appointments/available-slots", Some(&doctor.token), &body)
        .await;
    assert_eq!(201, published.status().as_u16());

    let profile = app
        .get("/api/auth/me", Some(&doctor.token))
        .await
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!("cardiology", profile["specialization"]);
    assert_eq!("2024-06-01", profile["availableSlots"][0]["date"]);
}

#[tokio::test]
async fn garbage_tokens_are_rejected() {
    let app = spawn_app().await;

    let response = app
        .get("/api/auth/me", Some(&Uuid::new_v4().to_string()))
        .await;

    assert_eq!(401, response.status().as_u16());
}
