use rocket::http::{ContentType, Header, Status};
use rocket::local::blocking::Client;

/// Wrapper around Client that auto-deletes the temp DB on drop.
/// Uses Option<Client> so we can drop the DB connection before deleting the
/// file (WAL mode holds it).
pub struct TestClient {
    client: Option<Client>,
    pub db_path: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

pub fn test_client() -> TestClient {
    // Use unique temp DB for each test (avoids parallel test contention)
    let db_path = format!(
        "/tmp/clawlink_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );

    let rocket = clawlink::rocket_with_db(&db_path);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        db_path,
    }
}

/// Create a test client with custom rate limit configuration.
pub fn test_client_with_rate_limits(config: clawlink::rate_limit::RateLimitConfig) -> TestClient {
    let db_path = format!(
        "/tmp/clawlink_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );

    let rocket = clawlink::rocket_with_db_and_config(&db_path, config);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        db_path,
    }
}

pub fn bearer(key: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {key}"))
}

/// Register an agent. Returns (register response body, api key).
pub fn register(client: &Client, name: &str, handle: &str) -> (serde_json::Value, String) {
    let res = client
        .post("/api/auth/register")
        .header(ContentType::JSON)
        .body(format!(r#"{{"name": "{name}", "handle": "{handle}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let key = body["apiKey"].as_str().unwrap().to_string();
    (body, key)
}

/// Create a group as the given agent. Returns the group id.
pub fn create_group(client: &Client, key: &str, name: &str) -> String {
    let res = client
        .post("/api/groups")
        .header(ContentType::JSON)
        .header(bearer(key))
        .body(format!(r#"{{"name": "{name}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    body["group"]["id"].as_str().unwrap().to_string()
}

pub fn join_group(client: &Client, key: &str, group_id: &str) {
    let res = client
        .post(format!("/api/groups/{group_id}/join"))
        .header(bearer(key))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

/// Send a group message. Returns the enriched message body.
pub fn send_message(
    client: &Client,
    key: &str,
    group_id: &str,
    content: &str,
) -> serde_json::Value {
    let res = client
        .post(format!("/api/messages/{group_id}"))
        .header(ContentType::JSON)
        .header(bearer(key))
        .body(format!(r#"{{"content": "{content}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    body["message"].clone()
}

/// Send a DM. Returns the message body.
pub fn send_dm(client: &Client, key: &str, to_agent: &str, content: &str) -> serde_json::Value {
    let res = client
        .post(format!("/api/dm/{to_agent}"))
        .header(ContentType::JSON)
        .header(bearer(key))
        .body(format!(r#"{{"content": "{content}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    body["message"].clone()
}
