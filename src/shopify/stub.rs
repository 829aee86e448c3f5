//! Local Admin GraphQL stand-in for exercising `ShopifyClient` end to end.

use super::client::ShopifyClient;
use axum::{Json, Router, extract::State, routing::post};
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

type Responder = Box<dyn Fn(&str, &Value) -> Value + Send + Sync>;

struct StubState {
    respond: Responder,
    seen: Mutex<Vec<(String, Value)>>,
}

/// Answers every request with `{"data": respond(operation, variables)}`.
pub struct StubShop {
    state: Arc<StubState>,
    base_url: String,
    handle: JoinHandle<()>,
}

impl StubShop {
    pub async fn spawn<F>(respond: F) -> Self
    where
        F: Fn(&str, &Value) -> Value + Send + Sync + 'static,
    {
        let state = Arc::new(StubState {
            respond: Box::new(respond),
            seen: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/graphql.json", post(graphql))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            state,
            base_url,
            handle,
        }
    }

    pub fn client(&self) -> ShopifyClient {
        ShopifyClient::at_endpoint(
            Client::new(),
            format!("{}/graphql.json", self.base_url),
            "shpat_test",
        )
    }

    /// Operation names in the order they arrived.
    pub fn operations(&self) -> Vec<String> {
        self.state
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|(operation, _)| operation.clone())
            .collect()
    }

    /// Variables of the last request named `operation`.
    pub fn variables(&self, operation: &str) -> Value {
        self.state
            .seen
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(name, _)| name == operation)
            .map(|(_, variables)| variables.clone())
            .unwrap_or(Value::Null)
    }
}

impl Drop for StubShop {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn graphql(State(stub): State<Arc<StubState>>, Json(body): Json<Value>) -> Json<Value> {
    let operation = operation_name(body["query"].as_str().unwrap_or_default());
    let variables = body["variables"].clone();
    let data = (stub.respond)(&operation, &variables);
    stub.seen.lock().unwrap().push((operation, variables));
    Json(json!({ "data": data }))
}

/// `mutation DraftOrderCreate($input: ...)` → `DraftOrderCreate`.
fn operation_name(query: &str) -> String {
    query
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .split(['(', '{'])
        .next()
        .unwrap_or_default()
        .to_string()
}

/// A mutation payload with no `userErrors`.
pub fn accepted(mut payload: Value) -> Value {
    payload["userErrors"] = json!([]);
    payload
}

/// A mutation payload refused with `message`.
pub fn refused(message: &str) -> Value {
    json!({ "userErrors": [{ "field": null, "message": message }] })
}
