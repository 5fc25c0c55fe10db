#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;
use url::Url;
use vitals_fhir::{BundleTransport, FetchConfig, FetchError};

pub const ORIGIN: &str = "http://localhost:3000/hapi-fhir-jpaserver/fhir";

pub fn fixture(name: &str) -> Value {
    let path = format!("{}/tests/data/{name}", env!("CARGO_MANIFEST_DIR"));
    let raw = fs::read_to_string(&path).expect("Không đọc được bundle mẫu");
    serde_json::from_str(&raw).expect("Bundle mẫu không hợp lệ")
}

pub fn config() -> FetchConfig {
    FetchConfig {
        base_url: ORIGIN.to_string(),
        ..FetchConfig::default()
    }
}

pub fn search(patient_id: &str) -> String {
    format!("{ORIGIN}/Observation?subject=Patient/{patient_id}")
}

pub fn observation(id: &str, code: &str, value: f64, last_updated: &str) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "meta": { "lastUpdated": last_updated },
        "code": { "coding": [{ "code": code }] },
        "valueQuantity": { "value": value, "unit": "bpm" }
    })
}

pub fn bundle(resources: Vec<Value>, next: Option<&str>) -> Value {
    let entry: Vec<Value> = resources
        .into_iter()
        .map(|resource| json!({ "resource": resource }))
        .collect();
    let link: Vec<Value> = next
        .map(|url| vec![json!({ "relation": "next", "url": url })])
        .unwrap_or_default();
    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "link": link,
        "entry": entry
    })
}

/// Serves canned pages keyed by exact URL and records every request.
#[derive(Default)]
pub struct FixtureTransport {
    pages: HashMap<String, Value>,
    requests: Mutex<Vec<String>>,
}

impl FixtureTransport {
    pub fn with_page(mut self, url: &str, bundle: Value) -> Self {
        self.pages.insert(url.to_string(), bundle);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BundleTransport for FixtureTransport {
    async fn get_bundle(&self, url: &Url) -> Result<Value, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        self.pages
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

/// Always answers with another page whose `next` link points one step
/// further, like a server stuck in a pagination loop.
#[derive(Default)]
pub struct EndlessTransport {
    requests: Mutex<usize>,
}

impl EndlessTransport {
    pub fn requests(&self) -> usize {
        *self.requests.lock().unwrap()
    }
}

#[async_trait]
impl BundleTransport for EndlessTransport {
    async fn get_bundle(&self, _url: &Url) -> Result<Value, FetchError> {
        let page = {
            let mut count = self.requests.lock().unwrap();
            *count += 1;
            *count
        };
        let next = format!("http://hapi-fhir:8080/fhir?_getpages=loop&page={page}");
        Ok(bundle(
            vec![observation(&format!("obs-{page}"), "220045", 70.0, "2024-01-01T00:00:00Z")],
            Some(&next),
        ))
    }
}

/// Holds requests whose URL contains `blocked` until `release` is called.
pub struct GatedTransport {
    inner: FixtureTransport,
    blocked: String,
    started: Notify,
    gate: Notify,
}

impl GatedTransport {
    pub fn new(inner: FixtureTransport, blocked: &str) -> Self {
        Self {
            inner,
            blocked: blocked.to_string(),
            started: Notify::new(),
            gate: Notify::new(),
        }
    }

    /// Wait until a blocked request is in flight.
    pub async fn wait_blocked(&self) {
        self.started.notified().await;
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl BundleTransport for GatedTransport {
    async fn get_bundle(&self, url: &Url) -> Result<Value, FetchError> {
        if url.as_str().contains(&self.blocked) {
            self.started.notify_one();
            self.gate.notified().await;
        }
        self.inner.get_bundle(url).await
    }
}
