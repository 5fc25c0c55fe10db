//! FHIR boundary for the vitals pipeline: bundle parsing, paginated retrieval
//! and stale-result fencing.

mod fetch;
mod refresh;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vitals_core::{analyze, ClinicalResource, PatientVitals, Quantity, VitalCodeTable, VitalsError};

#[cfg(not(target_arch = "wasm32"))]
pub use fetch::HttpTransport;
pub use fetch::{rewrite_origin, search_url, BundleTransport, ResourceFetcher};
pub use refresh::{PublishedVitals, RefreshOutcome, VitalsRefresher};

/// Default search target: the HAPI FHIR server behind the local proxy.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/hapi-fhir-jpaserver/fhir";

/// What happens to published vitals when the latest refresh fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Retain,
    Clear,
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// Externally reachable server base; next links are rewritten onto its
    /// scheme, host and port.
    pub base_url: String,
    /// Hard ceiling on pages requested for one retrieval.
    pub max_pages: usize,
    pub timeout_secs: u64,
    pub on_failure: FailurePolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_pages: 1000,
            timeout_secs: 30,
            on_failure: FailurePolicy::Retain,
        }
    }
}

/// Errors that abort a retrieval. Pages accumulated before the failure are
/// discarded.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Server returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed bundle: {0}")]
    Bundle(#[from] VitalsError),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Pagination exceeded {limit} pages")]
    PageLimitExceeded { limit: usize },
    #[error("Pagination revisited {url}")]
    PaginationCycle { url: String },
}

/// One page of a search result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BundlePage {
    pub resources: Vec<ClinicalResource>,
    /// Raw `next` link as the server reported it.
    pub next: Option<String>,
}

/// Analyze every vital sign contained in a bundle JSON string.
pub fn summarize_bundle_str(
    bundle_json: &str,
    table: &VitalCodeTable,
) -> Result<PatientVitals, VitalsError> {
    let value: Value =
        serde_json::from_str(bundle_json).map_err(|err| VitalsError::Parse(err.to_string()))?;
    summarize_bundle_value(&value, table)
}

/// Analyze every vital sign contained in a `serde_json::Value` bundle.
pub fn summarize_bundle_value(
    bundle: &Value,
    table: &VitalCodeTable,
) -> Result<PatientVitals, VitalsError> {
    let page = parse_bundle(bundle)?;
    Ok(analyze(&page.resources, table))
}

/// Validate a bundle envelope and extract its resources and `next` link.
pub fn parse_bundle(bundle: &Value) -> Result<BundlePage, VitalsError> {
    let bundle_type = bundle
        .get("resourceType")
        .and_then(Value::as_str)
        .ok_or(VitalsError::MissingData)?;

    if bundle_type != "Bundle" {
        return Err(VitalsError::Parse(format!(
            "Expected resourceType Bundle, received {bundle_type}"
        )));
    }

    let resources = match bundle.get("entry") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(|entry| entry.get("resource"))
            .filter(|resource| resource.is_object())
            .map(parse_resource)
            .collect(),
        Some(_) => {
            return Err(VitalsError::Parse(
                "Bundle entry must be an array".to_string(),
            ))
        }
    };

    Ok(BundlePage {
        resources,
        next: next_link(bundle),
    })
}

/// Convert one embedded resource into the typed record.
pub fn parse_resource(resource: &Value) -> ClinicalResource {
    ClinicalResource {
        resource_type: string_field(resource, "resourceType").unwrap_or_default(),
        id: string_field(resource, "id"),
        code: primary_code(resource),
        value: resource.get("valueQuantity").and_then(extract_quantity),
        last_updated: resource
            .get("meta")
            .and_then(|meta| string_field(meta, "lastUpdated")),
        effective_date_time: string_field(resource, "effectiveDateTime"),
        issued: string_field(resource, "issued"),
    }
}

fn next_link(bundle: &Value) -> Option<String> {
    bundle
        .get("link")
        .and_then(Value::as_array)?
        .iter()
        .find(|link| link.get("relation").and_then(Value::as_str) == Some("next"))
        .and_then(|link| string_field(link, "url"))
}

fn primary_code(resource: &Value) -> Option<String> {
    resource
        .get("code")?
        .get("coding")?
        .as_array()?
        .first()
        .and_then(|coding| string_field(coding, "code"))
}

fn extract_quantity(value: &Value) -> Option<Quantity> {
    let magnitude = value.get("value")?.as_f64()?;
    Some(Quantity {
        value: magnitude,
        unit: string_field(value, "unit"),
    })
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vitals_core::VitalCategory;

    #[test]
    fn parses_observation_fields() {
        let resource = json!({
            "resourceType": "Observation",
            "id": "obs-1",
            "meta": { "lastUpdated": "2024-05-01T10:00:00.000+00:00" },
            "code": { "coding": [
                { "system": "http://mimic.mit.edu/fhir/mimic/CodeSystem/mimic-chartevents-d-items", "code": "220045" },
                { "code": "8867-4" }
            ] },
            "valueQuantity": { "value": 88, "unit": "bpm" },
            "effectiveDateTime": "2024-05-01T09:58:00Z",
            "issued": "2024-05-01T09:59:00Z"
        });

        let parsed = parse_resource(&resource);

        assert_eq!(parsed.resource_type, "Observation");
        assert_eq!(parsed.id.as_deref(), Some("obs-1"));
        assert_eq!(parsed.code.as_deref(), Some("220045"));
        assert_eq!(
            parsed.value,
            Some(Quantity {
                value: 88.0,
                unit: Some("bpm".to_string())
            })
        );
        assert_eq!(
            parsed.last_updated.as_deref(),
            Some("2024-05-01T10:00:00.000+00:00")
        );
        assert_eq!(
            parsed.effective_date_time.as_deref(),
            Some("2024-05-01T09:58:00Z")
        );
        assert_eq!(parsed.issued.as_deref(), Some("2024-05-01T09:59:00Z"));
    }

    #[test]
    fn non_numeric_quantity_is_absent() {
        let resource = json!({
            "resourceType": "Observation",
            "code": { "coding": [{ "code": "220045" }] },
            "valueQuantity": { "value": "eighty", "unit": "bpm" }
        });
        assert_eq!(parse_resource(&resource).value, None);
    }

    #[test]
    fn first_coding_without_code_means_no_code() {
        let resource = json!({
            "resourceType": "Observation",
            "code": { "coding": [{ "display": "Heart rate" }, { "code": "220045" }] }
        });
        assert_eq!(parse_resource(&resource).code, None);
    }

    #[test]
    fn bundle_without_entries_is_empty() {
        let page = parse_bundle(&json!({ "resourceType": "Bundle", "type": "searchset" })).unwrap();
        assert!(page.resources.is_empty());
        assert!(page.next.is_none());
    }

    #[test]
    fn finds_next_link_among_others() {
        let bundle = json!({
            "resourceType": "Bundle",
            "link": [
                { "relation": "self", "url": "http://hapi:8080/fhir/Observation?subject=Patient/1" },
                { "relation": "next", "url": "http://hapi:8080/fhir?_getpages=abc&_getpagesoffset=20" }
            ],
            "entry": [
                { "fullUrl": "x", "resource": { "resourceType": "Observation", "id": "a" } },
                { "fullUrl": "no-resource" },
                { "resource": { "resourceType": "Observation", "id": "b" } }
            ]
        });

        let page = parse_bundle(&bundle).unwrap();

        assert_eq!(
            page.next.as_deref(),
            Some("http://hapi:8080/fhir?_getpages=abc&_getpagesoffset=20")
        );
        let ids: Vec<_> = page
            .resources
            .iter()
            .filter_map(|r| r.id.as_deref())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn rejects_non_bundle_documents() {
        assert!(matches!(
            parse_bundle(&json!({ "resourceType": "Observation" })),
            Err(VitalsError::Parse(_))
        ));
        assert!(matches!(
            parse_bundle(&json!({ "entry": [] })),
            Err(VitalsError::MissingData)
        ));
        assert!(matches!(
            parse_bundle(&json!({ "resourceType": "Bundle", "entry": {} })),
            Err(VitalsError::Parse(_))
        ));
    }

    #[test]
    fn summarizes_bundle_string() {
        let bundle = json!({
            "resourceType": "Bundle",
            "entry": [
                { "resource": {
                    "resourceType": "Observation",
                    "meta": { "lastUpdated": "2024-01-01T00:00:00Z" },
                    "code": { "coding": [{ "code": "220277" }] },
                    "valueQuantity": { "value": 97, "unit": "%" }
                } },
                { "resource": {
                    "resourceType": "Observation",
                    "meta": { "lastUpdated": "2024-01-01T01:00:00Z" },
                    "code": { "coding": [{ "code": "220277" }] },
                    "valueQuantity": { "value": 99, "unit": "%" }
                } }
            ]
        });

        let vitals =
            summarize_bundle_str(&bundle.to_string(), &VitalCodeTable::default()).unwrap();

        let spo2 = vitals.statistics[&VitalCategory::OxygenSaturation];
        assert_eq!(spo2.mean, Some(98.0));
        assert_eq!(
            vitals.series[&VitalCategory::OxygenSaturation]
                .points
                .iter()
                .map(|(_, v)| *v)
                .collect::<Vec<_>>(),
            vec![99.0, 97.0]
        );
    }
}
