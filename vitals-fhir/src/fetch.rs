use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};
use url::{form_urlencoded, Url};
use vitals_core::ClinicalResource;

use crate::{parse_bundle, FetchConfig, FetchError};

/// Source of raw bundle pages.
#[async_trait]
pub trait BundleTransport: Send + Sync {
    /// Fetch and decode the bundle at `url`.
    async fn get_bundle(&self, url: &Url) -> Result<Value, FetchError>;
}

#[async_trait]
impl<T: BundleTransport + ?Sized> BundleTransport for Arc<T> {
    async fn get_bundle(&self, url: &Url) -> Result<Value, FetchError> {
        (**self).get_bundle(url).await
    }
}

/// reqwest-backed transport speaking `application/fhir+json`.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

#[cfg(not(target_arch = "wasm32"))]
impl HttpTransport {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
impl BundleTransport for HttpTransport {
    async fn get_bundle(&self, url: &Url) -> Result<Value, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/fhir+json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Retrieves every resource of one type for one patient, following `next`
/// links until the server stops sending them.
#[derive(Debug)]
pub struct ResourceFetcher<T> {
    transport: T,
    origin: Url,
    max_pages: usize,
}

impl<T: BundleTransport> ResourceFetcher<T> {
    pub fn new(transport: T, config: &FetchConfig) -> Result<Self, FetchError> {
        let origin = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|err| FetchError::InvalidUrl(format!("{}: {err}", config.base_url)))?;

        if !matches!(origin.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(format!(
                "URL must use http or https scheme, got: {}",
                origin.scheme()
            )));
        }

        Ok(Self {
            transport,
            origin,
            max_pages: config.max_pages,
        })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Fetch all pages in order and concatenate their entries.
    ///
    /// Entries are not deduplicated. Any failure discards what was already
    /// collected.
    pub async fn fetch_all(
        &self,
        resource_type: &str,
        patient_id: &str,
    ) -> Result<Vec<ClinicalResource>, FetchError> {
        let mut url = search_url(&self.origin, resource_type, patient_id)?;
        let mut visited = HashSet::new();
        let mut resources = Vec::new();
        let mut pages = 0;

        loop {
            if pages >= self.max_pages {
                return Err(FetchError::PageLimitExceeded {
                    limit: self.max_pages,
                });
            }
            if !visited.insert(url.to_string()) {
                return Err(FetchError::PaginationCycle {
                    url: url.to_string(),
                });
            }

            let bundle = self.transport.get_bundle(&url).await?;
            let page = parse_bundle(&bundle)?;
            pages += 1;
            debug!(%url, page = pages, entries = page.resources.len(), "fetched bundle page");

            resources.extend(page.resources);

            match page.next {
                Some(next) => url = rewrite_origin(&next, &self.origin)?,
                None => break,
            }
        }

        info!(
            resource_type,
            patient_id,
            pages,
            resources = resources.len(),
            "retrieval complete"
        );
        Ok(resources)
    }
}

/// Build `{base}/{resourceType}?subject=Patient/{patientId}`.
pub fn search_url(origin: &Url, resource_type: &str, patient_id: &str) -> Result<Url, FetchError> {
    if resource_type.is_empty() || !resource_type.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(FetchError::InvalidUrl(format!(
            "invalid resource type {resource_type:?}"
        )));
    }
    if patient_id.trim().is_empty() {
        return Err(FetchError::InvalidUrl("empty patient id".to_string()));
    }

    let mut url = origin.clone();
    let path = format!("{}/{resource_type}", origin.path().trim_end_matches('/'));
    url.set_path(&path);

    let patient: String = form_urlencoded::byte_serialize(patient_id.as_bytes()).collect();
    url.set_query(Some(&format!("subject=Patient/{patient}")));
    url.set_fragment(None);
    Ok(url)
}

/// Move a server-reported link onto `origin`'s scheme, host and port, keeping
/// its path, query and fragment. Relative links resolve against `origin`
/// first.
///
/// The link goes through WHATWG URL parsing, so the result is the normalized
/// form: dot segments are resolved and characters outside the URL code points
/// are percent-encoded. Already-encoded sequences are left alone.
pub fn rewrite_origin(link: &str, origin: &Url) -> Result<Url, FetchError> {
    let reported = origin
        .join(link)
        .map_err(|err| FetchError::InvalidUrl(format!("{link}: {err}")))?;

    let mut rewritten = origin.clone();
    rewritten.set_path(reported.path());
    rewritten.set_query(reported.query());
    rewritten.set_fragment(reported.fragment());
    Ok(rewritten)
}
