use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::{info, warn};
use vitals_core::{analyze, PatientVitals, VitalCodeTable};

use crate::{BundleTransport, FailurePolicy, FetchConfig, FetchError, ResourceFetcher};

/// Vitals visible to the rendering side, tagged with the refresh that
/// produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedVitals {
    pub patient_id: String,
    pub generation: u64,
    pub vitals: PatientVitals,
}

/// Result of a refresh that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// This refresh was the latest one and its vitals are now published.
    Published(PublishedVitals),
    /// A newer refresh started while this one was in flight; its result,
    /// success or failure, was dropped.
    Superseded { generation: u64 },
}

/// Re-runs the whole pipeline on every patient change and publishes only the
/// newest request's result.
///
/// Each call to [`VitalsRefresher::refresh`] takes the next generation
/// number. When the fetch returns, the result is kept only if no later
/// generation has been issued in the meantime, so a slow response for a
/// previous patient can never overwrite a newer one.
pub struct VitalsRefresher<T> {
    fetcher: ResourceFetcher<T>,
    table: VitalCodeTable,
    resource_type: String,
    on_failure: FailurePolicy,
    generation: AtomicU64,
    published: RwLock<Option<PublishedVitals>>,
}

impl<T: BundleTransport> VitalsRefresher<T> {
    pub fn new(fetcher: ResourceFetcher<T>, table: VitalCodeTable, config: &FetchConfig) -> Self {
        Self {
            fetcher,
            table,
            resource_type: "Observation".to_string(),
            on_failure: config.on_failure,
            generation: AtomicU64::new(0),
            published: RwLock::new(None),
        }
    }

    /// Vital-bearing resource type to search, `Observation` by default.
    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    /// Latest generation handed out.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn current(&self) -> Option<PublishedVitals> {
        self.published.read().await.clone()
    }

    /// Fetch, analyze and publish vitals for `patient_id`.
    ///
    /// Errors surface only for the latest generation; a failed refresh then
    /// retains or clears the published vitals according to the configured
    /// [`FailurePolicy`].
    pub async fn refresh(&self, patient_id: &str) -> Result<RefreshOutcome, FetchError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self
            .fetcher
            .fetch_all(&self.resource_type, patient_id)
            .await;

        let mut published = self.published.write().await;
        let latest = self.generation.load(Ordering::SeqCst);
        if latest != generation {
            warn!(
                patient_id,
                generation, latest, "discarding result of superseded refresh"
            );
            return Ok(RefreshOutcome::Superseded { generation });
        }

        match result {
            Ok(resources) => {
                let vitals = analyze(&resources, &self.table);
                info!(
                    patient_id,
                    generation,
                    classified = vitals.groups.total(),
                    "published vitals"
                );
                let snapshot = PublishedVitals {
                    patient_id: patient_id.to_string(),
                    generation,
                    vitals,
                };
                *published = Some(snapshot.clone());
                Ok(RefreshOutcome::Published(snapshot))
            }
            Err(err) => {
                warn!(patient_id, generation, error = %err, "refresh failed");
                if self.on_failure == FailurePolicy::Clear {
                    *published = None;
                }
                Err(err)
            }
        }
    }
}
