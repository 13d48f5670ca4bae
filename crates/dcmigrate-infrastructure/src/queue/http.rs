//! Queue length lookups against an HTTP queue service.
//!
//! `GET {endpoint}/queues/{name}` answers `404` for an unknown queue and
//! otherwise a JSON attribute document. The reported length is the sum of
//! visible and in-flight messages.

use async_trait::async_trait;
use dcmigrate_core::queue::{QueueError, QueueLengthPoller, validate_queue_name};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueAttributes {
    #[serde(default)]
    approximate_number_of_messages: u64,
    #[serde(default)]
    approximate_number_of_messages_not_visible: u64,
}

impl QueueAttributes {
    fn pending(&self) -> u64 {
        self.approximate_number_of_messages
            .saturating_add(self.approximate_number_of_messages_not_visible)
    }
}

pub struct HttpQueueLengthPoller {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpQueueLengthPoller {
    pub fn new(endpoint: &str) -> Result<Self, QueueError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| QueueError::bad_request(format!("Invalid queue endpoint `{}`: {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(QueueError::bad_request(format!(
                "Queue endpoint `{}` cannot be used as a base URL",
                endpoint
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| QueueError::connection("Failed to build queue API client", e))?;
        Ok(Self { client, endpoint })
    }

    fn queue_url(&self, queue_name: &str) -> Result<Url, QueueError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| QueueError::bad_request("Queue endpoint cannot be a base URL"))?
            .pop_if_empty()
            .extend(["queues", queue_name]);
        Ok(url)
    }
}

#[async_trait]
impl QueueLengthPoller for HttpQueueLengthPoller {
    async fn queue_length(&self, queue_name: &str) -> Result<Option<u64>, QueueError> {
        validate_queue_name(queue_name)?;
        let url = self.queue_url(queue_name)?;

        let response = self.client.get(url).send().await.map_err(|e| {
            tracing::warn!(queue = queue_name, error = %e, "Queue API unreachable");
            QueueError::connection("Error while trying to query queue API", e)
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                tracing::debug!(queue = queue_name, "Queue does not exist");
                Ok(None)
            }
            status if status.is_success() => {
                let attributes: QueueAttributes = response.json().await.map_err(|e| {
                    QueueError::unsuccessful(format!(
                        "Unable to read attributes of queue `{}`: {}",
                        queue_name, e
                    ))
                })?;
                Ok(Some(attributes.pending()))
            }
            status => Err(QueueError::unsuccessful(format!(
                "Unable to retrieve attributes of queue `{}` (status {})",
                queue_name, status
            ))),
        }
    }
}
