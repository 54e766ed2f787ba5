/// Remote forecast grid client
///
/// Retrieves the forecast grid document from an HTTP(S) endpoint, e.g. an
/// object-store URL that the export pipeline publishes after each model run.
/// The response body is the same JSON document `FileSource` reads.
///
/// The client is blocking; the query server calls it from a blocking task.

use std::time::Duration;

use super::{ForecastDataset, ForecastSource, SourceError};

/// Grid document served over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpSource {
    /// # Parameters
    /// - `url`: full URL of the grid document
    /// - `timeout`: per-request timeout for the download
    pub fn new(url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: reqwest::blocking::Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ForecastSource for HttpSource {
    fn name(&self) -> String {
        format!("http:{}", self.url)
    }

    fn open(&self) -> Result<ForecastDataset, SourceError> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()?;

        if !response.status().is_success() {
            return Err(SourceError::HttpStatus {
                status: response.status().as_u16(),
                url: self.url.clone(),
            });
        }

        let body = response.text()?;
        ForecastDataset::from_json(&body)
    }
}
