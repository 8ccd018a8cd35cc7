use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use casement_core::{bus_contract::DeviceReport, model::DeviceId, push::DeviceDirectory};
use reqwest::{Client, StatusCode};
use url::Url;

/// Device registry reached over HTTP.
///
/// `GET {base}/devices/{device_id}` answers with the last known report, or
/// 404 for devices the registry has never seen.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: Client,
    base: Url,
}

impl HttpDirectory {
    pub fn new(mut base: Url, timeout: Duration) -> Result<Self> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    fn device_url(&self, device_id: &DeviceId) -> Result<Url> {
        Ok(self.base.join(&format!("devices/{device_id}"))?)
    }
}

#[async_trait]
impl DeviceDirectory for HttpDirectory {
    async fn fetch(&self, device_id: &DeviceId) -> Result<Option<DeviceReport>> {
        let url = self.device_url(device_id)?;
        let response =
            self.client.get(url.clone()).send().await.with_context(|| format!("GET {url}"))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let report = response.json().await.context("decode registry report")?;
                Ok(Some(report))
            }
            status => anyhow::bail!("registry answered {status} for {url}"),
        }
    }
}
