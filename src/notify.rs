use async_trait::async_trait;
use log::info;
use std::time::Duration;
use url::Url;

/// Delivery of speeding alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, plate: &str, kmh: f64) -> Result<(), failure::Error>;
}

/// Posts a plain-text alert to an ntfy topic.
pub struct NtfyNotifier {
    url: Url,
    client: reqwest::Client,
}

impl NtfyNotifier {
    pub fn new(url: Url, timeout: Duration) -> Result<NtfyNotifier, failure::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(NtfyNotifier { url, client })
    }
}

pub fn message(plate: &str, kmh: f64) -> String {
    format!(
        "License plate {} is going {:.2} km/h. Please send them a fine!",
        plate, kmh
    )
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn notify(&self, plate: &str, kmh: f64) -> Result<(), failure::Error> {
        self.client
            .post(self.url.clone())
            .header("Title", "A car is speeding!")
            .header("Priority", "4")
            .header("Tags", "rotating_light, policeman")
            .body(message(plate, kmh))
            .send()
            .await?
            .error_for_status()?;
        info!("Sent notification to ntfy for plate {} at {:.2} km/h", plate, kmh);
        Ok(())
    }
}
