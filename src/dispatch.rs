//! Outbound HTTP calls for resolved dispatch records.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{error, info};

use crate::errors::Error;
use crate::router::{DispatchRecord, HttpMethod};

type Result<T> = std::result::Result<T, Error>;

/// Performs one blocking-style webhook call per record, sequentially.
///
/// There is no retry and no backgrounding: a dispatch either completes
/// (success or HTTP error, both logged with latency) or fails at the
/// transport level (logged). Button presses arrive at human rates, so a
/// slow target briefly stalling the loop is acceptable.
pub struct Dispatcher {
    client: reqwest::Client,
}

impl Dispatcher {
    const TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Self::TIMEOUT)
            .build()
            .map_err(Error::HttpClient)?;
        Ok(Dispatcher { client })
    }

    /// Fire one webhook. Failures are logged, never returned; one broken
    /// target must not keep the trigger's other targets from firing.
    pub async fn dispatch(&self, sender: SocketAddr, record: &DispatchRecord) {
        let mut request = self.client.request(method(record.method), &record.url);
        for (key, value) in &record.headers {
            request = request.header(key, value);
        }
        if let Some(body) = &record.body {
            request = request.body(body.clone());
        }

        let start = Instant::now();
        match request.send().await {
            Ok(resp) => {
                let ms = start.elapsed().as_millis();
                let status = resp.status().as_u16();
                if resp.status().is_success() {
                    info!("{sender} resp {status} in {ms}ms {}", record.url);
                } else {
                    error!("{sender} resp {status} in {ms}ms {}", record.url);
                }
            }
            Err(err) => {
                let ms = start.elapsed().as_millis();
                error!("{sender} {err} in {ms}ms {}", record.url);
            }
        }
    }
}

fn method(m: HttpMethod) -> reqwest::Method {
    match m {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Patch => reqwest::Method::PATCH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_mapping() {
        assert_eq!(method(HttpMethod::Get), reqwest::Method::GET);
        assert_eq!(method(HttpMethod::Post), reqwest::Method::POST);
        assert_eq!(method(HttpMethod::Put), reqwest::Method::PUT);
        assert_eq!(method(HttpMethod::Delete), reqwest::Method::DELETE);
        assert_eq!(method(HttpMethod::Patch), reqwest::Method::PATCH);
    }
}
