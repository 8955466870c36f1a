//! IP geolocation client.
//!
//! Resolves indicator IP addresses to ISO country codes through the maps
//! geolocation API. Addresses are processed in fixed-size batches, each
//! batch concurrently, and every failure becomes an explicit unresolved
//! outcome so a batch run always completes.

use crate::models::GeoLocation;
use anyhow::{Context, Result};
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Settings for the geolocation client.
#[derive(Debug, Clone)]
pub struct GeolocatorConfig {
    /// Base URL of the maps service.
    pub endpoint: String,
    pub api_version: String,
    /// Subscription key, forwarded verbatim.
    pub subscription_key: String,
    /// Requests issued concurrently per batch.
    pub batch_size: usize,
    /// Per-request timeout.
    pub timeout_seconds: u64,
    pub show_progress: bool,
}

impl Default for GeolocatorConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://atlas.microsoft.com".to_string(),
            api_version: "1.0".to_string(),
            subscription_key: String::new(),
            batch_size: 50,
            timeout_seconds: 5,
            show_progress: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeolocationResponse {
    #[serde(default)]
    country_region: Option<CountryRegion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountryRegion {
    #[serde(default)]
    iso_code: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Batched IP geolocation client.
pub struct IpGeolocator {
    config: GeolocatorConfig,
    http_client: reqwest::Client,
}

impl IpGeolocator {
    /// Create a client. The timeout applies to each request individually.
    pub fn new(config: GeolocatorConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Geolocate every address, preserving input order.
    ///
    /// Never fails: unreachable service, timeouts, HTTP errors and
    /// unparseable bodies all come back as unresolved entries.
    pub async fn geolocate_all(&self, ips: &[String]) -> Vec<GeoLocation> {
        if ips.is_empty() {
            return Vec::new();
        }

        let batch_size = self.config.batch_size.max(1);
        let start = Instant::now();
        info!(
            "Geolocating {} IP addresses in batches of {}",
            ips.len(),
            batch_size
        );

        let progress_bar = if self.config.show_progress {
            let pb = ProgressBar::new(ips.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} IPs")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            Some(pb)
        } else {
            None
        };

        let mut results = Vec::with_capacity(ips.len());
        for (batch_no, batch) in ips.chunks(batch_size).enumerate() {
            debug!("Geolocation batch {} ({} addresses)", batch_no + 1, batch.len());

            let tasks = batch.iter().map(|ip| self.geolocate(ip));
            let batch_results = join_all(tasks).await;

            if let Some(ref pb) = progress_bar {
                pb.inc(batch_results.len() as u64);
            }
            results.extend(batch_results);
        }

        if let Some(pb) = progress_bar {
            pb.finish_with_message("Geolocation complete");
        }

        let resolved = results.iter().filter(|r| r.success).count();
        info!(
            "Geolocation finished - resolved={}, failed={}, duration={:.2}s",
            resolved,
            results.len() - resolved,
            start.elapsed().as_secs_f32()
        );

        results
    }

    /// Geolocate a single address.
    pub async fn geolocate(&self, ip: &str) -> GeoLocation {
        let url = format!(
            "{}/geolocation/ip/json",
            self.config.endpoint.trim_end_matches('/')
        );

        let response = self
            .http_client
            .get(&url)
            .header("Accept", "application/json")
            .query(&[
                ("api-version", self.config.api_version.as_str()),
                ("ip", ip),
                ("subscription-key", self.config.subscription_key.as_str()),
            ])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                let reason = if e.is_timeout() {
                    "Timeout".to_string()
                } else if e.is_connect() {
                    format!("Cannot connect to {}", self.config.endpoint)
                } else {
                    e.to_string()
                };
                warn!("Geolocation failed for {}: {}", ip, reason);
                return GeoLocation::unresolved(ip, reason);
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!("Geolocation for {} returned HTTP {}", ip, status.as_u16());
            return GeoLocation::unresolved(ip, format!("HTTP {}", status.as_u16()));
        }

        match response.text().await {
            Ok(body) => location_from_body(ip, &body),
            Err(e) => GeoLocation::unresolved(ip, e.to_string()),
        }
    }
}

/// Interpret a geolocation response body.
fn location_from_body(ip: &str, body: &str) -> GeoLocation {
    let parsed: GeolocationResponse = match serde_json::from_str(body) {
        Ok(p) => p,
        Err(e) => return GeoLocation::unresolved(ip, e.to_string()),
    };

    let region = parsed.country_region;
    let name = region.as_ref().and_then(|r| r.name.clone());
    match region
        .and_then(|r| r.iso_code)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
    {
        Some(code) => GeoLocation::resolved(ip, code, name),
        None => GeoLocation::unresolved(ip, "No country in response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(endpoint: String, batch_size: usize) -> GeolocatorConfig {
        GeolocatorConfig {
            endpoint,
            subscription_key: "test-key".to_string(),
            batch_size,
            timeout_seconds: 2,
            ..GeolocatorConfig::default()
        }
    }

    /// Minimal HTTP server: 10.x addresses get a 404, 192.0.2.x gets a body
    /// without a country, everything else resolves to US.
    async fn spawn_stub_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&buf);

                    let (status, body) = if request.contains("ip=10.") {
                        ("404 Not Found", String::new())
                    } else if request.contains("ip=192.0.2.") {
                        ("200 OK", r#"{"ipAddress":"192.0.2.1"}"#.to_string())
                    } else {
                        (
                            "200 OK",
                            r#"{"countryRegion":{"isoCode":"US"},"ipAddress":"x"}"#.to_string(),
                        )
                    };
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{}", addr)
    }

    #[test]
    fn test_location_from_body() {
        let loc = location_from_body(
            "8.8.8.8",
            r#"{"countryRegion":{"isoCode":"US","name":"United States"},"ipAddress":"8.8.8.8"}"#,
        );
        assert!(loc.success);
        assert_eq!(loc.country_code.as_deref(), Some("US"));
        assert_eq!(loc.country_name.as_deref(), Some("United States"));

        let missing = location_from_body("8.8.8.8", r#"{"ipAddress":"8.8.8.8"}"#);
        assert!(!missing.success);
        assert_eq!(missing.country_code, None);

        let garbage = location_from_body("8.8.8.8", "<html>");
        assert!(!garbage.success);
        assert!(garbage.error.is_some());
    }

    #[test]
    fn test_default_config() {
        let config = GeolocatorConfig::default();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.timeout_seconds, 5);
    }

    #[test]
    fn test_empty_input_makes_no_requests() {
        let geolocator = IpGeolocator::new(config("http://127.0.0.1:9".to_string(), 50)).unwrap();
        let results = tokio_test::block_on(geolocator.geolocate_all(&[]));
        assert!(results.is_empty());
    }

    #[test]
    fn test_unreachable_service_resolves_to_failures() {
        let geolocator = IpGeolocator::new(config("http://127.0.0.1:9".to_string(), 2)).unwrap();
        let ips: Vec<String> = ["1.1.1.1", "2.2.2.2", "3.3.3.3"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let results = tokio_test::block_on(geolocator.geolocate_all(&ips));

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| !r.success && r.error.is_some()));
        let order: Vec<&str> = results.iter().map(|r| r.ip.as_str()).collect();
        assert_eq!(order, vec!["1.1.1.1", "2.2.2.2", "3.3.3.3"]);
    }

    #[test]
    fn test_batches_against_stub_server() {
        tokio_test::block_on(async {
            let endpoint = spawn_stub_server().await;
            let geolocator = IpGeolocator::new(config(endpoint, 2)).unwrap();
            let ips: Vec<String> = ["8.8.8.8", "10.0.0.1", "192.0.2.1", "1.1.1.1", "9.9.9.9"]
                .iter()
                .map(|s| s.to_string())
                .collect();

            let results = geolocator.geolocate_all(&ips).await;

            assert_eq!(results.len(), 5);
            assert!(results[0].success);
            assert_eq!(results[0].country_code.as_deref(), Some("US"));
            assert_eq!(results[1].error.as_deref(), Some("HTTP 404"));
            assert!(!results[2].success);
            assert!(results[3].success);
            assert!(results[4].success);
        });
    }
}
