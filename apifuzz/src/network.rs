//! TCP reachability checks for freshly started targets.
//!
//! The probe is intentionally crude: it only verifies that something is
//! listening. The target's own readiness signal (scanned from its logs)
//! is the authoritative check; this exists to avoid hammering a socket
//! that is not even bound yet.

use std::net::TcpListener;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::TcpStream;
use url::Url;

use crate::errors::HarnessError;

const EXPONENTIAL_BASE: f64 = 2.0;

/// Configuration for the availability wait.
#[derive(Clone, Debug)]
pub struct ProbeConfig {
    /// Maximum number of connection attempts.
    pub max_retries: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Uniformly sampled jitter added to each delay, in seconds.
    pub jitter: (f64, f64),
    /// Fixed seed for the jitter sequence; sampled from entropy when unset.
    pub seed: Option<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_millis(500),
            jitter: (0.0, 0.5),
            seed: None,
        }
    }
}

/// Whether `url` currently accepts a TCP connection.
pub async fn is_available(url: &str) -> bool {
    let Some((host, port)) = host_and_port(url) else {
        return false;
    };
    TcpStream::connect((host.as_str(), port)).await.is_ok()
}

/// Block until `url` accepts a TCP connection.
///
/// Each failed attempt doubles the delay and adds a uniformly sampled
/// jitter term before sleeping. Raises [`HarnessError::NotAccessible`]
/// once the attempts are exhausted.
pub async fn wait_until_available(url: &str, config: &ProbeConfig) -> Result<(), HarnessError> {
    for delay in delay_schedule(config) {
        if is_available(url).await {
            return Ok(());
        }
        tokio::time::sleep(delay).await;
    }
    Err(HarnessError::NotAccessible {
        url: url.to_string(),
    })
}

/// Full backoff schedule for one wait, one delay per allowed attempt.
///
/// With a fixed [`ProbeConfig::seed`] the schedule is reproducible.
fn delay_schedule(config: &ProbeConfig) -> Vec<Duration> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut delay = config.initial_delay.as_secs_f64();
    (0..config.max_retries)
        .map(|_| {
            delay *= EXPONENTIAL_BASE;
            delay += rng.gen_range(config.jitter.0..=config.jitter.1);
            Duration::from_secs_f64(delay)
        })
        .collect()
}

/// Get an unused TCP port on localhost.
pub fn unused_port() -> u16 {
    // The listener is dropped right away; the port stays free long enough
    // for the caller to hand it to docker-compose.
    TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("failed to bind an ephemeral port on localhost")
}

fn host_and_port(url: &str) -> Option<(String, u16)> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_string();
    let port = parsed.port_or_known_default()?;
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unused_port_is_bindable() {
        let port = unused_port();
        assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
    }

    #[test]
    fn test_host_and_port() {
        assert_eq!(
            host_and_port("http://0.0.0.0:8080/"),
            Some(("0.0.0.0".to_string(), 8080))
        );
        // Default scheme port
        assert_eq!(
            host_and_port("http://example.com/"),
            Some(("example.com".to_string(), 80))
        );
        assert_eq!(host_and_port("not a url"), None);
    }

    #[tokio::test]
    async fn test_wait_not_accessible_after_single_attempt() {
        let port = unused_port();
        let url = format!("http://127.0.0.1:{port}/");
        let config = ProbeConfig {
            max_retries: 1,
            initial_delay: Duration::from_secs(0),
            jitter: (0.0, 0.0),
            seed: None,
        };
        let error = wait_until_available(&url, &config).await.unwrap_err();
        match error {
            HarnessError::NotAccessible { url: reported } => assert_eq!(reported, url),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_delay_schedule_reproducible_for_fixed_seed() {
        let config = ProbeConfig {
            seed: Some(42),
            ..ProbeConfig::default()
        };
        let schedule = delay_schedule(&config);
        assert_eq!(schedule.len(), config.max_retries as usize);
        assert_eq!(schedule, delay_schedule(&config));
        // Delays grow despite the jitter term
        assert!(schedule.windows(2).all(|pair| pair[0] < pair[1]));

        let reseeded = ProbeConfig {
            seed: Some(43),
            ..config
        };
        assert_ne!(delay_schedule(&reseeded), schedule);
    }

    #[tokio::test]
    async fn test_wait_succeeds_when_listening() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}/");
        wait_until_available(&url, &ProbeConfig::default())
            .await
            .unwrap();
    }
}
