//! Synthetic load driver for a shared limiter.
//!
//! Fans a burst of requests from many clients out over tokio's blocking
//! pool and tallies the decisions.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::ratelimit::{ClientKey, Clock, Limiter};

/// Shape of a simulated burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scenario {
    /// Number of distinct clients
    pub clients: usize,
    /// Requests issued by each client
    pub requests_per_client: usize,
}

impl Scenario {
    /// Total number of requests in the burst.
    pub fn total_requests(&self) -> usize {
        self.clients * self.requests_per_client
    }
}

/// Decision totals for a simulated burst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationReport {
    /// Requests admitted
    pub admitted: usize,
    /// Requests denied
    pub denied: usize,
}

impl SimulationReport {
    /// Total requests decided.
    pub fn total(&self) -> usize {
        self.admitted + self.denied
    }
}

/// Key used for the `n`-th simulated client.
pub fn client_key(n: usize) -> ClientKey {
    ClientKey::new(
        format!("10.0.{}.{}", (n / 256) % 256, n % 256),
        format!("Agent {}", n),
    )
}

/// Issue every request in `scenario` against `limiter` with at most
/// `concurrency` decisions in flight.
pub async fn run<C>(
    limiter: Arc<Limiter<C>>,
    scenario: Scenario,
    concurrency: usize,
) -> SimulationReport
where
    C: Clock + 'static,
{
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));

    info!(
        clients = scenario.clients,
        requests_per_client = scenario.requests_per_client,
        concurrency = concurrency,
        "Starting simulation"
    );

    let keys = (0..scenario.clients).flat_map(|n| {
        let key = client_key(n);
        (0..scenario.requests_per_client).map(move |_| key.clone())
    });

    let decisions = keys.map(|key| {
        let limiter = limiter.clone();
        let permits = permits.clone();
        async move {
            let _permit = permits.acquire_owned().await.ok()?;
            tokio::task::spawn_blocking(move || {
                debug!(client = %key, "Request is being processed");
                limiter.admit(&key)
            })
            .await
            .map_err(|e| warn!(error = %e, "Simulated request panicked"))
            .ok()
        }
    });

    let mut report = SimulationReport::default();
    for decision in join_all(decisions).await.into_iter().flatten() {
        if decision {
            report.admitted += 1;
        } else {
            report.denied += 1;
        }
    }

    info!(
        admitted = report.admitted,
        denied = report.denied,
        clients_tracked = limiter.client_count(),
        "Simulation complete"
    );

    report
}
