/*!
Test Harness pour l'exporter PuppetDB

Facilite l'écriture de tests d'intégration avec:
- Démarrage automatique du stub PuppetDB
- Expectations sur le nombre de requêtes reçues par endpoint
- Attente active d'une condition (boucle de fond, scrape)
*/

use crate::stub_server::StubPuppetDb;
use anyhow::Result;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};

/// Harness de test complet autour d'un stub PuppetDB
pub struct TestHarness {
    pub puppetdb: StubPuppetDb,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    path_prefix: String,
    expected_count: usize,
}

impl TestHarness {
    /// Démarre le stub et initialise le logging de test
    pub async fn start() -> Result<Self> {
        init_test_logging();
        Ok(Self {
            puppetdb: StubPuppetDb::start().await?,
            expectations: Vec::new(),
        })
    }

    /// On s'attend à N requêtes dont le chemin commence par `path_prefix`
    pub fn expect_requests(&mut self, path_prefix: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            path_prefix: path_prefix.to_string(),
            expected_count: count,
        });
        self
    }

    /// Vérifie toutes les expectations configurées
    pub fn verify_expectations(&self) -> Result<()> {
        log::info!("🔍 Verifying {} expectations...", self.expectations.len());

        for expectation in &self.expectations {
            let actual = self.puppetdb.count_requests(&expectation.path_prefix);
            if actual != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for '{}': expected {} requests, got {}",
                    expectation.path_prefix,
                    expectation.expected_count,
                    actual
                );
            }
            log::info!("✅ '{}': {} requests as expected", expectation.path_prefix, actual);
        }
        Ok(())
    }

    /// Requêtes reçues, groupées par chemin
    pub fn get_stats(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for request in self.puppetdb.requests() {
            *counts.entry(request.path).or_insert(0) += 1;
        }
        counts
    }

    /// Reset pour un nouveau scénario
    pub fn reset(&mut self) {
        self.puppetdb.clear_requests();
        self.expectations.clear();
        log::info!("🧹 Test harness reset");
    }
}

/// env_logger en mode test, idempotent
pub fn init_test_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}

/// Réévalue `condition` toutes les 20ms jusqu'à `timeout`
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    log::warn!("⏰ Timeout after {:?}", timeout);
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expectations_count_requests() {
        let mut harness = TestHarness::start().await.unwrap();
        let url = format!("{}/v4/nodes", harness.puppetdb.base_url());
        reqwest::get(&url).await.unwrap();
        reqwest::get(&url).await.unwrap();

        harness.expect_requests("/v4/nodes", 2).expect_requests("/v4/reports/", 0);
        harness.verify_expectations().unwrap();
        assert_eq!(harness.get_stats().get("/v4/nodes"), Some(&2));

        harness.reset();
        harness.expect_requests("/v4/nodes", 1);
        assert!(harness.verify_expectations().is_err());
    }

    #[tokio::test]
    async fn test_wait_until() {
        let start = Instant::now();
        assert!(wait_until(Duration::from_secs(1), || async { true }).await);
        assert!(!wait_until(Duration::from_millis(60), || async { false }).await);
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
