use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::batch::InvalidRow;
use crate::models::lookup::LookupResult;
use crate::services::lookup::LookupClient;

/// Drives the sequential, rate-limited lookups of one batch.
pub struct BatchRunner {
    client: Arc<LookupClient>,
    min_request_interval: Duration,
}

impl BatchRunner {
    pub fn new(client: Arc<LookupClient>, min_request_interval: Duration) -> Self {
        Self {
            client,
            min_request_interval,
        }
    }

    /// The requested delay, raised to the API's minimum request interval.
    pub fn effective_delay(&self, requested: Duration) -> Duration {
        requested.max(self.min_request_interval)
    }

    /// Look up `cnpjs` in order, then append one error record per invalid row.
    ///
    /// `on_progress(done, total)` fires once before the first item and after
    /// every item. `cancel` is checked before each lookup; once raised, the
    /// rest of the batch (invalid rows included) is dropped.
    pub async fn run<F>(
        &self,
        cnpjs: &[String],
        invalid_rows: &[InvalidRow],
        min_delay: Duration,
        mut on_progress: F,
        cancel: &CancellationToken,
    ) -> Vec<LookupResult>
    where
        F: FnMut(usize, usize),
    {
        let total = cnpjs.len() + invalid_rows.len();
        let delay = self.effective_delay(min_delay);
        let mut results = Vec::with_capacity(total);
        let mut done = 0;

        on_progress(done, total);

        for (index, cnpj) in cnpjs.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(processed = done, total = total, "Batch canceled");
                return results;
            }

            let result = self.client.lookup(cnpj).await;
            let cached = result.cached;
            debug!(cnpj = %result.cnpj, cached = cached, error = %result.erro, "Lookup finished");
            results.push(result);

            done += 1;
            on_progress(done, total);

            // Cache hits never touched the API, so they do not count against the rate limit.
            let more_lookups = index + 1 < cnpjs.len();
            if !cached && more_lookups && !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }

        if cancel.is_cancelled() {
            info!(processed = done, total = total, "Batch canceled");
            return results;
        }

        for row in invalid_rows {
            results.push(LookupResult::invalid(&row.raw));
            done += 1;
            on_progress(done, total);
        }

        results
    }
}
