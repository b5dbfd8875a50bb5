//! Batch client for the remote scoring (inference) endpoint.
//!
//! Defines the [`Scorer`] trait and [`HttpScorer`], which turns a sequence of
//! texts into a parallel sequence of scores by posting consecutive batches to
//! the endpoint.
//!
//! # Wire contract
//!
//! ```text
//! POST <url>            apikey: <key>
//! { "instances": ["text 1", "text 2", ...] }
//!
//! 200 OK
//! { "predictions": [[0.1], [0.2], ...] }
//! ```
//!
//! `predictions` may be nested to any depth; it is flattened in document
//! order before being aligned with the request.
//!
//! # Retry Strategy
//!
//! Each batch gets at most [`MAX_ATTEMPTS`] attempts:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Network errors → retry, including a body cut off after a 200
//! - HTTP 4xx (client error, not 429) → give up on the batch immediately
//! - Backoff: `backoff_ms`, doubling per retry (capped at 2^5)
//!
//! A batch that never succeeds is reported as `None` scores. Only a
//! successful response with an unusable shape is an error.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::ScoringConfig;

/// Attempts per batch before its scores are reported as failed.
pub const MAX_ATTEMPTS: u32 = 5;

/// Turns texts into scores, one per text, in input order.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Score `texts` in consecutive batches of `batch_size`.
    ///
    /// The returned vector always has `texts.len()` entries; `None` marks a
    /// text whose batch could not be scored.
    async fn score(&self, texts: &[String], batch_size: usize) -> Result<Vec<Option<f64>>>;
}

/// [`Scorer`] backed by the HTTP batch endpoint.
pub struct HttpScorer {
    client: reqwest::Client,
    url: String,
    api_key: String,
    backoff: Duration,
}

impl HttpScorer {
    pub fn new(config: &ScoringConfig) -> Result<Self> {
        Self::with_key(
            &config.url,
            &config.api_key(),
            Duration::from_secs(config.timeout_secs),
            Duration::from_millis(config.backoff_ms),
        )
    }

    pub fn with_key(url: &str, api_key: &str, timeout: Duration, backoff: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build scoring HTTP client")?;

        Ok(Self {
            client,
            url: url.to_string(),
            api_key: api_key.to_string(),
            backoff,
        })
    }

    /// Post one batch, retrying transient failures.
    ///
    /// Returns `Ok(None)` when the batch cannot be scored.
    async fn request_batch(&self, batch_index: usize, batch: &[String]) -> Result<Option<Value>> {
        let body = serde_json::json!({ "instances": batch });

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 && !self.backoff.is_zero() {
                tokio::time::sleep(backoff_delay(self.backoff, attempt)).await;
            }

            let resp = self
                .client
                .post(&self.url)
                .header("apikey", &self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let bytes = match response.bytes().await {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                tracing::warn!(
                                    batch = batch_index,
                                    attempt = attempt + 1,
                                    error = %e,
                                    "scoring response body interrupted, retrying"
                                );
                                continue;
                            }
                        };
                        let json: Value = serde_json::from_slice(&bytes)
                            .context("Scoring endpoint returned a non-JSON body")?;
                        let predictions = json
                            .get("predictions")
                            .cloned()
                            .context("Invalid scoring response: missing predictions")?;
                        return Ok(Some(predictions));
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(
                            batch = batch_index,
                            attempt = attempt + 1,
                            %status,
                            "scoring request failed, retrying"
                        );
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    tracing::warn!(
                        batch = batch_index,
                        %status,
                        body = %body_text,
                        "scoring request rejected, batch left unscored"
                    );
                    return Ok(None);
                }
                Err(e) => {
                    tracing::warn!(
                        batch = batch_index,
                        attempt = attempt + 1,
                        error = %e,
                        "scoring endpoint unreachable, retrying"
                    );
                    continue;
                }
            }
        }

        tracing::error!(
            batch = batch_index,
            attempts = MAX_ATTEMPTS,
            size = batch.len(),
            "scoring batch exhausted its attempts, scores left unset"
        );
        Ok(None)
    }
}

#[async_trait]
impl Scorer for HttpScorer {
    async fn score(&self, texts: &[String], batch_size: usize) -> Result<Vec<Option<f64>>> {
        if batch_size == 0 {
            bail!("scoring batch size must be > 0");
        }

        let mut scores = Vec::with_capacity(texts.len());

        for (index, batch) in texts.chunks(batch_size).enumerate() {
            match self.request_batch(index, batch).await? {
                Some(predictions) => {
                    let flat = flatten_predictions(&predictions)?;
                    scores.extend(align(index, flat, batch.len()));
                }
                None => scores.extend(std::iter::repeat(None).take(batch.len())),
            }
            tracing::debug!(batch = index, scored = scores.len(), total = texts.len(), "scoring progress");
        }

        Ok(scores)
    }
}

/// Wait before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// with the exponent capped at 5 and the product saturating.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.saturating_sub(1).min(5))
}

/// Flatten an arbitrarily nested `predictions` value in document order.
///
/// Numbers become `Some`, `null` becomes `None`; any other leaf is a
/// data-shape error.
pub fn flatten_predictions(value: &Value) -> Result<Vec<Option<f64>>> {
    let mut out = Vec::new();
    flatten_into(value, &mut out)?;
    Ok(out)
}

fn flatten_into(value: &Value, out: &mut Vec<Option<f64>>) -> Result<()> {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out)?;
            }
        }
        Value::Number(n) => out.push(n.as_f64()),
        Value::Null => out.push(None),
        other => bail!("Invalid scoring response: non-numeric prediction {}", other),
    }
    Ok(())
}

/// Fit a batch's flattened predictions to the batch length.
///
/// Surplus predictions are dropped and missing ones are `None`, so
/// positions never shift into a neighboring batch.
fn align(batch_index: usize, mut flat: Vec<Option<f64>>, len: usize) -> Vec<Option<f64>> {
    if flat.len() != len {
        tracing::warn!(
            batch = batch_index,
            expected = len,
            received = flat.len(),
            "prediction count does not match batch size"
        );
    }
    flat.resize(len, None);
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_handles_irregular_nesting() {
        let value = json!([[0.1, 0.2], [0.3], 0.4, [[0.5], [[0.6]]]]);
        let flat = flatten_predictions(&value).unwrap();
        assert_eq!(
            flat,
            vec![Some(0.1), Some(0.2), Some(0.3), Some(0.4), Some(0.5), Some(0.6)]
        );
    }

    #[test]
    fn flatten_keeps_nulls_in_place() {
        let value = json!([[0.1], [null], [0.3]]);
        assert_eq!(
            flatten_predictions(&value).unwrap(),
            vec![Some(0.1), None, Some(0.3)]
        );
    }

    #[test]
    fn flatten_rejects_non_numeric_leaves() {
        assert!(flatten_predictions(&json!([["toxic"]])).is_err());
        assert!(flatten_predictions(&json!({"score": 0.1})).is_err());
    }

    #[test]
    fn align_truncates_and_pads() {
        assert_eq!(align(0, vec![Some(0.1), Some(0.2)], 1), vec![Some(0.1)]);
        assert_eq!(align(0, vec![Some(0.1)], 3), vec![Some(0.1), None, None]);
        assert_eq!(align(0, vec![], 0), Vec::<Option<f64>>::new());
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(base, 40), Duration::from_millis(3200));
        assert_eq!(backoff_delay(Duration::MAX, 4), Duration::MAX);
    }

    #[tokio::test]
    async fn zero_batch_size_is_an_error() {
        let scorer = HttpScorer::with_key(
            "http://127.0.0.1:9/",
            "",
            Duration::from_secs(1),
            Duration::ZERO,
        )
        .unwrap();
        assert!(scorer.score(&["text".to_string()], 0).await.is_err());
    }

    #[tokio::test]
    async fn empty_input_makes_no_requests() {
        let scorer = HttpScorer::with_key(
            "http://127.0.0.1:9/",
            "",
            Duration::from_secs(1),
            Duration::ZERO,
        )
        .unwrap();
        assert!(scorer.score(&[], 4).await.unwrap().is_empty());
    }
}
