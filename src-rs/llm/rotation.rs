use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use super::types::ProviderError;

lazy_static! {
    static ref RETRIABLE: Regex = Regex::new(
        r"(?i)429|too\s*many\s*requests|quota|rate\s*limit|5\d\d|econnreset|connection\s*reset|etimedout|timed?\s*out|network"
    )
    .expect("retriable pattern");
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retriability {
    Retriable,
    NonRetriable,
}

/// Decides whether another credential may help, from the error text alone.
pub fn classify_error(err: &ProviderError) -> Retriability {
    if RETRIABLE.is_match(&err.to_string()) {
        Retriability::Retriable
    } else {
        Retriability::NonRetriable
    }
}

/// Process-wide credential pools with one rotation cursor per provider key.
///
/// The cursor is read before an attempt and written after it, in two separate
/// critical sections. Concurrent calls for the same provider may therefore skip
/// or repeat a credential; the lock only keeps each read and write whole.
pub struct Rotator {
    pools: HashMap<String, Vec<String>>,
    cursors: Mutex<HashMap<String, usize>>,
}

impl Rotator {
    pub fn new(pools: HashMap<String, Vec<String>>) -> Self {
        let pools = pools
            .into_iter()
            .map(|(provider, keys)| {
                let keys = keys
                    .into_iter()
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect();
                (provider, keys)
            })
            .collect();
        Self {
            pools,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }

    pub fn pool_len(&self, provider: &str) -> usize {
        self.pools.get(provider).map(Vec::len).unwrap_or(0)
    }

    /// Current global cursor for `provider`, always inside the pool.
    pub fn cursor(&self, provider: &str) -> usize {
        let len = self.pool_len(provider);
        if len == 0 {
            return 0;
        }
        let cursors = match self.cursors.lock() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        };
        cursors.get(provider).copied().unwrap_or(0) % len
    }

    fn store_cursor(&self, provider: &str, next: usize) {
        let mut cursors = match self.cursors.lock() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        };
        cursors.insert(provider.to_string(), next);
    }

    /// Runs `action` with one credential at a time until it succeeds, fails
    /// non-retriably, or every credential of the pool was tried once.
    ///
    /// A non-empty `candidates` list replaces the global pool for this call and
    /// rotates with its own request-local cursor starting at the first entry.
    /// `state` is handed to each attempt so the action can borrow caller data
    /// mutably across retries.
    pub async fn select_and_try<S, T, F>(
        &self,
        provider: &str,
        candidates: &[String],
        state: &mut S,
        mut action: F,
    ) -> Result<T, ProviderError>
    where
        S: ?Sized + Send,
        F: for<'a> FnMut(&'a mut S, String) -> BoxFuture<'a, Result<T, ProviderError>>,
    {
        let overridden = !candidates.is_empty();
        let pool: &[String] = if overridden {
            candidates
        } else {
            self.pools.get(provider).map(Vec::as_slice).unwrap_or(&[])
        };
        if pool.is_empty() {
            return Err(ProviderError::NoCredentials {
                provider: provider.to_string(),
            });
        }

        let mut local_cursor = 0;
        let mut attempts = 0;
        loop {
            let index = if overridden {
                local_cursor
            } else {
                self.cursor(provider)
            };
            debug!(provider, index, pool = pool.len(), overridden, "selected key");

            let outcome = action(&mut *state, pool[index].clone()).await;
            attempts += 1;

            let next = (index + 1) % pool.len();
            if overridden {
                local_cursor = next;
            } else {
                self.store_cursor(provider, next);
            }

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let retriability = classify_error(&err);
            warn!(provider, index, ?retriability, error = %err, "key attempt failed");
            if retriability == Retriability::NonRetriable || attempts >= pool.len() {
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn rotator(provider: &str, keys: &[&str]) -> Rotator {
        let mut pools = HashMap::new();
        pools.insert(
            provider.to_string(),
            keys.iter().map(|k| k.to_string()).collect(),
        );
        Rotator::new(pools)
    }

    fn rate_limited() -> ProviderError {
        ProviderError::UpstreamHttp {
            status: 429,
            body: "Too Many Requests".to_string(),
        }
    }

    #[test]
    fn classify_error_patterns() {
        assert_eq!(classify_error(&rate_limited()), Retriability::Retriable);
        assert_eq!(
            classify_error(&ProviderError::UpstreamHttp {
                status: 503,
                body: "unavailable".to_string()
            }),
            Retriability::Retriable
        );
        assert_eq!(
            classify_error(&ProviderError::UpstreamTransport("connection reset by peer".into())),
            Retriability::Retriable
        );
        assert_eq!(
            classify_error(&ProviderError::UpstreamHttp {
                status: 400,
                body: "quota exceeded for project".to_string()
            }),
            Retriability::Retriable
        );
        assert_eq!(
            classify_error(&ProviderError::UpstreamHttp {
                status: 401,
                body: "invalid api key".to_string()
            }),
            Retriability::NonRetriable
        );
        assert_eq!(
            classify_error(&ProviderError::StreamInterrupted {
                cause: "network reset".into()
            }),
            Retriability::NonRetriable
        );
        assert_eq!(classify_error(&ProviderError::SinkClosed), Retriability::NonRetriable);
        assert_eq!(
            classify_error(&ProviderError::UpstreamTransport(
                "builder error: relative URL without a base".into()
            )),
            Retriability::NonRetriable
        );
    }

    #[tokio::test]
    async fn empty_pool_fails_without_attempts() {
        let rot = Rotator::empty();
        let mut seen: Vec<String> = Vec::new();
        let err = rot
            .select_and_try("gemini", &[], &mut seen, |seen: &mut Vec<String>, key: String| {
                async move {
                    seen.push(key);
                    Ok::<_, ProviderError>(())
                }
                .boxed()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NoCredentials { .. }));
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn retriable_failures_walk_the_whole_pool_in_order() {
        let rot = rotator("gemini", &["k0", "k1", "k2", "k3"]);
        // Start mid-pool so the walk has to wrap.
        rot.store_cursor("gemini", 2);

        let mut seen: Vec<String> = Vec::new();
        let result = rot
            .select_and_try("gemini", &[], &mut seen, |seen: &mut Vec<String>, key: String| {
                async move {
                    seen.push(key.clone());
                    if seen.len() < 4 {
                        Err(rate_limited())
                    } else {
                        Ok(key)
                    }
                }
                .boxed()
            })
            .await
            .unwrap();

        assert_eq!(seen, vec!["k2", "k3", "k0", "k1"]);
        assert_eq!(result, "k1");
        assert_eq!(rot.cursor("gemini"), 2);
    }

    #[tokio::test]
    async fn non_retriable_failure_stops_after_one_attempt() {
        let rot = rotator("openrouter", &["a", "b", "c"]);
        let mut seen: Vec<String> = Vec::new();
        let err = rot
            .select_and_try("openrouter", &[], &mut seen, |seen: &mut Vec<String>, key: String| {
                async move {
                    seen.push(key);
                    Err::<(), _>(ProviderError::UpstreamHttp {
                        status: 401,
                        body: "bad key".to_string(),
                    })
                }
                .boxed()
            })
            .await
            .unwrap_err();

        assert_eq!(seen, vec!["a"]);
        assert!(matches!(err, ProviderError::UpstreamHttp { status: 401, .. }));
        assert_eq!(rot.cursor("openrouter"), 1);
    }

    #[tokio::test]
    async fn exhausted_pool_returns_last_error() {
        let rot = rotator("gemini", &["a", "b"]);
        let mut count = 0usize;
        let err = rot
            .select_and_try("gemini", &[], &mut count, |count: &mut usize, key: String| {
                async move {
                    *count += 1;
                    Err::<(), _>(ProviderError::UpstreamTransport(format!("timeout on {}", key)))
                }
                .boxed()
            })
            .await
            .unwrap_err();
        assert_eq!(count, 2);
        assert_eq!(err.to_string(), "transport error: timeout on b");
    }

    #[tokio::test]
    async fn cursor_advances_once_per_attempt_across_calls() {
        let rot = rotator("gemini", &["a", "b", "c"]);
        let mut total = 0usize;
        for round in 0..5 {
            let fail_first = round % 2 == 0;
            let mut calls = 0usize;
            let _ = rot
                .select_and_try("gemini", &[], &mut calls, move |calls: &mut usize, _key: String| {
                    async move {
                        *calls += 1;
                        if fail_first && *calls == 1 {
                            Err(rate_limited())
                        } else {
                            Ok(())
                        }
                    }
                    .boxed()
                })
                .await;
            total += calls;
            assert_eq!(rot.cursor("gemini"), total % 3);
        }
    }

    #[tokio::test]
    async fn override_pool_leaves_global_cursor_alone() {
        let rot = rotator("gemini", &["g0", "g1"]);
        let overrides = vec!["u0".to_string(), "u1".to_string(), "u2".to_string()];
        let mut seen: Vec<String> = Vec::new();
        rot.select_and_try("gemini", &overrides, &mut seen, |seen: &mut Vec<String>, key: String| {
            async move {
                seen.push(key);
                if seen.len() < 3 {
                    Err(rate_limited())
                } else {
                    Ok(())
                }
            }
            .boxed()
        })
        .await
        .unwrap();

        assert_eq!(seen, vec!["u0", "u1", "u2"]);
        assert_eq!(rot.cursor("gemini"), 0);
    }
}
