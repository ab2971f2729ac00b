//! # Word supply
//!
//! Where the vote page gets its next batch of unvoted words from.
//!
//! - [`SupplyKind::Rpc`]: the backend procedure filters and pages for us.
//! - [`SupplyKind::Sampled`]: for deployments without the procedure. Reads a random window of the
//!   option table and drops what the user already voted, trying another window when too few survive.
//!
//! ## Sampling
//! The window is `5 × batch` rows. A window is retried while fewer than `min(batch, 5)` unvoted
//! words survive and it held at least `2 × batch` rows. After [`MAX_SAMPLE_ATTEMPTS`] windows the
//! last result is returned as is, even if short or empty.
use std::{
    collections::HashSet,
    fmt,
    str::FromStr,
    sync::{Arc, Mutex},
};

use rand::{Rng, SeedableRng, rngs::StdRng};
use remote::{
    Backend,
    RemoteError,
    models::{OptionId, Scope, UnknownValue, Word},
};
use tracing::debug;

pub const MAX_SAMPLE_ATTEMPTS: u32 = 5;

const WINDOW_FACTOR: u64 = 5;
const RETRY_FACTOR: u64 = 2;
const MIN_SURVIVORS: u64 = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SupplyKind {
    #[default]
    Rpc,
    Sampled,
}

impl fmt::Display for SupplyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupplyKind::Rpc => f.write_str("rpc"),
            SupplyKind::Sampled => f.write_str("sampled"),
        }
    }
}

impl FromStr for SupplyKind {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rpc" => Ok(SupplyKind::Rpc),
            "sampled" => Ok(SupplyKind::Sampled),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

pub struct WordSupply {
    kind: SupplyKind,
    backend: Arc<dyn Backend>,
    batch_size: u32,
    rng: Mutex<StdRng>,
}

impl WordSupply {
    pub fn new(kind: SupplyKind, backend: Arc<dyn Backend>, batch_size: u32) -> Self {
        Self::with_rng(kind, backend, batch_size, StdRng::from_os_rng())
    }

    pub fn with_rng(
        kind: SupplyKind,
        backend: Arc<dyn Backend>,
        batch_size: u32,
        rng: StdRng,
    ) -> Self {
        Self {
            kind,
            backend,
            batch_size,
            rng: Mutex::new(rng),
        }
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    pub async fn next_batch(&self, scope: &Scope) -> Result<Vec<Word>, RemoteError> {
        match self.kind {
            SupplyKind::Rpc => Ok(self
                .backend
                .get_unvoted_options(scope, 1, self.batch_size, "")
                .await?
                .words),
            SupplyKind::Sampled => self.sample(scope).await,
        }
    }

    async fn sample(&self, scope: &Scope) -> Result<Vec<Word>, RemoteError> {
        let batch = u64::from(self.batch_size);

        if self.backend.count_votes(scope).await? == 0 {
            return self.backend.options_window(scope.poll_id, 0, batch).await;
        }

        let total = self.backend.count_options(scope.poll_id).await?;
        let window = batch * WINDOW_FACTOR;
        let wanted = batch.min(MIN_SURVIVORS);

        let mut unvoted = Vec::new();
        for attempt in 1..=MAX_SAMPLE_ATTEMPTS {
            let offset = self.random_offset(total.saturating_sub(window));
            let words = self
                .backend
                .options_window(scope.poll_id, offset, window)
                .await?;
            if words.is_empty() {
                return Ok(Vec::new());
            }

            let ids: Vec<OptionId> = words.iter().map(|word| word.id).collect();
            let voted: HashSet<OptionId> = self
                .backend
                .voted_option_ids(scope, &ids)
                .await?
                .into_iter()
                .collect();

            let sampled = words.len() as u64;
            unvoted = words
                .into_iter()
                .filter(|word| !voted.contains(&word.id))
                .collect();

            if unvoted.len() as u64 >= wanted || sampled < batch * RETRY_FACTOR {
                break;
            }
            debug!(
                "Window at {offset} left {} unvoted words (attempt {attempt}/{MAX_SAMPLE_ATTEMPTS})",
                unvoted.len()
            );
        }

        unvoted.truncate(self.batch_size as usize);
        Ok(unvoted)
    }

    fn random_offset(&self, max: u64) -> u64 {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.random_range(0..=max)
    }
}

#[cfg(test)]
mod tests {
    use remote::{fake::FakeBackend, models::Classification};

    use super::*;

    fn words(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("palabra{i:03}")).collect()
    }

    fn backend(count: usize) -> Arc<FakeBackend> {
        let texts = words(count);
        let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
        Arc::new(FakeBackend::new().with_words(1, &texts))
    }

    fn supply(kind: SupplyKind, backend: Arc<FakeBackend>, batch_size: u32) -> WordSupply {
        WordSupply::with_rng(kind, backend, batch_size, StdRng::seed_from_u64(7))
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("sampled".parse::<SupplyKind>(), Ok(SupplyKind::Sampled));
        assert_eq!(" RPC ".parse::<SupplyKind>(), Ok(SupplyKind::Rpc));
        assert!("random".parse::<SupplyKind>().is_err());
    }

    #[tokio::test]
    async fn test_rpc_batch() {
        let backend = backend(30);
        let supply = supply(SupplyKind::Rpc, backend.clone(), 10);
        let scope = Scope::new("user-1", 1);

        backend
            .submit_vote(&scope, 1, Classification::Easy)
            .await
            .unwrap();
        let batch = supply.next_batch(&scope).await.unwrap();

        assert_eq!(batch.len(), 10);
        assert!(batch.iter().all(|word| word.id != 1));
    }

    #[tokio::test]
    async fn test_sampled_first_batch_in_order() {
        let backend = backend(30);
        let supply = supply(SupplyKind::Sampled, backend.clone(), 4);

        let batch = supply.next_batch(&Scope::new("user-1", 1)).await.unwrap();
        let ids: Vec<OptionId> = batch.iter().map(|word| word.id).collect();

        assert_eq!(ids, [1, 2, 3, 4]);
        assert_eq!(backend.calls("count_options"), 0);
    }

    #[tokio::test]
    async fn test_sampled_skips_voted() {
        let backend = backend(30);
        let supply = supply(SupplyKind::Sampled, backend.clone(), 4);
        let scope = Scope::new("user-1", 1);

        for id in 1..=10 {
            backend
                .submit_vote(&scope, id, Classification::Difficult)
                .await
                .unwrap();
        }
        let batch = supply.next_batch(&scope).await.unwrap();

        assert_eq!(batch.len(), 4);
        assert!(batch.iter().all(|word| word.id > 10));
    }

    #[tokio::test]
    async fn test_sampled_retries_are_bounded() {
        let backend = backend(40);
        let supply = supply(SupplyKind::Sampled, backend.clone(), 4);
        let scope = Scope::new("user-1", 1);

        for id in 1..=40 {
            backend
                .submit_vote(&scope, id, Classification::Easy)
                .await
                .unwrap();
        }
        let batch = supply.next_batch(&scope).await.unwrap();

        assert!(batch.is_empty());
        assert_eq!(
            backend.calls("options_window"),
            u64::from(MAX_SAMPLE_ATTEMPTS)
        );
    }
}
