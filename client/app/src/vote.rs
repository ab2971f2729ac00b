//! # Vote controller
//!
//! Drives the one-word-at-a-time voting flow of a poll.
//!
//! ## State
//! - a working set of unvoted words, fetched in batches from a [`WordSupply`]
//! - a zero-based cursor into the working set
//! - the local history of votes cast on this page, used for undo and to highlight a past choice
//! - aggregate counts, always force refreshed after a vote
//!
//! ## Undo
//! Undo only rewinds the cursor. The vote row stays in the backend and the history entry stays
//! local. Voting again on a word that is already in the history goes through the update path, so
//! an undone word is never counted twice.
//!
//! ## Notes
//! - Every action is a no-op while another one is in flight.
//! - Errors never leave the controller, they end up in [`VoteState::error`] as a Spanish message.
use std::sync::Arc;

use remote::{
    Backend,
    models::{Classification, OptionCounts, OptionId, Scope, Word},
};
use tracing::{error, info};

use crate::{
    counts::CountsCache,
    error::AppError,
    supply::WordSupply,
};

pub const LOAD_ERROR: &str = "Error al cargar palabras. Por favor, intenta de nuevo.";
pub const EXHAUSTED: &str = "No hay más palabras disponibles para votar en este momento. Es posible que hayas votado todas las palabras disponibles o que estemos experimentando problemas técnicos.";
pub const VOTE_ERROR: &str = "Error al registrar el voto";
pub const UPDATE_ERROR: &str = "Error al actualizar el voto";
pub const UNDO_ERROR: &str = "Error al deshacer el voto";

/// A word voted on this page and the choice made for it.
#[derive(Clone, Debug, PartialEq)]
pub struct VoteHistoryEntry {
    pub word: Word,
    pub classification: Classification,
}

#[derive(Clone, Debug, Default)]
pub struct VoteState {
    pub words: Vec<Word>,
    pub current_index: usize,
    pub history: Vec<VoteHistoryEntry>,
    pub counts: OptionCounts,
    pub is_loading: bool,
    pub error: Option<String>,
    pub data_loaded: bool,
    pub poll_url: Option<String>,
}

impl VoteState {
    pub fn current_word(&self) -> Option<&Word> {
        self.words.get(self.current_index)
    }

    /// What the user chose for `option_id` earlier on this page, the latest choice wins.
    pub fn previous_choice(&self, option_id: OptionId) -> Option<Classification> {
        self.history
            .iter()
            .rev()
            .find(|entry| entry.word.id == option_id)
            .map(|entry| entry.classification)
    }

    pub fn can_undo(&self) -> bool {
        !self.history.is_empty() && !self.is_loading
    }

    /// Loaded, idle, and nothing left to vote.
    pub fn is_completed(&self) -> bool {
        self.data_loaded && !self.is_loading && self.words.is_empty()
    }
}

pub struct VoteController {
    backend: Arc<dyn Backend>,
    counts_cache: Arc<CountsCache>,
    supply: WordSupply,
    scope: Scope,
    state: VoteState,
}

impl VoteController {
    pub fn new(
        backend: Arc<dyn Backend>,
        counts_cache: Arc<CountsCache>,
        supply: WordSupply,
        scope: Scope,
    ) -> Self {
        Self {
            backend,
            counts_cache,
            supply,
            scope,
            state: VoteState::default(),
        }
    }

    pub fn state(&self) -> &VoteState {
        &self.state
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// First load of the page: words, counts and the poll's definition url.
    pub async fn mount(&mut self) {
        self.load_poll_url().await;
        self.load_options().await;
        self.load_counts(false).await;
    }

    pub async fn load_options(&mut self) {
        self.state.is_loading = true;
        self.state.error = None;

        self.fetch_options().await;

        self.state.is_loading = false;
        self.state.data_loaded = true;
    }

    async fn fetch_options(&mut self) {
        match self.supply.next_batch(&self.scope).await {
            Ok(words) => {
                info!("Loaded {} unvoted words", words.len());
                if words.is_empty() {
                    self.state.error = Some(EXHAUSTED.to_string());
                }
                self.state.words = words;
            }
            Err(e) => {
                error!("Error al cargar palabras: {e}");
                self.state.error = Some(LOAD_ERROR.to_string());
            }
        }
    }

    /// Counts failures are only logged, the stats bar keeps its last value.
    pub async fn load_counts(&mut self, force_refresh: bool) {
        match self
            .counts_cache
            .get(self.backend.as_ref(), &self.scope, force_refresh)
            .await
        {
            Ok(counts) => self.state.counts = counts,
            Err(e) => error!("Error al cargar conteos de palabras: {e}"),
        }
    }

    pub async fn load_poll_url(&mut self) {
        match self.backend.get_poll_by_id(self.scope.poll_id).await {
            Ok(poll) => self.state.poll_url = poll.url,
            Err(e) => error!("Error al cargar URL de la encuesta: {e}"),
        }
    }

    pub async fn handle_vote(&mut self, option_id: OptionId, classification: Classification) {
        if self.state.is_loading {
            return;
        }
        if self.state.previous_choice(option_id).is_some() {
            return self.handle_update_vote(option_id, classification).await;
        }

        self.state.is_loading = true;
        self.state.error = None;

        if let Err(e) = self.vote(option_id, classification).await {
            error!("Error al votar: {e}");
            self.state.error = Some(e.user_message(VOTE_ERROR));
        }

        self.state.is_loading = false;
    }

    async fn vote(
        &mut self,
        option_id: OptionId,
        classification: Classification,
    ) -> Result<(), AppError> {
        let word = self
            .state
            .words
            .iter()
            .find(|word| word.id == option_id)
            .cloned()
            .ok_or(AppError::OptionMissing(option_id))?;

        self.state.history.push(VoteHistoryEntry {
            word,
            classification,
        });

        if let Err(e) = self
            .backend
            .submit_vote(&self.scope, option_id, classification)
            .await
        {
            self.state.history.pop();
            return Err(e.into());
        }

        self.load_counts(true).await;
        self.advance().await;

        Ok(())
    }

    pub async fn handle_update_vote(&mut self, option_id: OptionId, classification: Classification) {
        if self.state.is_loading {
            return;
        }

        self.state.is_loading = true;
        self.state.error = None;

        if let Err(e) = self.update(option_id, classification).await {
            error!("Error al actualizar voto: {e}");
            self.state.error = Some(e.user_message(UPDATE_ERROR));
        }

        self.state.is_loading = false;
    }

    async fn update(
        &mut self,
        option_id: OptionId,
        classification: Classification,
    ) -> Result<(), AppError> {
        self.backend
            .update_vote(&self.scope, option_id, classification)
            .await?;

        for entry in self
            .state
            .history
            .iter_mut()
            .filter(|entry| entry.word.id == option_id)
        {
            entry.classification = classification;
        }

        self.load_counts(true).await;
        self.advance().await;

        Ok(())
    }

    /// Next word, or a fresh batch once the cursor runs off the end.
    async fn advance(&mut self) {
        self.state.current_index += 1;

        if self.state.current_index >= self.state.words.len() {
            self.fetch_options().await;
            self.state.current_index = 0;
        }
    }

    pub async fn handle_undo(&mut self) {
        if self.state.is_loading || self.state.history.is_empty() {
            return;
        }

        self.state.is_loading = true;
        self.state.error = None;

        self.state.current_index = self.state.current_index.saturating_sub(1);

        match self
            .counts_cache
            .get(self.backend.as_ref(), &self.scope, true)
            .await
        {
            Ok(counts) => self.state.counts = counts,
            Err(e) => {
                error!("Error al deshacer voto: {e}");
                self.state.error = Some(UNDO_ERROR.to_string());
            }
        }

        self.state.is_loading = false;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use remote::{
        fake::FakeBackend,
        models::{DEFAULT_POLL_ID, Poll},
    };

    use super::*;
    use crate::supply::SupplyKind;

    const BATCH: u32 = 3;

    fn controller(backend: Arc<FakeBackend>) -> VoteController {
        let cache = Arc::new(CountsCache::new(Duration::from_secs(300)));
        let supply = WordSupply::new(SupplyKind::Rpc, backend.clone(), BATCH);
        VoteController::new(backend, cache, supply, Scope::new("user-1", DEFAULT_POLL_ID))
    }

    fn backend(texts: &[&str]) -> Arc<FakeBackend> {
        Arc::new(
            FakeBackend::new()
                .with_words(DEFAULT_POLL_ID, texts)
                .with_poll(Poll {
                    id: DEFAULT_POLL_ID,
                    title: "Palabras".to_string(),
                    description: None,
                    url: Some("https://dle.rae.es/".to_string()),
                }),
        )
    }

    fn current_id(controller: &VoteController) -> OptionId {
        controller.state().current_word().map(|word| word.id).unwrap()
    }

    #[tokio::test]
    async fn test_mount_loads_everything() {
        let backend = backend(&["casa", "perro", "gato", "sol"]);
        let mut controller = controller(backend);

        controller.mount().await;
        let state = controller.state();

        assert_eq!(state.words.len(), BATCH as usize);
        assert_eq!(state.counts.total, 4);
        assert_eq!(state.poll_url.as_deref(), Some("https://dle.rae.es/"));
        assert!(state.data_loaded);
        assert!(!state.is_loading);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_empty_batch_sets_message() {
        let backend = backend(&[]);
        let mut controller = controller(backend);

        controller.load_options().await;
        let state = controller.state();

        assert_eq!(state.error.as_deref(), Some(EXHAUSTED));
        assert!(state.words.is_empty());
        assert!(state.is_completed());
    }

    #[tokio::test]
    async fn test_load_failure_sets_message() {
        let backend = backend(&["casa"]);
        let mut controller = controller(backend.clone());

        backend.fail_next(1);
        controller.load_options().await;

        assert_eq!(controller.state().error.as_deref(), Some(LOAD_ERROR));
        assert!(!controller.state().is_loading);
    }

    #[tokio::test]
    async fn test_vote_advances_and_refreshes_counts() {
        let backend = backend(&["casa", "perro", "gato", "sol"]);
        let mut controller = controller(backend.clone());
        controller.mount().await;

        let first = current_id(&controller);
        controller.handle_vote(first, Classification::Easy).await;
        let state = controller.state();

        assert_eq!(state.current_index, 1);
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.previous_choice(first), Some(Classification::Easy));
        assert_eq!(state.counts.voted, 1);
        assert_eq!(state.counts.easy, 1);
        assert_eq!(backend.calls("submit_vote"), 1);
    }

    #[tokio::test]
    async fn test_vote_ignored_while_loading() {
        let backend = backend(&["casa", "perro"]);
        let mut controller = controller(backend.clone());
        controller.mount().await;

        controller.state.is_loading = true;
        let first = current_id(&controller);
        controller.handle_vote(first, Classification::Easy).await;

        assert_eq!(backend.calls("submit_vote"), 0);
        assert_eq!(controller.state().current_index, 0);
        assert!(controller.state().history.is_empty());
    }

    #[tokio::test]
    async fn test_vote_on_unknown_option() {
        let backend = backend(&["casa", "perro"]);
        let mut controller = controller(backend.clone());
        controller.mount().await;

        controller.handle_vote(999, Classification::Easy).await;

        assert_eq!(
            controller.state().error.as_deref(),
            Some("Error al registrar el voto: la palabra 999 no está en la lista actual")
        );
        assert!(controller.state().history.is_empty());
        assert_eq!(backend.calls("submit_vote"), 0);
    }

    #[tokio::test]
    async fn test_failed_vote_keeps_cursor() {
        let backend = backend(&["casa", "perro"]);
        let mut controller = controller(backend.clone());
        controller.mount().await;

        backend.fail_next(1);
        let first = current_id(&controller);
        controller.handle_vote(first, Classification::Easy).await;
        let state = controller.state();

        assert_eq!(
            state.error.as_deref(),
            Some("Error al registrar el voto. Por favor, intenta de nuevo.")
        );
        assert_eq!(state.current_index, 0);
        assert!(state.history.is_empty());
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn test_undo_then_vote_again_counts_once() {
        let backend = backend(&["casa", "perro", "gato", "sol"]);
        let mut controller = controller(backend.clone());
        controller.mount().await;

        let first = current_id(&controller);
        controller.handle_vote(first, Classification::Easy).await;
        controller.handle_undo().await;
        assert_eq!(current_id(&controller), first);

        controller.handle_vote(first, Classification::Difficult).await;
        let state = controller.state();

        assert_eq!(state.counts.voted, 1);
        assert_eq!(state.counts.easy, 0);
        assert_eq!(state.counts.difficult, 1);
        assert_eq!(state.previous_choice(first), Some(Classification::Difficult));
        assert_eq!(state.current_index, 1);
        assert_eq!(backend.vote_rows().await.len(), 1);
        assert_eq!(backend.calls("update_vote"), 1);
    }

    #[tokio::test]
    async fn test_undo_needs_history() {
        let backend = backend(&["casa", "perro"]);
        let mut controller = controller(backend.clone());
        controller.mount().await;

        controller.handle_undo().await;

        assert_eq!(controller.state().current_index, 0);
        assert_eq!(backend.calls("get_option_counts"), 1);
    }

    #[tokio::test]
    async fn test_end_of_batch_reloads() {
        let backend = backend(&["a", "b", "c", "d", "e"]);
        let mut controller = controller(backend.clone());
        controller.mount().await;

        for _ in 0..BATCH {
            let id = current_id(&controller);
            controller.handle_vote(id, Classification::NotExist).await;
        }
        let state = controller.state();

        assert_eq!(state.current_index, 0);
        let texts: Vec<&str> = state.words.iter().map(|word| word.text.as_str()).collect();
        assert_eq!(texts, ["d", "e"]);
        assert_eq!(state.counts.not_exist, 3);
    }

    #[tokio::test]
    async fn test_last_vote_completes() {
        let backend = backend(&["casa"]);
        let mut controller = controller(backend);
        controller.mount().await;

        let id = current_id(&controller);
        controller.handle_vote(id, Classification::Easy).await;
        let state = controller.state();

        assert!(state.is_completed());
        assert_eq!(state.error.as_deref(), Some(EXHAUSTED));
        assert_eq!(state.counts.unvoted, 0);
    }
}
