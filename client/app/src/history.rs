//! # History controller
//!
//! Paginated listing of the user's past votes, or of the words still unvoted, switched by
//! [`HistoryState::show_unvoted`].
//!
//! ## Notes
//! - Search is two-step: [`HistoryController::handle_search_input`] only edits the input, the query
//!   is committed by [`HistoryController::handle_search`] or Enter.
//! - Switching mode resets the page, the search and the filter.
//! - The page is clamped every time the total changes, there is always at least one page.
//! - Loads are tagged with a generation. A response that lands after a newer load started is
//!   dropped instead of overwriting fresher rows.
//! - Reclassifying a past vote is optimistic and rolled back if the backend refuses.
use std::sync::Arc;

use remote::{
    Backend,
    RemoteError,
    models::{
        Classification, DifficultyFilter, HistoryPage, HistoryQuery, OptionCounts, OptionId, Scope,
        UnvotedPage, VoteWithWord, Word,
    },
};
use tracing::{debug, error};

use crate::{
    counts::CountsCache,
    utils::{clamp_page, completion_percentage, normalize_search, total_pages},
};

pub const PAGE_SIZE: u32 = 10;

pub const LOAD_ERROR: &str = "Error al cargar los datos. Por favor, intenta de nuevo.";
pub const VOTE_ERROR: &str = "Error al registrar el voto. Por favor, intenta de nuevo.";
pub const UPDATE_ERROR: &str = "Error al actualizar el voto. Por favor, intenta de nuevo.";
pub const SEARCH_PLACEHOLDER: &str = "Buscar palabras...";

#[derive(Clone, Debug)]
pub struct HistoryState {
    pub votes: Vec<VoteWithWord>,
    pub unvoted_words: Vec<Word>,
    pub show_unvoted: bool,
    pub is_loading: bool,
    pub is_initial_loading: bool,
    pub error: Option<String>,
    pub current_page: u32,
    pub total: u64,
    pub data_loaded: bool,
    pub search_query: String,
    pub search_input: String,
    pub filter: DifficultyFilter,
    pub show_filters: bool,
    pub poll_url: Option<String>,
    pub counts: OptionCounts,
}

impl Default for HistoryState {
    fn default() -> Self {
        Self {
            votes: Vec::new(),
            unvoted_words: Vec::new(),
            show_unvoted: false,
            is_loading: false,
            is_initial_loading: true,
            error: None,
            current_page: 1,
            total: 0,
            data_loaded: false,
            search_query: String::new(),
            search_input: String::new(),
            filter: DifficultyFilter::All,
            show_filters: false,
            poll_url: None,
            counts: OptionCounts::default(),
        }
    }
}

impl HistoryState {
    pub fn total_pages(&self) -> u32 {
        total_pages(self.total, PAGE_SIZE)
    }

    pub fn completion_percentage(&self) -> f64 {
        completion_percentage(&self.counts, self.show_unvoted, self.filter)
    }

    pub fn search_placeholder(&self) -> &'static str {
        SEARCH_PLACEHOLDER
    }

    pub fn show_clear_button(&self) -> bool {
        !self.search_query.is_empty()
            || !self.search_input.is_empty()
            || self.filter != DifficultyFilter::All
    }
}

/// A load that was started. Hand it back to [`HistoryController::apply_load`] with the response.
#[derive(Clone, Debug, PartialEq)]
pub struct PageRequest {
    generation: u64,
    show_unvoted: bool,
    query: HistoryQuery,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PageResponse {
    Votes(HistoryPage),
    Unvoted(UnvotedPage),
}

pub struct HistoryController {
    backend: Arc<dyn Backend>,
    counts_cache: Arc<CountsCache>,
    scope: Scope,
    state: HistoryState,
    generation: u64,
}

impl HistoryController {
    pub fn new(backend: Arc<dyn Backend>, counts_cache: Arc<CountsCache>, scope: Scope) -> Self {
        Self {
            backend,
            counts_cache,
            scope,
            state: HistoryState::default(),
            generation: 0,
        }
    }

    pub fn state(&self) -> &HistoryState {
        &self.state
    }

    pub async fn mount(&mut self) {
        self.load_poll_url().await;
        self.load_counts(false).await;
        self.load_page().await;
    }

    pub async fn load_poll_url(&mut self) {
        match self.backend.get_poll_by_id(self.scope.poll_id).await {
            Ok(poll) => self.state.poll_url = poll.url,
            Err(e) => error!("Error al cargar URL de la encuesta: {e}"),
        }
    }

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

    /// Marks the state as loading and supersedes every load started before.
    pub fn begin_load(&mut self) -> PageRequest {
        self.generation += 1;

        if self.state.votes.is_empty() && !self.state.show_unvoted {
            self.state.is_initial_loading = true;
        }
        self.state.is_loading = true;
        self.state.error = None;

        PageRequest {
            generation: self.generation,
            show_unvoted: self.state.show_unvoted,
            query: HistoryQuery {
                page: self.state.current_page,
                page_size: PAGE_SIZE,
                search: self.state.search_query.clone(),
                filter: self.state.filter,
            },
        }
    }

    pub async fn fetch(&self, request: &PageRequest) -> Result<PageResponse, RemoteError> {
        let query = &request.query;

        if request.show_unvoted {
            let page = self
                .backend
                .get_unvoted_options(&self.scope, query.page, query.page_size, &query.search)
                .await?;
            Ok(PageResponse::Unvoted(page))
        } else {
            let page = self.backend.get_vote_history(&self.scope, query).await?;
            Ok(PageResponse::Votes(page))
        }
    }

    /// Stores the outcome of `request`. Returns false if a newer load made it stale.
    pub fn apply_load(
        &mut self,
        request: &PageRequest,
        result: Result<PageResponse, RemoteError>,
    ) -> bool {
        if request.generation != self.generation {
            debug!(
                "Dropping stale page {} (generation {} < {})",
                request.query.page, request.generation, self.generation
            );
            return false;
        }

        match result {
            Ok(PageResponse::Votes(page)) => {
                self.state.votes = page.votes;
                self.state.total = page.total;
            }
            Ok(PageResponse::Unvoted(page)) => {
                self.state.unvoted_words = page.words;
                self.state.total = page.total;
            }
            Err(e) => {
                error!("Error al cargar datos: {e}");
                self.state.error = Some(LOAD_ERROR.to_string());
            }
        }

        self.state.is_loading = false;
        self.state.is_initial_loading = false;
        self.state.data_loaded = true;
        true
    }

    /// Loads the current page, and once more if the new total moved the page.
    pub async fn load_page(&mut self) {
        let request = self.begin_load();
        let result = self.fetch(&request).await;
        self.apply_load(&request, result);

        if self.clamp_current_page() {
            let request = self.begin_load();
            let result = self.fetch(&request).await;
            self.apply_load(&request, result);
        }
    }

    fn clamp_current_page(&mut self) -> bool {
        let clamped = clamp_page(self.state.current_page, self.state.total, PAGE_SIZE);
        if clamped == self.state.current_page {
            return false;
        }

        debug!("Clamping page {} to {clamped}", self.state.current_page);
        self.state.current_page = clamped;
        true
    }

    pub async fn set_show_unvoted(&mut self, show: bool) {
        self.state.show_unvoted = show;
        self.state.current_page = 1;
        self.state.search_input.clear();
        self.state.search_query.clear();
        self.state.filter = DifficultyFilter::All;

        self.load_page().await;
    }

    pub fn handle_search_input(&mut self, value: &str) {
        self.state.search_input = value.to_string();
        self.state.error = None;
    }

    pub async fn handle_search(&mut self) {
        self.state.search_query = normalize_search(&self.state.search_input);
        self.state.current_page = 1;

        self.load_page().await;
    }

    pub async fn handle_key(&mut self, key: &str) {
        if key == "Enter" {
            self.handle_search().await;
        }
    }

    pub async fn handle_difficulty_filter(&mut self, filter: DifficultyFilter) {
        self.state.filter = filter;
        self.state.current_page = 1;

        self.load_page().await;
    }

    pub async fn handle_clear_filters(&mut self) {
        self.state.search_input.clear();
        self.state.search_query.clear();
        self.state.filter = DifficultyFilter::All;
        self.state.current_page = 1;

        self.load_page().await;
    }

    pub fn handle_show_filters(&mut self) {
        self.state.show_filters = !self.state.show_filters;
    }

    pub async fn set_current_page(&mut self, page: u32) {
        self.state.current_page = clamp_page(page, self.state.total, PAGE_SIZE);

        self.load_page().await;
    }

    /// Votes a word and reloads the listing of the active mode.
    pub async fn handle_vote(&mut self, option_id: OptionId, classification: Classification) {
        if self.state.is_loading {
            return;
        }

        self.state.is_loading = true;
        self.state.error = None;

        let result = self
            .backend
            .submit_vote(&self.scope, option_id, classification)
            .await;
        self.state.is_loading = false;

        match result {
            Ok(_) => {
                self.load_counts(true).await;
                self.load_page().await;
            }
            Err(e) => {
                error!("Error al votar: {e}");
                self.state.error = Some(VOTE_ERROR.to_string());
            }
        }
    }

    /// Reclassifies a past vote. The row changes right away and is put back if the backend refuses.
    pub async fn handle_update_vote(&mut self, option_id: OptionId, classification: Classification) {
        if self.state.is_loading {
            return;
        }

        self.state.is_loading = true;
        self.state.error = None;

        let previous: Vec<(usize, Classification)> = self
            .state
            .votes
            .iter_mut()
            .enumerate()
            .filter(|(_, row)| row.vote.option_id == option_id)
            .map(|(index, row)| {
                let old = row.vote.filter;
                row.vote.filter = classification;
                (index, old)
            })
            .collect();

        match self
            .backend
            .update_vote(&self.scope, option_id, classification)
            .await
        {
            Ok(_) => self.load_counts(true).await,
            Err(e) => {
                error!("Error al actualizar voto: {e}");
                for (index, old) in previous {
                    if let Some(row) = self.state.votes.get_mut(index) {
                        row.vote.filter = old;
                    }
                }
                self.state.error = Some(UPDATE_ERROR.to_string());
            }
        }

        self.state.is_loading = false;
    }
}
