use async_trait::async_trait;

use crate::{
    error::RemoteError,
    models::{
        Classification, HistoryPage, HistoryQuery, OptionCounts, OptionId, Poll, PollId,
        PollWithPermission, Scope, UnvotedPage, Vote, Word,
    },
};

/// Query and procedure surface of the hosted backend.
///
/// Implementations must keep at most one vote row per (user, option, poll):
/// [`Backend::submit_vote`] returns the existing row untouched when there is one, and
/// [`Backend::update_vote`] fails with [`RemoteError::NotFound`] instead of inserting.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn submit_vote(
        &self,
        scope: &Scope,
        option_id: OptionId,
        classification: Classification,
    ) -> Result<Vote, RemoteError>;

    async fn update_vote(
        &self,
        scope: &Scope,
        option_id: OptionId,
        classification: Classification,
    ) -> Result<Vote, RemoteError>;

    /// Words of the poll the user has not voted yet, one-based `page`.
    async fn get_unvoted_options(
        &self,
        scope: &Scope,
        page: u32,
        page_size: u32,
        search: &str,
    ) -> Result<UnvotedPage, RemoteError>;

    /// Past votes, newest first.
    async fn get_vote_history(
        &self,
        scope: &Scope,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, RemoteError>;

    /// Uncached aggregate counts. Callers go through the client-side cache.
    async fn get_option_counts(&self, scope: &Scope) -> Result<OptionCounts, RemoteError>;

    async fn get_poll_by_id(&self, poll_id: PollId) -> Result<Poll, RemoteError>;

    async fn get_user_polls(&self, user_id: &str) -> Result<Vec<PollWithPermission>, RemoteError>;

    async fn count_options(&self, poll_id: PollId) -> Result<u64, RemoteError>;

    /// `len` words of the poll starting at row `offset`, in id order.
    async fn options_window(
        &self,
        poll_id: PollId,
        offset: u64,
        len: u64,
    ) -> Result<Vec<Word>, RemoteError>;

    /// The subset of `option_ids` the user already voted on.
    async fn voted_option_ids(
        &self,
        scope: &Scope,
        option_ids: &[OptionId],
    ) -> Result<Vec<OptionId>, RemoteError>;

    async fn count_votes(&self, scope: &Scope) -> Result<u64, RemoteError>;

    /// Texts of the words the user classified with any of `filters`, one-based `page`.
    async fn voted_words(
        &self,
        scope: &Scope,
        filters: &[Classification],
        page: u32,
        page_size: u32,
    ) -> Result<Vec<String>, RemoteError>;
}
