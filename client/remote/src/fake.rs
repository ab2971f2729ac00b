//! In-memory collaborators for tests and offline runs.
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex as StdMutex,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Mutex;

use crate::{
    auth::{IdentityProvider, OAuthProvider},
    backend::Backend,
    error::RemoteError,
    models::{
        Classification, HistoryPage, HistoryQuery, OptionCounts, OptionId, Permission, Poll,
        PollId, PollWithPermission, Progress, Scope, Session, UnvotedPage, User, Vote,
        VoteWithWord, Word,
    },
};

#[derive(Default)]
struct FakeState {
    words: Vec<Word>,
    votes: Vec<Vote>,
    polls: Vec<Poll>,
    permissions: Vec<(String, Permission)>,
    next_vote_id: i64,
}

pub struct FakeBackend {
    state: Mutex<FakeState>,
    calls: StdMutex<HashMap<&'static str, u64>>,
    fail_next: AtomicU32,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            calls: StdMutex::new(HashMap::new()),
            fail_next: AtomicU32::new(0),
        }
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_735_689_600, 0).single().unwrap_or_default()
}

fn window<T: Clone>(items: &[T], offset: u64, len: u64) -> Vec<T> {
    items
        .iter()
        .skip(offset as usize)
        .take(len as usize)
        .cloned()
        .collect()
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `texts` to `poll_id`, ids continue from the largest existing id.
    pub fn with_words(mut self, poll_id: PollId, texts: &[&str]) -> Self {
        let state = self.state.get_mut();
        let mut next_id = state.words.iter().map(|w| w.id).max().unwrap_or(0) + 1;

        for text in texts {
            state.words.push(Word {
                id: next_id,
                text: text.to_string(),
                created_at: epoch() + Duration::seconds(next_id),
                poll_id: Some(poll_id),
            });
            next_id += 1;
        }
        self
    }

    pub fn with_poll(mut self, poll: Poll) -> Self {
        self.state.get_mut().polls.push(poll);
        self
    }

    pub fn with_permission(mut self, user_id: &str, permission: Permission) -> Self {
        self.state
            .get_mut()
            .permissions
            .push((user_id.to_string(), permission));
        self
    }

    /// Makes the next `count` calls fail with a 503.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self, operation: &str) -> u64 {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.get(operation).copied().unwrap_or(0)
    }

    pub async fn vote_rows(&self) -> Vec<Vote> {
        self.state.lock().await.votes.clone()
    }

    fn record(&self, operation: &'static str) -> Result<(), RemoteError> {
        {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            *calls.entry(operation).or_insert(0) += 1;
        }

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if failing {
            return Err(RemoteError::Status {
                status: 503,
                message: format!("{operation} unavailable"),
            });
        }
        Ok(())
    }
}

impl FakeState {
    fn poll_words(&self, poll_id: PollId) -> impl Iterator<Item = &Word> {
        self.words
            .iter()
            .filter(move |word| word.poll_id == Some(poll_id))
    }

    fn scope_votes<'a>(&'a self, scope: &'a Scope) -> impl Iterator<Item = &'a Vote> {
        self.votes.iter().filter(move |vote| {
            vote.user_id == scope.user_id && vote.poll_id == Some(scope.poll_id)
        })
    }

    fn word(&self, option_id: OptionId) -> Option<&Word> {
        self.words.iter().find(|word| word.id == option_id)
    }

    fn progress(&self, scope: &Scope) -> Progress {
        Progress::new(
            self.scope_votes(scope).count() as u64,
            self.poll_words(scope.poll_id).count() as u64,
        )
    }
}

fn matches_search(text: &str, search: &str) -> bool {
    let search = search.trim();
    search.is_empty() || text.to_lowercase().contains(&search.to_lowercase())
}

#[async_trait]
impl Backend for FakeBackend {
    async fn submit_vote(
        &self,
        scope: &Scope,
        option_id: OptionId,
        classification: Classification,
    ) -> Result<Vote, RemoteError> {
        self.record("submit_vote")?;
        let mut state = self.state.lock().await;

        if let Some(existing) = state
            .scope_votes(scope)
            .find(|vote| vote.option_id == option_id)
        {
            return Ok(existing.clone());
        }
        if state.word(option_id).is_none() {
            return Err(RemoteError::NotFound(format!("option {option_id}")));
        }

        state.next_vote_id += 1;
        let vote = Vote {
            id: state.next_vote_id,
            user_id: scope.user_id.clone(),
            option_id,
            poll_id: Some(scope.poll_id),
            filter: classification,
            created_at: epoch() + Duration::days(1) + Duration::seconds(state.next_vote_id),
        };
        state.votes.push(vote.clone());

        Ok(vote)
    }

    async fn update_vote(
        &self,
        scope: &Scope,
        option_id: OptionId,
        classification: Classification,
    ) -> Result<Vote, RemoteError> {
        self.record("update_vote")?;
        let mut state = self.state.lock().await;

        let vote = state
            .votes
            .iter_mut()
            .find(|vote| {
                vote.user_id == scope.user_id
                    && vote.poll_id == Some(scope.poll_id)
                    && vote.option_id == option_id
            })
            .ok_or_else(|| RemoteError::NotFound(format!("vote for option {option_id}")))?;

        vote.filter = classification;
        Ok(vote.clone())
    }

    async fn get_unvoted_options(
        &self,
        scope: &Scope,
        page: u32,
        page_size: u32,
        search: &str,
    ) -> Result<UnvotedPage, RemoteError> {
        self.record("get_unvoted_options")?;
        let state = self.state.lock().await;

        let voted: HashSet<OptionId> = state.scope_votes(scope).map(|v| v.option_id).collect();
        let mut words: Vec<Word> = state
            .poll_words(scope.poll_id)
            .filter(|word| !voted.contains(&word.id) && matches_search(&word.text, search))
            .cloned()
            .collect();
        words.sort_by(|a, b| a.text.cmp(&b.text));

        let offset = u64::from(page.max(1) - 1) * u64::from(page_size);
        Ok(UnvotedPage {
            total: words.len() as u64,
            words: window(&words, offset, u64::from(page_size)),
        })
    }

    async fn get_vote_history(
        &self,
        scope: &Scope,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, RemoteError> {
        self.record("get_vote_history")?;
        let state = self.state.lock().await;

        let mut rows: Vec<VoteWithWord> = state
            .scope_votes(scope)
            .filter(|vote| {
                query
                    .filter
                    .classification()
                    .is_none_or(|classification| vote.filter == classification)
            })
            .filter_map(|vote| {
                let word = state.word(vote.option_id)?;
                matches_search(&word.text, &query.search).then(|| VoteWithWord {
                    vote: vote.clone(),
                    word: Some(word.clone()),
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            b.vote
                .created_at
                .cmp(&a.vote.created_at)
                .then(b.vote.id.cmp(&a.vote.id))
        });

        Ok(HistoryPage {
            total: rows.len() as u64,
            votes: window(&rows, query.offset(), u64::from(query.page_size)),
        })
    }

    async fn get_option_counts(&self, scope: &Scope) -> Result<OptionCounts, RemoteError> {
        self.record("get_option_counts")?;
        let state = self.state.lock().await;

        let progress = state.progress(scope);
        let count = |classification: Classification| {
            state
                .scope_votes(scope)
                .filter(|vote| vote.filter == classification)
                .count() as u64
        };

        Ok(OptionCounts {
            voted: progress.voted,
            unvoted: progress.unvoted,
            total: progress.total,
            easy: count(Classification::Easy),
            difficult: count(Classification::Difficult),
            not_exist: count(Classification::NotExist),
        })
    }

    async fn get_poll_by_id(&self, poll_id: PollId) -> Result<Poll, RemoteError> {
        self.record("get_poll_by_id")?;
        let state = self.state.lock().await;

        state
            .polls
            .iter()
            .find(|poll| poll.id == poll_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("poll {poll_id}")))
    }

    async fn get_user_polls(&self, user_id: &str) -> Result<Vec<PollWithPermission>, RemoteError> {
        self.record("get_user_polls")?;
        let state = self.state.lock().await;

        Ok(state
            .permissions
            .iter()
            .filter(|(owner, _)| owner == user_id)
            .filter_map(|(_, permission)| {
                let poll = state.polls.iter().find(|poll| poll.id == permission.poll_id)?;
                Some(PollWithPermission {
                    poll: poll.clone(),
                    can_vote: permission.can_vote,
                    can_view: permission.can_view,
                    progress: state.progress(&Scope::new(user_id, poll.id)),
                })
            })
            .collect())
    }

    async fn count_options(&self, poll_id: PollId) -> Result<u64, RemoteError> {
        self.record("count_options")?;
        let state = self.state.lock().await;

        Ok(state.poll_words(poll_id).count() as u64)
    }

    async fn options_window(
        &self,
        poll_id: PollId,
        offset: u64,
        len: u64,
    ) -> Result<Vec<Word>, RemoteError> {
        self.record("options_window")?;
        let state = self.state.lock().await;

        let mut words: Vec<Word> = state.poll_words(poll_id).cloned().collect();
        words.sort_by_key(|word| word.id);

        Ok(window(&words, offset, len))
    }

    async fn voted_option_ids(
        &self,
        scope: &Scope,
        option_ids: &[OptionId],
    ) -> Result<Vec<OptionId>, RemoteError> {
        self.record("voted_option_ids")?;
        let state = self.state.lock().await;

        Ok(state
            .scope_votes(scope)
            .map(|vote| vote.option_id)
            .filter(|id| option_ids.contains(id))
            .collect())
    }

    async fn count_votes(&self, scope: &Scope) -> Result<u64, RemoteError> {
        self.record("count_votes")?;
        let state = self.state.lock().await;

        Ok(state.scope_votes(scope).count() as u64)
    }

    async fn voted_words(
        &self,
        scope: &Scope,
        filters: &[Classification],
        page: u32,
        page_size: u32,
    ) -> Result<Vec<String>, RemoteError> {
        self.record("voted_words")?;
        let state = self.state.lock().await;

        let mut votes: Vec<&Vote> = state
            .scope_votes(scope)
            .filter(|vote| filters.is_empty() || filters.contains(&vote.filter))
            .collect();
        votes.sort_by_key(|vote| vote.id);

        let texts: Vec<String> = votes
            .into_iter()
            .filter_map(|vote| state.word(vote.option_id).map(|word| word.text.clone()))
            .collect();

        let offset = u64::from(page.max(1) - 1) * u64::from(page_size);
        Ok(window(&texts, offset, u64::from(page_size)))
    }
}

/// Identity provider that signs everybody in as one fixed user.
pub struct FakeIdentity {
    user: User,
    tokens: StdMutex<HashSet<String>>,
    issued: AtomicU64,
    sign_outs: AtomicU64,
    lookups: AtomicU64,
}

impl FakeIdentity {
    pub fn new(user: User) -> Self {
        Self {
            user,
            tokens: StdMutex::new(HashSet::new()),
            issued: AtomicU64::new(0),
            sign_outs: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
        }
    }

    pub fn user(id: &str, email: &str) -> User {
        User {
            id: id.to_string(),
            email: Some(email.to_string()),
            full_name: None,
            role: Some("authenticated".to_string()),
            created_at: None,
        }
    }

    pub fn sign_outs(&self) -> u64 {
        self.sign_outs.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Invalidates a token as if it expired server side.
    pub fn revoke(&self, access_token: &str) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.remove(access_token);
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
        challenge: &str,
    ) -> Result<String, RemoteError> {
        Ok(format!(
            "https://identity.test/authorize?provider={}&redirect_to={redirect_to}&code_challenge={challenge}",
            provider.as_str()
        ))
    }

    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<Session, RemoteError> {
        if code.is_empty() || verifier.is_empty() {
            return Err(RemoteError::Status {
                status: 400,
                message: "invalid grant".to_string(),
            });
        }

        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let access_token = format!("access-{n}");
        {
            let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
            tokens.insert(access_token.clone());
        }

        Ok(Session {
            access_token,
            refresh_token: format!("refresh-{n}"),
            expires_at: None,
            user: self.user.clone(),
        })
    }

    async fn get_user(&self, access_token: &str) -> Result<Option<User>, RemoteError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());

        Ok(tokens.contains(access_token).then(|| self.user.clone()))
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), RemoteError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        self.revoke(access_token);
        Ok(())
    }
}
