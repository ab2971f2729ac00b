//! # Hosted backend over HTTP
//!
//! Row-level table API (`/rest/v1/<table>`) and remote procedures (`/rest/v1/rpc/<name>`).
//!
//! ## Requests
//! - Every request carries the project `apikey` plus a bearer token: the user's access token once
//!   signed in, the anon key otherwise. Row-level security on the backend scopes rows to the token.
//! - Filters use the table API operators (`eq.`, `in.()`, `ilike.`), the search pattern uses `*` as
//!   wildcard.
//!
//! ## Counting
//! Exact totals are requested with `Prefer: count=exact` and read back from `Content-Range`,
//! e.g. `0-9/42` or `*/0` for an empty window.
use std::{collections::HashMap, fmt::Display};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::{
    Client, Method, RequestBuilder, Response, StatusCode,
    header::{CONTENT_RANGE, HeaderMap},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{
    auth::GoTrueClient,
    backend::Backend,
    error::RemoteError,
    models::{
        Classification, HistoryPage, HistoryQuery, OptionCounts, OptionId, Permission, Poll,
        PollId, PollWithPermission, Progress, Scope, UnvotedPage, Vote, VoteWithWord, Word,
    },
};

pub const UNVOTED_RPC: &str = "get_unvoted_options";
pub const COUNTS_RPC: &str = "get_option_counts_by_poll_id";

const VOTES: &str = "votes";
const OPTIONS: &str = "options";
const POLLS: &str = "polls";
const PERMISSIONS: &str = "permissions";

const POLL_COLUMNS: &str = "id,name,description,url";

type Params = Vec<(&'static str, String)>;

/// One hosted project. Shares a connection pool between the table API and the identity API.
#[derive(Clone)]
pub struct SupabaseProject {
    http: Client,
    project_url: String,
    anon_key: String,
}

impl SupabaseProject {
    pub fn new(project_url: &str, anon_key: &str) -> Self {
        Self {
            http: Client::new(),
            project_url: project_url.to_string(),
            anon_key: anon_key.to_string(),
        }
    }

    /// Table API client acting as the holder of `access_token`, or anonymously.
    pub fn backend(&self, access_token: Option<&str>) -> SupabaseBackend {
        let backend = SupabaseBackend::new(self.http.clone(), &self.project_url, &self.anon_key);
        match access_token {
            Some(token) => backend.with_access_token(token),
            None => backend,
        }
    }

    pub fn identity(&self) -> GoTrueClient {
        GoTrueClient::new(self.http.clone(), &self.project_url, &self.anon_key)
    }
}

pub struct SupabaseBackend {
    http: Client,
    rest_url: String,
    anon_key: String,
    access_token: Option<String>,
}

impl SupabaseBackend {
    pub fn new(http: Client, project_url: &str, anon_key: &str) -> Self {
        Self {
            http,
            rest_url: format!("{}/rest/v1", project_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let token = self.access_token.as_deref().unwrap_or(&self.anon_key);

        self.http
            .request(method, format!("{}/{}", self.rest_url, path))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    fn rpc(&self, name: &str, args: Value) -> RequestBuilder {
        self.request(Method::POST, &format!("rpc/{name}")).json(&args)
    }

    async fn find_vote(&self, scope: &Scope, option_id: OptionId) -> Result<Option<Vote>, RemoteError> {
        let mut params = scope_params(scope);
        params.push(("select", "*".to_string()));
        params.push(("option_id", eq(option_id)));
        params.push(("limit", "1".to_string()));

        let rows: Vec<Vote> = fetch_json(self.request(Method::GET, VOTES).query(&params)).await?;

        Ok(rows.into_iter().next())
    }

    async fn poll_progress(&self, scope: &Scope) -> Result<Progress, RemoteError> {
        let rows: Vec<Value> = fetch_json(self.rpc(
            COUNTS_RPC,
            json!({ "p_user_id": scope.user_id, "p_poll_id": scope.poll_id }),
        ))
        .await?;

        let row = rows
            .first()
            .ok_or_else(|| RemoteError::Malformed(format!("{COUNTS_RPC} returned no rows")))?;

        Ok(Progress::new(
            as_count(&row["voted_count"]),
            as_count(&row["total_count"]),
        ))
    }

    async fn classification_count(
        &self,
        scope: &Scope,
        classification: Classification,
    ) -> Result<u64, RemoteError> {
        let mut params = scope_params(scope);
        params.push(("filter", eq(classification)));

        exact_count(self.request(Method::HEAD, VOTES).query(&params)).await
    }
}

#[derive(Serialize)]
struct NewVote<'a> {
    user_id: &'a str,
    option_id: OptionId,
    poll_id: PollId,
    filter: Classification,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct UnvotedRow {
    id: OptionId,
    option: String,
    #[serde(default)]
    total: Option<Value>,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct OptionIdRow {
    option_id: OptionId,
}

#[derive(Deserialize)]
struct EmbeddedText {
    option: String,
}

#[derive(Deserialize)]
struct VotedWordRow {
    option: EmbeddedText,
}

#[async_trait]
impl Backend for SupabaseBackend {
    async fn submit_vote(
        &self,
        scope: &Scope,
        option_id: OptionId,
        classification: Classification,
    ) -> Result<Vote, RemoteError> {
        if let Some(existing) = self.find_vote(scope, option_id).await? {
            debug!("Vote for option {option_id} already exists, keeping it");
            return Ok(existing);
        }

        let row = NewVote {
            user_id: &scope.user_id,
            option_id,
            poll_id: scope.poll_id,
            filter: classification,
            created_at: Utc::now(),
        };

        let inserted = fetch_json::<Vec<Vote>>(
            self.request(Method::POST, VOTES)
                .header("Prefer", "return=representation")
                .json(&[row]),
        )
        .await;

        match inserted {
            Ok(rows) => rows
                .into_iter()
                .next()
                .ok_or_else(|| RemoteError::Malformed("insert returned no row".to_string())),
            // Lost a race against another insert for the same key: hand back the winner.
            Err(RemoteError::Status { status: 409, .. }) => self
                .find_vote(scope, option_id)
                .await?
                .ok_or_else(|| RemoteError::NotFound(format!("vote for option {option_id}"))),
            Err(err) => Err(err),
        }
    }

    async fn update_vote(
        &self,
        scope: &Scope,
        option_id: OptionId,
        classification: Classification,
    ) -> Result<Vote, RemoteError> {
        let mut params = scope_params(scope);
        params.push(("option_id", eq(option_id)));

        let rows: Vec<Vote> = fetch_json(
            self.request(Method::PATCH, VOTES)
                .query(&params)
                .header("Prefer", "return=representation")
                .json(&json!({ "filter": classification })),
        )
        .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| RemoteError::NotFound(format!("vote for option {option_id}")))
    }

    async fn get_unvoted_options(
        &self,
        scope: &Scope,
        page: u32,
        page_size: u32,
        search: &str,
    ) -> Result<UnvotedPage, RemoteError> {
        let rows: Vec<UnvotedRow> = fetch_json(self.rpc(
            UNVOTED_RPC,
            json!({
                "p_user_id": scope.user_id,
                "p_poll_id": scope.poll_id,
                "p_search_query": search.trim(),
                "p_page": page.max(1),
                "p_page_size": page_size,
            }),
        ))
        .await?;

        // The procedure repeats the window total on every row.
        let total = rows
            .first()
            .and_then(|row| row.total.as_ref())
            .map(as_count)
            .unwrap_or(0);

        let words = rows
            .into_iter()
            .map(|row| Word {
                id: row.id,
                text: row.option,
                created_at: row.created_at,
                poll_id: Some(scope.poll_id),
            })
            .collect();

        Ok(UnvotedPage { words, total })
    }

    async fn get_vote_history(
        &self,
        scope: &Scope,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, RemoteError> {
        let mut params = scope_params(scope);
        params.push(("select", "*,option:options!inner(*)".to_string()));
        params.push(("order", "created_at.desc".to_string()));
        params.push(("offset", query.offset().to_string()));
        params.push(("limit", query.page_size.to_string()));

        if let Some(classification) = query.filter.classification() {
            params.push(("filter", eq(classification)));
        }
        if !query.search.trim().is_empty() {
            params.push(("option.option", format!("ilike.{}", ilike_pattern(&query.search))));
        }

        let (votes, total) =
            fetch_page::<Vec<VoteWithWord>>(self.request(Method::GET, VOTES).query(&params)).await?;

        Ok(HistoryPage { votes, total })
    }

    async fn get_option_counts(&self, scope: &Scope) -> Result<OptionCounts, RemoteError> {
        let (progress, easy, difficult, not_exist) = futures::try_join!(
            self.poll_progress(scope),
            self.classification_count(scope, Classification::Easy),
            self.classification_count(scope, Classification::Difficult),
            self.classification_count(scope, Classification::NotExist),
        )?;

        Ok(OptionCounts {
            voted: progress.voted,
            unvoted: progress.unvoted,
            total: progress.total,
            easy,
            difficult,
            not_exist,
        })
    }

    async fn get_poll_by_id(&self, poll_id: PollId) -> Result<Poll, RemoteError> {
        let params: Params = vec![("select", POLL_COLUMNS.to_string()), ("id", eq(poll_id))];

        let rows: Vec<Poll> = fetch_json(self.request(Method::GET, POLLS).query(&params)).await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| RemoteError::NotFound(format!("poll {poll_id}")))
    }

    async fn get_user_polls(&self, user_id: &str) -> Result<Vec<PollWithPermission>, RemoteError> {
        let params: Params = vec![
            ("select", "poll_id,can_vote,can_view".to_string()),
            ("user_id", eq(user_id)),
        ];
        let permissions: Vec<Permission> =
            fetch_json(self.request(Method::GET, PERMISSIONS).query(&params)).await?;

        if permissions.is_empty() {
            return Ok(Vec::new());
        }

        let params: Params = vec![
            ("select", POLL_COLUMNS.to_string()),
            ("id", in_list(permissions.iter().map(|p| p.poll_id))),
        ];
        let polls: Vec<Poll> = fetch_json(self.request(Method::GET, POLLS).query(&params)).await?;
        let polls_by_id: HashMap<PollId, Poll> =
            polls.into_iter().map(|poll| (poll.id, poll)).collect();

        let lookups = permissions.iter().filter_map(|permission| {
            let poll = polls_by_id.get(&permission.poll_id)?;
            Some(async move {
                let progress = self.poll_progress(&Scope::new(user_id, poll.id)).await;
                (permission, poll, progress)
            })
        });

        let mut result = Vec::new();
        for (permission, poll, progress) in join_all(lookups).await {
            match progress {
                Ok(progress) => result.push(PollWithPermission {
                    poll: poll.clone(),
                    can_vote: permission.can_vote,
                    can_view: permission.can_view,
                    progress,
                }),
                Err(e) => warn!("Skipping poll {}: stats unavailable: {e}", poll.id),
            }
        }

        Ok(result)
    }

    async fn count_options(&self, poll_id: PollId) -> Result<u64, RemoteError> {
        let params: Params = vec![("poll_id", eq(poll_id))];

        exact_count(self.request(Method::HEAD, OPTIONS).query(&params)).await
    }

    async fn options_window(
        &self,
        poll_id: PollId,
        offset: u64,
        len: u64,
    ) -> Result<Vec<Word>, RemoteError> {
        let params: Params = vec![
            ("select", "*".to_string()),
            ("poll_id", eq(poll_id)),
            ("order", "id.asc".to_string()),
            ("offset", offset.to_string()),
            ("limit", len.to_string()),
        ];

        fetch_json(self.request(Method::GET, OPTIONS).query(&params)).await
    }

    async fn voted_option_ids(
        &self,
        scope: &Scope,
        option_ids: &[OptionId],
    ) -> Result<Vec<OptionId>, RemoteError> {
        if option_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut params = scope_params(scope);
        params.push(("select", "option_id".to_string()));
        params.push(("option_id", in_list(option_ids)));

        let rows: Vec<OptionIdRow> =
            fetch_json(self.request(Method::GET, VOTES).query(&params)).await?;

        Ok(rows.into_iter().map(|row| row.option_id).collect())
    }

    async fn count_votes(&self, scope: &Scope) -> Result<u64, RemoteError> {
        exact_count(self.request(Method::HEAD, VOTES).query(&scope_params(scope))).await
    }

    async fn voted_words(
        &self,
        scope: &Scope,
        filters: &[Classification],
        page: u32,
        page_size: u32,
    ) -> Result<Vec<String>, RemoteError> {
        let offset = u64::from(page.max(1) - 1) * u64::from(page_size);

        let mut params = scope_params(scope);
        params.push(("select", "option:options!inner(option)".to_string()));
        params.push(("order", "id.asc".to_string()));
        params.push(("offset", offset.to_string()));
        params.push(("limit", page_size.to_string()));
        if !filters.is_empty() {
            params.push(("filter", in_list(filters)));
        }

        let rows: Vec<VotedWordRow> =
            fetch_json(self.request(Method::GET, VOTES).query(&params)).await?;

        Ok(rows.into_iter().map(|row| row.option.option).collect())
    }
}

fn scope_params(scope: &Scope) -> Params {
    vec![("user_id", eq(&scope.user_id)), ("poll_id", eq(scope.poll_id))]
}

fn eq(value: impl Display) -> String {
    format!("eq.{value}")
}

fn in_list<I>(values: I) -> String
where
    I: IntoIterator,
    I::Item: Display,
{
    let joined: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
    format!("in.({})", joined.join(","))
}

/// Builds an `ilike` pattern matching `search` anywhere in the column.
pub fn ilike_pattern(search: &str) -> String {
    let mut pattern = String::from("*");

    for c in search.trim().chars() {
        match c {
            // reserved by the filter grammar
            '*' | ',' | '(' | ')' | '"' => continue,
            '\\' | '%' | '_' => {
                pattern.push('\\');
                pattern.push(c);
            }
            _ => pattern.push(c),
        }
    }

    pattern.push('*');
    pattern
}

/// Total from a `Content-Range` header value such as `0-9/42`.
pub fn parse_content_range(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

fn total_from(headers: &HeaderMap) -> Result<u64, RemoteError> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_range)
        .ok_or_else(|| RemoteError::Malformed("missing exact count".to_string()))
}

fn as_count(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

async fn check(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(RemoteError::Unauthorized);
    }

    let message = response.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn fetch_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, RemoteError> {
    let response = check(request.send().await?).await?;
    let bytes = response.bytes().await?;

    Ok(serde_json::from_slice(&bytes)?)
}

async fn fetch_page<T>(request: RequestBuilder) -> Result<(T, u64), RemoteError>
where
    T: DeserializeOwned + Default,
{
    let response = request.header("Prefer", "count=exact").send().await?;

    // A window past the last row is answered with 416 and the real total.
    if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
        return Ok((T::default(), total_from(response.headers())?));
    }

    let response = check(response).await?;
    let total = total_from(response.headers())?;
    let bytes = response.bytes().await?;

    Ok((serde_json::from_slice(&bytes)?, total))
}

async fn exact_count(request: RequestBuilder) -> Result<u64, RemoteError> {
    let response = check(request.header("Prefer", "count=exact").send().await?).await?;

    total_from(response.headers())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use axum::{
        Json, Router,
        http::{HeaderMap, StatusCode, header::CONTENT_RANGE as RANGE},
        routing::{get, head, patch},
    };
    use tokio::net::TcpListener;

    use super::*;
    use crate::models::DifficultyFilter;

    async fn serve(router: Router) -> SupabaseBackend {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        SupabaseBackend::new(Client::new(), &format!("http://{address}"), "anon")
    }

    fn vote_row(id: i64, option_id: OptionId, filter: &str) -> Value {
        json!({
            "id": id,
            "user_id": "user-1",
            "option_id": option_id,
            "poll_id": 1,
            "filter": filter,
            "created_at": "2024-05-01T10:00:00Z",
        })
    }

    fn scope() -> Scope {
        Scope::new("user-1", 1)
    }

    #[tokio::test]
    async fn test_submit_keeps_existing_vote() {
        let inserts = Arc::new(AtomicUsize::new(0));
        let router = Router::new().route(
            "/rest/v1/votes",
            get(|| async { Json(json!([vote_row(7, 3, "easy")])) }).post({
                let inserts = inserts.clone();
                move || {
                    inserts.fetch_add(1, Ordering::SeqCst);
                    async { StatusCode::INTERNAL_SERVER_ERROR }
                }
            }),
        );
        let backend = serve(router).await;

        let vote = backend
            .submit_vote(&scope(), 3, Classification::Difficult)
            .await
            .unwrap();

        assert_eq!(vote.id, 7);
        assert_eq!(vote.filter, Classification::Easy);
        assert_eq!(inserts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_conflict_returns_winner() {
        let lookups = Arc::new(AtomicUsize::new(0));
        let router = Router::new().route(
            "/rest/v1/votes",
            get({
                let lookups = lookups.clone();
                move || {
                    // nothing on the first lookup, the concurrent insert is visible afterwards
                    let rows = match lookups.fetch_add(1, Ordering::SeqCst) {
                        0 => json!([]),
                        _ => json!([vote_row(9, 3, "not_exist")]),
                    };
                    async move { Json(rows) }
                }
            })
            .post(|| async { (StatusCode::CONFLICT, "duplicate key value") }),
        );
        let backend = serve(router).await;

        let vote = backend
            .submit_vote(&scope(), 3, Classification::Easy)
            .await
            .unwrap();

        assert_eq!(vote.id, 9);
        assert_eq!(vote.filter, Classification::NotExist);
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_submit_inserts_when_missing() {
        let router = Router::new().route(
            "/rest/v1/votes",
            get(|| async { Json(json!([])) }).post(|| async {
                (StatusCode::CREATED, Json(json!([vote_row(1, 4, "difficult")])))
            }),
        );
        let backend = serve(router).await;

        let vote = backend
            .submit_vote(&scope(), 4, Classification::Difficult)
            .await
            .unwrap();

        assert_eq!(vote.id, 1);
        assert_eq!(vote.option_id, 4);
    }

    #[tokio::test]
    async fn test_update_missing_vote_is_not_found() {
        let router = Router::new().route("/rest/v1/votes", patch(|| async { Json(json!([])) }));
        let backend = serve(router).await;

        let result = backend.update_vote(&scope(), 3, Classification::Easy).await;

        assert!(matches!(result, Err(ref e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_history_past_last_page() {
        let router = Router::new().route(
            "/rest/v1/votes",
            get(|| async { (StatusCode::RANGE_NOT_SATISFIABLE, [(RANGE, "*/42")], "") }),
        );
        let backend = serve(router).await;
        let query = HistoryQuery {
            page: 9,
            page_size: 10,
            search: String::new(),
            filter: DifficultyFilter::All,
        };

        let page = backend.get_vote_history(&scope(), &query).await.unwrap();

        assert!(page.votes.is_empty());
        assert_eq!(page.total, 42);
    }

    #[tokio::test]
    async fn test_exact_count_from_content_range() {
        let router = Router::new().route(
            "/rest/v1/votes",
            head(|headers: HeaderMap| async move {
                let exact = headers
                    .get("prefer")
                    .is_some_and(|value| value.as_bytes() == b"count=exact");
                let range = if exact { "*/17" } else { "*/0" };
                (StatusCode::OK, [(RANGE, range)])
            }),
        );
        let backend = serve(router).await;

        assert_eq!(backend.count_votes(&scope()).await.unwrap(), 17);
    }

    #[tokio::test]
    async fn test_missing_content_range_is_malformed() {
        let router = Router::new().route("/rest/v1/votes", head(|| async { StatusCode::OK }));
        let backend = serve(router).await;

        let result = backend.count_votes(&scope()).await;

        assert!(matches!(result, Err(RemoteError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_unauthorized_status() {
        let router =
            Router::new().route("/rest/v1/votes", patch(|| async { StatusCode::UNAUTHORIZED }));
        let backend = serve(router).await;

        let result = backend.update_vote(&scope(), 3, Classification::Easy).await;

        assert!(matches!(result, Err(RemoteError::Unauthorized)));
    }

    #[test]
    fn test_content_range() {
        assert_eq!(parse_content_range("0-9/42"), Some(42));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-9/*"), None);
        assert_eq!(parse_content_range("garbage"), None);
    }

    #[test]
    fn test_ilike_pattern() {
        assert_eq!(ilike_pattern("casa"), "*casa*");
        assert_eq!(ilike_pattern("  a b "), "*a b*");
        assert_eq!(ilike_pattern("50%_off"), "*50\\%\\_off*");
        assert_eq!(ilike_pattern("a*(b),c"), "*abc*");
        assert_eq!(ilike_pattern(""), "**");
    }

    #[test]
    fn test_filters() {
        assert_eq!(eq(3), "eq.3");
        assert_eq!(in_list([1, 2, 3]), "in.(1,2,3)");
        assert_eq!(
            in_list([Classification::Difficult, Classification::NotExist]),
            "in.(difficult,not_exist)"
        );
    }

    #[test]
    fn test_as_count() {
        assert_eq!(as_count(&json!(7)), 7);
        assert_eq!(as_count(&json!("12")), 12);
        assert_eq!(as_count(&Value::Null), 0);
    }

    #[test]
    fn test_rest_url() {
        let backend = SupabaseBackend::new(Client::new(), "https://abc.supabase.co/", "anon");
        assert_eq!(backend.rest_url, "https://abc.supabase.co/rest/v1");
    }
}
