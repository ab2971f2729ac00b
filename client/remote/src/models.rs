//! # Models
//!
//! Rows and payloads exchanged with the hosted backend.
//!
//! ## Tables
//! - `options`: candidate words, bulk loaded out-of-band, immutable (`id`, `option`, `created_at`, `poll_id`)
//! - `votes`: one row per (user, option, poll), classification stored in `filter`
//! - `polls`: named collections of options with an external dictionary url
//! - `permissions`: per-user `can_view`/`can_vote` rows for each poll
//!
//! ## Notes
//! - The single-poll deployment is poll `1`, see [`DEFAULT_POLL_ID`].
//! - Counts are derived by the backend and cached by the client, never stored here.
use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub type OptionId = i64;
pub type PollId = i64;

pub const DEFAULT_POLL_ID: PollId = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Easy,
    Difficult,
    NotExist,
}

impl Classification {
    pub const ALL: [Classification; 3] = [
        Classification::Easy,
        Classification::Difficult,
        Classification::NotExist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Easy => "easy",
            Classification::Difficult => "difficult",
            Classification::NotExist => "not_exist",
        }
    }

    /// Spanish label shown next to a vote.
    pub fn label(&self) -> &'static str {
        match self {
            Classification::Easy => "Fácil",
            Classification::Difficult => "Difícil",
            Classification::NotExist => "No existe",
        }
    }

    pub fn short(&self) -> char {
        match self {
            Classification::Easy => 'F',
            Classification::Difficult => 'D',
            Classification::NotExist => 'N',
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownValue(pub String);

impl fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value `{}`", self.0)
    }
}

impl std::error::Error for UnknownValue {}

impl FromStr for Classification {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Classification::Easy),
            "difficult" => Ok(Classification::Difficult),
            "not_exist" => Ok(Classification::NotExist),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DifficultyFilter {
    #[default]
    All,
    Easy,
    Difficult,
    NotExist,
}

impl DifficultyFilter {
    pub fn classification(&self) -> Option<Classification> {
        match self {
            DifficultyFilter::All => None,
            DifficultyFilter::Easy => Some(Classification::Easy),
            DifficultyFilter::Difficult => Some(Classification::Difficult),
            DifficultyFilter::NotExist => Some(Classification::NotExist),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self.classification() {
            Some(classification) => classification.as_str(),
            None => "all",
        }
    }
}

impl From<Classification> for DifficultyFilter {
    fn from(classification: Classification) -> Self {
        match classification {
            Classification::Easy => DifficultyFilter::Easy,
            Classification::Difficult => DifficultyFilter::Difficult,
            Classification::NotExist => DifficultyFilter::NotExist,
        }
    }
}

impl FromStr for DifficultyFilter {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(DifficultyFilter::All);
        }
        s.parse::<Classification>().map(DifficultyFilter::from)
    }
}

/// A candidate term. Stored in the `options` table, the text column is named `option`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub id: OptionId,
    #[serde(rename = "option")]
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub poll_id: Option<PollId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub id: i64,
    pub user_id: String,
    pub option_id: OptionId,
    #[serde(default)]
    pub poll_id: Option<PollId>,
    pub filter: Classification,
    pub created_at: DateTime<Utc>,
}

/// A vote row with its word embedded. The word can be missing if the option was removed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoteWithWord {
    #[serde(flatten)]
    pub vote: Vote,
    #[serde(rename = "option", default)]
    pub word: Option<Word>,
}

/// Who is voting, and on which poll.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Scope {
    pub user_id: String,
    pub poll_id: PollId,
}

impl Scope {
    pub fn new(user_id: impl Into<String>, poll_id: PollId) -> Self {
        Self {
            user_id: user_id.into(),
            poll_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryQuery {
    pub page: u32,
    pub page_size: u32,
    pub search: String,
    pub filter: DifficultyFilter,
}

impl HistoryQuery {
    /// Zero-based row offset of the page. Pages are one-based.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.page_size)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnvotedPage {
    pub words: Vec<Word>,
    pub total: u64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistoryPage {
    pub votes: Vec<VoteWithWord>,
    pub total: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OptionCounts {
    pub voted: u64,
    pub unvoted: u64,
    pub total: u64,
    pub easy: u64,
    pub difficult: u64,
    pub not_exist: u64,
}

impl OptionCounts {
    pub fn count_for(&self, classification: Classification) -> u64 {
        match classification {
            Classification::Easy => self.easy,
            Classification::Difficult => self.difficult,
            Classification::NotExist => self.not_exist,
        }
    }

    pub fn progress(&self) -> Progress {
        Progress {
            voted: self.voted,
            unvoted: self.unvoted,
            total: self.total,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub voted: u64,
    pub unvoted: u64,
    pub total: u64,
}

impl Progress {
    pub fn new(voted: u64, total: u64) -> Self {
        Self {
            voted,
            unvoted: total.saturating_sub(voted),
            total,
        }
    }

    /// Whole percent of voted words, floored.
    pub fn percent(&self) -> u64 {
        if self.total == 0 {
            return 0;
        }
        self.voted * 100 / self.total
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    #[serde(rename = "name")]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Permission {
    pub poll_id: PollId,
    pub can_vote: bool,
    pub can_view: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PollWithPermission {
    pub poll: Poll,
    pub can_vote: bool,
    pub can_view: bool,
    pub progress: Progress,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// First name if the identity provider knows it, email otherwise.
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .and_then(|name| name.split_whitespace().next())
            .or(self.email.as_deref())
            .unwrap_or(self.id.as_str())
    }
}

#[derive(Deserialize)]
struct RawUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    user_metadata: Option<RawUserMetadata>,
}

#[derive(Deserialize)]
struct RawUserMetadata {
    #[serde(default)]
    full_name: Option<String>,
}

// Accepts both the identity provider shape (name under `user_metadata`) and our own flat shape.
impl<'de> Deserialize<'de> for User {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawUser::deserialize(deserializer)?;
        Ok(User {
            id: raw.id,
            email: raw.email,
            role: raw.role,
            created_at: raw.created_at,
            full_name: raw
                .full_name
                .or_else(|| raw.user_metadata.and_then(|meta| meta.full_name)),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}
