use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A pull request as listed by the hosting API, plus the issues it resolves.
///
/// Fields the harvester does not look at are kept in `extra` so a listing can be
/// written back out without losing anything.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PullRequest {
    pub number: u64,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,

    pub base: BaseRef,

    /// Issue numbers this pull request closes, as strings.
    #[serde(default, deserialize_with = "issue_numbers")]
    pub resolved_issues: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BaseRef {
    #[serde(default)]
    pub sha: String,

    #[serde(default)]
    pub repo: BaseRepo,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BaseRepo {
    #[serde(default)]
    pub full_name: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PullRequest {
    /// Full `owner/name` of the repository the pull request targets.
    #[must_use]
    pub fn repo(&self) -> &str {
        &self.base.repo.full_name
    }

    /// `owner__name-number`, the key used across outputs and ledgers.
    #[must_use]
    pub fn instance_id(&self) -> String {
        format!("{}-{}", self.repo(), self.number).replace('/', "__")
    }

    #[must_use]
    pub const fn is_merged(&self) -> bool {
        self.merged_at.is_some()
    }

    /// Merged, linked to at least one issue, and dated.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_merged() && !self.resolved_issues.is_empty() && self.created_at.is_some() && !self.repo().is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IssueRef {
    Number(u64),
    Text(String),
}

fn issue_numbers<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let refs = Option::<Vec<IssueRef>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(refs
        .into_iter()
        .map(|r| match r {
            IssueRef::Number(n) => n.to_string(),
            IssueRef::Text(s) => s,
        })
        .collect())
}
