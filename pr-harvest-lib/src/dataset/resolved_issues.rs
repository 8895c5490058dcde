//! Finding the issues a pull request closes.

use super::pull_request::PullRequest;
use crate::HashSet;
use crate::collect::{ApiUrls, CommitEntry, Paginator, ResilientFetcher};
use regex::Regex;
use std::sync::LazyLock;

const LOG_TARGET: &str = "    issues";

const COMMITS_PER_PAGE: u32 = 100;

/// Words that close an issue when followed by `#<number>`.
const CLOSING_KEYWORDS: [&str; 9] = ["close", "closes", "closed", "fix", "fixes", "fixed", "resolve", "resolves", "resolved"];

static ISSUE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\w+)\s+#(\d+)").expect("valid regex"));
static HTML_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));

/// Issue numbers closed by `text`, deduplicated and in ascending order.
///
/// HTML comments are ignored, so template boilerplate such as
/// `<!-- write "Fixes #123" here -->` does not count.
#[must_use]
pub fn closing_references(text: &str) -> Vec<String> {
    let text = HTML_COMMENT.replace_all(text, "");

    let found: HashSet<String> = ISSUE_REFERENCE
        .captures_iter(&text)
        .filter(|caps| CLOSING_KEYWORDS.contains(&caps[1].to_lowercase().as_str()))
        .map(|caps| caps[2].to_string())
        .collect();

    let mut numbers: Vec<String> = found.into_iter().collect();
    numbers.sort_by_key(|n| (n.parse::<u64>().unwrap_or(u64::MAX), n.clone()));
    numbers
}

/// The text searched for closing references: title, body, and every commit message.
#[must_use]
pub fn reference_text<'a>(title: Option<&str>, body: Option<&str>, commit_messages: impl IntoIterator<Item = &'a str>) -> String {
    let messages: Vec<&str> = commit_messages.into_iter().collect();
    format!("{}\n{}\n{}", title.unwrap_or_default(), body.unwrap_or_default(), messages.join("\n"))
}

/// Resolve the issues closed by `pull`, reading all of its commit messages.
///
/// If any page of the commit list cannot be fetched the result is empty, since a
/// partial commit list could silently drop references.
pub async fn resolve_issues(fetcher: &mut ResilientFetcher, api: &ApiUrls, pull: &PullRequest) -> Vec<String> {
    let repo = pull.repo();
    let mut commits = Paginator::<CommitEntry>::new(fetcher, api, api.pull_commits(repo, pull.number), COMMITS_PER_PAGE);

    let mut messages = Vec::new();
    while let Some(page) = commits.next_page().await {
        messages.extend(page.into_iter().map(|entry| entry.commit.message));
    }

    if commits.skipped_pages() > 0 {
        log::error!(target: LOG_TARGET, "Could not read the commits of {repo}#{}", pull.number);
        return Vec::new();
    }

    let text = reference_text(pull.title.as_deref(), pull.body.as_deref(), messages.iter().map(String::as_str));
    let issues = closing_references(&text);
    log::debug!(target: LOG_TARGET, "{repo}#{} resolves {issues:?}", pull.number);
    issues
}
