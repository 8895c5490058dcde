//! Problem statements and hints from the issues a pull request resolves.

use super::pull_request::PullRequest;
use crate::collect::{ApiUrls, Comment, CommitEntry, Issue, Paginator, ResilientFetcher};
use chrono::{DateTime, Utc};

const LOG_TARGET: &str = "   problem";

const COMMENTS_PER_PAGE: u32 = 100;

/// Separator placed between hint comments.
pub const HINT_SEPARATOR: &str = "\n---\n";

/// The natural-language side of an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProblemStatement {
    /// `"{title}\n{body}\n"` for every resolved issue that could be read.
    pub text: String,

    /// Issue comments last updated before work on the fix started.
    pub hints: String,
}

/// Gather the problem statement and hints for `pull`.
///
/// Issues that cannot be read are skipped along with their comments. The pull
/// request's first commit is looked up once; comments count as hints only while their
/// `updated_at` precedes that commit's author date, and the scan of an issue's comments
/// stops at the first one that does not.
pub async fn problem_statement(fetcher: &mut ResilientFetcher, api: &ApiUrls, pull: &PullRequest) -> ProblemStatement {
    let repo = pull.repo();
    let mut text = String::new();
    let mut hints = Vec::new();
    let mut first_commit: Option<Option<DateTime<Utc>>> = None;

    for issue_number in &pull.resolved_issues {
        let Some(issue) = fetcher.fetch_json::<Issue>(&api.issue(repo, issue_number)).await else {
            log::debug!(target: LOG_TARGET, "Skipping unreadable issue {repo}#{issue_number}");
            continue;
        };

        text.push_str(issue.title.as_deref().unwrap_or_default());
        text.push('\n');
        text.push_str(issue.body.as_deref().unwrap_or_default());
        text.push('\n');

        let started_at = match first_commit {
            Some(started_at) => started_at,
            None => {
                let started_at = first_commit_date(fetcher, api, pull).await;
                first_commit = Some(started_at);
                started_at
            }
        };

        let Some(started_at) = started_at else {
            continue;
        };

        let mut comments = Paginator::<Comment>::new(fetcher, api, api.issue_comments(repo, issue_number), COMMENTS_PER_PAGE);
        'pages: while let Some(page) = comments.next_page().await {
            for comment in page {
                if comment.updated_at >= started_at {
                    break 'pages;
                }
                hints.push(comment.body.unwrap_or_default());
            }
        }
    }

    ProblemStatement {
        text,
        hints: hints.join(HINT_SEPARATOR),
    }
}

async fn first_commit_date(fetcher: &mut ResilientFetcher, api: &ApiUrls, pull: &PullRequest) -> Option<DateTime<Utc>> {
    let commits = fetcher.fetch_json::<Vec<CommitEntry>>(&api.pull_commits(pull.repo(), pull.number)).await?;
    let date = commits.into_iter().next()?.commit.author?.date;
    Some(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::scripted::{ScriptedTransport, ok, status};
    use crate::collect::{IdentityRotator, RetryPolicy, Transport};
    use std::sync::Arc;

    const COMMITS: &str = r#"[{"commit": {"message": "fix", "author": {"date": "2024-01-10T00:00:00Z"}}}]"#;

    fn pull(issues: &str) -> PullRequest {
        serde_json::from_str(&format!(
            r#"{{"number": 5, "base": {{"repo": {{"full_name": "o/r"}}}}, "resolved_issues": {issues}}}"#
        ))
        .unwrap()
    }

    async fn gather(transport: ScriptedTransport, pull: &PullRequest) -> (Arc<ScriptedTransport>, ProblemStatement) {
        let transport = Arc::new(transport);
        let mut fetcher = ResilientFetcher::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            IdentityRotator::disabled("o/r"),
            RetryPolicy::no_delay(),
        );
        let statement = problem_statement(&mut fetcher, &ApiUrls::new("http://api"), pull).await;
        (transport, statement)
    }

    #[tokio::test]
    async fn collects_issue_text_and_early_comments() {
        let transport = ScriptedTransport::new()
            .route("/issues/3", [ok(r#"{"title": "Crash", "body": "It crashes"}"#)])
            .route("/pulls/5/commits", [ok(COMMITS)])
            .route(
                "/issues/3/comments?per_page=100&page=1",
                [ok(r#"[
                    {"body": "same here", "updated_at": "2024-01-01T00:00:00Z"},
                    {"body": "me too", "updated_at": "2024-01-02T00:00:00Z"},
                    {"body": "fixed by the PR", "updated_at": "2024-01-11T00:00:00Z"},
                    {"body": "old but after a newer one", "updated_at": "2024-01-03T00:00:00Z"}
                ]"#)],
            );

        let (transport, statement) = gather(transport, &pull(r#"["3"]"#)).await;

        assert_eq!(statement.text, "Crash\nIt crashes\n");
        assert_eq!(statement.hints, "same here\n---\nme too");
        assert_eq!(transport.count("&page=2"), 0);
    }

    #[tokio::test]
    async fn missing_issue_is_skipped() {
        let transport = ScriptedTransport::new()
            .route("/issues/3", [status(404)])
            .route("/issues/4", [ok(r#"{"title": "Second", "body": null}"#)])
            .route("/pulls/5/commits", [ok(COMMITS)])
            .route("/issues/4/comments", [ok("[]")]);

        let (transport, statement) = gather(transport, &pull(r#"["3", "4"]"#)).await;

        assert_eq!(statement.text, "Second\n\n");
        assert!(statement.hints.is_empty());
        assert_eq!(transport.count("/issues/3/comments"), 0);
    }

    #[tokio::test]
    async fn commits_are_fetched_once() {
        let transport = ScriptedTransport::new()
            .route("/issues/", [ok(r#"{"title": "T", "body": "B"}"#)])
            .route("/pulls/5/commits", [ok(COMMITS)])
            .route("/comments", [ok(r#"[{"body": "hint", "updated_at": "2024-01-01T00:00:00Z"}]"#), ok("[]")]);

        let (transport, statement) = gather(transport, &pull("[1, 2]")).await;

        assert_eq!(statement.text, "T\nB\nT\nB\n");
        assert_eq!(transport.count("/pulls/5/commits"), 1);
        assert_eq!(statement.hints, "hint");
    }

    #[tokio::test]
    async fn no_commits_means_no_hints() {
        let transport = ScriptedTransport::new()
            .route("/issues/3", [ok(r#"{"title": "T", "body": "B"}"#)])
            .route("/pulls/5/commits", [ok("[]")])
            .route("/issues/3/comments", [ok(r#"[{"body": "hint", "updated_at": "2024-01-01T00:00:00Z"}]"#)]);

        let (transport, statement) = gather(transport, &pull(r#"["3"]"#)).await;

        assert_eq!(statement.text, "T\nB\n");
        assert!(statement.hints.is_empty());
        assert_eq!(transport.count("/comments"), 0);
    }
}
