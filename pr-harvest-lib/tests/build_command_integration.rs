//! End-to-end tests of the `build` command against a mock hosting API.

use pr_harvest_lib::Host;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test host that captures output to in-memory buffers.
#[derive(Default)]
struct TestHost {
    output_buf: Vec<u8>,
    error_buf: Vec<u8>,
}

impl TestHost {
    fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output_buf).into_owned()
    }
}

impl Host for TestHost {
    fn output(&mut self) -> impl std::io::Write {
        &mut self.output_buf
    }

    fn error(&mut self) -> impl std::io::Write {
        &mut self.error_buf
    }
}

const DIFF: &str = "\
diff --git a/src/widget.py b/src/widget.py
index 1111111..2222222 100644
--- a/src/widget.py
+++ b/src/widget.py
@@ -1 +1 @@
-return None
+return widget
diff --git a/tests/test_widget.py b/tests/test_widget.py
index 3333333..4444444 100644
--- a/tests/test_widget.py
+++ b/tests/test_widget.py
@@ -1 +1,2 @@
+def test_widget():
+    assert make_widget()
";

fn pull_line(created_at: &str) -> String {
    format!(
        r#"{{"number": 5, "title": "Fix widget", "body": "Fixes #3", "created_at": "{created_at}", "merged_at": "2024-01-12T00:00:00Z", "base": {{"sha": "abc123", "repo": {{"full_name": "o/r"}}}}, "resolved_issues": ["3"]}}"#
    )
}

async fn mount_user(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"login": "tester"}"#))
        .mount(server)
        .await;
}

async fn mount_pull_5(server: &MockServer) {
    mount_user(server).await;

    Mock::given(method("GET"))
        .and(path("/repos/o/r/pulls/5"))
        .and(header("accept", "application/vnd.github.diff"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DIFF))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/o/r/pulls/5/commits"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"[{"commit": {"message": "fix widget", "author": {"date": "2024-01-10T00:00:00Z"}}}]"#),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/o/r/issues/3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"title": "Widget is None", "body": "make_widget returns None"}"#))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/o/r/issues/3/comments"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"[{"body": "Same here", "updated_at": "2024-01-02T00:00:00Z"}, {"body": "Fixed now", "updated_at": "2024-01-12T00:00:00Z"}]"#,
        ))
        .mount(server)
        .await;
}

fn write_listing(dir: &Path, lines: &[String]) -> PathBuf {
    let input = dir.join("prs.jsonl");
    fs::write(&input, lines.join("\n") + "\n").expect("write listing");
    input
}

async fn build(server: &MockServer, input: &Path, output: &Path) -> (TestHost, pr_harvest_lib::Result<()>) {
    let mut host = TestHost::default();
    let uri = server.uri();
    let result = pr_harvest_lib::run(
        &mut host,
        [
            "pr-harvest",
            "build",
            input.to_str().expect("utf-8 path"),
            output.to_str().expect("utf-8 path"),
            "--api-url",
            uri.as_str(),
            "--token",
            "test-token",
            "--no-proxy",
            "--color",
            "never",
        ],
    )
    .await;
    (host, result)
}

fn read_lines(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid JSON line"))
        .collect()
}

fn superset(output: &Path) -> PathBuf {
    PathBuf::from(format!("{}.all", output.display()))
}

#[tokio::test]
async fn test_harvests_one_instance_into_both_outputs() {
    let server = MockServer::start().await;
    mount_pull_5(&server).await;

    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_listing(dir.path(), &[pull_line("2024-01-01T00:00:00Z")]);
    let output = dir.path().join("out").join("tasks.jsonl");

    let (host, result) = build(&server, &input, &output).await;
    assert!(result.is_ok(), "build failed: {result:?}");
    assert!(host.output_str().contains("1 emitted (1 with tests)"));

    let filtered = read_lines(&output);
    let all = read_lines(&superset(&output));
    assert_eq!(filtered.len(), 1);
    assert_eq!(all, filtered);

    let instance = &filtered[0];
    assert_eq!(instance["instance_id"], "o__r-5");
    assert_eq!(instance["repo"], "o/r");
    assert_eq!(instance["pull_number"], 5);
    assert_eq!(instance["base_commit"], "abc123");
    assert_eq!(instance["issue_numbers"], serde_json::json!(["3"]));
    assert_eq!(instance["problem_statement"], "Widget is None\nmake_widget returns None\n");
    assert_eq!(instance["hints_text"], "Same here");

    let patch = instance["patch"].as_str().expect("patch");
    assert!(patch.starts_with("diff --git a/src/widget.py"));
    assert!(!patch.contains("index 1111111"));
    assert!(!patch.contains("test_widget"));

    let test_patch = instance["test_patch"].as_str().expect("test patch");
    assert!(test_patch.contains("+def test_widget():"));

    let ledger = fs::read_to_string(dir.path().join("out").join("successful_requests.txt")).expect("ledger");
    assert_eq!(ledger, "o__r-5\n");
}

#[tokio::test]
async fn test_rerun_makes_no_requests_for_known_pull_requests() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_listing(dir.path(), &[pull_line("2024-01-01T00:00:00Z")]);
    let output = dir.path().join("tasks.jsonl");

    let first = MockServer::start().await;
    mount_pull_5(&first).await;
    let (_, result) = build(&first, &input, &output).await;
    assert!(result.is_ok(), "first build failed: {result:?}");

    let second = MockServer::start().await;
    mount_user(&second).await;
    let (host, result) = build(&second, &input, &output).await;
    assert!(result.is_ok(), "second build failed: {result:?}");
    assert!(host.output_str().contains("1 skipped"));

    let requests = second.received_requests().await.expect("request recording");
    assert!(requests.iter().all(|r| r.url.path() == "/user"));
    assert_eq!(read_lines(&output).len(), 1);
    assert_eq!(read_lines(&superset(&output)).len(), 1);
}

#[tokio::test]
async fn test_pull_requests_after_the_cutoff_are_not_emitted() {
    let server = MockServer::start().await;
    mount_pull_5(&server).await;

    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_listing(dir.path(), &[pull_line("2025-05-01T00:00:00Z")]);
    let output = dir.path().join("tasks.jsonl");

    let (host, result) = build(&server, &input, &output).await;
    assert!(result.is_ok(), "build failed: {result:?}");
    assert!(host.output_str().contains("0 emitted"));

    assert!(read_lines(&superset(&output)).is_empty());
    assert_eq!(fs::read_to_string(dir.path().join("successful_requests.txt")).expect("ledger"), "o__r-5\n");

    let requests = server.received_requests().await.expect("request recording");
    assert!(!requests.iter().any(|r| r.url.path().starts_with("/repos/o/r/issues")));
}

#[tokio::test]
async fn test_missing_listing_is_an_error() {
    let server = MockServer::start().await;
    mount_user(&server).await;

    let dir = tempfile::tempdir().expect("temp dir");
    let (_, result) = build(&server, &dir.path().join("absent.jsonl"), &dir.path().join("tasks.jsonl")).await;
    assert!(result.is_err());
}
