use super::pull_request::PullRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One dataset record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Instance {
    pub repo: String,
    pub pull_number: u64,
    pub instance_id: String,
    pub issue_numbers: Vec<String>,
    pub base_commit: String,
    pub patch: String,
    pub test_patch: String,
    pub problem_statement: String,
    pub hints_text: String,
    pub created_at: DateTime<Utc>,
}

impl Instance {
    /// Assemble the record for `pull` from its harvested parts.
    #[must_use]
    pub fn new(pull: &PullRequest, created_at: DateTime<Utc>, patch: String, test_patch: String, problem_statement: String, hints_text: String) -> Self {
        Self {
            repo: pull.repo().to_string(),
            pull_number: pull.number,
            instance_id: pull.instance_id(),
            issue_numbers: pull.resolved_issues.clone(),
            base_commit: pull.base.sha.clone(),
            patch,
            test_patch,
            problem_statement,
            hints_text,
            created_at,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.patch.is_empty() && !self.problem_statement.is_empty()
    }

    #[must_use]
    pub fn has_tests(&self) -> bool {
        !self.test_patch.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(patch: &str, test_patch: &str, problem: &str) -> Instance {
        let pull: PullRequest = serde_json::from_str(
            r#"{"number": 5, "created_at": "2024-01-01T00:00:00Z", "merged_at": "2024-01-02T00:00:00Z",
                "base": {"sha": "abc", "repo": {"full_name": "o/r"}}, "resolved_issues": ["3"]}"#,
        )
        .unwrap();
        let created_at = pull.created_at.unwrap();
        Instance::new(&pull, created_at, patch.into(), test_patch.into(), problem.into(), String::new())
    }

    #[test]
    fn carries_pull_request_identity() {
        let i = instance("p", "t", "s");
        assert_eq!(i.instance_id, "o__r-5");
        assert_eq!(i.repo, "o/r");
        assert_eq!(i.base_commit, "abc");
        assert_eq!(i.issue_numbers, vec!["3"]);
    }

    #[test]
    fn validity_needs_patch_and_problem() {
        assert!(instance("p", "", "s").is_valid());
        assert!(!instance("", "t", "s").is_valid());
        assert!(!instance("p", "t", "").is_valid());
    }

    #[test]
    fn blank_test_patch_is_not_tests() {
        assert!(instance("p", "diff\n", "s").has_tests());
        assert!(!instance("p", " \n\t", "s").has_tests());
        assert!(!instance("p", "", "s").has_tests());
    }

    #[test]
    fn serializes_with_record_field_names() {
        let value = serde_json::to_value(instance("p", "t", "s")).unwrap();
        assert_eq!(value["instance_id"], "o__r-5");
        assert_eq!(value["pull_number"], 5);
        assert_eq!(value["created_at"], "2024-01-01T00:00:00Z");
    }
}
