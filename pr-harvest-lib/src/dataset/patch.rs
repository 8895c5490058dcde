//! Splitting a unified diff into code and test patches.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Path tokens that mark a file as test code.
const TEST_WORDS: [&str; 3] = ["test", "tests", "testing"];

/// Header that opens each file section of a unified diff.
const FILE_HEADER: &str = "diff --git a/";

/// Language profile used to decide which non-test files belong to the code patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Only `.py` files
    #[default]
    Python,

    /// JavaScript and TypeScript sources
    #[value(name = "javascript", alias = "js")]
    #[serde(alias = "js")]
    JavaScript,

    /// Java sources; `*Test.java` and friends count as tests
    Java,

    /// Every file
    Any,
}

/// Extra file suffixes accepted into the code patch for repositories whose name contains `project`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectOverride {
    pub project: String,
    pub language: Language,
    pub accept_suffixes: Vec<String>,
}

/// The two streams a diff is split into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedPatch {
    pub code_patch: String,
    pub test_patch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Dropped,
    Code,
    Test,
}

/// Classifies diff file sections for one repository.
#[derive(Debug, Clone)]
pub struct PatchClassifier {
    language: Language,
    extra_suffixes: Vec<String>,
}

impl PatchClassifier {
    /// A classifier for `repo` (`owner/name`), picking up the overrides whose project
    /// occurs in the repository name. The owner is not considered.
    #[must_use]
    pub fn for_repository(language: Language, repo: &str, overrides: &[ProjectOverride]) -> Self {
        let name = repo.rsplit('/').next().unwrap_or(repo);
        let extra_suffixes = overrides
            .iter()
            .filter(|o| o.language == language && name.contains(o.project.as_str()))
            .flat_map(|o| o.accept_suffixes.iter().cloned())
            .collect();

        Self { language, extra_suffixes }
    }

    #[must_use]
    pub fn classify(&self, diff: &str) -> ClassifiedPatch {
        let diff = diff.strip_suffix('\n').unwrap_or(diff);
        let mut code = Vec::new();
        let mut test = Vec::new();
        let mut stream = Stream::Dropped;

        for line in diff.split('\n') {
            if line.starts_with("index ") {
                continue;
            }

            if line.starts_with(FILE_HEADER) {
                stream = self.stream_for_header(line);
            }

            match stream {
                Stream::Code => code.push(line),
                Stream::Test => test.push(line),
                Stream::Dropped => {}
            }
        }

        ClassifiedPatch {
            code_patch: join_lines(&code),
            test_patch: join_lines(&test),
        }
    }

    fn stream_for_header(&self, header: &str) -> Stream {
        let lowered = header.to_lowercase();
        let mut stream = if lowered.split([' ', '_', '/', '.']).any(|word| TEST_WORDS.contains(&word)) {
            Stream::Test
        } else {
            Stream::Code
        };

        let path = header.trim();
        let accepted = match self.language {
            Language::Any => true,
            Language::Python => path.ends_with(".py"),
            Language::JavaScript => is_script_source(path),
            Language::Java => {
                if is_java_test_file(path) {
                    stream = Stream::Test;
                }
                extension(path) == Some("java")
            }
        };

        if stream == Stream::Code && !accepted && !self.accepts_extra(path) {
            stream = Stream::Dropped;
        }

        stream
    }

    fn accepts_extra(&self, path: &str) -> bool {
        self.extra_suffixes.iter().any(|suffix| path.ends_with(suffix.as_str()))
    }
}

fn join_lines(lines: &[&str]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        let mut joined = lines.join("\n");
        joined.push('\n');
        joined
    }
}

/// The last `/`-separated component of a header line.
fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn extension(path: &str) -> Option<&str> {
    let (stem, ext) = file_name(path).rsplit_once('.')?;
    (!stem.is_empty()).then_some(ext)
}

fn is_script_source(path: &str) -> bool {
    matches!(extension(path), Some("js" | "jsm" | "mjs" | "cjs" | "ts" | "mts" | "cts"))
}

fn is_java_test_file(path: &str) -> bool {
    file_name(path)
        .strip_suffix(".java")
        .is_some_and(|stem| stem.starts_with("Test") || stem.ends_with("Test") || stem.ends_with("Tests"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED_DIFF: &str = "\
diff --git a/src/lib.py b/src/lib.py
index 1111111..2222222 100644
--- a/src/lib.py
+++ b/src/lib.py
@@ -1 +1 @@
-x = 1
+x = 2
diff --git a/tests/test_lib.py b/tests/test_lib.py
index 3333333..4444444 100644
--- a/tests/test_lib.py
+++ b/tests/test_lib.py
@@ -1 +1 @@
-assert x == 1
+assert x == 2
";

    fn classifier(language: Language, repo: &str) -> PatchClassifier {
        PatchClassifier::for_repository(language, repo, &crate::commands::default_overrides())
    }

    #[test]
    fn splits_code_and_tests() {
        let patch = classifier(Language::Python, "o/r").classify(MIXED_DIFF);

        assert_eq!(
            patch.code_patch,
            "diff --git a/src/lib.py b/src/lib.py\n--- a/src/lib.py\n+++ b/src/lib.py\n@@ -1 +1 @@\n-x = 1\n+x = 2\n"
        );
        assert!(patch.test_patch.starts_with("diff --git a/tests/test_lib.py"));
        assert!(patch.test_patch.ends_with("+assert x == 2\n"));
        assert!(!patch.test_patch.contains("index "));
    }

    #[test]
    fn empty_diff_yields_empty_streams() {
        let patch = classifier(Language::Any, "o/r").classify("");
        assert_eq!(patch, ClassifiedPatch::default());
    }

    #[test]
    fn test_words_must_be_whole_tokens() {
        let diff = "diff --git a/src/attestation.py b/src/attestation.py\n+x\n";
        let patch = classifier(Language::Python, "o/r").classify(diff);
        assert_eq!(patch.code_patch, diff);
        assert!(patch.test_patch.is_empty());
    }

    #[test]
    fn test_token_split_on_underscore_and_dot() {
        let diff = "diff --git a/pkg/foo_testing.go b/pkg/foo_testing.go\n+x\n";
        let patch = classifier(Language::Any, "o/r").classify(diff);
        assert_eq!(patch.test_patch, diff);
    }

    #[test]
    fn python_drops_other_files_but_keeps_tests() {
        let diff = "diff --git a/README.md b/README.md\n+doc\ndiff --git a/tests/data.json b/tests/data.json\n+{}\n";
        let patch = classifier(Language::Python, "o/r").classify(diff);
        assert!(patch.code_patch.is_empty());
        assert_eq!(patch.test_patch, "diff --git a/tests/data.json b/tests/data.json\n+{}\n");
    }

    #[test]
    fn javascript_accepts_script_extensions() {
        let c = classifier(Language::JavaScript, "o/r");
        for file in ["a.js", "a.mjs", "a.cjs", "a.ts", "a.mts"] {
            let diff = format!("diff --git a/src/{file} b/src/{file}\n+x\n");
            assert_eq!(c.classify(&diff).code_patch, diff, "{file}");
        }

        let css = "diff --git a/src/a.css b/src/a.css\n+x\n";
        assert!(c.classify(css).code_patch.is_empty());
    }

    #[test]
    fn javascript_json_only_for_configured_projects() {
        let diff = "diff --git a/package.json b/package.json\n+{}\n";
        assert!(classifier(Language::JavaScript, "o/r").classify(diff).code_patch.is_empty());
        assert_eq!(classifier(Language::JavaScript, "webpack/webpack").classify(diff).code_patch, diff);
        assert_eq!(classifier(Language::JavaScript, "facebook/jest").classify(diff).code_patch, diff);
    }

    #[test]
    fn java_promotes_test_classes() {
        let c = classifier(Language::Java, "o/r");
        for file in ["FooTest.java", "FooTests.java", "TestFoo.java"] {
            let diff = format!("diff --git a/src/main/{file} b/src/main/{file}\n+x\n");
            let patch = c.classify(&diff);
            assert_eq!(patch.test_patch, diff, "{file}");
            assert!(patch.code_patch.is_empty());
        }
    }

    #[test]
    fn java_keeps_sources_and_drops_the_rest() {
        let c = classifier(Language::Java, "o/r");
        let source = "diff --git a/src/main/Foo.java b/src/main/Foo.java\n+x\n";
        assert_eq!(c.classify(source).code_patch, source);

        let pom = "diff --git a/pom.xml b/pom.xml\n+x\n";
        assert!(c.classify(pom).code_patch.is_empty());
        assert_eq!(classifier(Language::Java, "netty/netty").classify(pom).code_patch, pom);

        let native = "diff --git a/transport/native.c b/transport/native.c\n+x\n";
        assert_eq!(classifier(Language::Java, "netty/netty").classify(native).code_patch, native);
    }

    #[test]
    fn overrides_match_the_repository_name_not_the_owner() {
        let pom = "diff --git a/pom.xml b/pom.xml\n+x\n";
        assert!(classifier(Language::Java, "netty-contrib/codec-extras").classify(pom).code_patch.is_empty());
        assert_eq!(classifier(Language::Java, "someone/netty-fork").classify(pom).code_patch, pom);
    }

    #[test]
    fn overrides_apply_only_to_their_language() {
        let overrides = vec![ProjectOverride {
            project: "docs".to_string(),
            language: Language::Python,
            accept_suffixes: vec![".rst".to_string()],
        }];
        let diff = "diff --git a/index.rst b/index.rst\n+x\n";

        let python = PatchClassifier::for_repository(Language::Python, "o/docs", &overrides);
        assert_eq!(python.classify(diff).code_patch, diff);

        let java = PatchClassifier::for_repository(Language::Java, "o/docs", &overrides);
        assert!(java.classify(diff).code_patch.is_empty());
    }

    #[test]
    fn language_parses_from_command_line() {
        assert_eq!(Language::from_str("javascript", true).unwrap(), Language::JavaScript);
        assert_eq!(Language::from_str("js", true).unwrap(), Language::JavaScript);
        assert_eq!(Language::from_str("any", true).unwrap(), Language::Any);
    }

    #[test]
    fn language_parses_from_config() {
        #[derive(Deserialize)]
        struct Wrapper {
            language: Language,
        }

        let parsed: Wrapper = toml::from_str("language = \"js\"").unwrap();
        assert_eq!(parsed.language, Language::JavaScript);
        let parsed: Wrapper = toml::from_str("language = \"javascript\"").unwrap();
        assert_eq!(parsed.language, Language::JavaScript);
    }
}
