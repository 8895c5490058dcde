//! Path helpers for cache and ledger files.

use camino::{Utf8Path, Utf8PathBuf};

/// Make `s` safe to embed in a single path component.
///
/// Traversal sequences and characters that are separators or reserved on common
/// filesystems become `_`; a lone `.` survives so names like `socket.io` stay readable.
///
/// ```ignore
/// assert_eq!(sanitize_path_component("octo/hello-world"), "octo_hello-world");
/// assert_eq!(sanitize_path_component("../../etc"), "______etc");
/// ```
#[must_use]
pub fn sanitize_path_component(s: &str) -> String {
    let s = s.replace("..", "__");
    s.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
}

/// Directory holding the listing cache of `repo` under `root`: `.prcache_<owner>_<name>`.
#[must_use]
pub fn page_cache_dir(root: &Utf8Path, repo: &str) -> Utf8PathBuf {
    root.join(format!(".prcache_{}", sanitize_path_component(repo)))
}

/// The successful-fetch ledger that sits beside `output`.
#[must_use]
pub fn ledger_path(output: &Utf8Path) -> Utf8PathBuf {
    output
        .parent()
        .map_or_else(|| Utf8PathBuf::from("successful_requests.txt"), |dir| dir.join("successful_requests.txt"))
}

/// `<output>.all`, the superset output next to the with-tests output.
#[must_use]
pub fn superset_path(output: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{output}.all"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_ordinary_names() {
        assert_eq!(sanitize_path_component("hello-world"), "hello-world");
        assert_eq!(sanitize_path_component("socket.io"), "socket.io");
    }

    #[test]
    fn neutralizes_traversal() {
        assert_eq!(sanitize_path_component(".."), "__");
        assert_eq!(sanitize_path_component("../../etc/passwd"), "______etc_passwd");
    }

    #[test]
    fn replaces_reserved_characters() {
        assert_eq!(sanitize_path_component("a\\b:c*d?e\"f<g>h|i"), "a_b_c_d_e_f_g_h_i");
    }

    #[test]
    fn cache_dir_folds_owner_and_name() {
        let dir = page_cache_dir(Utf8Path::new("/data"), "octo/hello-world");
        assert_eq!(dir, Utf8PathBuf::from("/data/.prcache_octo_hello-world"));
    }

    #[test]
    fn ledger_sits_beside_output() {
        assert_eq!(ledger_path(Utf8Path::new("/out/tasks.jsonl")), Utf8PathBuf::from("/out/successful_requests.txt"));
        assert_eq!(ledger_path(Utf8Path::new("tasks.jsonl")), Utf8PathBuf::from("successful_requests.txt"));
    }

    #[test]
    fn superset_appends_suffix() {
        assert_eq!(superset_path(Utf8Path::new("/out/tasks.jsonl")), Utf8PathBuf::from("/out/tasks.jsonl.all"));
    }
}
