//! Remote repository access for git-backed projects.
//!
//! Checkouts are expected to carry one flat or nested JSON file per language,
//! named after the language code (`eng.json`, `locales/zho.json`, ...).
//! Nested objects are flattened into dotted keys.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::process::Command;

use super::{languages::Language, sync::SyncError};

/// A phrase read from the primary source-language file, with whatever
/// target-language renderings the checkout provides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseEntry {
    pub key: String,
    pub text: String,
    /// Keyed by language code.
    pub translations: BTreeMap<String, String>,
}

/// Everything a successful sync will write for a project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoSnapshot {
    pub phrases: Vec<PhraseEntry>,
}

#[async_trait]
pub trait RepoSource: Send + Sync {
    /// Checks that `url` is reachable and has `branch`.
    async fn probe(&self, url: &str, branch: &str) -> Result<(), SyncError>;

    /// Materializes `branch` of `url` into the empty directory `dest`.
    async fn fetch(&self, url: &str, branch: &str, dest: &Path) -> Result<(), SyncError>;
}

/// `RepoSource` backed by the `git` binary.
pub struct GitCli {
    bin: String,
}

impl GitCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RepoSource for GitCli {
    async fn probe(&self, url: &str, branch: &str) -> Result<(), SyncError> {
        let output = self
            .command()
            .args(["ls-remote", "--exit-code", "--heads", "--", url, branch])
            .output()
            .await?;

        match output.status.code() {
            Some(0) => Ok(()),
            // --exit-code reports "no matching refs" as 2
            Some(2) => Err(SyncError::Unreachable(format!(
                "branch '{branch}' not found"
            ))),
            _ => Err(SyncError::Unreachable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )),
        }
    }

    async fn fetch(&self, url: &str, branch: &str, dest: &Path) -> Result<(), SyncError> {
        let output = self
            .command()
            .args(["clone", "--depth", "1", "--single-branch", "--branch", branch, "--"])
            .arg(url)
            .arg(dest)
            .output()
            .await?;

        if !output.status.success() {
            return Err(SyncError::Fetch(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

fn scp_like() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._-]+@[A-Za-z0-9.-]+:\S+$").expect("valid scp-like url regex")
    })
}

/// Accepts `http(s)://`, `ssh://`, `git://` and scp-like `user@host:path`.
/// Local paths and `file://` are refused.
pub fn validate_git_url(url: &str) -> bool {
    if url.is_empty()
        || url.len() > 512
        || url.starts_with('-')
        || url.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return false;
    }

    if let Some((scheme, rest)) = url.split_once("://") {
        let host = rest.split('/').next().unwrap_or_default();
        return matches!(scheme, "https" | "http" | "ssh" | "git")
            && !host.is_empty()
            && rest.len() > host.len() + 1;
    }

    scp_like().is_match(url)
}

/// Subset of `git check-ref-format` rules for branch names.
pub fn validate_git_branch(branch: &str) -> bool {
    const FORBIDDEN: &[char] = &[' ', '~', '^', ':', '?', '*', '[', '\\'];

    !branch.is_empty()
        && branch.len() <= 255
        && !branch.starts_with(['-', '/', '.'])
        && !branch.ends_with(['/', '.'])
        && !branch.ends_with(".lock")
        && !branch.contains("..")
        && !branch.contains("//")
        && !branch.contains("@{")
        && !branch
            .chars()
            .any(|c| c.is_control() || c.is_whitespace() || FORBIDDEN.contains(&c))
}

/// Builds the snapshot for a checkout. Phrases come from the first source
/// language; target files are optional.
pub fn scan_checkout(
    dir: &Path,
    src_langs: &[Language],
    tgt_langs: &[Language],
) -> Result<RepoSnapshot, SyncError> {
    let primary = src_langs
        .first()
        .ok_or_else(|| SyncError::Parse("project has no source language".to_string()))?;

    let mut files = BTreeMap::new();
    collect_language_files(dir, &mut files)?;

    let source_path = files
        .get(primary.code)
        .ok_or_else(|| SyncError::Parse(format!("no {}.json found in repository", primary.code)))?;
    let source = read_flattened(source_path)?;

    let mut targets = Vec::with_capacity(tgt_langs.len());
    for lang in tgt_langs {
        match files.get(lang.code) {
            Some(path) => targets.push((lang.code, read_flattened(path)?)),
            None => tracing::debug!(code = lang.code, "no translation file in checkout"),
        }
    }

    let phrases = source
        .into_iter()
        .map(|(key, text)| {
            let translations = targets
                .iter()
                .filter_map(|(code, map)| map.get(&key).map(|t| (code.to_string(), t.clone())))
                .collect();
            PhraseEntry {
                key,
                text,
                translations,
            }
        })
        .collect();

    Ok(RepoSnapshot { phrases })
}

/// Maps `<stem>` to the lexicographically first `<stem>.json` under `dir`.
fn collect_language_files(
    dir: &Path,
    files: &mut BTreeMap<String, PathBuf>,
) -> Result<(), SyncError> {
    let mut entries = std::fs::read_dir(dir)?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if entry.file_name() != ".git" {
                collect_language_files(&path, files)?;
            }
            continue;
        }

        if !file_type.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            files.entry(stem.to_string()).or_insert(path);
        }
    }

    Ok(())
}

fn read_flattened(path: &Path) -> Result<BTreeMap<String, String>, SyncError> {
    let raw = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|e| SyncError::Parse(format!("{}: {e}", path.display())))?;

    let mut out = BTreeMap::new();
    flatten(&value, "", &mut out)
        .map_err(|key| SyncError::Parse(format!("{}: '{key}' is not a string", path.display())))?;
    Ok(out)
}

/// Returns the offending key when a leaf is not a string.
fn flatten(value: &Value, prefix: &str, out: &mut BTreeMap<String, String>) -> Result<(), String> {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(v, &key, out)?;
            }
            Ok(())
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
            Ok(())
        }
        _ => Err(prefix.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::languages::parse_list;

    #[test]
    fn accepts_common_remote_urls() {
        assert!(validate_git_url("https://github.com/wzru/gitran.git"));
        assert!(validate_git_url("ssh://git@example.com/team/repo"));
        assert!(validate_git_url("git@github.com:wzru/gitran.git"));
    }

    #[test]
    fn rejects_local_and_malformed_urls() {
        assert!(!validate_git_url(""));
        assert!(!validate_git_url("/srv/repos/private"));
        assert!(!validate_git_url("file:///etc"));
        assert!(!validate_git_url("https://"));
        assert!(!validate_git_url("https://host"));
        assert!(!validate_git_url("--upload-pack=evil"));
        assert!(!validate_git_url("https://github.com/a b"));
    }

    #[test]
    fn branch_names_follow_ref_rules() {
        assert!(validate_git_branch("main"));
        assert!(validate_git_branch("release/1.2"));
        assert!(!validate_git_branch(""));
        assert!(!validate_git_branch("-f"));
        assert!(!validate_git_branch("a..b"));
        assert!(!validate_git_branch("topic.lock"));
        assert!(!validate_git_branch("has space"));
        assert!(!validate_git_branch("what?"));
    }

    #[test]
    fn scans_nested_language_files() {
        let dir = tempfile::tempdir().unwrap();
        let locales = dir.path().join("locales");
        std::fs::create_dir_all(&locales).unwrap();
        std::fs::write(
            locales.join("eng.json"),
            r#"{"menu": {"open": "Open", "quit": "Quit"}, "title": "Hello"}"#,
        )
        .unwrap();
        std::fs::write(
            locales.join("fra.json"),
            r#"{"menu": {"open": "Ouvrir"}, "stale": "ignored"}"#,
        )
        .unwrap();

        let snapshot = scan_checkout(dir.path(), &parse_list("eng"), &parse_list("fra|zho")).unwrap();

        let keys: Vec<_> = snapshot.phrases.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["menu.open", "menu.quit", "title"]);

        let open = &snapshot.phrases[0];
        assert_eq!(open.text, "Open");
        assert_eq!(open.translations.get("fra").map(String::as_str), Some("Ouvrir"));
        assert!(snapshot.phrases[1].translations.is_empty());
    }

    #[test]
    fn missing_source_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fra.json"), "{}").unwrap();

        let err = scan_checkout(dir.path(), &parse_list("eng"), &[]).unwrap_err();
        assert!(matches!(err, SyncError::Parse(_)));
    }

    #[test]
    fn non_string_leaves_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("eng.json"), r#"{"count": 3}"#).unwrap();

        let err = scan_checkout(dir.path(), &parse_list("eng"), &[]).unwrap_err();
        match err {
            SyncError::Parse(msg) => assert!(msg.contains("count")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn git_metadata_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let git = dir.path().join(".git");
        std::fs::create_dir_all(&git).unwrap();
        std::fs::write(git.join("eng.json"), r#"{"x": "from git dir"}"#).unwrap();

        let err = scan_checkout(dir.path(), &parse_list("eng"), &[]).unwrap_err();
        assert!(matches!(err, SyncError::Parse(_)));
    }
}
