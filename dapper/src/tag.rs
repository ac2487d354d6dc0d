use log::debug;
use rand::{distr::Alphanumeric, Rng};
use std::{
    env,
    path::Path,
    process::{Command, Stdio},
};

use crate::models::Tag;

const UNKNOWN_REPOSITORY: &str = "dapper-unknown";
const TOKEN_LENGTH: usize = 8;
const MAX_REFERENCE_LENGTH: usize = 128;

/// Random lowercase alphanumeric token.
pub fn random_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

/// Replaces everything but ASCII alphanumerics with `-`. Neither a
/// repository nor a tag may start with a separator, so those are trimmed.
fn sanitize(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();

    sanitized.trim_matches('-').to_owned()
}

/// Tag for the working directory and branch. Never fails, missing pieces are
/// replaced by a placeholder repository or a random reference.
pub fn derive_tag(work_dir: Option<&Path>, branch: Option<&str>) -> Tag {
    // repository names must be lowercase
    let repository = work_dir
        .and_then(|dir| dir.file_name())
        .map(|name| sanitize(&name.to_string_lossy().to_lowercase()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_REPOSITORY.to_owned());

    let mut reference = branch.map(sanitize).unwrap_or_default();
    if reference.is_empty() {
        reference = random_token();
    }
    reference.truncate(MAX_REFERENCE_LENGTH);

    Tag {
        repository,
        reference,
    }
}

fn current_branch() -> Option<String> {
    let output = Command::new("git")
        .args(&["rev-parse", "--abbrev-ref", "HEAD"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8(output.stdout).ok()
}

/// Tag for the current working directory and git branch.
pub fn current_tag() -> Tag {
    let work_dir = env::current_dir().ok();
    let branch = current_branch();

    let tag = derive_tag(work_dir.as_deref(), branch.as_deref());
    debug!("derived tag {}", tag);
    tag
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_legal(tag: &Tag) -> bool {
        tag.to_string()
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase() || c == ':' || c == '-')
    }

    #[test]
    fn lowercase_repository_and_sanitized_branch() {
        let tag = derive_tag(
            Some(Path::new("/home/dev/MyProject")),
            Some("feature/Add_Thing\n"),
        );

        assert_eq!(tag.repository, "myproject");
        assert_eq!(tag.reference, "feature-Add-Thing");
    }

    #[test]
    fn missing_work_dir_uses_placeholder() {
        let tag = derive_tag(None, Some("main"));
        assert_eq!(tag.to_string(), "dapper-unknown:main");
    }

    #[test]
    fn missing_branch_uses_random_reference() {
        let tag = derive_tag(Some(Path::new("/src/app")), Some("  "));

        assert_eq!(tag.repository, "app");
        assert_eq!(tag.reference.len(), TOKEN_LENGTH);
        assert!(is_legal(&tag), "{}", tag);
    }

    #[test]
    fn random_tokens_are_lowercase_alphanumeric() {
        let token = random_token();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn directory_names_become_legal_repositories() {
        let tag = derive_tag(Some(Path::new("/home/dev/My Project")), Some("main"));
        assert_eq!(tag.to_string(), "my-project:main");

        let tag = derive_tag(Some(Path::new("/home/dev/.café_")), Some("main"));
        assert_eq!(tag.repository, "caf");
        assert!(is_legal(&tag), "{}", tag);

        let tag = derive_tag(Some(Path::new("/home/dev/__")), Some("main"));
        assert_eq!(tag.repository, UNKNOWN_REPOSITORY);
    }

    #[test]
    fn reference_does_not_start_with_a_separator() {
        let tag = derive_tag(Some(Path::new("/src/app")), Some("_wip"));
        assert_eq!(tag.to_string(), "app:wip");

        let tag = derive_tag(Some(Path::new("/src/app")), Some("///"));
        assert_eq!(tag.reference.len(), TOKEN_LENGTH);
    }

    #[test]
    fn long_branches_are_truncated() {
        let branch = "a".repeat(200);
        let tag = derive_tag(Some(Path::new("/src/app")), Some(&branch));
        assert_eq!(tag.reference.len(), MAX_REFERENCE_LENGTH);
    }

    #[test]
    fn root_directory_has_no_name() {
        let tag = derive_tag(Some(Path::new("/")), Some("main"));
        assert_eq!(tag.repository, UNKNOWN_REPOSITORY);
    }
}
