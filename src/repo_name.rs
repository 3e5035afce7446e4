/// Validate a hosting repository name of the form `owner/name`.
///
/// Both halves must be non-empty and use only the characters the hosting
/// API accepts in paths: ASCII alphanumerics, `-`, `_` and `.`.
pub fn is_valid_repo(repo: &str) -> bool {
    let Some((owner, name)) = repo.split_once('/') else {
        return false;
    };
    is_valid_segment(owner) && is_valid_segment(name)
}

/// The part after the slash, used as the default package name.
pub fn repo_short_name(repo: &str) -> &str {
    repo.split_once('/').map_or(repo, |(_, name)| name)
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment.len() <= 100
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
