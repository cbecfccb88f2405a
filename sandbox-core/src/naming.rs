//! Deterministic names derived from user and sandbox ids.

/// Name of the Workspace resource (and its Pod and storage claim) for a
/// `(uid, sid)` pair. Validated ids never contain '-', so distinct pairs
/// never share a name.
pub fn workspace_name(uid: &str, sid: &str) -> String {
    format!("ws-{uid}-{sid}")
}

/// Directory a repository is cloned into: the final path segment of the URL
/// with a trailing `.git` removed.
///
/// `https://github.com/acme/widgets.git` becomes `widgets`.
pub fn repository_dir(repo_url: &str) -> &str {
    let tail = repo_url.trim_end_matches('/');
    let segment = tail.rsplit('/').next().unwrap_or(tail);
    segment.strip_suffix(".git").unwrap_or(segment)
}

/// Short hardware description shown next to a workspace, e.g. `2C4G10G`.
pub fn hardware_label(cpu: &str, memory: &str, storage: &str) -> String {
    format!(
        "{}C{}{}",
        cpu,
        before_binary_marker(memory),
        before_binary_marker(storage)
    )
}

fn before_binary_marker(quantity: &str) -> &str {
    quantity.split('i').next().unwrap_or(quantity)
}
