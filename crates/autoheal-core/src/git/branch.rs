//! Fix-branch naming and protected-branch policy.

use crate::domain::{HealError, Result};

/// Suffix of every fix branch.
pub const FIX_BRANCH_SUFFIX: &str = "AI_FIX";

/// Branches the pipeline never commits to or pushes.
pub const PROTECTED_BRANCHES: &[&str] = &["main", "master"];

/// Uppercase, whitespace to `_`, drop everything outside `[A-Z0-9_]`,
/// collapse `_` runs, trim `_` at both ends. Idempotent.
pub fn sanitize_branch_component(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.trim().to_uppercase().chars() {
        let ch = if ch.is_whitespace() { '_' } else { ch };
        if !(ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_') {
            continue;
        }
        if ch == '_' && out.ends_with('_') {
            continue;
        }
        out.push(ch);
    }
    out.trim_matches('_').to_string()
}

/// `{TEAM}_{LEADER}_AI_FIX`.
///
/// Fails if either input sanitizes to nothing.
pub fn fix_branch_name(team: &str, leader: &str) -> Result<String> {
    let team_part = sanitize_branch_component(team);
    let leader_part = sanitize_branch_component(leader);
    if team_part.is_empty() {
        return Err(HealError::InvalidBranchName(format!(
            "team name {team:?} has no usable characters"
        )));
    }
    if leader_part.is_empty() {
        return Err(HealError::InvalidBranchName(format!(
            "leader name {leader:?} has no usable characters"
        )));
    }
    Ok(format!("{team_part}_{leader_part}_{FIX_BRANCH_SUFFIX}"))
}

/// Case-insensitive match against [`PROTECTED_BRANCHES`], also catching
/// fully qualified refs such as `refs/heads/main`.
pub fn is_protected(branch: &str) -> bool {
    let name = branch.trim();
    let short = name.strip_prefix("refs/heads/").unwrap_or(name);
    PROTECTED_BRANCHES
        .iter()
        .any(|p| short.eq_ignore_ascii_case(p))
}
