// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ad-hoc read query sanitizer.
//!
//! Free-form queries are rejected before any store call when they carry a
//! mutating keyword or do not read from the expected target. Accepted
//! queries are rewritten to go through the store's role-scoped read
//! relation, with the caller's role list appended as the final bound
//! parameter, so no ad-hoc query can bypass RBAC scoping. Unlike the
//! operator fallback for missing identities, this path never escalates:
//! the scope is whatever the caller already resolved to.

use graph_store::{SanitizedQuery, READ_RELATION, ROLES_PARAM};

use crate::{RepoError, Result, RoleScope};

/// The only relation an ad-hoc query may read from.
pub const READ_TARGET: &str = "item";

/// Keywords that disqualify a query outright, case-insensitively.
const BLOCKED_KEYWORDS: [&str; 5] = ["insert", "update", "delete", "drop", "truncate"];

/// Word tokens with their byte spans in the original text.
fn word_spans(text: &str) -> Vec<(String, usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (ix, c) in text.char_indices() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if start.is_none() {
                start = Some(ix);
            }
        } else if let Some(s) = start.take() {
            spans.push((text[s..ix].to_lowercase(), s, ix));
        }
    }
    if let Some(s) = start {
        spans.push((text[s..].to_lowercase(), s, text.len()));
    }
    spans
}

/// Validate and rewrite a caller-supplied read query.
pub fn sanitize(query: &str, scope: &RoleScope) -> Result<SanitizedQuery> {
    if query.trim().is_empty() {
        return Err(RepoError::Validation("query must not be empty".into()));
    }
    let words = word_spans(query);

    for (word, _, _) in &words {
        if BLOCKED_KEYWORDS.contains(&word.as_str()) {
            return Err(RepoError::Validation(format!(
                "mutating keyword '{word}' is not allowed in read queries"
            )));
        }
    }

    // The read target must appear as `from item`; that occurrence is
    // redirected through the role-scoped read relation.
    let target = words
        .windows(2)
        .find(|w| w[0].0 == "from" && w[1].0 == READ_TARGET)
        .map(|w| (w[1].1, w[1].2));
    let Some((start, end)) = target else {
        return Err(RepoError::Validation(format!(
            "query must read from '{READ_TARGET}'"
        )));
    };

    let rewritten = format!(
        "{}{READ_RELATION}({ROLES_PARAM}){}",
        &query[..start],
        &query[end..]
    );
    Ok(SanitizedQuery {
        text: rewritten,
        roles: scope.roles().to_vec(),
    })
}
