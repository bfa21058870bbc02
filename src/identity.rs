//! Stable execution identifiers
//!
//! A pass that crashes after creating an external resource must find the same
//! resource on the next pass, so the name handed to plugins is a pure function
//! of the execution identity. External systems cap name lengths; names that do
//! not fit are shortened to `<prefix>-<hash>` where the hash covers the full,
//! untruncated name.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{Error, Result};

/// Default maximum length of a generated execution name
pub const ID_MAX_LENGTH: usize = 50;

/// Width of the hash suffix appended to shortened names
pub const HASH_SUFFIX_LEN: usize = 16;

const PART_SEPARATOR: char = '-';

/// Join `parts` and bound the result to `max_length` bytes.
///
/// Deterministic: identical inputs always produce identical output. Inputs
/// that share a long common prefix still diverge once shortened because the
/// suffix hashes every part. Joined names are returned unchanged only when they
/// fit and no part contains the separator; otherwise `("wf-a", "n1")` and
/// `("wf", "a-n1")` would both read `wf-a-n1`, so such inputs always carry the
/// hash suffix.
pub fn fixed_length_unique_id(max_length: usize, parts: &[&str]) -> Result<String> {
    let joined = parts.join(&PART_SEPARATOR.to_string());
    let ambiguous = parts.iter().any(|part| part.contains(PART_SEPARATOR));
    if !ambiguous && joined.len() <= max_length {
        return Ok(joined);
    }

    if max_length < HASH_SUFFIX_LEN {
        return Err(Error::Configuration(format!(
            "maximum identifier length {max_length} cannot hold a {HASH_SUFFIX_LEN} character hash"
        )));
    }

    // Length-prefixed so part boundaries survive hashing.
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    let suffix = &digest[..HASH_SUFFIX_LEN];

    let budget = max_length.saturating_sub(HASH_SUFFIX_LEN + 1);
    let prefix = truncate_to_bytes(&joined, budget).trim_end_matches(PART_SEPARATOR);

    if prefix.is_empty() {
        Ok(suffix.to_string())
    } else {
        Ok(format!("{prefix}{PART_SEPARATOR}{suffix}"))
    }
}

// Longest prefix of `s` within `budget` bytes that ends on a char boundary.
fn truncate_to_bytes(s: &str, budget: usize) -> &str {
    if s.len() <= budget {
        return s;
    }
    let mut end = budget;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Identity of the workflow execution that owns a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct WorkflowExecutionId {
    pub project: String,
    pub domain: String,
    pub name: String,
}

/// Identity of one node within a workflow execution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeExecutionId {
    pub node_id: String,
    pub execution_id: WorkflowExecutionId,
}

/// One attempt to execute one node's task
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskExecutionId {
    pub task_id: String,
    pub node_execution_id: NodeExecutionId,
    pub retry_attempt: u32,
}

/// The derived identity handed to plugins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecutionIdentity {
    id: TaskExecutionId,
    generated_name: String,
}

impl TaskExecutionIdentity {
    /// Derive the identity of `id` owned by `owner_name`.
    pub fn derive(owner_name: &str, id: TaskExecutionId, max_length: usize) -> Result<Self> {
        let attempt = id.retry_attempt.to_string();
        let generated_name = fixed_length_unique_id(
            max_length,
            &[owner_name, &id.node_execution_id.node_id, &attempt],
        )?;
        Ok(Self { id, generated_name })
    }

    pub fn id(&self) -> &TaskExecutionId {
        &self.id
    }

    /// Stable, length-bounded name usable as an idempotency key
    pub fn generated_name(&self) -> &str {
        &self.generated_name
    }
}

impl fmt::Display for TaskExecutionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.generated_name)
    }
}
