//! The policy store: active mode, tool lists and plan scope.
//!
//! The store publishes an immutable [`PolicySnapshot`] behind an `Arc`.
//! Every decision reads one snapshot, so a mode switch that lands mid-batch
//! applies to the next decision and never to half of one.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::error::{ApprovalError, ApprovalResult};
use crate::mode::ApprovalMode;
use crate::scope::PlanScope;

/// A list of tool-name patterns, each an exact name or a glob.
#[derive(Debug, Clone)]
pub struct ToolPatterns {
    patterns: Vec<String>,
    set: GlobSet,
}

impl ToolPatterns {
    /// Compile a list of patterns.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::InvalidPattern`] for a malformed glob.
    pub fn new<I, S>(patterns: I) -> ApprovalResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob = Glob::new(pattern).map_err(|e| ApprovalError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| ApprovalError::InvalidPattern {
            pattern: patterns.join(","),
            reason: e.to_string(),
        })?;
        Ok(Self { patterns, set })
    }

    /// An empty list.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    /// The first pattern matching `tool_name`, exact matches preferred.
    #[must_use]
    pub fn find(&self, tool_name: &str) -> Option<&str> {
        if let Some(exact) = self.patterns.iter().find(|p| *p == tool_name) {
            return Some(exact);
        }
        self.set
            .matches(tool_name)
            .first()
            .and_then(|&idx| self.patterns.get(idx))
            .map(String::as_str)
    }

    /// The raw patterns in declaration order.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Immutable view of the policy used for one decision.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    /// Active trust mode.
    pub mode: ApprovalMode,
    /// Plan-mode scratch scope.
    pub plan_scope: PlanScope,
    /// Tools that are always denied.
    pub deny: ToolPatterns,
    /// Tools that are always allowed.
    pub allow: ToolPatterns,
    /// Tools approved for the rest of the session.
    pub session_allow: BTreeSet<String>,
}

/// Owner of the process-wide approval policy.
#[derive(Debug)]
pub struct PolicyStore {
    current: RwLock<Arc<PolicySnapshot>>,
}

impl PolicyStore {
    /// Create a store with empty tool lists.
    #[must_use]
    pub fn new(mode: ApprovalMode, plan_scope: PlanScope) -> Self {
        Self::from_snapshot(PolicySnapshot {
            mode,
            plan_scope,
            deny: ToolPatterns::empty(),
            allow: ToolPatterns::empty(),
            session_allow: BTreeSet::new(),
        })
    }

    /// Create a store from a fully built snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: PolicySnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Replace the deny list.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern is malformed.
    pub fn with_denied<I, S>(self, patterns: I) -> ApprovalResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let deny = ToolPatterns::new(patterns)?;
        self.update(|s| s.deny = deny)?;
        Ok(self)
    }

    /// Replace the allow list.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern is malformed.
    pub fn with_allowed<I, S>(self, patterns: I) -> ApprovalResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allow = ToolPatterns::new(patterns)?;
        self.update(|s| s.allow = allow)?;
        Ok(self)
    }

    /// The current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Poisoned`] if a writer panicked.
    pub fn snapshot(&self) -> ApprovalResult<Arc<PolicySnapshot>> {
        self.current
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| ApprovalError::Poisoned)
    }

    /// The active mode.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Poisoned`] if a writer panicked.
    pub fn mode(&self) -> ApprovalResult<ApprovalMode> {
        Ok(self.snapshot()?.mode)
    }

    /// Switch the active mode, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Poisoned`] if a writer panicked.
    pub fn set_mode(&self, mode: ApprovalMode) -> ApprovalResult<ApprovalMode> {
        let mut previous = mode;
        self.update(|s| {
            previous = s.mode;
            s.mode = mode;
        })?;
        info!(from = %previous, to = %mode, "Approval mode changed");
        Ok(previous)
    }

    /// Approve `tool_name` for the rest of the session.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Poisoned`] if a writer panicked.
    pub fn allow_for_session(&self, tool_name: &str) -> ApprovalResult<()> {
        self.update(|s| {
            s.session_allow.insert(tool_name.to_owned());
        })?;
        info!(tool = tool_name, "Tool approved for the rest of the session");
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut PolicySnapshot)) -> ApprovalResult<()> {
        let mut guard = self.current.write().map_err(|_| ApprovalError::Poisoned)?;
        let mut next = PolicySnapshot::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PolicyStore {
        PolicyStore::new(
            ApprovalMode::Default,
            PlanScope::new("/ws", ".keel/tmp/plans").unwrap(),
        )
    }

    #[test]
    fn test_patterns_exact_and_glob() {
        let patterns = ToolPatterns::new(["read_file", "mcp__*", "shell*"]).unwrap();
        assert_eq!(patterns.find("read_file"), Some("read_file"));
        assert_eq!(patterns.find("mcp__github__create_issue"), Some("mcp__*"));
        assert_eq!(patterns.find("shell_exec"), Some("shell*"));
        assert_eq!(patterns.find("write_file"), None);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = ToolPatterns::new(["[unclosed"]).unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidPattern { .. }));
    }

    #[test]
    fn test_set_mode_returns_previous_and_publishes_new_snapshot() {
        let store = store();
        let before = store.snapshot().unwrap();

        let previous = store.set_mode(ApprovalMode::Plan).unwrap();
        assert_eq!(previous, ApprovalMode::Default);
        assert_eq!(store.mode().unwrap(), ApprovalMode::Plan);

        // Snapshots already handed out are unaffected.
        assert_eq!(before.mode, ApprovalMode::Default);
    }

    #[test]
    fn test_session_allow() {
        let store = store().with_allowed(["read_*"]).unwrap();
        store.allow_for_session("write_file").unwrap();
        let snap = store.snapshot().unwrap();
        assert!(snap.session_allow.contains("write_file"));
        assert_eq!(snap.allow.patterns(), ["read_*".to_owned()]);
    }
}
