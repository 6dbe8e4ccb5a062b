//! Caller input checks that run before any interpreter interaction.
//!
//! Name checks are token-based: a name counts as present when it appears as
//! a whole identifier token anywhere in the code, so `x` is not found in
//! `max(1, 2)`. The scan does not skip strings or comments. It can accept a
//! name the code never touches, which only costs a redundant snapshot.

use std::collections::BTreeSet;

use notebook_runtime_common::SessionError;

/// Reserved namespace key holding the pre-execution snapshot.
///
/// Must match the driver's `SNAPSHOT_SLOT`.
pub const SNAPSHOT_SLOT: &str = "__nbrt_snapshot__";

/// A code unit submitted to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    /// Source to run.
    pub code: String,
    /// Append the unit to the session's cell history on success.
    pub add_to_history: bool,
    /// Names to snapshot before running and restore on failure.
    pub backup_vars: Vec<String>,
}

impl ExecuteRequest {
    /// A read-only introspection call; never recorded in history.
    pub fn probe(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            add_to_history: false,
            backup_vars: Vec::new(),
        }
    }

    /// A notebook step; recorded in history when it succeeds.
    pub fn step(code: impl Into<String>) -> Self {
        Self {
            add_to_history: true,
            ..Self::probe(code)
        }
    }

    /// Protect `names` against partial mutation by this unit.
    #[must_use]
    pub fn with_backup<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.backup_vars.extend(names.into_iter().map(Into::into));
        self
    }

    /// Append a trailing bare reference to `name` so its value is echoed.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `name` does not occur in the code.
    pub fn with_show_var(mut self, name: &str) -> Result<Self, SessionError> {
        require_token(&self.code, name, "show")?;
        if !self.code.ends_with('\n') {
            self.code.push('\n');
        }
        self.code.push_str(name);
        Ok(self)
    }

    /// Check the request against the engine's preconditions.
    pub fn validate(&self) -> Result<(), SessionError> {
        if identifier_tokens(&self.code).contains(SNAPSHOT_SLOT) {
            return Err(SessionError::validation(format!(
                "`{SNAPSHOT_SLOT}` is reserved and may not appear in submitted code"
            )));
        }
        for name in &self.backup_vars {
            require_token(&self.code, name, "backup")?;
        }
        Ok(())
    }
}

/// All identifier tokens in `code`.
pub fn identifier_tokens(code: &str) -> BTreeSet<&str> {
    let mut tokens = BTreeSet::new();
    let mut start = None;
    for (index, ch) in code.char_indices() {
        match start {
            Some(_) if is_identifier_continue(ch) => {}
            Some(begin) => {
                tokens.insert(&code[begin..index]);
                start = is_identifier_start(ch).then_some(index);
            }
            None if is_identifier_start(ch) => start = Some(index),
            None => {}
        }
    }
    if let Some(begin) = start {
        tokens.insert(&code[begin..]);
    }
    tokens
}

/// Returns `true` if `name` is a single identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_identifier_start) && chars.all(is_identifier_continue)
}

fn require_token(code: &str, name: &str, role: &str) -> Result<(), SessionError> {
    if !is_identifier(name) {
        return Err(SessionError::validation(format!(
            "{role} variable `{name}` is not a valid identifier"
        )));
    }
    if name == SNAPSHOT_SLOT {
        return Err(SessionError::validation(format!(
            "`{SNAPSHOT_SLOT}` is reserved"
        )));
    }
    if !identifier_tokens(code).contains(name) {
        return Err(SessionError::validation(format!(
            "Variable {name} not found in the code."
        )));
    }
    Ok(())
}

fn is_identifier_start(ch: char) -> bool {
    ch == '_' || ch.is_alphabetic()
}

fn is_identifier_continue(ch: char) -> bool {
    ch == '_' || ch.is_alphanumeric()
}
