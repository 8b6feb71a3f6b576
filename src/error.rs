//! Error types for the resolution kernel.
//!
//! One structured error carries everything a caller or a log sink needs:
//! the taxonomy kind, the identifier under resolution, the identifier path
//! from the root of the resolution, the pipeline stage, an optional nested
//! cause, and the stage trace collected up to the failure.

use crate::trace::{ResolutionTrace, Stage};
use thiserror::Error;

/// Error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Identifier is not registered and cannot be autowired.
    NotFound,
    /// Resolution cycle detected; `path` lists the full cycle.
    Cycle,
    /// A parameter cannot be filled by override, type, default, or null.
    UnresolvableParam,
    /// Contradictory definitions or an alias cycle.
    DefinitionConflict,
    /// A prototype failed its invariants.
    VerificationFailed,
    /// Scoped service requested outside any scope, or a pop of the root scope.
    ScopeViolation,
    /// Double wiring, writes after freeze, and other lifecycle misuse.
    ContainerState,
    /// The per-resolution deadline expired.
    Timeout,
    /// The resolution recursion limit was exceeded.
    DepthExceeded,
    /// A user factory raised; the cause carries the detail.
    FactoryFailed,
    /// Property or method injection failed; the message carries per-target detail.
    InjectionFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Cycle => "cycle",
            ErrorKind::UnresolvableParam => "unresolvable_param",
            ErrorKind::DefinitionConflict => "definition_conflict",
            ErrorKind::VerificationFailed => "verification_failed",
            ErrorKind::ScopeViolation => "scope_violation",
            ErrorKind::ContainerState => "container_state",
            ErrorKind::Timeout => "timeout",
            ErrorKind::DepthExceeded => "depth_exceeded",
            ErrorKind::FactoryFailed => "factory_failed",
            ErrorKind::InjectionFailed => "injection_failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured resolution error.
///
/// Stages wrap errors with additional context on the way up (identifier and
/// stage) while preserving the original cause and the collected trace.
#[derive(Debug, Clone, Error)]
#[error("[{kind}] {message}")]
pub struct ResolutionError {
    pub kind: ErrorKind,
    pub message: String,
    /// Identifier under resolution when the error was raised.
    pub identifier: Option<String>,
    /// Chain of identifiers from the resolution root to the failure point.
    pub path: Vec<String>,
    /// Pipeline stage that raised or wrapped the error.
    pub stage: Option<Stage>,
    /// Nested error this one wraps.
    #[source]
    pub cause: Option<Box<ResolutionError>>,
    /// Stage trace collected up to the failure.
    pub trace: Option<ResolutionTrace>,
}

impl ResolutionError {
    /// Create a bare error of the given kind.
    #[inline]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            identifier: None,
            path: Vec::new(),
            stage: None,
            cause: None,
            trace: None,
        }
    }

    // =========================================================================
    // Constructors, one per taxonomy kind
    // =========================================================================

    #[inline]
    pub fn not_found(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self::new(
            ErrorKind::NotFound,
            format!("service not found: {identifier}"),
        )
        .with_identifier(identifier)
    }

    #[inline]
    pub fn cycle(path: Vec<String>) -> Self {
        let rendered = path.join(" -> ");
        let identifier = path.first().cloned();
        let mut err = Self::new(
            ErrorKind::Cycle,
            format!("circular dependency detected: {rendered}"),
        );
        err.identifier = identifier;
        err.path = path;
        err
    }

    #[inline]
    pub fn unresolvable_param(
        param: impl Into<String>,
        identifier: impl Into<String>,
        path: Vec<String>,
    ) -> Self {
        let param = param.into();
        let identifier = identifier.into();
        let mut err = Self::new(
            ErrorKind::UnresolvableParam,
            format!("parameter `{param}` of `{identifier}` cannot be resolved"),
        );
        err.identifier = Some(identifier);
        err.path = path;
        err
    }

    #[inline]
    pub fn definition_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DefinitionConflict, message)
    }

    #[inline]
    pub fn verification_failed(class: impl Into<String>, message: impl Into<String>) -> Self {
        let class = class.into();
        let message = message.into();
        Self::new(
            ErrorKind::VerificationFailed,
            format!("prototype verification failed for `{class}`: {message}"),
        )
        .with_identifier(class)
    }

    #[inline]
    pub fn scope_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ScopeViolation, message)
    }

    #[inline]
    pub fn container_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ContainerState, message)
    }

    #[inline]
    pub fn timeout(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self::new(
            ErrorKind::Timeout,
            format!("resolution deadline expired while resolving `{identifier}`"),
        )
        .with_identifier(identifier)
    }

    #[inline]
    pub fn depth_exceeded(identifier: impl Into<String>, depth: u32, max: u32) -> Self {
        let identifier = identifier.into();
        Self::new(
            ErrorKind::DepthExceeded,
            format!("resolution depth {depth} exceeds limit {max} at `{identifier}`"),
        )
        .with_identifier(identifier)
    }

    #[inline]
    pub fn factory_failed(identifier: impl Into<String>, cause: ResolutionError) -> Self {
        let identifier = identifier.into();
        Self::new(
            ErrorKind::FactoryFailed,
            format!("factory for `{identifier}` failed"),
        )
        .with_identifier(identifier)
        .with_cause(cause)
    }

    #[inline]
    pub fn injection_failed(target: impl Into<String>, detail: impl Into<String>) -> Self {
        let target = target.into();
        Self::new(
            ErrorKind::InjectionFailed,
            format!("injection into `{}` failed: {}", target, detail.into()),
        )
        .with_identifier(target)
    }

    // =========================================================================
    // Context combinators
    // =========================================================================

    #[inline]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    #[inline]
    pub fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = path;
        self
    }

    #[inline]
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    #[inline]
    pub fn with_cause(mut self, cause: ResolutionError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    #[inline]
    pub fn with_trace(mut self, trace: ResolutionTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Wrap with stage context while preserving cause, path and trace.
    ///
    /// Used by the pipeline when an error bubbles through a stage that is not
    /// the one that raised it. The kind and path of the inner error survive.
    pub fn wrap(self, identifier: &str, stage: Stage) -> Self {
        let kind = self.kind;
        let path = self.path.clone();
        let trace = self.trace.clone();
        let mut err = Self::new(
            kind,
            format!("while resolving `{}`: {}", identifier, self.message),
        );
        err.identifier = Some(identifier.to_string());
        err.path = path;
        err.stage = Some(stage);
        err.trace = trace;
        err.cause = Some(Box::new(self));
        err
    }

    /// Full rendering with path and stage, for logs.
    pub fn detail(&self) -> String {
        let mut out = format!("[{}] {}", self.kind, self.message);
        if !self.path.is_empty() {
            out.push_str(&format!(" (path: {})", self.path.join(" -> ")));
        }
        if let Some(stage) = self.stage {
            out.push_str(&format!(" (stage: {stage})"));
        }
        out
    }
}

/// Result type alias for kernel operations.
pub type Result<T> = std::result::Result<T, ResolutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_carries_identifier() {
        let err = ResolutionError::not_found("pkg.Logger");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.identifier.as_deref(), Some("pkg.Logger"));
    }

    #[test]
    fn test_cycle_path_rendered() {
        let err = ResolutionError::cycle(vec!["A".into(), "B".into(), "A".into()]);
        assert_eq!(err.kind, ErrorKind::Cycle);
        assert_eq!(err.path, vec!["A", "B", "A"]);
        assert!(err.to_string().contains("A -> B -> A"));
    }

    #[test]
    fn test_wrap_preserves_kind_and_cause() {
        let inner = ResolutionError::not_found("pkg.Clock");
        let outer = inner.wrap("pkg.Logger", Stage::Instantiate);

        assert_eq!(outer.kind, ErrorKind::NotFound);
        assert_eq!(outer.stage, Some(Stage::Instantiate));
        assert_eq!(outer.identifier.as_deref(), Some("pkg.Logger"));
        assert_eq!(
            outer.cause.as_ref().unwrap().identifier.as_deref(),
            Some("pkg.Clock")
        );
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;
        let err = ResolutionError::factory_failed("db", ResolutionError::not_found("cfg"));
        assert!(err.source().is_some());
    }
}
