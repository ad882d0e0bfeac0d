//! Post-generation syntax validation contract (§4.2 step 6).
//!
//! The real syntax checker (running `rustc --edition`, `python -m py_compile`,
//! etc.) is an external collaborator and out of scope; this module defines
//! the trait the dispatcher depends on plus a no-op implementation so the
//! dispatcher's control flow is fully exercised without a real toolchain.

use std::path::Path;

/// Outcome of validating generated source against its language's grammar
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Source is valid as-is
    Ok,
    /// Source was invalid but the validator produced a corrected version
    Fixable(String),
    /// Source is invalid and no automatic fix is available
    Failed(String),
}

/// Collaborator that checks generated source for syntax errors
pub trait SyntaxValidator: Send + Sync {
    /// Validate `source`, written for `language` (a lowercase hint such as
    /// `"python"`, `"rust"`, `"javascript"`, or empty when undetected)
    fn validate(&self, language: &str, source: &str) -> ValidationOutcome;
}

/// Validator that always approves; used when no real toolchain is wired in
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopValidator;

impl SyntaxValidator for NoopValidator {
    fn validate(&self, _language: &str, _source: &str) -> ValidationOutcome {
        ValidationOutcome::Ok
    }
}

/// Guess a language hint from a file extension, for when the caller didn't supply one
#[must_use]
pub fn detect_language(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("py") => "python",
        Some("rs") => "rust",
        Some("js" | "mjs" | "cjs") => "javascript",
        Some("ts" | "tsx") => "typescript",
        Some("go") => "go",
        Some("rb") => "ruby",
        Some("java") => "java",
        Some("c" | "h") => "c",
        Some("cpp" | "cc" | "hpp") => "cpp",
        Some("sh" | "bash") => "shell",
        Some("json") => "json",
        Some("yaml" | "yml") => "yaml",
        _ => "",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_validator_always_ok() {
        let validator = NoopValidator;
        assert_eq!(validator.validate("python", "def f(:"), ValidationOutcome::Ok);
    }

    #[test]
    fn detects_language_from_extension() {
        assert_eq!(detect_language(Path::new("/tmp/a.py")), "python");
        assert_eq!(detect_language(Path::new("/tmp/a.rs")), "rust");
        assert_eq!(detect_language(Path::new("/tmp/a.unknown")), "");
    }
}
