//! Build constraints.
//!
//! Two mechanisms decide whether a file belongs to the active
//! configuration:
//!
//! - file-name suffixes: `name_linux.go`, `name_arm64.go`,
//!   `name_linux_arm64_test.go`
//! - constraint lines before the package clause: `//go:build linux && !cgo`
//!   (or the legacy `// +build linux,!cgo` form)

use thiserror::Error;

use crate::config::{BuildConfig, KNOWN_GOARCH, KNOWN_GOOS};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("unexpected token '{0}' in build constraint")]
    Unexpected(String),

    #[error("unexpected end of build constraint")]
    UnexpectedEnd,
}

/// Whether a tag is satisfied, including the OS implications the Go
/// toolchain applies (android builds satisfy `linux`, and so on).
pub fn tag_matches(config: &BuildConfig, tag: &str) -> bool {
    if config.matches_tag(tag) {
        return true;
    }
    matches!(
        (config.goos.as_str(), tag),
        ("android", "linux") | ("illumos", "solaris") | ("ios", "darwin")
    )
}

/// Check the `_GOOS`, `_GOARCH` and `_GOOS_GOARCH` suffixes of a file name.
pub fn matches_file_name(config: &BuildConfig, name: &str) -> bool {
    let stem = name.strip_suffix(".go").unwrap_or(name);
    let stem = stem.strip_suffix("_test").unwrap_or(stem);

    // Only the part after the first underscore can carry constraints.
    let Some(idx) = stem.find('_') else {
        return true;
    };
    let parts: Vec<&str> = stem[idx + 1..].split('_').collect();
    let n = parts.len();

    if n >= 2 && KNOWN_GOOS.contains(&parts[n - 2]) && KNOWN_GOARCH.contains(&parts[n - 1]) {
        return tag_matches(config, parts[n - 2]) && tag_matches(config, parts[n - 1]);
    }
    if n >= 1 && KNOWN_GOOS.contains(&parts[n - 1]) {
        return tag_matches(config, parts[n - 1]);
    }
    if n >= 1 && KNOWN_GOARCH.contains(&parts[n - 1]) {
        return tag_matches(config, parts[n - 1]);
    }
    true
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Tag(String),
    Not,
    And,
    Or,
    Open,
    Close,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, ConstraintError> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '!' => {
                chars.next();
                tokens.push(Token::Not);
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '&' | '|' => {
                chars.next();
                if chars.next() != Some(c) {
                    return Err(ConstraintError::Unexpected(c.to_string()));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' => {
                let mut tag = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '.' {
                        tag.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Tag(tag));
            }
            other => return Err(ConstraintError::Unexpected(other.to_string())),
        }
    }

    Ok(tokens)
}

/// Recursive-descent evaluator over the token stream.
struct Evaluator<'a> {
    tokens: Vec<Token>,
    pos: usize,
    config: &'a BuildConfig,
}

impl Evaluator<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn or(&mut self) -> Result<bool, ConstraintError> {
        let mut value = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.bump();
            let rhs = self.and()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and(&mut self) -> Result<bool, ConstraintError> {
        let mut value = self.not()?;
        while self.peek() == Some(&Token::And) {
            self.bump();
            let rhs = self.not()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn not(&mut self) -> Result<bool, ConstraintError> {
        if self.peek() == Some(&Token::Not) {
            self.bump();
            return Ok(!self.not()?);
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<bool, ConstraintError> {
        match self.bump() {
            Some(Token::Tag(tag)) => Ok(tag_matches(self.config, &tag)),
            Some(Token::Open) => {
                let value = self.or()?;
                match self.bump() {
                    Some(Token::Close) => Ok(value),
                    Some(other) => Err(ConstraintError::Unexpected(format!("{:?}", other))),
                    None => Err(ConstraintError::UnexpectedEnd),
                }
            }
            Some(other) => Err(ConstraintError::Unexpected(format!("{:?}", other))),
            None => Err(ConstraintError::UnexpectedEnd),
        }
    }
}

/// Evaluate a `//go:build` expression.
pub fn eval_expr(config: &BuildConfig, expr: &str) -> Result<bool, ConstraintError> {
    let mut evaluator = Evaluator {
        tokens: tokenize(expr)?,
        pos: 0,
        config,
    };
    let value = evaluator.or()?;
    match evaluator.bump() {
        None => Ok(value),
        Some(extra) => Err(ConstraintError::Unexpected(format!("{:?}", extra))),
    }
}

/// Evaluate one legacy `// +build` line: space-separated alternatives of
/// comma-separated terms.
pub fn eval_plus_build(config: &BuildConfig, line: &str) -> bool {
    line.split_whitespace().any(|alternative| {
        alternative.split(',').all(|term| match term.strip_prefix('!') {
            Some(tag) => !tag_matches(config, tag),
            None => tag_matches(config, term),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux() -> BuildConfig {
        BuildConfig {
            goos: "linux".to_string(),
            goarch: "amd64".to_string(),
            goroot: None,
            gopath: Vec::new(),
            tags: vec!["integration".to_string()],
            cgo_enabled: true,
            include_tests: false,
        }
    }

    #[test]
    fn test_file_name_suffixes() {
        let config = linux();
        assert!(matches_file_name(&config, "foo.go"));
        assert!(matches_file_name(&config, "linux.go"));
        assert!(matches_file_name(&config, "foo_linux.go"));
        assert!(matches_file_name(&config, "foo_amd64.go"));
        assert!(matches_file_name(&config, "foo_linux_amd64_test.go"));
        assert!(!matches_file_name(&config, "foo_windows.go"));
        assert!(!matches_file_name(&config, "foo_linux_arm64.go"));
        assert!(!matches_file_name(&config, "foo_darwin_test.go"));
        assert!(matches_file_name(&config, "foo_bar.go"));
    }

    #[test]
    fn test_android_implies_linux() {
        let config = BuildConfig {
            goos: "android".to_string(),
            ..linux()
        };
        assert!(matches_file_name(&config, "foo_linux.go"));
        assert!(eval_expr(&config, "linux").unwrap());
    }

    #[test]
    fn test_eval_expr() {
        let config = linux();
        assert!(eval_expr(&config, "linux").unwrap());
        assert!(eval_expr(&config, "linux && amd64").unwrap());
        assert!(eval_expr(&config, "windows || integration").unwrap());
        assert!(!eval_expr(&config, "!cgo").unwrap());
        assert!(eval_expr(&config, "unix && !(windows || plan9)").unwrap());
        assert!(!eval_expr(&config, "go1.99 && ignore").unwrap());
    }

    #[test]
    fn test_eval_expr_errors() {
        let config = linux();
        assert_eq!(
            eval_expr(&config, "linux &&"),
            Err(ConstraintError::UnexpectedEnd)
        );
        assert!(eval_expr(&config, "linux & amd64").is_err());
        assert!(eval_expr(&config, "(linux").is_err());
        assert!(eval_expr(&config, "linux amd64").is_err());
    }

    #[test]
    fn test_plus_build_lines() {
        let config = linux();
        assert!(eval_plus_build(&config, "linux,amd64 darwin"));
        assert!(eval_plus_build(&config, "darwin integration"));
        assert!(!eval_plus_build(&config, "linux,!cgo"));
    }
}
