//! Cheap scan of a Go file header.
//!
//! Classification runs before any real parsing, so it only looks at the
//! leading comments (build constraints), the package clause and the import
//! block (to spot `import "C"`).

/// What the header of a file says about it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub package: Option<String>,
    /// The `//go:build` expression, if any.
    pub go_build: Option<String>,
    /// Legacy `// +build` lines, one entry per line.
    pub plus_build: Vec<String>,
    pub imports_c: bool,
}

/// Scan the header of a Go source file.
pub fn scan(source: &str) -> Header {
    let mut header = Header::default();
    let mut lines = source.lines();
    let mut in_block_comment = false;

    // Leading comments up to the package clause.
    for line in lines.by_ref() {
        let trimmed = line.trim();
        if in_block_comment {
            in_block_comment = !trimmed.contains("*/");
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }
        if let Some(expr) = trimmed.strip_prefix("//go:build") {
            if header.go_build.is_none() {
                header.go_build = Some(expr.trim().to_string());
            }
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("// +build") {
            header.plus_build.push(rest.trim().to_string());
            continue;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        if trimmed.starts_with("/*") {
            in_block_comment = !trimmed.contains("*/");
            continue;
        }
        let clause = trimmed
            .strip_prefix("package")
            .filter(|rest| rest.starts_with(char::is_whitespace));
        if let Some(rest) = clause {
            header.package = rest
                .split(|c: char| c.is_whitespace() || c == ';' || c == '/')
                .find(|s| !s.is_empty())
                .map(str::to_string);
        }
        break;
    }

    // Imports, until the first non-import declaration.
    let mut in_import_block = false;
    for line in lines {
        let trimmed = line.trim();
        if in_block_comment {
            in_block_comment = !trimmed.contains("*/");
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with("//") {
            continue;
        }
        if trimmed.starts_with("/*") {
            in_block_comment = !trimmed.contains("*/");
            continue;
        }

        if in_import_block {
            if trimmed.starts_with(')') {
                in_import_block = false;
            } else if import_spec_is_c(trimmed) {
                header.imports_c = true;
            }
            continue;
        }

        match trimmed.strip_prefix("import") {
            Some(rest) if rest.trim_start().starts_with('(') => in_import_block = true,
            Some(rest) if rest.starts_with(char::is_whitespace) => {
                if import_spec_is_c(rest.trim()) {
                    header.imports_c = true;
                }
            }
            _ => break,
        }
    }

    header
}

fn import_spec_is_c(spec: &str) -> bool {
    let path = spec.split_whitespace().last().unwrap_or_default();
    path.trim_end_matches(';') == "\"C\""
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_plain_file() {
        let header = scan("package foo\n\nimport \"fmt\"\n\ntype A struct{}\n");
        assert_eq!(header.package.as_deref(), Some("foo"));
        assert!(header.go_build.is_none());
        assert!(!header.imports_c);
    }

    #[test]
    fn test_scan_package_clause_whitespace() {
        assert_eq!(scan("package\tfoo\n").package.as_deref(), Some("foo"));
        assert_eq!(scan("package   foo;\n").package.as_deref(), Some("foo"));
        assert_eq!(scan("packagefoo\n").package, None);
    }

    #[test]
    fn test_scan_constraints() {
        let header = scan(
            "// Copyright notice.\n\n//go:build linux && !cgo\n// +build linux,!cgo\n\npackage foo // import \"x\"\n",
        );
        assert_eq!(header.go_build.as_deref(), Some("linux && !cgo"));
        assert_eq!(header.plus_build, vec!["linux,!cgo".to_string()]);
        assert_eq!(header.package.as_deref(), Some("foo"));
    }

    #[test]
    fn test_scan_cgo_import() {
        let single = scan("package foo\n\n// #include <stdio.h>\nimport \"C\"\n\nfunc F() {}\n");
        assert!(single.imports_c);

        let block = scan(
            "package foo\n\nimport (\n\t\"fmt\"\n\t/*\n\ttypedef int t;\n\t*/\n\t\"C\"\n)\n",
        );
        assert!(block.imports_c);
    }

    #[test]
    fn test_scan_stops_at_declarations() {
        let header = scan("package foo\n\nfunc f() {}\n\nimport \"C\"\n");
        assert!(!header.imports_c);
    }
}
