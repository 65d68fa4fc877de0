//! Declaration-level semantic analysis of one unit.
//!
//! Checks the package clause of every file, enters every top-level type
//! declaration into the unit scope and resolves the type expressions of
//! declarations and struct fields against:
//!   predeclared identifiers (`string`, `int`, `error`, ...)
//!   the unit's own declarations (`pkg.Name`)
//!   the exports of imported units (`dep.Name`)
//!
//! The checker is a pure function of its inputs, so running it twice over
//! the same files yields the same artifacts.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

use crate::parser::{ChanDir, FieldDecl, ImportSpec, Position, SourceFile, TypeDecl, TypeExpr};

const PREDECLARED: &[&str] = &[
    "any", "bool", "byte", "comparable", "complex64", "complex128", "error", "float32",
    "float64", "int", "int8", "int16", "int32", "int64", "rune", "string", "uint", "uint8",
    "uint16", "uint32", "uint64", "uintptr",
];

/// One struct field as exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub type_descriptor: String,
}

/// A named type declared by the unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeclaredType {
    pub name: String,
    /// File the declaration lives in.
    pub file: String,
    pub position: Position,
    pub type_params: Vec<String>,
    /// Descriptor of the declared (or aliased) type.
    pub descriptor: String,
    /// Fields, when the underlying type is a struct.
    pub fields: Option<Vec<FieldDescriptor>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisError {
    /// Display path of the offending file.
    pub file: PathBuf,
    pub position: Position,
    pub message: String,
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file.display(), self.position, self.message)
    }
}

impl std::error::Error for AnalysisError {}

/// What a unit offers to the units importing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exports {
    pub package_name: String,
    pub types: BTreeSet<String>,
}

/// Artifacts of one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    pub package_name: Option<String>,
    pub types: BTreeMap<String, DeclaredType>,
    pub errors: Vec<AnalysisError>,
}

impl Analysis {
    pub fn exports(&self) -> Option<Exports> {
        let package_name = self.package_name.clone()?;
        Some(Exports {
            package_name,
            types: self.types.keys().cloned().collect(),
        })
    }
}

/// Analyze a set of files as one unit.
///
/// `expected_package` is the name found by build metadata, if any. `deps`
/// maps each import path to the exports of the unit it resolved to; paths
/// missing from it cannot be imported.
pub fn check<'a>(
    expected_package: Option<&str>,
    files: impl IntoIterator<Item = &'a SourceFile>,
    deps: &BTreeMap<String, Exports>,
) -> Analysis {
    let mut files: Vec<&SourceFile> = files.into_iter().collect();
    files.sort_by(|a, b| a.name.cmp(&b.name));

    let package_name = expected_package
        .map(str::to_string)
        .or_else(|| files.iter().find_map(|f| f.package.clone()));

    let mut checker = Checker {
        package: package_name.clone().unwrap_or_default(),
        deps,
        errors: Vec::new(),
    };

    // Package clauses.
    for file in &files {
        if let (Some(found), Some(expected)) = (&file.package, &package_name) {
            if found != expected {
                checker.error(
                    file,
                    Position::new(1, 1),
                    format!("package {found}; expected {expected}"),
                );
            }
        }
    }

    // Unit scope.
    let mut scope: BTreeMap<&str, (&SourceFile, &TypeDecl)> = BTreeMap::new();
    for &file in &files {
        for decl in &file.types {
            if decl.name == "_" {
                continue;
            }
            if scope.contains_key(decl.name.as_str()) {
                checker.error(
                    file,
                    decl.position,
                    format!("{} redeclared in this block", decl.name),
                );
                continue;
            }
            scope.insert(&decl.name, (file, decl));
        }
    }

    // Type expressions, in file then source order.
    let mut types = BTreeMap::new();
    for &file in &files {
        let imports = FileImports::new(&file.imports, deps);
        for decl in &file.types {
            let Some((_, winner)) = scope.get(decl.name.as_str()) else {
                continue;
            };
            if !std::ptr::eq(*winner, decl) {
                continue;
            }
            let ctx = Context {
                file,
                imports: &imports,
                scope: &scope,
                type_params: &decl.type_params,
            };
            // Struct fields are resolved once; the descriptor is built from them.
            let (descriptor, fields) = match &decl.ty {
                TypeExpr::Struct(fields) => {
                    let fields = checker.fields(&ctx, fields);
                    (struct_descriptor(&fields), Some(fields))
                }
                ty => (checker.describe(&ctx, ty), None),
            };
            types.insert(
                decl.name.clone(),
                DeclaredType {
                    name: decl.name.clone(),
                    file: file.name.clone(),
                    position: decl.position,
                    type_params: decl.type_params.clone(),
                    descriptor,
                    fields,
                },
            );
        }
    }

    inherit_struct_fields(&checker.package, &mut types);

    Analysis {
        package_name,
        types,
        errors: checker.errors,
    }
}

/// `type B A` and `type B = A` where `A` is a local struct expose the
/// fields of `A`.
fn inherit_struct_fields(package: &str, types: &mut BTreeMap<String, DeclaredType>) {
    let prefix = format!("{package}.");
    for _ in 0..types.len() {
        let pending: Vec<(String, Vec<FieldDescriptor>)> = types
            .values()
            .filter(|t| t.fields.is_none())
            .filter_map(|t| {
                let target = t.descriptor.strip_prefix(&prefix)?;
                let fields = types.get(target)?.fields.clone()?;
                Some((t.name.clone(), fields))
            })
            .collect();
        if pending.is_empty() {
            break;
        }
        for (name, fields) in pending {
            if let Some(t) = types.get_mut(&name) {
                t.fields = Some(fields);
            }
        }
    }
}

struct Checker<'a> {
    package: String,
    deps: &'a BTreeMap<String, Exports>,
    errors: Vec<AnalysisError>,
}

struct Context<'a, 'b> {
    file: &'b SourceFile,
    imports: &'b FileImports<'a>,
    scope: &'b BTreeMap<&'a str, (&'a SourceFile, &'a TypeDecl)>,
    type_params: &'b [String],
}

/// Local import names of one file.
struct FileImports<'a> {
    by_name: HashMap<String, &'a ImportSpec>,
    /// Exports of `import . "path"` dependencies, in import order.
    dot: Vec<&'a Exports>,
}

impl<'a> FileImports<'a> {
    fn new(specs: &'a [ImportSpec], deps: &'a BTreeMap<String, Exports>) -> Self {
        let mut by_name = HashMap::new();
        let mut dot = Vec::new();
        for spec in specs {
            let name = match spec.alias.as_deref() {
                Some("_") => continue,
                Some(".") => {
                    // Unresolved dot imports surface as undeclared names.
                    if let Some(exports) = deps.get(&spec.path) {
                        dot.push(exports);
                    }
                    continue;
                }
                Some(alias) => alias.to_string(),
                None => match deps.get(&spec.path) {
                    Some(exports) => exports.package_name.clone(),
                    None => default_package_name(&spec.path).to_string(),
                },
            };
            by_name.entry(name).or_insert(spec);
        }
        Self { by_name, dot }
    }

    /// Package name of the dot import declaring `name`.
    fn dot_package(&self, name: &str) -> Option<&'a str> {
        self.dot
            .iter()
            .copied()
            .find(|exports| exports.types.contains(name))
            .map(|exports| exports.package_name.as_str())
    }
}

fn struct_descriptor(fields: &[FieldDescriptor]) -> String {
    let fields: Vec<String> = fields
        .iter()
        .map(|f| format!("{} {}", f.name, f.type_descriptor))
        .collect();
    format!("struct{{{}}}", fields.join("; "))
}

/// Last path element, which is the conventional package name.
fn default_package_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

impl Checker<'_> {
    fn error(&mut self, file: &SourceFile, position: Position, message: String) {
        self.errors.push(AnalysisError {
            file: file.display_path.clone(),
            position,
            message,
        });
    }

    fn fields(&mut self, ctx: &Context<'_, '_>, fields: &[FieldDecl]) -> Vec<FieldDescriptor> {
        fields
            .iter()
            .map(|field| FieldDescriptor {
                name: field.name.clone(),
                type_descriptor: self.describe(ctx, &field.ty),
            })
            .collect()
    }

    fn describe(&mut self, ctx: &Context<'_, '_>, ty: &TypeExpr) -> String {
        match ty {
            TypeExpr::Name { name, position } => self.resolve_name(ctx, name, *position),
            TypeExpr::Qualified {
                package,
                name,
                position,
            } => self.resolve_qualified(ctx, package, name, *position),
            TypeExpr::Pointer(elem) => format!("*{}", self.describe(ctx, elem)),
            TypeExpr::Slice(elem) => format!("[]{}", self.describe(ctx, elem)),
            TypeExpr::Array { len, elem } => format!("[{}]{}", len, self.describe(ctx, elem)),
            TypeExpr::Map { key, value } => {
                let key = self.describe(ctx, key);
                format!("map[{}]{}", key, self.describe(ctx, value))
            }
            TypeExpr::Chan { dir, elem } => {
                let elem = self.describe(ctx, elem);
                match dir {
                    ChanDir::Both => format!("chan {elem}"),
                    ChanDir::Send => format!("chan<- {elem}"),
                    ChanDir::Receive => format!("<-chan {elem}"),
                }
            }
            TypeExpr::Generic { base, args } => {
                let base = self.describe(ctx, base);
                let args: Vec<String> = args.iter().map(|a| self.describe(ctx, a)).collect();
                format!("{}[{}]", base, args.join(", "))
            }
            TypeExpr::Struct(fields) => {
                let fields = self.fields(ctx, fields);
                struct_descriptor(&fields)
            }
            TypeExpr::Opaque(text) => text.clone(),
        }
    }

    fn resolve_name(&mut self, ctx: &Context<'_, '_>, name: &str, position: Position) -> String {
        if ctx.type_params.iter().any(|p| p == name) || PREDECLARED.contains(&name) {
            return name.to_string();
        }
        if ctx.scope.contains_key(name) {
            return format!("{}.{}", self.package, name);
        }
        if is_exported(name) {
            if let Some(package) = ctx.imports.dot_package(name) {
                return format!("{package}.{name}");
            }
        }
        self.error(ctx.file, position, format!("undeclared name: {name}"));
        name.to_string()
    }

    fn resolve_qualified(
        &mut self,
        ctx: &Context<'_, '_>,
        package: &str,
        name: &str,
        position: Position,
    ) -> String {
        let qualified = format!("{package}.{name}");
        let Some(spec) = ctx.imports.by_name.get(package) else {
            self.error(ctx.file, position, format!("undeclared name: {package}"));
            return qualified;
        };

        match spec.path.as_str() {
            "C" => return qualified,
            "unsafe" => {
                if name != "Pointer" {
                    self.error(
                        ctx.file,
                        position,
                        format!("{name} not declared by package unsafe"),
                    );
                }
                return qualified;
            }
            _ => {}
        }

        let Some(exports) = self.deps.get(&spec.path) else {
            self.error(ctx.file, position, format!("could not import {}", spec.path));
            return qualified;
        };
        if !is_exported(name) {
            self.error(
                ctx.file,
                position,
                format!("name {name} not exported by package {package}"),
            );
        } else if !exports.types.contains(name) {
            self.error(
                ctx.file,
                position,
                format!("{name} not declared by package {package}"),
            );
        }
        format!("{}.{}", exports.package_name, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_file;
    use std::path::Path;

    fn file(name: &str, source: &str) -> SourceFile {
        let path = Path::new("/src/foo").join(name);
        parse_file(name, &path, source).unwrap()
    }

    fn widgets() -> BTreeMap<String, Exports> {
        let mut deps = BTreeMap::new();
        deps.insert(
            "example.com/widgets".to_string(),
            Exports {
                package_name: "widgets".to_string(),
                types: ["Frame", "Part", "internal"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            },
        );
        deps
    }

    fn messages(analysis: &Analysis) -> Vec<&str> {
        analysis.errors.iter().map(|e| e.message.as_str()).collect()
    }

    #[test]
    fn test_single_string_field() {
        let files = [file("foo.go", "package foo\n\ntype FooOptions struct {\n\ta string\n}\n")];
        let analysis = check(Some("foo"), &files, &BTreeMap::new());

        assert!(analysis.errors.is_empty());
        let fields = analysis.types["FooOptions"].fields.as_ref().unwrap();
        assert_eq!(
            fields,
            &vec![FieldDescriptor {
                name: "a".to_string(),
                type_descriptor: "string".to_string(),
            }]
        );
    }

    #[test]
    fn test_descriptors() {
        let files = [file(
            "foo.go",
            r#"package foo

import (
    w "example.com/widgets"
    "unsafe"
)

type Base struct{}

type List[T any] struct {
    items []T
}

type Options struct {
    Base
    parts  []*w.Part
    lookup map[string][4]byte
    events <-chan error
    list   List[int]
    raw    unsafe.Pointer
    hook   func(int) error
}
"#,
        )];
        let analysis = check(Some("foo"), &files, &widgets());
        assert!(analysis.errors.is_empty(), "{:?}", analysis.errors);

        let fields: Vec<(&str, &str)> = analysis.types["Options"]
            .fields
            .as_ref()
            .unwrap()
            .iter()
            .map(|f| (f.name.as_str(), f.type_descriptor.as_str()))
            .collect();
        assert_eq!(
            fields,
            vec![
                ("Base", "foo.Base"),
                ("parts", "[]*widgets.Part"),
                ("lookup", "map[string][4]byte"),
                ("events", "<-chan error"),
                ("list", "foo.List[int]"),
                ("raw", "unsafe.Pointer"),
                ("hook", "func(int) error"),
            ]
        );
        assert_eq!(
            analysis.types["List"].fields.as_ref().unwrap()[0].type_descriptor,
            "[]T"
        );
    }

    #[test]
    fn test_reference_errors() {
        let files = [file(
            "foo.go",
            r#"package foo

import (
    "example.com/widgets"
    "example.com/missing"
)

type Options struct {
    a Unknown
    b other.Thing
    c missing.Thing
    d widgets.internal
    e widgets.Gear
    f widgets.Frame
}
"#,
        )];
        let analysis = check(Some("foo"), &files, &widgets());
        assert_eq!(
            messages(&analysis),
            vec![
                "undeclared name: Unknown",
                "undeclared name: other",
                "could not import example.com/missing",
                "name internal not exported by package widgets",
                "Gear not declared by package widgets",
            ]
        );
        assert_eq!(analysis.errors[0].file, PathBuf::from("/src/foo/foo.go"));
        assert_eq!(analysis.errors[0].position.line, 9);
    }

    #[test]
    fn test_package_mismatch_and_redeclaration() {
        let files = [
            file("a.go", "package foo\n\ntype A struct{}\n"),
            file("b.go", "package bar\n\ntype A struct{}\n"),
        ];
        let analysis = check(Some("foo"), &files, &BTreeMap::new());
        assert_eq!(
            messages(&analysis),
            vec!["package bar; expected foo", "A redeclared in this block"]
        );
        assert_eq!(analysis.types["A"].file, "a.go");
    }

    #[test]
    fn test_defined_type_inherits_fields() {
        let files = [file(
            "foo.go",
            "package foo\n\ntype A struct { x int }\ntype B A\ntype C = B\ntype D int\n",
        )];
        let analysis = check(None, &files, &BTreeMap::new());
        assert_eq!(analysis.package_name.as_deref(), Some("foo"));
        assert_eq!(analysis.types["C"].fields.as_ref().unwrap()[0].name, "x");
        assert!(analysis.types["D"].fields.is_none());
        assert_eq!(analysis.types["D"].descriptor, "int");
    }

    #[test]
    fn test_field_error_reported_once() {
        let files = [file("foo.go", "package foo\n\ntype T struct { p Missing }\n")];
        let analysis = check(Some("foo"), &files, &BTreeMap::new());
        assert_eq!(messages(&analysis), vec!["undeclared name: Missing"]);
        assert_eq!(analysis.types["T"].descriptor, "struct{p Missing}");
    }

    #[test]
    fn test_dot_import() {
        let files = [file(
            "foo.go",
            r#"package foo

import . "example.com/widgets"

type T struct {
    p Part
    q *Frame
    r Gear
}
"#,
        )];
        let analysis = check(Some("foo"), &files, &widgets());
        assert_eq!(messages(&analysis), vec!["undeclared name: Gear"]);

        let fields: Vec<(&str, &str)> = analysis.types["T"]
            .fields
            .as_ref()
            .unwrap()
            .iter()
            .map(|f| (f.name.as_str(), f.type_descriptor.as_str()))
            .collect();
        assert_eq!(
            fields,
            vec![("p", "widgets.Part"), ("q", "*widgets.Frame"), ("r", "Gear")]
        );
    }

    #[test]
    fn test_check_is_idempotent() {
        let files = [
            file("b.go", "package foo\n\ntype B struct { x Missing }\n"),
            file("a.go", "package foo\n\ntype A struct { y Other }\n"),
        ];
        let first = check(Some("foo"), &files, &BTreeMap::new());
        let second = check(Some("foo"), files.iter().rev(), &BTreeMap::new());
        assert_eq!(first, second);
        assert_eq!(
            messages(&first),
            vec!["undeclared name: Other", "undeclared name: Missing"]
        );
    }
}
