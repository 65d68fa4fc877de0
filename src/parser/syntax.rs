//! Declaration-level syntax of a Go source file.
//!
//! This is the intermediate representation produced by the parser and
//! consumed by semantic analysis. Function bodies and values are not kept;
//! only what dependency discovery and type analysis need.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// 1-indexed line and column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A recoverable syntax error. The file's syntax is still registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub position: Position,
    pub message: String,
}

/// One `import` spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    /// The unquoted reference, e.g. `github.com/acme/widgets`.
    pub path: String,
    /// Explicit local name (`_` and `.` included).
    pub alias: Option<String>,
    pub position: Position,
}

/// Direction of a channel type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanDir {
    Both,
    Send,
    Receive,
}

/// A type expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    /// A bare identifier: `string`, `Widget`, `T`.
    Name { name: String, position: Position },
    /// `pkg.Name`.
    Qualified {
        package: String,
        name: String,
        position: Position,
    },
    Pointer(Box<TypeExpr>),
    Slice(Box<TypeExpr>),
    Array { len: String, elem: Box<TypeExpr> },
    Map { key: Box<TypeExpr>, value: Box<TypeExpr> },
    Chan { dir: ChanDir, elem: Box<TypeExpr> },
    /// Instantiation of a generic type: `List[int]`.
    Generic { base: Box<TypeExpr>, args: Vec<TypeExpr> },
    /// An anonymous struct.
    Struct(Vec<FieldDecl>),
    /// Function and interface types, kept as whitespace-normalized text.
    Opaque(String),
}

impl TypeExpr {
    /// The name an embedded field of this type gets.
    pub fn embedded_name(&self) -> Option<&str> {
        match self {
            TypeExpr::Name { name, .. } | TypeExpr::Qualified { name, .. } => Some(name),
            TypeExpr::Pointer(inner) => inner.embedded_name(),
            TypeExpr::Generic { base, .. } => base.embedded_name(),
            _ => None,
        }
    }
}

/// A struct field. Embedded fields are named after their type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub embedded: bool,
    pub ty: TypeExpr,
    pub position: Position,
}

/// A top-level `type` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    pub name: String,
    pub position: Position,
    /// Names of the declaration's type parameters.
    pub type_params: Vec<String>,
    /// `type A = B`.
    pub alias: bool,
    pub ty: TypeExpr,
}

/// Everything extracted from one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Name the file is registered under within its unit.
    pub name: String,
    /// Path used when reporting positions.
    pub display_path: PathBuf,
    pub package: Option<String>,
    pub imports: Vec<ImportSpec>,
    pub types: Vec<TypeDecl>,
    pub errors: Vec<SyntaxError>,
}

impl SourceFile {
    /// Dependency references declared by this file, pseudo-packages
    /// excluded.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.imports
            .iter()
            .map(|spec| spec.path.as_str())
            .filter(|path| !is_pseudo_package(path))
    }
}

/// `C` and `unsafe` are provided by the toolchain, not by a directory.
pub fn is_pseudo_package(path: &str) -> bool {
    path == "C" || path == "unsafe"
}
