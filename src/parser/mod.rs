//! Go source parsing.
//!
//! Wraps tree-sitter-go and reduces each file to its declaration-level
//! syntax ([`SourceFile`]).

pub mod go;
pub mod syntax;

use std::path::Path;
use thiserror::Error;
use tree_sitter::Parser;

pub use syntax::{
    is_pseudo_package, ChanDir, FieldDecl, ImportSpec, Position, SourceFile, SyntaxError,
    TypeDecl, TypeExpr,
};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to load the Go grammar: {0}")]
    Language(#[from] tree_sitter::LanguageError),

    #[error("parser produced no tree for {name}")]
    NoTree { name: String },
}

/// Parse one Go file.
///
/// `name` is the key the file is registered under in its unit and
/// `display_path` the path used when reporting positions. Syntax errors do
/// not fail the parse; they are recorded in [`SourceFile::errors`].
pub fn parse_file(name: &str, display_path: &Path, source: &str) -> Result<SourceFile, ParseError> {
    let mut parser = Parser::new();
    parser.set_language(&tree_sitter_go::LANGUAGE.into())?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| ParseError::NoTree {
            name: name.to_string(),
        })?;

    Ok(go::extract(
        &tree.root_node(),
        source.as_bytes(),
        name,
        display_path,
    ))
}
