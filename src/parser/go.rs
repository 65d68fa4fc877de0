//! Go declaration extraction via AST traversal.
//!
//! Walks the tree-sitter-go syntax tree and keeps:
//!   package foo
//!   import alias "path"
//!   type Name[T any] struct { ... }
//!
//! tree-sitter recovers from syntax errors, so a broken file still yields
//! whatever declarations could be recognized plus a list of errors.

use std::path::Path;
use tree_sitter::Node;

use super::syntax::*;

/// Upper bound on reported syntax errors per file.
const MAX_SYNTAX_ERRORS: usize = 10;

/// Extract declarations from a parsed Go file.
pub fn extract(root: &Node, source: &[u8], name: &str, display_path: &Path) -> SourceFile {
    let mut file = SourceFile {
        name: name.to_string(),
        display_path: display_path.to_path_buf(),
        package: None,
        imports: Vec::new(),
        types: Vec::new(),
        errors: Vec::new(),
    };

    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        match child.kind() {
            "package_clause" => {
                file.package = child
                    .named_child(0)
                    .and_then(|n| text(&n, source))
                    .map(str::to_string);
            }
            "import_declaration" => extract_imports(&child, source, &mut file.imports),
            "type_declaration" => extract_types(&child, source, &mut file.types),
            _ => {}
        }
    }

    if root.has_error() {
        collect_errors(root, source, &mut file.errors);
    }

    file
}

fn text<'a>(node: &Node, source: &'a [u8]) -> Option<&'a str> {
    node.utf8_text(source).ok()
}

fn position(node: &Node) -> Position {
    let point = node.start_position();
    Position::new(point.row + 1, point.column + 1)
}

fn normalized(node: &Node, source: &[u8]) -> String {
    text(node, source)
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}

/// Strip the quotes of an interpreted or raw string literal.
fn unquote(literal: &str) -> String {
    let trimmed = literal.trim();
    let inner = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('`').and_then(|s| s.strip_suffix('`')));
    inner.unwrap_or(trimmed).to_string()
}

/// Recursively collect `import_spec` nodes (single or parenthesized).
fn extract_imports(node: &Node, source: &[u8], imports: &mut Vec<ImportSpec>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "import_spec" => {
                let Some(path) = child
                    .child_by_field_name("path")
                    .and_then(|p| text(&p, source))
                    .map(unquote)
                else {
                    continue;
                };
                let alias = child
                    .child_by_field_name("name")
                    .and_then(|n| text(&n, source))
                    .map(str::to_string);
                imports.push(ImportSpec {
                    path,
                    alias,
                    position: position(&child),
                });
            }
            "import_spec_list" => extract_imports(&child, source, imports),
            _ => {}
        }
    }
}

/// Collect the `type_spec` / `type_alias` entries of a type declaration.
fn extract_types(node: &Node, source: &[u8], types: &mut Vec<TypeDecl>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        let alias = match child.kind() {
            "type_spec" => false,
            "type_alias" => true,
            _ => continue,
        };

        let Some(name_node) = child.child_by_field_name("name") else {
            continue;
        };
        let Some(name) = text(&name_node, source) else {
            continue;
        };
        let ty = child
            .child_by_field_name("type")
            .map(|t| type_expr(&t, source))
            .unwrap_or_else(|| TypeExpr::Opaque(String::new()));
        let type_params = child
            .child_by_field_name("type_parameters")
            .map(|p| type_param_names(&p, source))
            .unwrap_or_default();

        types.push(TypeDecl {
            name: name.to_string(),
            position: position(&name_node),
            type_params,
            alias,
            ty,
        });
    }
}

fn type_param_names(node: &Node, source: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = node.walk();
    for decl in node.named_children(&mut cursor) {
        if decl.kind() != "type_parameter_declaration" {
            continue;
        }
        let mut name_cursor = decl.walk();
        for name in decl.children_by_field_name("name", &mut name_cursor) {
            if let Some(n) = text(&name, source) {
                names.push(n.to_string());
            }
        }
    }
    names
}

/// Convert a type node into a [`TypeExpr`].
fn type_expr(node: &Node, source: &[u8]) -> TypeExpr {
    let boxed = |field: &str| -> Box<TypeExpr> {
        Box::new(
            node.child_by_field_name(field)
                .map(|n| type_expr(&n, source))
                .unwrap_or_else(|| TypeExpr::Opaque(String::new())),
        )
    };

    match node.kind() {
        "type_identifier" => TypeExpr::Name {
            name: text(node, source).unwrap_or_default().to_string(),
            position: position(node),
        },
        "qualified_type" => {
            let part = |field: &str| {
                node.child_by_field_name(field)
                    .and_then(|n| text(&n, source))
                    .unwrap_or_default()
                    .to_string()
            };
            TypeExpr::Qualified {
                package: part("package"),
                name: part("name"),
                position: position(node),
            }
        }
        "pointer_type" => match node.named_child(0) {
            Some(inner) => TypeExpr::Pointer(Box::new(type_expr(&inner, source))),
            None => TypeExpr::Opaque(normalized(node, source)),
        },
        "parenthesized_type" => match node.named_child(0) {
            Some(inner) => type_expr(&inner, source),
            None => TypeExpr::Opaque(normalized(node, source)),
        },
        "slice_type" => TypeExpr::Slice(boxed("element")),
        "array_type" => TypeExpr::Array {
            len: node
                .child_by_field_name("length")
                .map(|n| normalized(&n, source))
                .unwrap_or_default(),
            elem: boxed("element"),
        },
        "implicit_length_array_type" => TypeExpr::Array {
            len: "...".to_string(),
            elem: boxed("element"),
        },
        "map_type" => TypeExpr::Map {
            key: boxed("key"),
            value: boxed("value"),
        },
        "channel_type" => {
            let raw = normalized(node, source);
            let dir = if raw.starts_with("<-") {
                ChanDir::Receive
            } else if raw.replace(' ', "").starts_with("chan<-") {
                ChanDir::Send
            } else {
                ChanDir::Both
            };
            TypeExpr::Chan {
                dir,
                elem: boxed("value"),
            }
        }
        "generic_type" => {
            let mut args = Vec::new();
            if let Some(list) = node.child_by_field_name("type_arguments") {
                let mut cursor = list.walk();
                for arg in list.named_children(&mut cursor) {
                    args.push(type_argument(&arg, source));
                }
            }
            TypeExpr::Generic {
                base: boxed("type"),
                args,
            }
        }
        "struct_type" => TypeExpr::Struct(struct_fields(node, source)),
        _ => TypeExpr::Opaque(normalized(node, source)),
    }
}

/// A type argument is a `type_elem`; unions stay opaque.
fn type_argument(node: &Node, source: &[u8]) -> TypeExpr {
    if node.kind() == "type_elem" {
        if node.named_child_count() == 1 {
            if let Some(inner) = node.named_child(0) {
                return type_expr(&inner, source);
            }
        }
        return TypeExpr::Opaque(normalized(node, source));
    }
    type_expr(node, source)
}

/// Fields of a struct type, in declaration order.
fn struct_fields(node: &Node, source: &[u8]) -> Vec<FieldDecl> {
    let mut fields = Vec::new();
    let mut cursor = node.walk();
    let Some(list) = node
        .named_children(&mut cursor)
        .find(|c| c.kind() == "field_declaration_list")
    else {
        return fields;
    };

    let mut list_cursor = list.walk();
    for decl in list.named_children(&mut list_cursor) {
        if decl.kind() != "field_declaration" {
            continue;
        }
        let Some(type_node) = decl.child_by_field_name("type") else {
            continue;
        };
        let ty = type_expr(&type_node, source);

        let mut name_cursor = decl.walk();
        let names: Vec<Node> = decl
            .children_by_field_name("name", &mut name_cursor)
            .collect();

        if names.is_empty() {
            // Embedded field: `T`, `*T`, `pkg.T`.
            let mut child_cursor = decl.walk();
            let pointer = decl
                .children(&mut child_cursor)
                .any(|c| !c.is_named() && c.kind() == "*");
            let ty = if pointer { TypeExpr::Pointer(Box::new(ty)) } else { ty };
            if let Some(name) = ty.embedded_name().map(str::to_string) {
                fields.push(FieldDecl {
                    name,
                    embedded: true,
                    ty,
                    position: position(&decl),
                });
            }
            continue;
        }

        for name in names {
            fields.push(FieldDecl {
                name: text(&name, source).unwrap_or_default().to_string(),
                embedded: false,
                ty: ty.clone(),
                position: position(&name),
            });
        }
    }
    fields
}

/// Walk the subtrees that contain errors and record ERROR / MISSING nodes.
fn collect_errors(node: &Node, source: &[u8], errors: &mut Vec<SyntaxError>) {
    if errors.len() >= MAX_SYNTAX_ERRORS {
        return;
    }

    if node.is_missing() {
        errors.push(SyntaxError {
            position: position(node),
            message: format!("missing {}", node.kind()),
        });
        return;
    }

    if node.is_error() {
        let snippet: String = normalized(node, source).chars().take(32).collect();
        errors.push(SyntaxError {
            position: position(node),
            message: format!("syntax error near `{}`", snippet),
        });
        return;
    }

    let count = node.child_count();
    for i in 0..count {
        if let Some(child) = node.child(i) {
            if child.has_error() || child.is_missing() {
                collect_errors(&child, source, errors);
            }
        }
    }
}
