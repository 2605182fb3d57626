//! Compact type-definition parser
//!
//! Line-oriented syntax:
//!
//! ```text
//! <demo = 'http://example.org/demo/1.0'>
//! [demo:page] > nt:base, mix:referenceable orderable
//!   - demo:title (string) mandatory
//!   - demo:tags (string) multiple
//!   + * (demo:page) = demo:page sns
//! ```
//!
//! Each type block parses independently. A malformed block is reported with
//! its line number and does not prevent the other blocks from parsing.

use crate::error::{StoreError, StoreResult};
use crate::nodetype::{ChildDefinition, NodeTypeDefinition, PropertyDefinition, NT_BASE};
use crate::value::PropertyType;

/// Result of parsing one type-definition document
#[derive(Debug, Default)]
pub struct CndDocument {
    /// Namespace declarations, in document order
    pub namespaces: Vec<(String, String)>,
    /// Successfully parsed types, in document order
    pub types: Vec<NodeTypeDefinition>,
    /// One error per malformed namespace line or type block
    pub errors: Vec<StoreError>,
}

/// Parse a type-definition document
pub fn parse(text: &str) -> CndDocument {
    let mut doc = CndDocument::default();
    let mut current: Option<NodeTypeDefinition> = None;
    let mut skipping = false;

    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('<') {
            if let Some(def) = current.take() {
                doc.types.push(def);
            }
            skipping = false;
            match parse_namespace(line, line_no) {
                Ok(binding) => doc.namespaces.push(binding),
                Err(e) => doc.errors.push(e),
            }
        } else if line.starts_with('[') {
            if let Some(def) = current.take() {
                doc.types.push(def);
            }
            match parse_header(line, line_no) {
                Ok(def) => {
                    current = Some(def);
                    skipping = false;
                }
                Err(e) => {
                    doc.errors.push(e);
                    skipping = true;
                }
            }
        } else if skipping {
            continue;
        } else if let Some(def) = current.as_mut() {
            let item = if let Some(rest) = line.strip_prefix('-') {
                parse_property(rest, line_no).map(|p| def.properties.push(p))
            } else if let Some(rest) = line.strip_prefix('+') {
                parse_child(rest, line_no).map(|c| def.children.push(c))
            } else {
                Err(StoreError::type_definition(
                    line_no,
                    format!("unexpected line '{}'", line),
                ))
            };
            if let Err(e) = item {
                doc.errors.push(e);
                current = None;
                skipping = true;
            }
        } else {
            doc.errors.push(StoreError::type_definition(
                line_no,
                "item definition outside of a node type",
            ));
        }
    }

    if let Some(def) = current.take() {
        doc.types.push(def);
    }
    doc
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(pos) if !line[..pos].contains('\'') => &line[..pos],
        _ => line,
    }
}

fn parse_namespace(line: &str, line_no: usize) -> StoreResult<(String, String)> {
    let inner = line
        .strip_prefix('<')
        .and_then(|l| l.strip_suffix('>'))
        .ok_or_else(|| StoreError::type_definition(line_no, "unterminated namespace declaration"))?;
    let (prefix, uri) = inner
        .split_once('=')
        .ok_or_else(|| StoreError::type_definition(line_no, "expected <prefix = 'uri'>"))?;
    let prefix = unquote(prefix.trim());
    let uri = unquote(uri.trim());
    if prefix.is_empty() || uri.is_empty() {
        return Err(StoreError::type_definition(
            line_no,
            "namespace prefix and URI must not be empty",
        ));
    }
    Ok((prefix.to_string(), uri.to_string()))
}

fn parse_header(line: &str, line_no: usize) -> StoreResult<NodeTypeDefinition> {
    let close = line
        .find(']')
        .ok_or_else(|| StoreError::type_definition(line_no, "missing ']' after type name"))?;
    let name = unquote(line[1..close].trim());
    if name.is_empty() {
        return Err(StoreError::type_definition(line_no, "empty type name"));
    }
    let mut def = NodeTypeDefinition::new(name);
    let mut rest = line[close + 1..].trim();

    if let Some(after) = rest.strip_prefix('>') {
        let mut supertypes = Vec::new();
        let mut remaining = after.trim();
        loop {
            let (token, tail) = split_token(remaining);
            let token = token.trim_end_matches(',');
            if token.is_empty() {
                break;
            }
            supertypes.push(token.to_string());
            let continues = token_continues(after, tail);
            remaining = tail.trim_start_matches(',').trim_start();
            if !continues {
                break;
            }
        }
        if supertypes.is_empty() {
            return Err(StoreError::type_definition(line_no, "expected supertypes after '>'"));
        }
        def.supertypes = supertypes;
        rest = remaining;
    }

    for option in rest.split_whitespace() {
        match option.to_ascii_lowercase().as_str() {
            "orderable" | "ord" | "o" => def.orderable = true,
            "mixin" | "mix" | "m" => def.mixin = true,
            "abstract" | "abs" | "a" => def.is_abstract = true,
            other => {
                return Err(StoreError::type_definition(
                    line_no,
                    format!("unknown node type option '{}'", other),
                ))
            }
        }
    }

    if def.supertypes.is_empty() && !def.mixin {
        def.supertypes.push(NT_BASE.to_string());
    }
    Ok(def)
}

/// Split the next whitespace-delimited token off the front
fn split_token(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(pos) => (&text[..pos], text[pos..].trim_start()),
        None => (text, ""),
    }
}

/// Whether the supertype list continues after the token just consumed
fn token_continues(list: &str, remaining: &str) -> bool {
    let consumed = &list[..list.len() - remaining.len()];
    consumed.trim_end().ends_with(',') || remaining.starts_with(',')
}

fn parse_property(text: &str, line_no: usize) -> StoreResult<PropertyDefinition> {
    let (name, rest) = split_token(text);
    if name.is_empty() {
        return Err(StoreError::type_definition(line_no, "missing property name"));
    }
    let (type_name, rest) = parse_parenthesized(rest, line_no)?;
    let required_type = match type_name {
        Some(t) => t
            .parse::<PropertyType>()
            .map_err(|e| StoreError::type_definition(line_no, e))?,
        None => PropertyType::String,
    };

    let mut def = PropertyDefinition {
        name: unquote(name).to_string(),
        required_type,
        multiple: false,
        mandatory: false,
    };
    for attr in rest.split_whitespace() {
        match attr.to_ascii_lowercase().as_str() {
            "multiple" | "mul" | "*" => def.multiple = true,
            "mandatory" | "man" | "!" => def.mandatory = true,
            other => {
                return Err(StoreError::type_definition(
                    line_no,
                    format!("unknown property attribute '{}'", other),
                ))
            }
        }
    }
    Ok(def)
}

fn parse_child(text: &str, line_no: usize) -> StoreResult<ChildDefinition> {
    let (name, rest) = split_token(text);
    if name.is_empty() {
        return Err(StoreError::type_definition(line_no, "missing child node name"));
    }
    let (required, mut rest) = parse_parenthesized(rest, line_no)?;

    let mut default_type = None;
    if let Some(after) = rest.strip_prefix('=') {
        let (token, tail) = split_token(after);
        if token.is_empty() {
            return Err(StoreError::type_definition(line_no, "expected default type after '='"));
        }
        default_type = Some(token.to_string());
        rest = tail;
    }

    let mut def = ChildDefinition {
        name: unquote(name).to_string(),
        required_type: required.unwrap_or(NT_BASE).to_string(),
        default_type,
        same_name_siblings: false,
    };
    for attr in rest.split_whitespace() {
        match attr.to_ascii_lowercase().as_str() {
            "sns" | "*" | "multiple" => def.same_name_siblings = true,
            other => {
                return Err(StoreError::type_definition(
                    line_no,
                    format!("unknown child node attribute '{}'", other),
                ))
            }
        }
    }
    Ok(def)
}

/// Parse an optional `(type)` group, returning its content and the remaining text
fn parse_parenthesized(text: &str, line_no: usize) -> StoreResult<(Option<&str>, &str)> {
    let text = text.trim_start();
    match text.strip_prefix('(') {
        Some(inner) => {
            let close = inner
                .find(')')
                .ok_or_else(|| StoreError::type_definition(line_no, "missing ')'"))?;
            let content = inner[..close].trim();
            if content.is_empty() {
                return Err(StoreError::type_definition(line_no, "empty type in '()'"));
            }
            Ok((Some(content), inner[close + 1..].trim_start()))
        }
        None => Ok((None, text)),
    }
}

fn unquote(text: &str) -> &str {
    text.trim_matches(|c| c == '\'' || c == '"')
}
