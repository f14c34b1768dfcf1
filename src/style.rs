//! Style Preprocessor.
//!
//! Expands nested style-sheet syntax into flat declaration blocks. Runs
//! strictly after the identifier rewriter, so selector namespacing and
//! nesting expansion never interact: the rewriter sees the authored (still
//! nested) source, and this pass only joins already-prefixed selectors.
//!
//! Supported nesting: child rules inside rules, `&` parent references,
//! comma groups on both sides, and `@media`/`@supports` blocks which wrap
//! their flattened children. `@keyframes` bodies are emitted verbatim since
//! their frame selectors must not be joined with the parent.

/// One parsed node of the (possibly nested) sheet.
#[derive(Debug)]
enum StyleNode {
    Declaration(String),
    Rule {
        selector: String,
        children: Vec<StyleNode>,
    },
}

/// Flatten a nested sheet into flat rules. Returns an error message on
/// unbalanced braces; the caller attaches the file name and surfaces it as
/// an `error`-kind artifact descriptor.
pub fn flatten_styles(source: &str) -> Result<String, String> {
    let stripped = strip_comments(source);
    let mut cursor = Cursor::new(&stripped);
    let nodes = parse_block(&mut cursor, 0)?;
    if cursor.depth != 0 {
        return Err("unbalanced braces in style sheet".to_string());
    }

    let mut out = String::new();
    emit_nodes(&nodes, None, &mut out);
    Ok(out.trim_end().to_string())
}

struct Cursor<'a> {
    chars: Vec<char>,
    pos: usize,
    depth: i32,
    _src: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Cursor {
            chars: src.chars().collect(),
            pos: 0,
            depth: 0,
            _src: src,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }
}

/// Parse one brace-delimited block (or the top level) into nodes.
fn parse_block(cursor: &mut Cursor, level: u32) -> Result<Vec<StyleNode>, String> {
    if level > 64 {
        return Err("style nesting too deep".to_string());
    }

    let mut nodes = Vec::new();
    let mut buf = String::new();

    while let Some(c) = cursor.next() {
        match c {
            '{' => {
                cursor.depth += 1;
                let selector = buf.trim().to_string();
                buf.clear();
                if selector.is_empty() {
                    return Err("block without a selector".to_string());
                }
                let children = if selector.starts_with("@keyframes") {
                    vec![StyleNode::Declaration(read_raw_block(cursor)?)]
                } else {
                    parse_block(cursor, level + 1)?
                };
                nodes.push(StyleNode::Rule { selector, children });
            }
            '}' => {
                cursor.depth -= 1;
                if cursor.depth < 0 {
                    return Err("unexpected closing brace".to_string());
                }
                push_declaration(&mut nodes, &mut buf);
                return Ok(nodes);
            }
            ';' => {
                push_declaration(&mut nodes, &mut buf);
            }
            '"' | '\'' => {
                buf.push(c);
                while let Some(sc) = cursor.next() {
                    buf.push(sc);
                    if sc == '\\' {
                        if let Some(esc) = cursor.next() {
                            buf.push(esc);
                        }
                    } else if sc == c {
                        break;
                    }
                }
            }
            _ => buf.push(c),
        }
    }

    push_declaration(&mut nodes, &mut buf);
    Ok(nodes)
}

/// Read a `@keyframes` body verbatim up to its matching close brace.
fn read_raw_block(cursor: &mut Cursor) -> Result<String, String> {
    let mut raw = String::new();
    let mut inner = 1;
    while let Some(c) = cursor.next() {
        match c {
            '{' => {
                inner += 1;
                cursor.depth += 1;
                raw.push(c);
            }
            '}' => {
                inner -= 1;
                cursor.depth -= 1;
                if inner == 0 {
                    return Ok(raw.trim().to_string());
                }
                raw.push(c);
            }
            _ => raw.push(c),
        }
    }
    Err("unterminated @keyframes block".to_string())
}

fn push_declaration(nodes: &mut Vec<StyleNode>, buf: &mut String) {
    let decl = buf.trim();
    if !decl.is_empty() {
        nodes.push(StyleNode::Declaration(decl.to_string()));
    }
    buf.clear();
}

/// Emit flattened rules depth-first. `parent` is the accumulated selector
/// context, already comma-expanded.
fn emit_nodes(nodes: &[StyleNode], parent: Option<&str>, out: &mut String) {
    // Declarations belonging to this level collect into one flat block.
    let decls: Vec<&String> = nodes
        .iter()
        .filter_map(|n| match n {
            StyleNode::Declaration(d) => Some(d),
            _ => None,
        })
        .collect();

    if let (Some(sel), false) = (parent, decls.is_empty()) {
        out.push_str(sel);
        out.push_str(" {\n");
        for d in &decls {
            out.push_str("  ");
            out.push_str(d);
            out.push_str(";\n");
        }
        out.push_str("}\n");
    } else if parent.is_none() {
        // Top-level declarations are at-statements like @import; pass through.
        for d in &decls {
            out.push_str(d);
            out.push_str(";\n");
        }
    }

    for node in nodes {
        if let StyleNode::Rule { selector, children } = node {
            if selector.starts_with("@media") || selector.starts_with("@supports") {
                let mut inner = String::new();
                emit_nodes(children, parent, &mut inner);
                out.push_str(selector);
                out.push_str(" {\n");
                for line in inner.lines() {
                    out.push_str("  ");
                    out.push_str(line);
                    out.push('\n');
                }
                out.push_str("}\n");
            } else if selector.starts_with("@keyframes") {
                out.push_str(selector);
                out.push_str(" {\n");
                if let Some(StyleNode::Declaration(raw)) = children.first() {
                    for line in raw.lines() {
                        out.push_str("  ");
                        out.push_str(line.trim());
                        out.push('\n');
                    }
                }
                out.push_str("}\n");
            } else {
                let combined = combine_selectors(parent, selector);
                emit_nodes(children, Some(&combined), out);
            }
        }
    }
}

/// Join a nested selector onto its parent. `&` splices the parent in place;
/// otherwise the nested selector is a descendant. Comma groups on either
/// side multiply out.
fn combine_selectors(parent: Option<&str>, child: &str) -> String {
    let parents: Vec<&str> = match parent {
        Some(p) => p.split(',').map(str::trim).collect(),
        None => vec![""],
    };
    let children: Vec<&str> = child.split(',').map(str::trim).collect();

    let mut parts = Vec::with_capacity(parents.len() * children.len());
    for p in &parents {
        for c in &children {
            if c.contains('&') {
                parts.push(c.replace('&', p));
            } else if p.is_empty() {
                parts.push((*c).to_string());
            } else {
                parts.push(format!("{} {}", p, c));
            }
        }
    }
    parts.join(", ")
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            let mut prev = ' ';
            for cc in chars.by_ref() {
                if prev == '*' && cc == '/' {
                    break;
                }
                prev = cc;
            }
        } else {
            out.push(c);
        }
    }
    out
}
