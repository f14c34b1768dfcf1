//! Module Sandbox Evaluator.
//!
//! Settings-schema and localization modules must stay mutable and
//! re-serializable at runtime, so they bypass the bundler. This evaluator
//! turns their source into live objects instead: import/export statements
//! are pattern-rewritten into a minimal assignment convention, the result
//! is executed by a restricted interpreter with a whitelist-backed module
//! resolver, and the produced exports are read back.
//!
//! The evaluator never throws outward. Every failure (unknown syntax, a
//! malformed literal, an invalid constructor argument) surfaces as `None`,
//! because a broken user package must degrade a single placed instance,
//! never the host page. This is a sandboxed-interpreter pattern, not a
//! general `eval`: the grammar covers exactly what the two module kinds
//! need (const bindings, member access, `new` on resolver-provided
//! constructors, object/array/scalar literals) and nothing more.

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::debug;

use crate::localization::LocalizationTable;
use crate::module_env::{LOCALIZE_MODULE, ModuleEnv, SETTINGS_MODULE};
use crate::settings_schema::SettingGroup;
use crate::value::{CtorKind, Value, is_valid_identifier, parse_literal};

// ═══════════════════════════════════════════════════════════════════════════════
// IMPORT/EXPORT REWRITE
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    static ref NAMED_IMPORT_RE: Regex =
        Regex::new(r#"import\s*\{([^}]*)\}\s*from\s*['"]([^'"]+)['"]\s*;?"#).unwrap();
    static ref NAMESPACE_IMPORT_RE: Regex = Regex::new(
        r#"import\s*\*\s*as\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*from\s*['"]([^'"]+)['"]\s*;?"#
    )
    .unwrap();
    static ref DEFAULT_IMPORT_RE: Regex = Regex::new(
        r#"import\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*from\s*['"]([^'"]+)['"]\s*;?"#
    )
    .unwrap();
    static ref BARE_IMPORT_RE: Regex =
        Regex::new(r#"import\s*['"][^'"]+['"]\s*;?"#).unwrap();
    static ref EXPORT_DECL_RE: Regex =
        Regex::new(r"export\s+(?:const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=").unwrap();
    static ref EXPORT_DEFAULT_RE: Regex = Regex::new(r"export\s+default\s+").unwrap();
    static ref EXPORT_LIST_RE: Regex = Regex::new(r"export\s*\{([^}]*)\}\s*;?").unwrap();
}

/// Rewrite ES module syntax into the interpreter's assignment convention:
/// imports become `const <local> = __module("<name>").<member>;`, exported
/// declarations become `exports.<name> = ...`.
pub fn rewrite_module_syntax(source: &str) -> String {
    let out = NAMED_IMPORT_RE.replace_all(source, |caps: &Captures| {
        let module = &caps[2];
        let mut lines = String::new();
        for spec in caps[1].split(',') {
            let spec = spec.trim();
            if spec.is_empty() {
                continue;
            }
            let (imported, local) = match spec.split_once(" as ") {
                Some((i, l)) => (i.trim(), l.trim()),
                None => (spec, spec),
            };
            lines.push_str(&format!(
                "const {} = __module(\"{}\").{};\n",
                local, module, imported
            ));
        }
        lines
    });

    let out = NAMESPACE_IMPORT_RE.replace_all(&out, |caps: &Captures| {
        format!("const {} = __module(\"{}\");\n", &caps[1], &caps[2])
    });

    let out = DEFAULT_IMPORT_RE.replace_all(&out, |caps: &Captures| {
        format!("const {} = __module(\"{}\").default;\n", &caps[1], &caps[2])
    });

    let out = BARE_IMPORT_RE.replace_all(&out, "");

    let out = EXPORT_DECL_RE.replace_all(&out, |caps: &Captures| {
        format!("exports.{} =", &caps[1])
    });

    let out = EXPORT_DEFAULT_RE.replace_all(&out, "exports.default = ");

    let out = EXPORT_LIST_RE.replace_all(&out, |caps: &Captures| {
        let mut lines = String::new();
        for spec in caps[1].split(',') {
            let spec = spec.trim();
            if spec.is_empty() {
                continue;
            }
            let (local, exported) = match spec.split_once(" as ") {
                Some((l, e)) => (l.trim(), e.trim()),
                None => (spec, spec),
            };
            lines.push_str(&format!("exports.{} = {};\n", exported, local));
        }
        lines
    });

    out.into_owned()
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATEMENT SCANNER
// ═══════════════════════════════════════════════════════════════════════════════

/// Split source into top-level statements. Depth-, quote- and
/// comment-aware; comment text is dropped so a `;` inside one cannot split
/// a statement.
fn split_statements(source: &str) -> Vec<String> {
    let chars: Vec<char> = source.chars().collect();
    let mut statements = Vec::new();
    let mut buf = String::new();
    let mut depth: i32 = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i += 2;
                continue;
            }
            '"' | '\'' | '`' => {
                buf.push(c);
                i += 1;
                while i < chars.len() {
                    buf.push(chars[i]);
                    if chars[i] == '\\' {
                        i += 1;
                        if i < chars.len() {
                            buf.push(chars[i]);
                        }
                    } else if chars[i] == c {
                        break;
                    }
                    i += 1;
                }
            }
            '(' | '[' | '{' => {
                depth += 1;
                buf.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                buf.push(c);
            }
            ';' if depth == 0 => {
                let stmt = buf.trim().to_string();
                if !stmt.is_empty() {
                    statements.push(stmt);
                }
                buf.clear();
            }
            _ => buf.push(c),
        }
        i += 1;
    }

    let tail = buf.trim().to_string();
    if !tail.is_empty() {
        statements.push(tail);
    }
    statements
}

/// Split a call's argument text at top-level commas.
fn split_arguments(args: &str) -> Vec<String> {
    let chars: Vec<char> = args.chars().collect();
    let mut parts = Vec::new();
    let mut buf = String::new();
    let mut depth: i32 = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' | '`' => {
                buf.push(c);
                i += 1;
                while i < chars.len() {
                    buf.push(chars[i]);
                    if chars[i] == '\\' {
                        i += 1;
                        if i < chars.len() {
                            buf.push(chars[i]);
                        }
                    } else if chars[i] == c {
                        break;
                    }
                    i += 1;
                }
            }
            '(' | '[' | '{' => {
                depth += 1;
                buf.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                buf.push(c);
            }
            ',' if depth == 0 => {
                parts.push(buf.trim().to_string());
                buf.clear();
            }
            _ => buf.push(c),
        }
        i += 1;
    }
    let tail = buf.trim().to_string();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}

/// Index of the `)` matching the `(` at `open`, quote-aware.
fn matching_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '"' | '\'' | '`' => {
                let quote = chars[i];
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERPRETER
// ═══════════════════════════════════════════════════════════════════════════════

struct Interp<'a> {
    env: &'a ModuleEnv,
    scope: IndexMap<String, Value>,
    exports: IndexMap<String, Value>,
}

impl<'a> Interp<'a> {
    fn new(env: &'a ModuleEnv) -> Self {
        Interp {
            env,
            scope: IndexMap::new(),
            exports: IndexMap::new(),
        }
    }

    fn run_statement(&mut self, stmt: &str) -> Option<()> {
        let stmt = stmt.trim();
        if stmt.is_empty() {
            return Some(());
        }

        for keyword in ["const ", "let ", "var "] {
            if let Some(rest) = stmt.strip_prefix(keyword) {
                let (name, expr) = rest.split_once('=')?;
                let name = name.trim();
                if !is_valid_identifier(name) {
                    return None;
                }
                let value = self.eval_expr(expr.trim())?;
                self.scope.insert(name.to_string(), value);
                return Some(());
            }
        }

        if let Some(rest) = stmt.strip_prefix("exports.") {
            let (name, expr) = rest.split_once('=')?;
            let name = name.trim();
            if !is_valid_identifier(name) {
                return None;
            }
            let value = self.eval_expr(expr.trim())?;
            self.exports.insert(name.to_string(), value);
            return Some(());
        }

        // Bare expression statement: evaluate for effect, discard.
        self.eval_expr(stmt).map(|_| ())
    }

    fn eval_expr(&self, expr: &str) -> Option<Value> {
        let expr = expr.trim();
        if expr.is_empty() {
            return None;
        }

        if let Some(rest) = expr.strip_prefix("new ") {
            return self.eval_new(rest.trim());
        }

        if expr.starts_with("__module") {
            return self.eval_module_ref(expr);
        }

        if let Some(value) = parse_literal(expr) {
            return Some(value);
        }

        self.eval_path(expr)
    }

    /// `new <callee>(<args>)`. The callee must resolve to a
    /// resolver-provided constructor. Constructing a member of an unknown
    /// module yields an empty object rather than failing, per the
    /// resolver's never-throw contract.
    fn eval_new(&self, rest: &str) -> Option<Value> {
        let chars: Vec<char> = rest.chars().collect();
        let open = chars.iter().position(|&c| c == '(')?;
        let close = matching_paren(&chars, open)?;
        let after: String = chars[close + 1..].iter().collect();
        if !after.trim().is_empty() {
            return None;
        }

        let callee_src: String = chars[..open].iter().collect();
        let callee = self.eval_path(callee_src.trim())?;
        let args_src: String = chars[open + 1..close].iter().collect();
        let mut args = Vec::new();
        for part in split_arguments(&args_src) {
            args.push(self.eval_expr(&part)?);
        }

        match callee {
            Value::Ctor(CtorKind::SettingGroup) => {
                let arg = args.into_iter().next().unwrap_or(Value::Null);
                SettingGroup::from_value(arg).map(Value::Settings)
            }
            Value::Ctor(CtorKind::Localization) => {
                let arg = args.into_iter().next().unwrap_or(Value::Null);
                LocalizationTable::from_value(arg).map(Value::Localization)
            }
            Value::Ctor(CtorKind::Opaque) | Value::Null | Value::Object(_) => {
                Some(Value::Object(IndexMap::new()))
            }
            _ => None,
        }
    }

    /// `__module("<name>")` with an optional `.member.member` chain.
    fn eval_module_ref(&self, expr: &str) -> Option<Value> {
        let chars: Vec<char> = expr.chars().collect();
        let open = chars.iter().position(|&c| c == '(')?;
        let head: String = chars[..open].iter().collect();
        if head.trim() != "__module" {
            return None;
        }
        let close = matching_paren(&chars, open)?;
        let name_src: String = chars[open + 1..close].iter().collect();
        let name = parse_literal(name_src.trim())?;
        let mut value = self.env.resolve(name.as_str()?);

        let tail: String = chars[close + 1..].iter().collect();
        let tail = tail.trim();
        if !tail.is_empty() {
            let chain = tail.strip_prefix('.')?;
            for member in chain.split('.') {
                let member = member.trim();
                if !is_valid_identifier(member) {
                    return None;
                }
                value = value.member(member);
            }
        }
        Some(value)
    }

    /// Identifier, optionally followed by a member chain. Unknown root
    /// identifiers abort evaluation: the module referenced something the
    /// sandbox never defined.
    fn eval_path(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let root = segments.next()?.trim();
        if !is_valid_identifier(root) {
            return None;
        }
        let mut value = self.scope.get(root)?.clone();
        for member in segments {
            let member = member.trim();
            if !is_valid_identifier(member) {
                return None;
            }
            value = value.member(member);
        }
        Some(value)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVALUATED MODULE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedModule {
    exports: IndexMap<String, Value>,
}

impl EvaluatedModule {
    pub fn export_names(&self) -> Vec<&str> {
        self.exports.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.exports.get(name)
    }

    /// The first exported settings group, with its export name. `None`
    /// means the module produced no object with the settings capability
    /// set; callers treat the instance as configuration-less.
    pub fn settings_group(&self) -> Option<(&str, &SettingGroup)> {
        self.exports.iter().find_map(|(name, v)| match v {
            Value::Settings(g) => Some((name.as_str(), g)),
            _ => None,
        })
    }

    pub fn settings_group_mut(&mut self) -> Option<(String, &mut SettingGroup)> {
        self.exports.iter_mut().find_map(|(name, v)| match v {
            Value::Settings(g) => Some((name.clone(), g)),
            _ => None,
        })
    }

    /// The first exported localization table, with its export name.
    pub fn localization(&self) -> Option<(&str, &LocalizationTable)> {
        self.exports.iter().find_map(|(name, v)| match v {
            Value::Localization(t) => Some((name.as_str(), t)),
            _ => None,
        })
    }

    pub fn localization_mut(&mut self) -> Option<(String, &mut LocalizationTable)> {
        self.exports.iter_mut().find_map(|(name, v)| match v {
            Value::Localization(t) => Some((name.clone(), t)),
            _ => None,
        })
    }

    /// Serialize the module back to source text, regenerating the import
    /// preamble for the library kinds actually present. This is what the
    /// update endpoints write back to the package after a patch.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        if self.exports.values().any(|v| matches!(v, Value::Settings(_))) {
            out.push_str(&format!(
                "import {{ SettingGroup }} from \"{}\";\n",
                SETTINGS_MODULE
            ));
        }
        if self
            .exports
            .values()
            .any(|v| matches!(v, Value::Localization(_)))
        {
            out.push_str(&format!(
                "import {{ Localization }} from \"{}\";\n",
                LOCALIZE_MODULE
            ));
        }
        if !out.is_empty() {
            out.push('\n');
        }

        for (name, value) in &self.exports {
            match value {
                Value::Settings(group) => out.push_str(&group.serialize(name)),
                Value::Localization(table) => out.push_str(&table.serialize(name)),
                other => out.push_str(&format!(
                    "export const {} = {};\n",
                    name,
                    other.serialize_source(0)
                )),
            }
        }
        out
    }
}

/// Evaluate a settings-schema or localization module. All failures yield
/// `None`; this function never panics on arbitrary input.
pub fn evaluate_module(source: &str, env: &ModuleEnv) -> Option<EvaluatedModule> {
    let rewritten = rewrite_module_syntax(source);
    let mut interp = Interp::new(env);

    for stmt in split_statements(&rewritten) {
        if interp.run_statement(&stmt).is_none() {
            debug!(statement = %stmt, "sandbox evaluation aborted");
            return None;
        }
    }

    if interp.exports.is_empty() {
        debug!("sandbox produced no exports");
        return None;
    }

    Some(EvaluatedModule {
        exports: interp.exports,
    })
}
