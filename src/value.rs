//! Value model for the module sandbox.
//!
//! Settings-schema and localization modules cannot go through the bundler
//! because they must stay mutable and re-serializable at runtime, so the
//! sandbox evaluates them into this object graph instead. The reader is a
//! tolerant JS-literal parser (single/double/backtick strings, unquoted
//! keys, trailing commas, comments); `serialize_source` emits the graph
//! back out as JS literal text.

use indexmap::IndexMap;

use crate::localization::LocalizationTable;
use crate::settings_schema::SettingGroup;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    Settings(SettingGroup),
    Localization(LocalizationTable),
    /// A constructor provided by the module resolver. Only exists inside
    /// the sandbox; never appears in serialized output.
    Ctor(CtorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtorKind {
    SettingGroup,
    Localization,
    /// Whitelisted library member with no sandbox behavior; constructing it
    /// yields an empty object.
    Opaque,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Member access for the interpreter. Library surfaces are plain
    /// objects; anything without the member yields `Null` rather than an
    /// error, matching the resolver's never-throw contract.
    pub fn member(&self, name: &str) -> Value {
        match self {
            Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Emit JS literal source for this value.
    pub fn serialize_source(&self, indent: usize) -> String {
        let pad = "  ".repeat(indent);
        let pad_in = "  ".repeat(indent + 1);
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => format_number(*n),
            Value::Str(s) => format!("\"{}\"", escape_string(s)),
            Value::Array(items) => {
                if items.is_empty() {
                    return "[]".to_string();
                }
                let body: Vec<String> = items
                    .iter()
                    .map(|v| format!("{}{}", pad_in, v.serialize_source(indent + 1)))
                    .collect();
                format!("[\n{},\n{}]", body.join(",\n"), pad)
            }
            Value::Object(map) => {
                if map.is_empty() {
                    return "{}".to_string();
                }
                let body: Vec<String> = map
                    .iter()
                    .map(|(k, v)| {
                        format!(
                            "{}{}: {}",
                            pad_in,
                            serialize_key(k),
                            v.serialize_source(indent + 1)
                        )
                    })
                    .collect();
                format!("{{\n{},\n{}}}", body.join(",\n"), pad)
            }
            Value::Settings(group) => group.argument_source(indent),
            Value::Localization(table) => table.argument_source(indent),
            Value::Ctor(_) => "null".to_string(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn serialize_key(key: &str) -> String {
    if is_valid_identifier(key) {
        key.to_string()
    } else {
        format!("\"{}\"", escape_string(key))
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

pub fn is_valid_identifier(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

// ═══════════════════════════════════════════════════════════════════════════════
// LITERAL READER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Reader<'a> {
    chars: Vec<char>,
    pos: usize,
    _src: &'a str,
}

impl<'a> Reader<'a> {
    pub fn new(src: &'a str) -> Self {
        Reader {
            chars: src.chars().collect(),
            pos: 0,
            _src: src,
        }
    }

    /// Read one literal value; `None` on anything the grammar does not
    /// cover. The sandbox treats `None` as "abort evaluation", never panics.
    pub fn read_value(&mut self) -> Option<Value> {
        self.skip_trivia();
        match self.peek()? {
            '{' => self.read_object(),
            '[' => self.read_array(),
            '"' | '\'' | '`' => self.read_string().map(Value::Str),
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.read_number(),
            _ => self.read_word(),
        }
    }

    /// True when only trailing trivia remains.
    pub fn at_end(&mut self) -> bool {
        self.skip_trivia();
        self.pos >= self.chars.len()
    }

    pub fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    pub fn skip_trivia(&mut self) {
        loop {
            while self.peek().is_some_and(|c| c.is_whitespace()) {
                self.pos += 1;
            }
            if self.peek() == Some('/') && self.chars.get(self.pos + 1) == Some(&'/') {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
                continue;
            }
            if self.peek() == Some('/') && self.chars.get(self.pos + 1) == Some(&'*') {
                self.pos += 2;
                while self.pos < self.chars.len() {
                    if self.chars[self.pos] == '*' && self.chars.get(self.pos + 1) == Some(&'/') {
                        self.pos += 2;
                        break;
                    }
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    fn expect(&mut self, c: char) -> Option<()> {
        self.skip_trivia();
        if self.peek() == Some(c) {
            self.pos += 1;
            Some(())
        } else {
            None
        }
    }

    fn read_object(&mut self) -> Option<Value> {
        self.expect('{')?;
        let mut map = IndexMap::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Some(Value::Object(map));
            }
            let key = self.read_key()?;
            self.expect(':')?;
            let value = self.read_value()?;
            map.insert(key, value);
            self.skip_trivia();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                }
                Some('}') => {}
                _ => return None,
            }
        }
    }

    fn read_array(&mut self) -> Option<Value> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some(']') {
                self.pos += 1;
                return Some(Value::Array(items));
            }
            items.push(self.read_value()?);
            self.skip_trivia();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                }
                Some(']') => {}
                _ => return None,
            }
        }
    }

    fn read_key(&mut self) -> Option<String> {
        self.skip_trivia();
        match self.peek()? {
            '"' | '\'' => self.read_string(),
            c if c.is_ascii_alphanumeric() || c == '_' || c == '$' => {
                let mut key = String::new();
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '-')
                {
                    key.push(self.bump()?);
                }
                Some(key)
            }
            _ => None,
        }
    }

    fn read_string(&mut self) -> Option<String> {
        let quote = self.bump()?;
        // Template literals with interpolations are outside the grammar.
        let mut out = String::new();
        while let Some(c) = self.bump() {
            if c == quote {
                return Some(out);
            }
            if c == '\\' {
                match self.bump()? {
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    other => out.push(other),
                }
            } else if quote == '`' && c == '$' && self.peek() == Some('{') {
                return None;
            } else {
                out.push(c);
            }
        }
        None
    }

    fn read_number(&mut self) -> Option<Value> {
        let mut raw = String::new();
        if matches!(self.peek(), Some('-') | Some('+')) {
            raw.push(self.bump()?);
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E')
        {
            raw.push(self.bump()?);
        }
        raw.parse::<f64>().ok().map(Value::Num)
    }

    fn read_word(&mut self) -> Option<Value> {
        let mut word = String::new();
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            word.push(self.bump()?);
        }
        match word.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            "null" | "undefined" => Some(Value::Null),
            _ => None,
        }
    }
}

/// Parse a standalone literal; trailing garbage fails the parse.
pub fn parse_literal(source: &str) -> Option<Value> {
    let mut reader = Reader::new(source);
    let value = reader.read_value()?;
    if reader.at_end() {
        Some(value)
    } else {
        None
    }
}
