//! Runtime object behind `new Localization({...})` in localization modules.
//!
//! Holds per-language translation tables with a current and a fallback
//! language. Like the settings group it stays mutable (the language update
//! endpoint patches it) and serializes back to module source, so
//! localization modules never pass through the bundler.

use indexmap::IndexMap;
use serde::Deserialize;

use crate::value::{Value, is_valid_identifier};

pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone, PartialEq)]
pub struct LocalizationTable {
    current: String,
    fallback: String,
    languages: IndexMap<String, IndexMap<String, String>>,
}

/// Patch payload for the localization update endpoint. Must be followed by
/// a cache invalidation for each placed instance of the package.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationPatch {
    pub language: String,
    pub key: String,
    pub value: String,
}

impl LocalizationTable {
    /// Build from the single constructor argument. Two authored shapes are
    /// accepted: `{ fallback, current?, languages: {...} }` and a bare map
    /// of `lang -> { key: text }`. Non-string leaf values are dropped.
    pub fn from_value(arg: Value) -> Option<Self> {
        let obj = match arg {
            Value::Object(map) => map,
            _ => return None,
        };

        let (fallback, current, raw_languages) = if let Some(langs) = obj.get("languages") {
            let fallback = obj
                .get("fallback")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
            let current = obj
                .get("current")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| fallback.clone());
            (fallback, current, langs.as_object()?.clone())
        } else {
            (
                DEFAULT_LANGUAGE.to_string(),
                DEFAULT_LANGUAGE.to_string(),
                obj,
            )
        };

        let mut languages = IndexMap::new();
        for (lang, table) in raw_languages {
            let table = table.as_object()?;
            let mut strings = IndexMap::new();
            for (key, v) in table {
                if let Some(s) = v.as_str() {
                    strings.insert(key.clone(), s.to_string());
                }
            }
            languages.insert(lang, strings);
        }
        if languages.is_empty() {
            return None;
        }

        Some(LocalizationTable {
            current,
            fallback,
            languages,
        })
    }

    pub fn current_language(&self) -> &str {
        &self.current
    }

    pub fn fallback_language(&self) -> &str {
        &self.fallback
    }

    /// Switch the current language. Unknown languages are refused so a bad
    /// configuration value cannot blank every translation at once.
    pub fn set_current_language(&mut self, lang: &str) -> bool {
        if self.languages.contains_key(lang) {
            self.current = lang.to_string();
            true
        } else {
            false
        }
    }

    pub fn available_languages(&self) -> Vec<String> {
        self.languages.keys().cloned().collect()
    }

    /// Translate a key in the current language, falling back to the
    /// fallback language, then to the key itself.
    pub fn translate(&self, key: &str) -> String {
        self.languages
            .get(&self.current)
            .and_then(|t| t.get(key))
            .or_else(|| self.languages.get(&self.fallback).and_then(|t| t.get(key)))
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    /// Add or update one translation; creates the language on first use.
    pub fn set_translation(&mut self, lang: &str, key: &str, text: &str) {
        self.languages
            .entry(lang.to_string())
            .or_default()
            .insert(key.to_string(), text.to_string());
    }

    pub fn apply_patch(&mut self, patch: &TranslationPatch) {
        self.set_translation(&patch.language, &patch.key, &patch.value);
    }

    /// The constructor-argument object literal, for embedding in source.
    pub fn argument_source(&self, indent: usize) -> String {
        let mut langs = IndexMap::new();
        for (lang, table) in &self.languages {
            let strings: IndexMap<String, Value> = table
                .iter()
                .map(|(k, v)| (k.clone(), Value::Str(v.clone())))
                .collect();
            langs.insert(lang.clone(), Value::Object(strings));
        }

        let mut root = IndexMap::new();
        root.insert("fallback".to_string(), Value::Str(self.fallback.clone()));
        root.insert("current".to_string(), Value::Str(self.current.clone()));
        root.insert("languages".to_string(), Value::Object(langs));
        Value::Object(root).serialize_source(indent)
    }

    /// Serialize back to a full module declaration under the given export
    /// name.
    pub fn serialize(&self, export_name: &str) -> String {
        debug_assert!(is_valid_identifier(export_name));
        format!(
            "export const {} = new Localization({});\n",
            export_name,
            self.argument_source(0)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::parse_literal;

    fn table() -> LocalizationTable {
        let arg = parse_literal(
            "{ fallback: 'en', languages: { en: { title: 'Leaderboard' }, de: { title: 'Bestenliste' } } }",
        )
        .unwrap();
        LocalizationTable::from_value(arg).unwrap()
    }

    #[test]
    fn test_translate_with_fallback() {
        let mut t = table();
        assert_eq!(t.translate("title"), "Leaderboard");
        assert!(t.set_current_language("de"));
        assert_eq!(t.translate("title"), "Bestenliste");
        t.set_translation("en", "rows", "Rows");
        // "rows" only exists in the fallback language.
        assert_eq!(t.translate("rows"), "Rows");
        // Unknown key falls back to itself.
        assert_eq!(t.translate("nope"), "nope");
    }

    #[test]
    fn test_unknown_language_refused() {
        let mut t = table();
        assert!(!t.set_current_language("fr"));
        assert_eq!(t.current_language(), "en");
    }

    #[test]
    fn test_bare_map_shape() {
        let arg = parse_literal("{ en: { hi: 'Hi' }, es: { hi: 'Hola' } }").unwrap();
        let t = LocalizationTable::from_value(arg).unwrap();
        assert_eq!(t.available_languages(), vec!["en", "es"]);
        assert_eq!(t.fallback_language(), DEFAULT_LANGUAGE);
    }

    #[test]
    fn test_invalid_shapes() {
        assert!(LocalizationTable::from_value(Value::Num(1.0)).is_none());
        assert!(LocalizationTable::from_value(parse_literal("{}").unwrap()).is_none());
        // Language value must be an object.
        assert!(LocalizationTable::from_value(parse_literal("{ en: 3 }").unwrap()).is_none());
    }

    #[test]
    fn test_serialize_back_parses_again() {
        let mut t = table();
        t.set_translation("fr", "title", "Classement");
        let src = t.serialize("X_strings");
        assert!(src.starts_with("export const X_strings = new Localization({"));
        let inner = src
            .trim_start_matches("export const X_strings = new Localization(")
            .trim_end()
            .trim_end_matches(");");
        let reparsed = LocalizationTable::from_value(parse_literal(inner).unwrap()).unwrap();
        assert_eq!(reparsed, t);
    }

    #[test]
    fn test_patch_creates_language() {
        let mut t = table();
        t.apply_patch(&TranslationPatch {
            language: "pt".to_string(),
            key: "title".to_string(),
            value: "Classificação".to_string(),
        });
        assert!(t.available_languages().contains(&"pt".to_string()));
    }
}
