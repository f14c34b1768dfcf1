//! Identifier Rewriter.
//!
//! Pure text-transform passes that prefix style-class tokens and the
//! settings-schema export name with an instance token, so N live instances
//! of the same package never collide on shared identifiers. Rewriting is
//! deliberately regular-expression substitution, never structural parsing;
//! the known false-positive risk on unusual formatting (class literals
//! inside strings or comments) is accepted in exchange for robustness
//! against source the real toolchain would also choke on.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::token::InstanceToken;

lazy_static! {
    /// `export const <name> = new SettingGroup(`, the one declaration shape
    /// the settings library requires of schema modules.
    static ref SCHEMA_EXPORT_RE: Regex = Regex::new(
        r"(?m)^(\s*export\s+const\s+)([A-Za-z_$][A-Za-z0-9_$]*)(\s*=\s*new\s+SettingGroup\s*\()"
    )
    .unwrap();

    /// `class="..."` / `className='...'` literal attributes in UI markup.
    static ref CLASS_ATTR_RE: Regex = Regex::new(
        r#"\b(class|className)\s*=\s*("([^"]*)"|'([^']*)')"#
    )
    .unwrap();

    /// Leading class selectors in a style sheet: start of line, or after a
    /// combinator/grouping character. A digit before the dot never matches,
    /// so numeric values like `0.5em` pass through untouched.
    static ref STYLE_SELECTOR_RE: Regex = Regex::new(
        r"(?m)(^|[,{}>+~\s])\.([A-Za-z_][A-Za-z0-9_-]*)"
    )
    .unwrap();
}

/// Rewrite the schema module's exported declaration name to
/// `<token>_<name>`. Source with no matching declaration passes through
/// unchanged.
pub fn rewrite_schema_export(source: &str, token: &InstanceToken) -> String {
    SCHEMA_EXPORT_RE
        .replace_all(source, |caps: &Captures| {
            format!("{}{}_{}{}", &caps[1], token.as_str(), &caps[2], &caps[3])
        })
        .into_owned()
}

/// Rewrite every class token inside literal `class`/`className` attributes
/// to `<token>-cls`.
pub fn rewrite_class_attributes(source: &str, token: &InstanceToken) -> String {
    CLASS_ATTR_RE
        .replace_all(source, |caps: &Captures| {
            let attr = &caps[1];
            let (quote, value) = match caps.get(3) {
                Some(m) => ('"', m.as_str()),
                None => ('\'', caps.get(4).map(|m| m.as_str()).unwrap_or("")),
            };
            let prefixed = prefix_class_list(value, token);
            format!("{}={}{}{}", attr, quote, prefixed, quote)
        })
        .into_owned()
}

/// Script pass: schema export rename, then markup class rewrite.
pub fn rewrite_script(source: &str, token: &InstanceToken) -> String {
    let renamed = rewrite_schema_export(source, token);
    rewrite_class_attributes(&renamed, token)
}

/// Style pass: prefix every leading class selector with the token.
pub fn rewrite_style_selectors(source: &str, token: &InstanceToken) -> String {
    STYLE_SELECTOR_RE
        .replace_all(source, |caps: &Captures| {
            format!("{}.{}-{}", &caps[1], token.as_str(), &caps[2])
        })
        .into_owned()
}

fn prefix_class_list(value: &str, token: &InstanceToken) -> String {
    value
        .split_whitespace()
        .map(|cls| format!("{}-{}", token.as_str(), cls))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_token() -> InstanceToken {
        InstanceToken::with_hint("lb", "ab3")
    }

    #[test]
    fn test_schema_export_rename() {
        let token = fixed_token();
        let src = "export const fooSettings = new SettingGroup({ a: 1 });";
        let out = rewrite_schema_export(src, &token);
        let expected_head = format!("export const {}_fooSettings = new SettingGroup(", token);
        assert!(out.starts_with(&expected_head), "got: {}", out);
    }

    #[test]
    fn test_schema_export_rename_touches_exactly_one_identifier() {
        let token = fixed_token();
        let src = "const fooSettings = 1;\nexport const fooSettings = new SettingGroup({});\n";
        let out = rewrite_schema_export(src, &token);
        // The plain declaration on line one is not the SettingGroup shape.
        assert!(out.starts_with("const fooSettings = 1;"));
        assert_eq!(
            out.matches(&format!("{}_fooSettings", token)).count(),
            1
        );
    }

    #[test]
    fn test_non_schema_source_unchanged() {
        let token = fixed_token();
        let src = "export const helper = () => 1;";
        assert_eq!(rewrite_schema_export(src, &token), src);
    }

    #[test]
    fn test_class_attribute_rewrite() {
        let token = fixed_token();
        let src = r#"<div className="leaderboard-title">"#;
        let out = rewrite_class_attributes(src, &token);
        assert_eq!(
            out,
            format!(r#"<div className="{}-leaderboard-title">"#, token)
        );
    }

    #[test]
    fn test_class_attribute_multiple_tokens() {
        let token = fixed_token();
        let src = r#"<span class='title bold'>"#;
        let out = rewrite_class_attributes(src, &token);
        assert_eq!(
            out,
            format!("<span class='{t}-title {t}-bold'>", t = token)
        );
    }

    #[test]
    fn test_style_selector_rewrite() {
        let token = fixed_token();
        let src = ".leaderboard-title { color: red; }";
        let out = rewrite_style_selectors(src, &token);
        assert_eq!(
            out,
            format!(".{}-leaderboard-title {{ color: red; }}", token)
        );
    }

    #[test]
    fn test_style_selector_grouped_and_nested() {
        let token = fixed_token();
        let src = ".a, .b > .c {\n  margin: 0.5em;\n}";
        let out = rewrite_style_selectors(src, &token);
        assert_eq!(
            out,
            format!(
                ".{t}-a, .{t}-b > .{t}-c {{\n  margin: 0.5em;\n}}",
                t = token
            )
        );
    }

    #[test]
    fn test_decimal_values_untouched() {
        let token = fixed_token();
        let src = ".x { opacity: 0.5; width: 12.25px; }";
        let out = rewrite_style_selectors(src, &token);
        assert!(out.contains("opacity: 0.5;"));
        assert!(out.contains("width: 12.25px;"));
    }

    #[test]
    fn test_disjoint_namespaces_for_distinct_tokens() {
        let t1 = InstanceToken::with_hint("lb", "ab3");
        let t2 = InstanceToken::with_hint("lb", "cd7");
        let src = ".leaderboard-title { color: red; }\n.row { height: 2em; }";
        let out1 = rewrite_style_selectors(src, &t1);
        let out2 = rewrite_style_selectors(src, &t2);
        for line in out1.lines() {
            if let Some(selector) = line.split('{').next() {
                let selector = selector.trim();
                if !selector.is_empty() {
                    assert!(!out2.contains(selector), "shared selector {}", selector);
                }
            }
        }
    }
}
