//! Whitelist-backed module resolver for the sandbox.
//!
//! The sandbox never sees the real module graph. Imports resolve against a
//! small fixed whitelist of in-memory library surfaces; any other module
//! name resolves to an empty object so a stray import degrades gracefully
//! instead of throwing. The same whitelist doubles as the bundler's
//! external-module list: these modules are supplied by the loader at
//! evaluation time, never embedded in a bundle.

use indexmap::IndexMap;

use crate::value::{CtorKind, Value};

/// The single target UI framework. Bundled scripts import it; it is always
/// external.
pub const UI_MODULE: &str = "@widget/ui";
/// The settings-schema library (`SettingGroup`).
pub const SETTINGS_MODULE: &str = "@widget/settings";
/// The localization library (`Localization`).
pub const LOCALIZE_MODULE: &str = "@widget/localize";

#[derive(Debug, Clone)]
pub struct ModuleEnv {
    modules: IndexMap<String, Value>,
}

impl ModuleEnv {
    /// The standard environment: the three whitelisted libraries.
    pub fn standard() -> Self {
        let mut modules = IndexMap::new();

        let mut settings = IndexMap::new();
        settings.insert(
            "SettingGroup".to_string(),
            Value::Ctor(CtorKind::SettingGroup),
        );
        settings.insert("Setting".to_string(), Value::Ctor(CtorKind::Opaque));
        modules.insert(SETTINGS_MODULE.to_string(), Value::Object(settings));

        let mut localize = IndexMap::new();
        localize.insert(
            "Localization".to_string(),
            Value::Ctor(CtorKind::Localization),
        );
        modules.insert(LOCALIZE_MODULE.to_string(), Value::Object(localize));

        modules.insert(UI_MODULE.to_string(), Value::Object(IndexMap::new()));

        ModuleEnv { modules }
    }

    /// Resolve a module name. Unknown names yield an empty object, never an
    /// error.
    pub fn resolve(&self, name: &str) -> Value {
        self.modules
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::Object(IndexMap::new()))
    }

    /// The external whitelist handed to the bundler.
    pub fn external_modules(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }
}

impl Default for ModuleEnv {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_modules_expose_constructors() {
        let env = ModuleEnv::standard();
        assert_eq!(
            env.resolve(SETTINGS_MODULE).member("SettingGroup"),
            Value::Ctor(CtorKind::SettingGroup)
        );
        assert_eq!(
            env.resolve(LOCALIZE_MODULE).member("Localization"),
            Value::Ctor(CtorKind::Localization)
        );
    }

    #[test]
    fn test_unknown_module_is_empty_object_not_error() {
        let env = ModuleEnv::standard();
        let resolved = env.resolve("left-pad");
        assert_eq!(resolved.as_object().map(|o| o.len()), Some(0));
        assert_eq!(resolved.member("anything"), Value::Null);
    }

    #[test]
    fn test_external_whitelist_covers_all_libraries() {
        let externals = ModuleEnv::standard().external_modules();
        assert!(externals.contains(&UI_MODULE.to_string()));
        assert!(externals.contains(&SETTINGS_MODULE.to_string()));
        assert!(externals.contains(&LOCALIZE_MODULE.to_string()));
    }
}
