//! # Widget Compiler Pipeline
//!
//! Compilation, namespacing, and runtime instantiation of uploadable widget
//! packages. A package is a directory of script, style, and asset files; the
//! pipeline turns it into per-instance artifacts that any number of placed
//! widgets can mount side by side without colliding.
//!
//! ## Namespacing Invariants
//!
//! 1. **Instance Token**: every fetch mints a fresh token
//!    (`{package}_{millis}_{suffix}`) that is identifier-safe and prefixes
//!    every rewritten name. Two instances of the same package NEVER share a
//!    token.
//! 2. **Schema Exports**: `export const X = new SettingGroup(` becomes
//!    `export const {token}_X = new SettingGroup(`. Lookups of settings
//!    modules go through the same rewrite, so producer and consumer agree.
//! 3. **Class Names**: `class` / `className` string literals and leading
//!    `.selector` occurrences in styles are both prefixed with `{token}-`,
//!    keeping markup and stylesheet in lockstep per instance.
//! 4. **Best Effort**: rewriting is textual. Dynamically constructed class
//!    names escape the namespace by design; the rewriter never errors on
//!    input it does not recognize, it passes it through.
//!
//! ## Pipeline Shape
//!
//! Server side: [`package::PackageStore`] persists uploads,
//! [`artifacts::compile_package`] walks a package and emits an
//! [`artifacts::ArtifactSet`] (per-file failures become error descriptors,
//! never a failed set). Client side: [`fetch::FetchCache`] dedupes in-flight
//! fetches, [`sandbox::evaluate_module`] evaluates settings and localization
//! modules without a JS engine, [`cache::ComponentCache`] keys compiled
//! components by composite version plus invalidation epochs, and
//! [`lifecycle::InstanceLifecycle`] drives the per-instance load state
//! machine.

pub mod artifacts;
pub mod bundler;
pub mod cache;
pub mod component;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod localization;
pub mod module_env;
pub mod package;
pub mod rewriter;
pub mod sandbox;
pub mod settings_schema;
pub mod style;
pub mod token;
pub mod value;


pub use artifacts::{compile_package, ArtifactDescriptor, ArtifactKind, ArtifactSet};
pub use cache::ComponentCache;
pub use component::{CompiledComponent, CompositeVersion, ViewportMode};
pub use error::{PipelineError, Result};
pub use fetch::{ArtifactTransport, FetchCache, FetchKey};
pub use lifecycle::{InstanceLifecycle, LoadState};
pub use package::{PackageStore, UploadFile, UploadRequest};
pub use sandbox::{evaluate_module, EvaluatedModule};
pub use token::InstanceToken;
