//! Declarative configuration and startup construction.
//!
//! A [`Config`] lists providers and anchors. [`apply_providers`] builds providers
//! through a caller-supplied [`ProviderFactory`] and registers them in a
//! [`ProviderStore`]; [`apply_anchors`] turns each anchor into a [`Member`] and
//! registers it with a [`Conductor`]. Every error here is fatal to startup.
//!
//! ```json
//! {
//!   "providers": [{ "name": "vault", "kind": "vault", "options": { "role": "web" } }],
//!   "anchors": [{
//!     "name": "web",
//!     "provider": "vault",
//!     "common_name": "web.example.org",
//!     "alt_names": ["www.example.org"],
//!     "dest": "file",
//!     "dest_options": { "certificate": "/etc/tls/web.crt", "private_key": "/etc/tls/web.key" },
//!     "action": { "kind": "command", "program": "systemctl", "args": ["reload", "nginx"] }
//!   }],
//!   "api": { "address": "127.0.0.1:8080" }
//! }
//! ```

use crate::conductor::Conductor;
use crate::handle::{
    Action, CommandAction, DefaultLeaseHandle, Destination, FileDestination,
    FileDestinationOptions, NoopAction,
};
use crate::member::{Member, MemberStatus};
use crate::prelude::debug;
use crate::provider::{Provider, ProviderStore, Request, StoreError};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while loading configuration or constructing the domain from it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("failed reading config file {}: {source}", .path.display())]
    Io {
        /// The file that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration document is not valid.
    #[error("failed parsing config {origin}: {source}")]
    Parse {
        /// Where the document came from.
        origin: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A provider or anchor has an empty name.
    #[error("undefined {0} name")]
    MissingName(&'static str),

    /// No provider implementation exists for this kind.
    #[error("unknown provider kind: {0}")]
    UnknownProviderKind(String),

    /// Options of a provider or destination are invalid.
    #[error("invalid options for {name}: {reason}")]
    InvalidOptions {
        /// Provider or anchor name.
        name: String,
        /// What is wrong.
        reason: String,
    },

    /// An anchor names a destination kind that does not exist.
    #[error("anchor {anchor}: unknown destination {dest}")]
    UnknownDestination {
        /// Anchor name.
        anchor: String,
        /// Destination kind.
        dest: String,
    },

    /// An anchor references a provider that is not registered.
    #[error("anchor {anchor}: {source}")]
    Provider {
        /// Anchor name.
        anchor: String,
        /// Underlying error.
        #[source]
        source: StoreError,
    },

    /// Two anchors share a name.
    #[error("duplicate anchor name: {0}")]
    DuplicateAnchor(String),

    /// A provider could not be registered.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Top-level configuration document.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Providers to build and register.
    pub providers: Vec<ProviderConfig>,
    /// Anchors to keep valid.
    pub anchors: Vec<AnchorConfig>,
    /// Health API settings.
    pub api: ApiConfig,
}

/// One provider definition.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Name anchors use to reference this provider.
    #[serde(default)]
    pub name: String,
    /// Implementation to build, interpreted by the [`ProviderFactory`].
    #[serde(alias = "id")]
    pub kind: String,
    /// Implementation-specific options.
    #[serde(default)]
    pub options: Value,
}

/// One anchor definition.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnchorConfig {
    /// Member name.
    #[serde(default)]
    pub name: String,
    /// Name of the provider to obtain leases from.
    pub provider: String,
    /// Certificate common name.
    pub common_name: String,
    /// Subject alternative names.
    #[serde(default)]
    pub alt_names: Vec<String>,
    /// Destination kind. Only `"file"` is built in.
    pub dest: String,
    /// Destination options.
    #[serde(default)]
    pub dest_options: Value,
    /// Action run after material is written. Defaults to none.
    #[serde(default)]
    pub action: Option<ActionConfig>,
}

/// Post-write action of an anchor.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActionConfig {
    /// Do nothing.
    None,
    /// Run a program.
    Command {
        /// Program to run.
        program: String,
        /// Program arguments.
        #[serde(default)]
        args: Vec<String>,
    },
}

/// Health API settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    /// Listen address. Empty or absent disables the API.
    pub address: Option<String>,
}

impl ApiConfig {
    /// Returns the listen address, if the API is enabled.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref().filter(|a| !a.is_empty())
    }
}

impl Config {
    /// Parses one JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is invalid.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            origin: "<inline>".to_string(),
            source,
        })
    }

    /// Loads and merges several files.
    ///
    /// Providers and anchors are concatenated in file order; a later `api` section
    /// with an address replaces an earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`] for the first file that fails.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for path in paths {
            let path = path.as_ref();
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let part: Self =
                serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                    origin: path.display().to_string(),
                    source,
                })?;
            config.merge(part);
        }
        Ok(config)
    }

    fn merge(&mut self, other: Self) {
        self.providers.extend(other.providers);
        self.anchors.extend(other.anchors);
        if other.api.address().is_some() {
            self.api = other.api;
        }
    }
}

/// Builds providers from their configured kind and options.
///
/// Concrete provider backends live outside this crate; the embedding process maps
/// kinds to implementations here. Closures with the same signature implement it.
pub trait ProviderFactory {
    /// Builds a provider of `kind` from `options`.
    ///
    /// # Errors
    ///
    /// Should return [`ConfigError::UnknownProviderKind`] for unsupported kinds and
    /// [`ConfigError::InvalidOptions`] for bad options.
    fn build(&self, kind: &str, options: &Value) -> Result<Arc<dyn Provider>, ConfigError>;
}

impl<F> ProviderFactory for F
where
    F: Fn(&str, &Value) -> Result<Arc<dyn Provider>, ConfigError>,
{
    fn build(&self, kind: &str, options: &Value) -> Result<Arc<dyn Provider>, ConfigError> {
        self(kind, options)
    }
}

/// Builds every configured provider and registers it in `store`.
///
/// # Errors
///
/// Returns the first failure: an empty name, a factory error, or a duplicate name.
pub fn apply_providers(
    config: &Config,
    factory: &dyn ProviderFactory,
    store: &mut ProviderStore,
) -> Result<(), ConfigError> {
    for cfg in &config.providers {
        if cfg.name.is_empty() {
            return Err(ConfigError::MissingName("provider"));
        }
        let provider = factory.build(&cfg.kind, &cfg.options)?;
        store.store(cfg.name.clone(), provider)?;
        debug!("Provider registered: name={}, kind={}", cfg.name, cfg.kind);
    }
    Ok(())
}

/// Builds one member per configured anchor and registers them with `conductor`.
///
/// Either every anchor is registered or none is.
///
/// # Errors
///
/// Returns the first invalid anchor.
pub fn apply_anchors(
    config: &Config,
    store: &ProviderStore,
    conductor: &mut Conductor,
) -> Result<Vec<MemberStatus>, ConfigError> {
    let mut seen = HashSet::new();
    let mut members = Vec::with_capacity(config.anchors.len());

    for anchor in &config.anchors {
        if anchor.name.is_empty() {
            return Err(ConfigError::MissingName("anchor"));
        }
        if !seen.insert(anchor.name.as_str()) {
            return Err(ConfigError::DuplicateAnchor(anchor.name.clone()));
        }
        members.push(build_member(anchor, store)?);
    }

    Ok(members
        .into_iter()
        .map(|member| conductor.add_member(member))
        .collect())
}

fn build_member(anchor: &AnchorConfig, store: &ProviderStore) -> Result<Member, ConfigError> {
    let provider = store
        .fetch(&anchor.provider)
        .map_err(|source| ConfigError::Provider {
            anchor: anchor.name.clone(),
            source,
        })?;
    let request = Request::new(anchor.common_name.clone(), anchor.alt_names.clone());
    let handle = DefaultLeaseHandle::new(build_destination(anchor)?, build_action(anchor));
    Ok(Member::new(anchor.name.clone(), provider, request, handle))
}

fn build_destination(anchor: &AnchorConfig) -> Result<Arc<dyn Destination>, ConfigError> {
    match anchor.dest.as_str() {
        "file" => {
            let options = FileDestinationOptions::deserialize(&anchor.dest_options).map_err(
                |e| ConfigError::InvalidOptions {
                    name: anchor.name.clone(),
                    reason: e.to_string(),
                },
            )?;
            Ok(Arc::new(FileDestination::from(options)))
        }
        other => Err(ConfigError::UnknownDestination {
            anchor: anchor.name.clone(),
            dest: other.to_string(),
        }),
    }
}

fn build_action(anchor: &AnchorConfig) -> Arc<dyn Action> {
    match &anchor.action {
        None | Some(ActionConfig::None) => Arc::new(NoopAction),
        Some(ActionConfig::Command { program, args }) => {
            Arc::new(CommandAction::new(program.clone(), args.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_document() {
        let config = Config::from_json(
            &json!({
                "providers": [{"name": "vault", "id": "vault", "options": {"role": "web"}}],
                "anchors": [{
                    "name": "web",
                    "provider": "vault",
                    "common_name": "web.example.org",
                    "dest": "file",
                    "dest_options": {"certificate": "/tmp/a.crt", "private_key": "/tmp/a.key"},
                    "action": {"kind": "command", "program": "true"}
                }],
                "api": {"address": "127.0.0.1:8080"}
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(config.providers[0].kind, "vault");
        assert_eq!(config.anchors[0].alt_names, Vec::<String>::new());
        assert_eq!(
            config.anchors[0].action,
            Some(ActionConfig::Command {
                program: "true".into(),
                args: vec![]
            })
        );
        assert_eq!(config.api.address(), Some("127.0.0.1:8080"));
    }

    #[test]
    fn empty_address_disables_api() {
        let config = Config::from_json(r#"{"api": {"address": ""}}"#).unwrap();
        assert_eq!(config.api.address(), None);
        assert_eq!(Config::from_json("{}").unwrap().api.address(), None);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = Config::from_json(r#"{"anchor": []}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "got {err:?}");
    }

    #[test]
    fn later_api_section_wins() {
        let mut config = Config::from_json(r#"{"api": {"address": "a:1"}}"#).unwrap();
        config.merge(Config::from_json(r#"{"providers": []}"#).unwrap());
        assert_eq!(config.api.address(), Some("a:1"));
        config.merge(Config::from_json(r#"{"api": {"address": "b:2"}}"#).unwrap());
        assert_eq!(config.api.address(), Some("b:2"));
    }
}
