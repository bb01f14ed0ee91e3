//! Layered configuration.
//!
//! Settings are resolved from four layers, lowest precedence first:
//! built-in defaults, the TOML file, `DOCSH_*` environment variables, and
//! command-line flags. Each layer is a [`RawConfig`] whose fields are all
//! optional; a higher layer only overrides the fields it actually sets.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::classify::Generation;

pub const DEFAULT_CONFIG_PATH: &str = "./config/docsh.toml";
const ENV_PREFIX: &str = "DOCSH_";

/// Fully resolved, immutable process settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub corpus: CorpusConfig,
    pub tool: ToolConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct CorpusConfig {
    pub repo_url: String,
    pub git_ref: String,
    /// Minutes between refreshes; `0` disables refreshing.
    pub refresh_interval_minutes: u64,
    pub local_root: PathBuf,
    pub generation: Generation,
    /// Manifest location relative to `local_root`.
    pub manifest: PathBuf,
    pub cache_dir: PathBuf,
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

fn default_ignore() -> Vec<String> {
    vec![
        "**/node_modules/**".to_string(),
        "**/.git/**".to_string(),
        "**/.github/**".to_string(),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            corpus: CorpusConfig {
                repo_url: "https://github.com/aws-amplify/docs.git".to_string(),
                git_ref: "main".to_string(),
                refresh_interval_minutes: 0,
                local_root: PathBuf::from("./data/docs"),
                generation: Generation::Gen2,
                manifest: PathBuf::from("src/directory/directory.mjs"),
                cache_dir: PathBuf::from("./data/cache"),
                ignore: default_ignore(),
            },
            tool: ToolConfig {
                name: "search_docs".to_string(),
                description: "Search the documentation corpus. Supports natural-language and \
                              boolean queries (AND, OR, NOT, quoted phrases) and returns ranked, \
                              paginated results."
                    .to_string(),
            },
            server: ServerConfig {
                bind: "127.0.0.1:7331".to_string(),
            },
        }
    }
}

impl CorpusConfig {
    pub fn refresh_enabled(&self) -> bool {
        self.refresh_interval_minutes > 0
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.local_root.join(&self.manifest)
    }

    pub fn ignore_set(&self) -> Result<GlobSet> {
        build_globset(&self.ignore)
    }
}

/// One configuration layer. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(default)]
    pub corpus: RawCorpus,
    #[serde(default)]
    pub tool: RawTool,
    #[serde(default)]
    pub server: RawServer,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCorpus {
    pub repo_url: Option<String>,
    pub git_ref: Option<String>,
    pub refresh_interval_minutes: Option<u64>,
    pub local_root: Option<PathBuf>,
    pub generation: Option<Generation>,
    pub manifest: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub ignore: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTool {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawServer {
    pub bind: Option<String>,
}

fn overlay<T>(base: &mut Option<T>, top: Option<T>) {
    if top.is_some() {
        *base = top;
    }
}

impl RawConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse config file")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Builds a layer from `DOCSH_*` variables. Unknown variables are ignored.
    pub fn from_env<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut raw = Self::default();
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "REPO_URL" => raw.corpus.repo_url = Some(value),
                "GIT_REF" => raw.corpus.git_ref = Some(value),
                "REFRESH_INTERVAL" => {
                    let minutes = value.trim().parse::<u64>().with_context(|| {
                        format!("{}REFRESH_INTERVAL must be a number of minutes", ENV_PREFIX)
                    })?;
                    raw.corpus.refresh_interval_minutes = Some(minutes);
                }
                "LOCAL_ROOT" => raw.corpus.local_root = Some(PathBuf::from(value)),
                "GENERATION" => raw.corpus.generation = Some(value.parse()?),
                "MANIFEST" => raw.corpus.manifest = Some(PathBuf::from(value)),
                "CACHE_DIR" => raw.corpus.cache_dir = Some(PathBuf::from(value)),
                "IGNORE" => {
                    raw.corpus.ignore = Some(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .collect(),
                    )
                }
                "TOOL_NAME" => raw.tool.name = Some(value),
                "TOOL_DESCRIPTION" => raw.tool.description = Some(value),
                "BIND" => raw.server.bind = Some(value),
                _ => {}
            }
        }
        Ok(raw)
    }

    /// Overrides fields of `self` with every field `top` sets.
    pub fn merge(mut self, top: RawConfig) -> Self {
        let c = top.corpus;
        overlay(&mut self.corpus.repo_url, c.repo_url);
        overlay(&mut self.corpus.git_ref, c.git_ref);
        overlay(
            &mut self.corpus.refresh_interval_minutes,
            c.refresh_interval_minutes,
        );
        overlay(&mut self.corpus.local_root, c.local_root);
        overlay(&mut self.corpus.generation, c.generation);
        overlay(&mut self.corpus.manifest, c.manifest);
        overlay(&mut self.corpus.cache_dir, c.cache_dir);
        overlay(&mut self.corpus.ignore, c.ignore);
        overlay(&mut self.tool.name, top.tool.name);
        overlay(&mut self.tool.description, top.tool.description);
        overlay(&mut self.server.bind, top.server.bind);
        self
    }

    /// Fills unset fields from defaults and validates the result.
    pub fn resolve(self) -> Result<Config> {
        let d = Config::default();
        let c = self.corpus;
        let config = Config {
            corpus: CorpusConfig {
                repo_url: c.repo_url.unwrap_or(d.corpus.repo_url),
                git_ref: c.git_ref.unwrap_or(d.corpus.git_ref),
                refresh_interval_minutes: c
                    .refresh_interval_minutes
                    .unwrap_or(d.corpus.refresh_interval_minutes),
                local_root: c.local_root.unwrap_or(d.corpus.local_root),
                generation: c.generation.unwrap_or(d.corpus.generation),
                manifest: c.manifest.unwrap_or(d.corpus.manifest),
                cache_dir: c.cache_dir.unwrap_or(d.corpus.cache_dir),
                ignore: c.ignore.unwrap_or(d.corpus.ignore),
            },
            tool: ToolConfig {
                name: self.tool.name.unwrap_or(d.tool.name),
                description: self.tool.description.unwrap_or(d.tool.description),
            },
            server: ServerConfig {
                bind: self.server.bind.unwrap_or(d.server.bind),
            },
        };
        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.corpus.repo_url.trim().is_empty() {
        bail!("corpus.repo_url must not be empty");
    }
    if config.corpus.git_ref.trim().is_empty() {
        bail!("corpus.git_ref must not be empty");
    }
    if config.tool.name.trim().is_empty() {
        bail!("tool.name must not be empty");
    }
    if config.server.bind.trim().is_empty() {
        bail!("server.bind must not be empty");
    }
    config
        .corpus
        .ignore_set()
        .with_context(|| "corpus.ignore contains an invalid glob")?;
    Ok(())
}

/// Resolves the full layer stack.
///
/// `file` is the explicitly requested config path; when absent the default
/// path is used only if it exists.
pub fn load_config(
    file: Option<&Path>,
    env: impl IntoIterator<Item = (String, String)>,
    cli: RawConfig,
) -> Result<Config> {
    let file_layer = match file {
        Some(path) => RawConfig::from_file(path)?,
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                RawConfig::from_file(default)?
            } else {
                RawConfig::default()
            }
        }
    };

    RawConfig::default()
        .merge(file_layer)
        .merge(RawConfig::from_env(env)?)
        .merge(cli)
        .resolve()
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
