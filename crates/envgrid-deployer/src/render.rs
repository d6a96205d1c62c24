//! Template rendering.
//!
//! Templates use `{{ NAME }}` placeholders. Every placeholder must resolve;
//! an unknown name or a `{{` that does not open a well-formed placeholder
//! is a render failure rather than silently producing a broken manifest.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use envgrid_core::{EnvgridError, EnvgridResult, PROTECTED_KEYS};
use regex::Regex;
use tracing::debug;

/// Placeholder whose presence turns on discovery variable injection.
pub const DISCOVERY_MARKER: &str = "DISCOVERY_SERVER";

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").ok());

/// Turns a named template plus variables into manifest text.
#[async_trait]
pub trait TemplateRenderer: Send + Sync + 'static {
    /// Raw text of the template called `name`.
    async fn template_source(&self, name: &str) -> EnvgridResult<String>;

    /// Variables from the YAML variables file called `name`.
    async fn variables_file(&self, name: &str) -> EnvgridResult<HashMap<String, String>>;

    /// Substitute `variables` into template text.
    fn render_str(&self, source: &str, variables: &HashMap<String, String>)
    -> EnvgridResult<String>;

    async fn render(
        &self,
        name: &str,
        variables: &HashMap<String, String>,
    ) -> EnvgridResult<String> {
        let source = self.template_source(name).await?;
        self.render_str(&source, variables)
    }
}

/// Renderer reading templates and variable files from two directories.
#[derive(Debug, Clone)]
pub struct FileTemplateRenderer {
    templates_dir: PathBuf,
    vars_dir: PathBuf,
}

impl FileTemplateRenderer {
    pub fn new(templates_dir: impl Into<PathBuf>, vars_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            vars_dir: vars_dir.into(),
        }
    }
}

/// Resolve `name` inside `dir`, refusing anything that could leave it.
fn contained(dir: &Path, name: &str) -> EnvgridResult<PathBuf> {
    let plain = !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && name != "."
        && name != "..";
    if !plain {
        return Err(EnvgridError::render(format!("invalid file name {name:?}")));
    }
    Ok(dir.join(name))
}

async fn read_source(path: &Path, what: &str) -> EnvgridResult<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| EnvgridError::RenderFailure {
            message: format!("{what} {} unreadable", path.display()),
            source: Some(Box::new(e)),
        })
}

#[async_trait]
impl TemplateRenderer for FileTemplateRenderer {
    async fn template_source(&self, name: &str) -> EnvgridResult<String> {
        let path = contained(&self.templates_dir, name)?;
        read_source(&path, "template").await
    }

    async fn variables_file(&self, name: &str) -> EnvgridResult<HashMap<String, String>> {
        let path = contained(&self.vars_dir, name)?;
        let text = read_source(&path, "variables file").await?;
        parse_variables(&text)
    }

    fn render_str(
        &self,
        source: &str,
        variables: &HashMap<String, String>,
    ) -> EnvgridResult<String> {
        substitute(source, variables)
    }
}

/// Flatten a YAML mapping of scalars into string variables.
pub fn parse_variables(text: &str) -> EnvgridResult<HashMap<String, String>> {
    if text.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let value: serde_yaml::Value = serde_yaml::from_str(text).map_err(|e| {
        EnvgridError::RenderFailure {
            message: "variables file is not valid YAML".to_string(),
            source: Some(Box::new(e)),
        }
    })?;
    let serde_yaml::Value::Mapping(map) = value else {
        return Err(EnvgridError::render("variables file must be a mapping"));
    };

    let mut vars = HashMap::with_capacity(map.len());
    for (key, value) in map {
        let Some(key) = key.as_str() else {
            return Err(EnvgridError::render("variable names must be strings"));
        };
        let value = match value {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Null => String::new(),
            _ => {
                return Err(EnvgridError::render(format!(
                    "variable {key} must be a scalar"
                )));
            }
        };
        vars.insert(key.to_string(), value);
    }
    Ok(vars)
}

/// Replace every `{{ NAME }}` in `source`.
pub fn substitute(source: &str, variables: &HashMap<String, String>) -> EnvgridResult<String> {
    let Some(placeholder) = PLACEHOLDER.as_ref() else {
        return Err(EnvgridError::render("placeholder pattern failed to compile"));
    };
    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for caps in placeholder.captures_iter(source) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        check_gap(source, last, whole.start())?;
        out.push_str(&source[last..whole.start()]);
        let value = variables.get(name.as_str()).ok_or_else(|| {
            EnvgridError::render(format!("unresolved variable {}", name.as_str()))
        })?;
        out.push_str(value);
        last = whole.end();
    }
    check_gap(source, last, source.len())?;
    out.push_str(&source[last..]);
    Ok(out)
}

fn check_gap(source: &str, start: usize, end: usize) -> EnvgridResult<()> {
    if let Some(pos) = source[start..end].find("{{") {
        let line = source[..start + pos].matches('\n').count() + 1;
        return Err(EnvgridError::render(format!(
            "malformed placeholder on line {line}"
        )));
    }
    Ok(())
}

/// Layer per-request overrides over the process-wide variables.
///
/// Overrides for protected keys are dropped.
pub fn merge_variables(
    base: &HashMap<String, String>,
    file_vars: HashMap<String, String>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut vars = base.clone();
    for (key, value) in file_vars {
        if !PROTECTED_KEYS.contains(&key.as_str()) {
            vars.insert(key, value);
        }
    }
    for (key, value) in overrides {
        if PROTECTED_KEYS.contains(&key.as_str()) {
            debug!(variable = %key, "ignoring override of protected variable");
            continue;
        }
        vars.insert(key.clone(), value.clone());
    }
    vars
}

/// Add `DEPLOYMENT_ID` and `DISCOVERY_SERVER` when the template asks for
/// discovery. The endpoint comes from the request, then the config.
pub fn inject_discovery(
    vars: &mut HashMap<String, String>,
    source: &str,
    id: &str,
    overrides: &HashMap<String, String>,
    configured: Option<&str>,
) {
    if !source.contains(DISCOVERY_MARKER) {
        return;
    }
    vars.insert("DEPLOYMENT_ID".to_string(), id.to_string());
    let endpoint = overrides
        .get(DISCOVERY_MARKER)
        .map(String::as_str)
        .or(configured);
    if let Some(endpoint) = endpoint {
        vars.insert(DISCOVERY_MARKER.to_string(), endpoint.to_string());
    }
}
