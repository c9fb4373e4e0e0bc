//! Build manifest (`skiff.yaml`) shipped inside every commit tarball.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Name of the manifest member extracted from commit tarballs.
pub const MANIFEST_FILENAME: &str = "skiff.yaml";

const PARAMETERS_PLACEHOLDER: &str = "{parameters}";
const PARAMETER_PREFIX: &str = "{parameter:";
const PARAMETER_VALUE_PREFIX: &str = "{parameter-value:";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to parse build manifest: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("build manifest defines step '{0}' more than once")]
    DuplicateStep(String),
    #[error("step '{0}' is not defined in the build manifest")]
    UnknownStep(String),
    #[error("step '{step}' references undeclared parameter '{name}'")]
    UnknownParameter { step: String, name: String },
    #[error("unterminated placeholder in command of step '{0}'")]
    UnterminatedPlaceholder(String),
}

/// Parsed manifest: steps in declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuildConfig {
    pub steps: IndexMap<String, Step>,
}

impl BuildConfig {
    /// Parse a manifest document. Items other than `step` are ignored.
    pub fn parse(source: &str) -> Result<Self, ManifestError> {
        let items: Vec<BTreeMap<String, serde_yaml::Value>> = serde_yaml::from_str(source)?;
        let mut steps = IndexMap::new();
        for mut item in items {
            let Some(raw) = item.remove("step") else {
                continue;
            };
            let step: Step = serde_yaml::from_value(raw)?;
            if steps.contains_key(&step.name) {
                return Err(ManifestError::DuplicateStep(step.name));
            }
            steps.insert(step.name.clone(), step);
        }
        Ok(Self { steps })
    }

    pub fn step(&self, name: &str) -> Result<&Step, ManifestError> {
        self.steps
            .get(name)
            .ok_or_else(|| ManifestError::UnknownStep(name.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub command: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub environment_variables: Vec<EnvironmentVariable>,
    #[serde(default)]
    pub inputs: Vec<InputDeclaration>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    String,
    Integer,
    Float,
    Flag,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Parameter {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: ParameterType,
    #[serde(default)]
    pub default: Option<Value>,
    /// Argument template; `{v}` is the value and `{name}` the parameter name.
    #[serde(default)]
    pub pass_as: Option<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputDeclaration {
    pub name: String,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl Step {
    /// Variables whose declared default is non-empty.
    pub fn default_environment(&self) -> BTreeMap<String, String> {
        self.environment_variables
            .iter()
            .filter_map(|var| {
                let value = var.default.as_ref().map(render_value)?;
                (!value.is_empty()).then(|| (var.name.clone(), value))
            })
            .collect()
    }

    /// Render every command line with the given parameter values, falling back
    /// to declared defaults.
    pub fn build_command(
        &self,
        parameter_values: &Map<String, Value>,
    ) -> Result<Vec<String>, ManifestError> {
        let mut arguments = IndexMap::new();
        for parameter in &self.parameters {
            let value = parameter_values
                .get(&parameter.name)
                .or(parameter.default.as_ref());
            if let Some(argument) = value.and_then(|value| parameter.argument(value)) {
                arguments.insert(parameter.name.as_str(), argument);
            }
        }
        let all = arguments.values().cloned().collect::<Vec<_>>().join(" ");
        self.command
            .iter()
            .map(|line| self.interpolate(line, &all, &arguments, parameter_values))
            .collect()
    }

    fn parameter(&self, name: &str) -> Result<&Parameter, ManifestError> {
        self.parameters
            .iter()
            .find(|parameter| parameter.name == name)
            .ok_or_else(|| ManifestError::UnknownParameter {
                step: self.name.clone(),
                name: name.to_string(),
            })
    }

    fn interpolate(
        &self,
        line: &str,
        all: &str,
        arguments: &IndexMap<&str, String>,
        parameter_values: &Map<String, Value>,
    ) -> Result<String, ManifestError> {
        // One pass over the template; substituted text is never rescanned.
        let mut rendered = String::with_capacity(line.len() + all.len());
        let mut rest = line;
        while let Some(start) = rest.find('{') {
            rendered.push_str(&rest[..start]);
            let tail = &rest[start..];
            if let Some(after) = tail.strip_prefix(PARAMETERS_PLACEHOLDER) {
                rendered.push_str(all);
                rest = after;
                continue;
            }
            let (prefix, bare) = if tail.starts_with(PARAMETER_PREFIX) {
                (PARAMETER_PREFIX, false)
            } else if tail.starts_with(PARAMETER_VALUE_PREFIX) {
                (PARAMETER_VALUE_PREFIX, true)
            } else {
                rendered.push('{');
                rest = &tail[1..];
                continue;
            };
            let end = tail
                .find('}')
                .ok_or_else(|| ManifestError::UnterminatedPlaceholder(self.name.clone()))?;
            let name = &tail[prefix.len()..end];
            let parameter = self.parameter(name)?;
            if bare {
                let value = parameter_values
                    .get(name)
                    .or(parameter.default.as_ref())
                    .map(render_value)
                    .unwrap_or_default();
                rendered.push_str(&shell_quote(&value));
            } else if let Some(argument) = arguments.get(name) {
                rendered.push_str(argument);
            }
            rest = &tail[end + 1..];
        }
        rendered.push_str(rest);
        Ok(rendered)
    }
}

impl Parameter {
    fn argument(&self, value: &Value) -> Option<String> {
        if value.is_null() {
            return None;
        }
        if self.kind == ParameterType::Flag {
            let enabled = match value {
                Value::Bool(flag) => *flag,
                Value::String(raw) => matches!(raw.as_str(), "true" | "1" | "yes"),
                Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
                _ => false,
            };
            return enabled.then(|| {
                self.pass_as
                    .clone()
                    .unwrap_or_else(|| format!("--{}", self.name))
            });
        }
        let template = self.pass_as.as_deref().unwrap_or("--{name}={v}");
        Some(
            template
                .replace("{name}", &self.name)
                .replace("{v}", &shell_quote(&render_value(value))),
        )
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "@%+=:,./_-".contains(ch));
    if safe {
        return value.to_string();
    }
    let mut escaped = String::from("'");
    for ch in value.chars() {
        if ch == '\'' {
            escaped.push_str("'\\''");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(line) => vec![line],
        OneOrMany::Many(lines) => lines,
    })
}
