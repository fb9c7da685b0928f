//! Step option templating.
//!
//! String values in a step's `with` block are rendered per `(step,
//! repository)` pair just before dispatch, with two scopes:
//!
//! - `repository` — `path`, `folder`, `identity`, `owner`, `repo`,
//!   `default_branch`
//! - `environment` — the process environment
//!
//! Rendering failures are fatal for that pair only.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use minijinja::Environment;
use serde::Serialize;
use serde_yaml::Value;

use crate::discover::RepoRecord;

#[derive(Serialize)]
struct RepositoryScope {
    path: String,
    folder: String,
    identity: String,
    owner: Option<String>,
    repo: Option<String>,
    default_branch: Option<String>,
}

#[derive(Serialize)]
struct TemplateScope {
    repository: RepositoryScope,
    environment: BTreeMap<String, String>,
}

fn scope_for(record: &RepoRecord) -> TemplateScope {
    let pair = record.canonical.as_ref().or(record.origin.as_ref());
    TemplateScope {
        repository: RepositoryScope {
            path: record.path.display().to_string(),
            folder: record.folder_name(),
            identity: record.identity(),
            owner: pair.map(|p| p.owner.clone()),
            repo: pair.map(|p| p.repo.clone()),
            default_branch: record.default_branch.clone(),
        },
        environment: std::env::vars().collect(),
    }
}

/// Render every string in the options tree against the repository scope.
pub fn render_options(
    options: &IndexMap<String, Value>,
    record: &RepoRecord,
) -> anyhow::Result<IndexMap<String, Value>> {
    let scope = minijinja::Value::from_serialize(scope_for(record));
    let env = Environment::new();

    options
        .iter()
        .map(|(key, value)| Ok((key.clone(), render_value(&env, value, &scope)?)))
        .collect()
}

fn render_value(
    env: &Environment<'_>,
    value: &Value,
    scope: &minijinja::Value,
) -> anyhow::Result<Value> {
    match value {
        Value::String(text) => {
            if text.contains("{{") || text.contains("{%") {
                let template = env
                    .template_from_str(text)
                    .map_err(|e| anyhow::anyhow!("template syntax error in {text:?}: {e}"))?;
                let rendered = template
                    .render(scope)
                    .map_err(|e| anyhow::anyhow!("template render error in {text:?}: {e}"))?;
                Ok(Value::String(rendered))
            } else {
                Ok(value.clone())
            }
        }
        Value::Sequence(items) => Ok(Value::Sequence(
            items
                .iter()
                .map(|item| render_value(env, item, scope))
                .collect::<anyhow::Result<_>>()?,
        )),
        Value::Mapping(mapping) => {
            let mut rendered = serde_yaml::Mapping::new();
            for (key, item) in mapping {
                rendered.insert(key.clone(), render_value(env, item, scope)?);
            }
            Ok(Value::Mapping(rendered))
        }
        other => Ok(other.clone()),
    }
}
