//! Prompt templates.
//!
//! Templates come from a JSON document loaded once at startup. Every string
//! value is a template addressed by its key; the `models` key holds the list
//! of model selectors offered to clients.

use fs_err as fs;
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;

use crate::errors::{ServiceError, ServiceResult};

pub const GENERAL_INPUT: &str = "GeneralInputPrompt";
pub const UNIT_CONVERSION: &str = "UnitConversionPrompt";
pub const PYTHON_FUNCTION: &str = "PythonFunctionPrompt";
pub const PYTHON_SYSTEM: &str = "PythonSystemPrompt";
pub const SYSTEM_GPT4: &str = "RefinedSystemPrompt";
pub const SYSTEM_GPT35: &str = "RefinedSystemPrompt3.5";

const MODELS_KEY: &str = "models";

pub fn python_system_prompt() -> &'static str {
    "You are a skilled Python programmer generating unit conversion functions. \
Generate the exact Python code necessary based on user requirements. \
Include no extra formatting for markup. Plain text is necessary."
}

pub fn python_function_prompt() -> &'static str {
    "Please provide the exact Python code for a function that {prompt}. \
The function should take one parameter as input and return the converted value. \
No additional text is necessary; only provide the complete Python function."
}

#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: HashMap<String, String>,
    models: Option<Vec<String>>,
}

impl TemplateStore {
    pub fn load(path: &Path) -> ServiceResult<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ServiceError::NotFound(format!(
                    "prompt configuration {} does not exist",
                    path.display()
                )))
            }
            Err(e) => return Err(ServiceError::Storage(e.to_string())),
        };
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> ServiceResult<Self> {
        let doc: Value = serde_json::from_str(raw)
            .map_err(|e| ServiceError::Parse(format!("prompt configuration: {e}")))?;
        let Value::Object(map) = doc else {
            return Err(ServiceError::Parse(
                "prompt configuration must be a JSON object".into(),
            ));
        };

        let mut store = TemplateStore::default();
        for (key, value) in map {
            let is_models = key == MODELS_KEY;
            match value {
                Value::Array(items) if is_models => {
                    let models = items
                        .into_iter()
                        .map(|v| match v {
                            Value::String(s) => Ok(s),
                            other => Err(ServiceError::Parse(format!(
                                "model entries must be strings, got {other}"
                            ))),
                        })
                        .collect::<ServiceResult<Vec<_>>>()?;
                    store.models = Some(models);
                }
                _ if is_models => {
                    return Err(ServiceError::Parse("`models` must be an array".into()))
                }
                Value::String(template) => {
                    store.templates.insert(key, template);
                }
                // Non-string entries (notes, metadata) are not templates.
                _ => {}
            }
        }
        Ok(store)
    }

    pub fn get(&self, id: &str) -> ServiceResult<&str> {
        self.templates
            .get(id)
            .map(String::as_str)
            .ok_or_else(|| ServiceError::NotFound(format!("prompt template `{id}`")))
    }

    pub fn get_or<'a>(&'a self, id: &str, fallback: &'a str) -> &'a str {
        self.templates.get(id).map(String::as_str).unwrap_or(fallback)
    }

    pub fn models(&self) -> ServiceResult<&[String]> {
        self.models
            .as_deref()
            .ok_or_else(|| ServiceError::NotFound("no `models` entry in prompt configuration".into()))
    }
}

/// Literal `{name}` substitution. Unknown placeholders are left in place.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}
