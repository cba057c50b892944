//! Rendering prompt templates into concrete prompts.
//!
//! Message content refers to arguments as `{{ name }}`. Rendering requires
//! the parameter object to carry exactly the declared arguments, each with
//! the declared JSON type.

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::errors::ApiError;
use crate::models::{Prompt, PromptMessage, PromptTemplate};

const PLACEHOLDER: &str = r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgumentType {
    #[serde(rename = "str")]
    Str,
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "list")]
    List,
    #[serde(rename = "dict")]
    Dict,
}

impl ArgumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Dict => "dict",
        }
    }

    /// Strict match: no coercion from strings, integers are accepted as floats.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Str => value.is_string(),
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::List => value.is_array(),
            Self::Dict => value.is_object(),
        }
    }
}

impl fmt::Display for ArgumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("unexpected parameter: {0}")]
    UnexpectedParameter(String),

    #[error("parameter {name} must be of type {expected}")]
    WrongType { name: String, expected: ArgumentType },

    #[error("template variables {variables:?} do not match arguments {arguments:?}")]
    ArgumentMismatch {
        variables: Vec<String>,
        arguments: Vec<String>,
    },

    #[error("invalid placeholder pattern: {0}")]
    Pattern(String),
}

impl From<TemplateError> for ApiError {
    fn from(e: TemplateError) -> Self {
        match e {
            TemplateError::Pattern(_) => Self::internal(e.to_string()),
            _ => Self::invalid_request(e.to_string()),
        }
    }
}

fn placeholder() -> Result<Regex, TemplateError> {
    Regex::new(PLACEHOLDER).map_err(|e| TemplateError::Pattern(e.to_string()))
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl PromptTemplate {
    /// Variable names referenced across all messages.
    pub fn variables(&self) -> Result<BTreeSet<String>, TemplateError> {
        let re = placeholder()?;
        Ok(self
            .messages
            .iter()
            .flat_map(|m| re.captures_iter(&m.content))
            .map(|c| c[1].to_string())
            .collect())
    }

    /// The declared arguments and the referenced variables must be the same set.
    pub fn validate(&self) -> Result<(), TemplateError> {
        let variables = self.variables()?;
        let arguments: BTreeSet<String> = self.arguments.iter().map(|a| a.name.clone()).collect();
        if variables != arguments {
            return Err(TemplateError::ArgumentMismatch {
                variables: variables.into_iter().collect(),
                arguments: arguments.into_iter().collect(),
            });
        }
        Ok(())
    }

    fn check_parameters(&self, params: &Map<String, Value>) -> Result<(), TemplateError> {
        for arg in &self.arguments {
            let value = params
                .get(&arg.name)
                .ok_or_else(|| TemplateError::MissingParameter(arg.name.clone()))?;
            if !arg.kind.accepts(value) {
                return Err(TemplateError::WrongType {
                    name: arg.name.clone(),
                    expected: arg.kind,
                });
            }
        }
        if let Some(extra) = params
            .keys()
            .find(|k| !self.arguments.iter().any(|a| &a.name == *k))
        {
            return Err(TemplateError::UnexpectedParameter(extra.clone()));
        }
        Ok(())
    }

    /// Substitute `params` into every message. Strings are inserted as-is,
    /// other values as their JSON text.
    pub fn render(&self, params: &Map<String, Value>) -> Result<Prompt, TemplateError> {
        self.validate()?;
        self.check_parameters(params)?;
        let re = placeholder()?;
        let messages = self
            .messages
            .iter()
            .map(|m| PromptMessage {
                role: m.role,
                content: re
                    .replace_all(&m.content, |c: &regex::Captures<'_>| {
                        params.get(&c[1]).map(render_value).unwrap_or_default()
                    })
                    .into_owned(),
            })
            .collect();
        Ok(Prompt {
            name: self.name.clone(),
            description: self.description.clone(),
            language: self.language.clone(),
            tags: self.tags.clone(),
            messages,
        })
    }
}
