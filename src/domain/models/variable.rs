//! Variable definitions.
//!
//! A variable carries either a literal list of base values (data variant),
//! a file-regex scan that discovers base values at runtime, or nothing but
//! a template (template-only). Its `value` template may reference other
//! variables with `<<name>>`, which induces the dependency DAG the
//! resolver walks.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::{DeclarationError, ResolutionError};
use crate::domain::template;

/// Cast applied to a file-regex capture group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Str,
    Int,
    Float,
    Bool,
}

impl Default for ValueKind {
    fn default() -> Self {
        Self::Str
    }
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
        }
    }

    /// Cast a captured string to a typed JSON value.
    pub fn cast(&self, raw: &str, var_name: &str) -> Result<Value, ResolutionError> {
        let fail = || ResolutionError::CastFailed {
            name: var_name.to_string(),
            value: raw.to_string(),
            kind: self.as_str().to_string(),
        };
        match self {
            Self::Str => Ok(Value::String(raw.to_string())),
            Self::Int => raw.parse::<i64>().map(Value::from).map_err(|_| fail()),
            Self::Float => raw.parse::<f64>().map(Value::from).map_err(|_| fail()),
            Self::Bool => match raw {
                "true" | "True" | "1" => Ok(Value::Bool(true)),
                "false" | "False" | "0" => Ok(Value::Bool(false)),
                _ => Err(fail()),
            },
        }
    }
}

/// Runtime discovery of base values by scanning the working directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRegex {
    /// Pattern matched against file names in the working directory
    pub pattern: String,
    /// Index of the capture group that yields the value
    #[serde(default)]
    pub group: usize,
    /// Cast applied to the captured text
    #[serde(default, rename = "type")]
    pub kind: ValueKind,
    /// Keep only captures whose display form appears here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset: Option<Vec<String>>,
}

/// Where a variable's base values come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarSource {
    /// Literal ordered base values
    Data(Vec<Value>),
    /// Values discovered by scanning the working directory
    FileRegex(FileRegex),
}

/// Outcome of producing a variable's base values.
#[derive(Debug, Clone, PartialEq)]
pub enum BaseValues {
    /// Concrete values, in scan or declaration order
    Known(Vec<Value>),
    /// The scan directory is not populated yet; resolution moves to runtime
    Deferred,
    /// The variable has no base values of its own (template-only)
    None,
}

/// A named variable definition owned by a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<VarSource>,
    /// Format template; may embed `<<name>>` references and positional
    /// specifiers
    pub value: String,
}

/// Default value template when a declaration omits one.
pub const DEFAULT_VALUE_TEMPLATE: &str = "{}";

impl VarDefinition {
    pub fn new(name: impl Into<String>, source: Option<VarSource>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            source,
            value: value.unwrap_or_else(|| DEFAULT_VALUE_TEMPLATE.to_string()),
        }
    }

    /// Names of variables this one depends on, first-appearance order.
    pub fn references(&self) -> Vec<String> {
        template::unique_references(&self.value)
    }

    /// A base variable references no other variable.
    pub fn is_base(&self) -> bool {
        self.references().is_empty()
    }

    /// True when base values exist or may exist (data or file-regex).
    pub fn has_base_values(&self) -> bool {
        self.source.is_some()
    }

    /// Declaration-time checks: data must be non-empty, the regex must
    /// compile, the template's specifiers must parse, and a positional
    /// specifier must exist when base values do.
    pub fn validate(&self) -> Result<(), DeclarationError> {
        if let Err(bad) = template::parse_specs(&self.value) {
            return Err(DeclarationError::BadFormatSpecifier {
                name: self.name.clone(),
                detail: bad,
            });
        }

        match &self.source {
            Some(VarSource::Data(values)) if values.is_empty() => {
                return Err(DeclarationError::EmptyData(self.name.clone()));
            }
            Some(VarSource::FileRegex(fr)) => {
                if let Err(e) = Regex::new(&fr.pattern) {
                    return Err(DeclarationError::BadFileRegex {
                        name: self.name.clone(),
                        detail: e.to_string(),
                    });
                }
            }
            _ => {}
        }

        if self.has_base_values() && template::count_positional(&self.value) == 0 {
            return Err(DeclarationError::MissingPositionalSpecifier(
                self.name.clone(),
            ));
        }

        Ok(())
    }

    /// Produce this variable's base values within a working directory.
    ///
    /// A file-regex variable whose directory is missing or matches nothing
    /// is `Deferred`; the resolver decides whether deferral is acceptable
    /// (submit time) or an error (runtime).
    pub fn base_values(&self, directory: &Path) -> Result<BaseValues, ResolutionError> {
        match &self.source {
            None => Ok(BaseValues::None),
            Some(VarSource::Data(values)) => Ok(BaseValues::Known(values.clone())),
            Some(VarSource::FileRegex(fr)) => self.scan(fr, directory),
        }
    }

    fn scan(&self, fr: &FileRegex, directory: &Path) -> Result<BaseValues, ResolutionError> {
        if !directory.is_dir() {
            return Ok(BaseValues::Deferred);
        }

        // Validated at declaration time; a stored workflow can still carry
        // a pattern this regex build rejects, so surface it as unresolved.
        let pattern = Regex::new(&fr.pattern)
            .map_err(|_| ResolutionError::Unresolved(self.name.clone()))?;

        let mut entries: Vec<String> = std::fs::read_dir(directory)
            .map_err(|_| ResolutionError::MissingDirectory {
                name: self.name.clone(),
                directory: directory.display().to_string(),
            })?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();

        let mut values = Vec::new();
        for file_name in entries {
            let Some(caps) = pattern.captures(&file_name) else {
                continue;
            };
            let Some(group) = caps.get(fr.group + 1) else {
                continue;
            };
            let value = fr.kind.cast(group.as_str(), &self.name)?;
            if let Some(subset) = &fr.subset {
                if !subset.contains(&template::display_value(&value)) {
                    continue;
                }
            }
            values.push(value);
        }

        if values.is_empty() {
            return Ok(BaseValues::Deferred);
        }
        Ok(BaseValues::Known(values))
    }

    /// Multiplicity known without resolving: data length, subset length
    /// for an unscanned file-regex, 1 for template-only.
    pub fn static_multiplicity(&self) -> Option<usize> {
        match &self.source {
            Some(VarSource::Data(values)) => Some(values.len()),
            Some(VarSource::FileRegex(fr)) => fr.subset.as_ref().map(|s| s.len()),
            None => Some(1),
        }
    }
}
