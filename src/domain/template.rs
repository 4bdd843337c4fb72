//! Template machinery for command and variable value strings.
//!
//! Two syntaxes coexist in one template: `<<name>>` references to other
//! variables, and positional format specifiers (`{}`, `{:s}`, `{:d}`,
//! `{:03d}`, `{:f}`, `{:.2f}`) that receive the variable's own base value.
//! References are substituted first; the positional pass runs on the
//! result.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::domain::error::ResolutionError;

static VAR_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<<([^<>\s]+?)>>").expect("static regex"));

static POSITIONAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(?::([^{}]*))?\}").expect("static regex"));

/// Extract `<<name>>` references in order of appearance, duplicates kept.
pub fn extract_references(source: &str) -> Vec<String> {
    VAR_REF
        .captures_iter(source)
        .map(|c| c[1].to_string())
        .collect()
}

/// Extract references in first-appearance order, deduplicated.
pub fn unique_references(source: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for name in extract_references(source) {
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Replace every `<<name>>` with its bound value. Names absent from the
/// bindings are left untouched.
pub fn substitute(source: &str, bindings: &HashMap<String, String>) -> String {
    VAR_REF
        .replace_all(source, |caps: &regex::Captures| {
            bindings
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Number of positional format slots in a template.
pub fn count_positional(template: &str) -> usize {
    POSITIONAL.find_iter(template).count()
}

/// A parsed positional format specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatSpec {
    /// `{}`: display the value as-is
    Default,
    /// `{:s}`: the value must be a string
    Str,
    /// `{:d}` or `{:0Nd}`: the value must be an integer, optionally
    /// zero-padded to width N
    Int { zero_pad: Option<usize> },
    /// `{:f}` or `{:.Nf}`: integer or float, N decimals (6 by default)
    Float { precision: usize },
}

impl FormatSpec {
    fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return Some(Self::Default);
        }
        if raw == "s" {
            return Some(Self::Str);
        }
        if raw == "d" {
            return Some(Self::Int { zero_pad: None });
        }
        if let Some(width) = raw.strip_prefix('0').and_then(|r| r.strip_suffix('d')) {
            if let Ok(w) = width.parse::<usize>() {
                return Some(Self::Int { zero_pad: Some(w) });
            }
        }
        if raw == "f" {
            return Some(Self::Float { precision: 6 });
        }
        if let Some(prec) = raw.strip_prefix('.').and_then(|r| r.strip_suffix('f')) {
            if let Ok(p) = prec.parse::<usize>() {
                return Some(Self::Float { precision: p });
            }
        }
        None
    }
}

/// Parse every positional specifier in a template, failing on any
/// specifier outside the supported grammar.
pub fn parse_specs(template: &str) -> Result<Vec<FormatSpec>, String> {
    let mut specs = Vec::new();
    for caps in POSITIONAL.captures_iter(template) {
        let raw = caps.get(1).map_or("", |m| m.as_str());
        let spec = FormatSpec::parse(raw).ok_or_else(|| format!("{{{}}}", raw))?;
        specs.push(spec);
    }
    Ok(specs)
}

fn format_one(spec: &FormatSpec, value: &Value, name: &str) -> Result<String, ResolutionError> {
    let mismatch = |spec_str: &str| ResolutionError::FormatMismatch {
        name: name.to_string(),
        value: display_value(value),
        spec: spec_str.to_string(),
    };

    match spec {
        FormatSpec::Default => Ok(display_value(value)),
        FormatSpec::Str => match value {
            Value::String(s) => Ok(s.clone()),
            _ => Err(mismatch("{:s}")),
        },
        FormatSpec::Int { zero_pad } => {
            let n = value.as_i64().ok_or_else(|| mismatch("{:d}"))?;
            Ok(match zero_pad {
                Some(width) => format!("{:0width$}", n, width = width),
                None => n.to_string(),
            })
        }
        FormatSpec::Float { precision } => {
            let f = value.as_f64().ok_or_else(|| mismatch("{:f}"))?;
            Ok(format!("{:.prec$}", f, prec = precision))
        }
    }
}

/// Render a value through every positional slot of a template. A repeated
/// slot receives the same value each time; the template must have already
/// had its `<<name>>` references substituted.
pub fn apply_positional(
    template: &str,
    value: &Value,
    name: &str,
) -> Result<String, ResolutionError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in POSITIONAL.captures_iter(template) {
        let m = caps.get(0).expect("match");
        let raw = caps.get(1).map_or("", |s| s.as_str());
        let spec = FormatSpec::parse(raw).ok_or_else(|| ResolutionError::FormatMismatch {
            name: name.to_string(),
            value: display_value(value),
            spec: format!("{{{}}}", raw),
        })?;
        out.push_str(&template[last..m.start()]);
        out.push_str(&format_one(&spec, value, name)?);
        last = m.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Plain display form of a JSON scalar (no quotes, no exponent games).
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_references() {
        assert_eq!(
            extract_references("postProcess <<f>> --base <<b>>"),
            vec!["f", "b"]
        );
        assert_eq!(extract_references("no refs here {}"), Vec::<String>::new());
    }

    #[test]
    fn test_extract_references_repeated() {
        assert_eq!(extract_references("<<a>>.<<a>>"), vec!["a", "a"]);
        assert_eq!(unique_references("<<a>>.<<a>>.<<b>>"), vec!["a", "b"]);
    }

    #[test]
    fn test_references_do_not_span_whitespace() {
        assert!(extract_references("<<a b>>").is_empty());
    }

    #[test]
    fn test_substitute() {
        let mut bindings = HashMap::new();
        bindings.insert("f".to_string(), "x.txt".to_string());
        assert_eq!(substitute("cat <<f>>", &bindings), "cat x.txt");
        // Unknown names survive untouched
        assert_eq!(substitute("cat <<g>>", &bindings), "cat <<g>>");
    }

    #[test]
    fn test_count_positional() {
        assert_eq!(count_positional("{:s}"), 1);
        assert_eq!(count_positional("a_{:03d}_{}"), 2);
        assert_eq!(count_positional("<<x>>_plain"), 0);
    }

    #[test]
    fn test_parse_specs() {
        assert_eq!(
            parse_specs("{} {:s} {:d} {:03d} {:f} {:.2f}").unwrap(),
            vec![
                FormatSpec::Default,
                FormatSpec::Str,
                FormatSpec::Int { zero_pad: None },
                FormatSpec::Int { zero_pad: Some(3) },
                FormatSpec::Float { precision: 6 },
                FormatSpec::Float { precision: 2 },
            ]
        );
        assert!(parse_specs("{:x}").is_err());
        assert!(parse_specs("{:8d}").is_err());
    }

    #[test]
    fn test_apply_positional_string() {
        let out = apply_positional("{:s}", &json!("a"), "v").unwrap();
        assert_eq!(out, "a");
    }

    #[test]
    fn test_apply_positional_zero_padded_int() {
        let out = apply_positional("out/x_inc{:03d}.txt", &json!(20), "file").unwrap();
        assert_eq!(out, "out/x_inc020.txt");
    }

    #[test]
    fn test_apply_positional_float_precision() {
        let out = apply_positional("{:.2f}", &json!(1.5), "v").unwrap();
        assert_eq!(out, "1.50");
        let out = apply_positional("{:f}", &json!(2), "v").unwrap();
        assert_eq!(out, "2.000000");
    }

    #[test]
    fn test_apply_positional_repeated_slot_bound() {
        let out = apply_positional("{:d}-{:d}", &json!(7), "v").unwrap();
        assert_eq!(out, "7-7");
    }

    #[test]
    fn test_apply_positional_mismatch() {
        let err = apply_positional("{:d}", &json!("abc"), "v").unwrap_err();
        assert!(matches!(err, ResolutionError::FormatMismatch { .. }));

        let err = apply_positional("{:s}", &json!(3), "v").unwrap_err();
        assert!(matches!(err, ResolutionError::FormatMismatch { .. }));
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&json!("s")), "s");
        assert_eq!(display_value(&json!(3)), "3");
        assert_eq!(display_value(&json!(true)), "true");
    }
}
