// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Webhook body templates.
//
// A template is literal text with `{{ field }}` or `{{ .field.nested }}`
// placeholders, resolved against the JSON form of the event. String values
// are JSON-escaped so a template that is itself a JSON document stays valid;
// other values render as JSON text; missing fields render as nothing.

use std::path::Path;

use regex::Regex;
use serde_json::Value;
use tracing::error;

use crate::error::WebhookError;

/// The body template used when none is configured or it cannot be loaded.
pub const DEFAULT_TEMPLATE: &str = include_str!("../templates/default_webhook.json");

const PLACEHOLDER: &str = r"\{\{\s*(.*?)\s*\}\}";
const FIELD_PATH: &str = r"^\.?[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*$";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Vec<String>),
}

/// A parsed body template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, WebhookError> {
        let placeholder = Regex::new(PLACEHOLDER).map_err(|e| WebhookError::Template(e.to_string()))?;
        let field_path = Regex::new(FIELD_PATH).map_err(|e| WebhookError::Template(e.to_string()))?;

        let mut segments = Vec::new();
        let mut last = 0;
        for caps in placeholder.captures_iter(source) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            push_literal(&mut segments, &source[last..whole.start()])?;

            let path = inner.as_str();
            if !field_path.is_match(path) {
                return Err(WebhookError::Template(format!(
                    "invalid placeholder {{{{ {path} }}}}"
                )));
            }
            segments.push(Segment::Field(
                path.trim_start_matches('.').split('.').map(str::to_string).collect(),
            ));
            last = whole.end();
        }
        push_literal(&mut segments, &source[last..])?;

        Ok(Self { segments })
    }

    /// Read and parse a template file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WebhookError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| WebhookError::Template(format!("{}: {e}", path.display())))?;
        Self::parse(&source)
    }

    /// Load `path`, or the built-in template if that fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(&path) {
            Ok(template) => template,
            Err(e) => {
                error!(error = %e, "failed to load webhook template, using default");
                Self::default_template()
            }
        }
    }

    pub fn default_template() -> Self {
        // The built-in template only uses plain field paths.
        Self::parse(DEFAULT_TEMPLATE).unwrap_or(Self {
            segments: vec![Segment::Literal(DEFAULT_TEMPLATE.to_string())],
        })
    }

    pub fn render(&self, data: &Value) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(path) => {
                    let value = path.iter().try_fold(data, |v, key| v.get(key.as_str()));
                    match value {
                        None | Some(Value::Null) => {}
                        Some(Value::String(s)) => out.push_str(&escape_json(s)),
                        Some(other) => out.push_str(&other.to_string()),
                    }
                }
            }
        }
        out
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) -> Result<(), WebhookError> {
    if text.contains("{{") {
        return Err(WebhookError::Template("unterminated placeholder".to_string()));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

fn escape_json(s: &str) -> String {
    let quoted = Value::String(s.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}
