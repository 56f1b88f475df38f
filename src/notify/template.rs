// Message templates with `{{ dotted.path }}` placeholders

use async_trait::async_trait;
use moka::future::Cache;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

/// Variables available to a template, addressed by dotted path.
pub type TemplateVars = Map<String, Value>;

pub const TRUSTEE_SUBJECT: &str = "{{ election.name }} - partial decryption requested";
pub const TRUSTEE_BODY: &str = "Dear {{ trustee.name }},

Mixing has finished for {{ election.name }}. Please sign in and submit your \
partial decryption:

{{ url }}
";

pub const CAST_VOTE_SUBJECT: &str = "{{ election.name }} - vote cast";
pub const CAST_VOTE_BODY: &str = "You have successfully cast a vote in

{{ election.name }}
{{ poll.name }}

You can find your encrypted vote attached to this mail.
";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("template variable `{0}` is not defined")]
    MissingVariable(String),
    #[error("invalid placeholder pattern: {0}")]
    Pattern(String),
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(&self, template: &str, vars: &TemplateVars) -> Result<String, RenderError>;
}

#[derive(Debug, Clone)]
enum Segment {
    Text(String),
    Var(Vec<String>),
}

/// Renderer for `{{ name }}` placeholders. Unknown variables are an error
/// rather than silently rendering as empty text.
pub struct PlaceholderRenderer {
    pattern: Regex,
    compiled: Cache<String, Arc<Vec<Segment>>>,
}

impl PlaceholderRenderer {
    pub fn new() -> Result<Self, RenderError> {
        let pattern = Regex::new(r"\{\{\s*([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)\s*\}\}")
            .map_err(|e| RenderError::Pattern(e.to_string()))?;
        let compiled = Cache::builder()
            .max_capacity(256)
            .time_to_idle(Duration::from_secs(3600))
            .build();
        Ok(Self { pattern, compiled })
    }

    fn compile(&self, template: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut cursor = 0;
        for captures in self.pattern.captures_iter(template) {
            let (Some(whole), Some(path)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            if whole.start() > cursor {
                segments.push(Segment::Text(template[cursor..whole.start()].to_string()));
            }
            segments.push(Segment::Var(
                path.as_str().split('.').map(str::to_string).collect(),
            ));
            cursor = whole.end();
        }
        if cursor < template.len() {
            segments.push(Segment::Text(template[cursor..].to_string()));
        }
        segments
    }

    fn lookup<'a>(vars: &'a TemplateVars, path: &[String]) -> Option<&'a Value> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(vars.get(first)?, |value, key| value.as_object()?.get(key))
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl TemplateRenderer for PlaceholderRenderer {
    async fn render(&self, template: &str, vars: &TemplateVars) -> Result<String, RenderError> {
        let segments = self
            .compiled
            .get_with(template.to_string(), async { Arc::new(self.compile(template)) })
            .await;

        let mut out = String::with_capacity(template.len());
        for segment in segments.iter() {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Var(path) => {
                    let value = Self::lookup(vars, path)
                        .ok_or_else(|| RenderError::MissingVariable(path.join(".")))?;
                    out.push_str(&display(value));
                }
            }
        }
        Ok(out)
    }
}
