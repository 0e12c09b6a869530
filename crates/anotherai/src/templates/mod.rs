//! `{{ variable }}` template rendering and variable extraction.
//!
//! Templates substitute dot-path references against a JSON variables
//! object. The same scanner also derives the input JSON-Schema a template
//! expects, which is what `/v1/utils/extract_variables` serves.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use futures::future::try_join_all;
use lru::LruCache;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::domain::{File, Message, MessageContent};
use crate::error::{Error, Result};

const TEMPLATE_CACHE_CAPACITY: usize = 256;

static VARIABLE_RE: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // compile-time constant pattern
    let re = Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*\}\}").unwrap();
    re
});

/// A parsed template: literal runs interleaved with variable references.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTemplate {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Variable(String),
}

impl CompiledTemplate {
    fn parse(text: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in VARIABLE_RE.captures_iter(text) {
            #[allow(clippy::unwrap_used)] // group 0 always present on a match
            let m = caps.get(0).unwrap();
            if m.start() > last {
                segments.push(Segment::Literal(text[last..m.start()].to_string()));
            }
            segments.push(Segment::Variable(caps[1].to_string()));
            last = m.end();
        }
        if last < text.len() {
            segments.push(Segment::Literal(text[last..].to_string()));
        }
        CompiledTemplate { segments }
    }

    /// Whether the template references any variable.
    pub fn is_templated(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Variable(_)))
    }

    /// Dot-paths referenced by the template, in order of appearance.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(path) => Some(path.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Substitute against the variables object. A missing variable is a
    /// `bad_request`.
    pub fn render(&self, variables: &Value) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Variable(path) => {
                    let value = lookup_path(variables, path).ok_or_else(|| {
                        Error::BadRequest(format!("Missing template variable: {path}"))
                    })?;
                    out.push_str(&stringify(value));
                }
            }
        }
        Ok(out)
    }
}

fn lookup_path<'a>(variables: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = variables;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compiles templates with an LRU cache keyed by template text.
pub struct TemplateManager {
    cache: Mutex<LruCache<String, Arc<CompiledTemplate>>>,
}

impl Default for TemplateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateManager {
    pub fn new() -> Self {
        #[allow(clippy::unwrap_used)] // capacity is a non-zero constant
        let capacity = NonZeroUsize::new(TEMPLATE_CACHE_CAPACITY).unwrap();
        TemplateManager {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Compile `text`, reusing the cached parse when available.
    pub fn compile(&self, text: &str) -> Arc<CompiledTemplate> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(compiled) = cache.get(text) {
                return Arc::clone(compiled);
            }
            let compiled = Arc::new(CompiledTemplate::parse(text));
            cache.put(text.to_string(), Arc::clone(&compiled));
            return compiled;
        }
        Arc::new(CompiledTemplate::parse(text))
    }

    /// Render one message: every text part and templated file reference is
    /// substituted; other parts pass through.
    pub fn render_message(&self, message: &Message, variables: &Value) -> Result<Message> {
        let mut content = Vec::with_capacity(message.content.len());
        for part in &message.content {
            content.push(self.render_content(part, variables)?);
        }
        Ok(Message {
            role: message.role,
            content,
        })
    }

    fn render_content(&self, part: &MessageContent, variables: &Value) -> Result<MessageContent> {
        let mut rendered = part.clone();
        if let Some(text) = &part.text {
            rendered.text = Some(self.compile(text).render(variables)?);
        }
        if let Some(file) = &part.file {
            rendered.file = Some(self.render_file(file, variables)?);
        }
        Ok(rendered)
    }

    /// File urls and data may be templated; the substituted value must
    /// still be a valid reference.
    fn render_file(&self, file: &File, variables: &Value) -> Result<File> {
        let mut rendered = file.clone();
        if let Some(url) = &file.url {
            rendered.url = Some(self.compile(url).render(variables)?);
        }
        if let Some(data) = &file.data {
            rendered.data = Some(self.compile(data).render(variables)?);
        }
        if let Some(content_type) = &file.content_type {
            rendered.content_type = Some(self.compile(content_type).render(variables)?);
        }
        rendered.normalized()
    }

    /// Render a message list concurrently; the first failure (in message
    /// order) is surfaced.
    pub async fn render_messages(
        &self,
        messages: &[Message],
        variables: &Value,
    ) -> Result<Vec<Message>> {
        try_join_all(
            messages
                .iter()
                .map(|m| async move { self.render_message(m, variables) }),
        )
        .await
    }
}

/// Result of scanning templated messages.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedVariables {
    /// JSON-Schema the template expects, composed over the base schema.
    /// `None` when no message is templated and no base schema was given.
    pub json_schema: Option<Value>,
    /// Index of the last message containing a template reference, or -1.
    pub last_templated_index: i64,
}

/// Derive the input schema from templated messages. Each referenced path
/// contributes a `string` property; nested paths contribute nested object
/// schemas. `base_schema` properties win over inferred ones.
pub fn extract_variables(
    manager: &TemplateManager,
    messages: &[Message],
    base_schema: Option<&Value>,
) -> ExtractedVariables {
    let mut schema = json!({"type": "object", "properties": {}});
    let mut last_templated_index: i64 = -1;
    let mut any = false;

    for (index, message) in messages.iter().enumerate() {
        let mut templated = false;
        for part in &message.content {
            for text in [
                part.text.as_deref(),
                part.file.as_ref().and_then(|f| f.url.as_deref()),
                part.file.as_ref().and_then(|f| f.data.as_deref()),
            ]
            .into_iter()
            .flatten()
            {
                let compiled = manager.compile(text);
                for path in compiled.variables() {
                    insert_path(&mut schema, path);
                    any = true;
                    templated = true;
                }
            }
        }
        if templated {
            last_templated_index = index as i64;
        }
    }

    let json_schema = match (any, base_schema) {
        (false, None) => None,
        (_, Some(base)) => Some(merge_schemas(schema, base)),
        (true, None) => Some(schema),
    };
    ExtractedVariables {
        json_schema,
        last_templated_index,
    }
}

fn insert_path(schema: &mut Value, path: &str) {
    let mut node = schema;
    let parts: Vec<&str> = path.split('.').collect();
    for (i, part) in parts.iter().enumerate() {
        let is_leaf = i == parts.len() - 1;
        if node.get("properties").is_none() {
            node["type"] = json!("object");
            node["properties"] = json!({});
        }
        let properties = &mut node["properties"];
        if properties.get(*part).is_none() {
            properties[*part] = if is_leaf {
                json!({"type": "string"})
            } else {
                json!({"type": "object", "properties": {}})
            };
        }
        node = &mut properties[*part];
    }
}

/// Deep-merge: `base` wins on conflicting keys.
fn merge_schemas(inferred: Value, base: &Value) -> Value {
    match (inferred, base) {
        (Value::Object(mut inferred), Value::Object(base)) => {
            for (key, base_value) in base {
                match inferred.remove(key) {
                    Some(existing) => {
                        inferred.insert(key.clone(), merge_schemas(existing, base_value));
                    }
                    None => {
                        inferred.insert(key.clone(), base_value.clone());
                    }
                }
            }
            Value::Object(inferred)
        }
        (_, base) => base.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;

    fn manager() -> TemplateManager {
        TemplateManager::new()
    }

    #[test]
    fn renders_flat_and_nested_paths() {
        let compiled = CompiledTemplate::parse("Hello {{ name }}, from {{ place.city }}!");
        let out = compiled
            .render(&json!({"name": "Ada", "place": {"city": "Toulouse"}}))
            .unwrap();
        assert_eq!(out, "Hello Ada, from Toulouse!");
    }

    #[test]
    fn missing_variable_is_bad_request() {
        let compiled = CompiledTemplate::parse("{{ missing }}");
        let err = compiled.render(&json!({})).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn non_string_values_are_json_rendered() {
        let compiled = CompiledTemplate::parse("{{ count }} and {{ flag }}");
        assert_eq!(
            compiled.render(&json!({"count": 3, "flag": true})).unwrap(),
            "3 and true"
        );
    }

    #[test]
    fn untemplated_text_passes_through() {
        let compiled = CompiledTemplate::parse("plain {not a var} text");
        assert!(!compiled.is_templated());
        assert_eq!(compiled.render(&json!({})).unwrap(), "plain {not a var} text");
    }

    #[tokio::test]
    async fn message_lists_render_and_surface_the_first_error() {
        let m = manager();
        let messages = vec![
            Message::with_text(Role::System, "You know {{ subject }}."),
            Message::with_text(Role::User, "{{ question }}"),
        ];
        let rendered = m
            .render_messages(
                &messages,
                &json!({"subject": "geography", "question": "Capital of France?"}),
            )
            .await
            .unwrap();
        assert_eq!(rendered[0].text(), "You know geography.");
        assert_eq!(rendered[1].text(), "Capital of France?");

        let err = m
            .render_messages(&messages, &json!({"subject": "geography"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("question"));
    }

    #[test]
    fn templated_file_url_must_stay_valid() {
        let m = manager();
        let file = File {
            url: Some("{{ url }}".into()),
            ..Default::default()
        };
        let ok = m
            .render_file(&file, &json!({"url": "https://example.com/a.png"}))
            .unwrap();
        assert_eq!(ok.url.as_deref(), Some("https://example.com/a.png"));

        let err = m
            .render_file(&file, &json!({"url": "ftp://example.com/a.png"}))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFile(_)));
    }

    #[test]
    fn extraction_builds_a_schema_and_tracks_the_last_index() {
        let m = manager();
        let messages = vec![Message::with_text(
            Role::User,
            "What is the capital of the country that has {{ city }}?",
        )];
        let extracted = extract_variables(&m, &messages, None);
        assert_eq!(extracted.last_templated_index, 0);
        assert_eq!(
            extracted.json_schema.unwrap()["properties"]["city"],
            json!({"type": "string"})
        );
    }

    #[test]
    fn extraction_handles_nested_paths_and_base_schema() {
        let m = manager();
        let messages = vec![
            Message::with_text(Role::System, "ctx"),
            Message::with_text(Role::User, "{{ user.name }} in {{ user.city }}"),
        ];
        let base = json!({"properties": {"user": {"type": "object", "properties": {"name": {"type": "string", "minLength": 1}}}}});
        let extracted = extract_variables(&m, &messages, Some(&base));
        assert_eq!(extracted.last_templated_index, 1);
        let schema = extracted.json_schema.unwrap();
        assert_eq!(
            schema["properties"]["user"]["properties"]["name"]["minLength"],
            json!(1)
        );
        assert_eq!(
            schema["properties"]["user"]["properties"]["city"],
            json!({"type": "string"})
        );
    }

    #[test]
    fn untemplated_messages_extract_nothing() {
        let m = manager();
        let messages = vec![Message::with_text(Role::User, "no variables here")];
        let extracted = extract_variables(&m, &messages, None);
        assert_eq!(extracted.last_templated_index, -1);
        assert!(extracted.json_schema.is_none());
    }
}
