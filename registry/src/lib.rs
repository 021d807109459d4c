//! Process-wide tool registry.
//!
//! Thread-safe mapping from tool name to handler plus JSON-schema
//! declaration. The same logical tool name may coexist under distinct
//! namespaces; unqualified lookups resolve to the first registered
//! instance.

pub mod error;

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use dashmap::DashMap;
use jsonschema::Validator;
use serde_json::Value;
use tracing::{debug, warn};

pub use error::{ToolError, ToolResult};

/// Callable behind a registered tool.
///
/// Handlers must return a JSON-serialisable value or signal a structured
/// error; they are invoked at most once per `execute` call.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value) -> ToolResult<Value>;
}

/// Adapter turning an async closure into a [`ToolHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = ToolResult<Value>> + Send + 'static,
{
    async fn call(&self, args: Value) -> ToolResult<Value> {
        (self.f)(args).await
    }
}

/// Registration key: `(name, namespace)` pairs are unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToolKey {
    pub name: String,
    pub namespace: Option<String>,
}

impl ToolKey {
    pub fn new(name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            name: name.into(),
            namespace,
        }
    }
}

/// Static declaration of a tool.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub namespace: Option<String>,
    pub description: String,
    /// JSON schema for the tool's arguments. `Value::Null` disables
    /// argument validation.
    pub schema: Value,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub enabled: bool,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            description: description.into(),
            schema,
            category: None,
            tags: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    fn key(&self) -> ToolKey {
        ToolKey::new(self.name.clone(), self.namespace.clone())
    }
}

/// Listing filter. Empty filter matches every tool.
#[derive(Debug, Clone, Default)]
pub struct ToolFilter {
    pub category: Option<String>,
    /// Tools must carry every listed tag.
    pub tags: Vec<String>,
    pub enabled: Option<bool>,
    pub namespace: Option<String>,
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
    validator: Option<Validator>,
    enabled: AtomicBool,
}

/// Thread-safe registry of callable tools.
pub struct ToolRegistry {
    tools: DashMap<ToolKey, Arc<RegisteredTool>>,
    by_name: DashMap<String, Vec<ToolKey>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
            by_name: DashMap::new(),
        }
    }

    /// Register a tool. Fails if the `(name, namespace)` pair is taken.
    pub fn register(
        &self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> ToolResult<()> {
        let key = descriptor.key();
        if self.tools.contains_key(&key) {
            return Err(ToolError::DuplicateTool(qualified_name(&key)));
        }

        let validator = match &descriptor.schema {
            Value::Null => None,
            schema => Some(jsonschema::validator_for(schema).map_err(|e| {
                ToolError::InvalidSchema {
                    tool: descriptor.name.clone(),
                    message: e.to_string(),
                }
            })?),
        };

        if let Some(existing) = self.by_name.get(&descriptor.name) {
            if !existing.is_empty() {
                let namespaces: Vec<&str> = existing
                    .iter()
                    .map(|k| k.namespace.as_deref().unwrap_or("<root>"))
                    .collect();
                warn!(
                    "Tool name collision: '{}' registered in {:?}, adding '{}'",
                    descriptor.name,
                    namespaces,
                    qualified_name(&key)
                );
            }
        }

        let enabled = descriptor.enabled;
        debug!(tool = %qualified_name(&key), "Registered tool");
        self.tools.insert(
            key.clone(),
            Arc::new(RegisteredTool {
                descriptor,
                handler,
                validator,
                enabled: AtomicBool::new(enabled),
            }),
        );
        self.by_name
            .entry(key.name.clone())
            .and_modify(|keys| {
                if !keys.contains(&key) {
                    keys.push(key.clone());
                }
            })
            .or_insert_with(|| vec![key]);
        Ok(())
    }

    /// Register with an async closure instead of a handler type.
    pub fn register_fn<F, Fut>(&self, descriptor: ToolDescriptor, f: F) -> ToolResult<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult<Value>> + Send + 'static,
    {
        self.register(descriptor, Arc::new(FnHandler::new(f)))
    }

    pub fn unregister(&self, name: &str, namespace: Option<&str>) -> ToolResult<()> {
        let key = ToolKey::new(name, namespace.map(str::to_string));
        if self.tools.remove(&key).is_none() {
            return Err(ToolError::UnknownTool(qualified_name(&key)));
        }
        if let Some(mut keys) = self.by_name.get_mut(name) {
            keys.retain(|k| k != &key);
        }
        self.by_name.remove_if(name, |_, keys| keys.is_empty());
        Ok(())
    }

    /// Descriptor lookup with the current enabled state.
    pub fn get(&self, name: &str, namespace: Option<&str>) -> Option<ToolDescriptor> {
        self.resolve(name, namespace).map(|tool| {
            let mut descriptor = tool.descriptor.clone();
            descriptor.enabled = tool.enabled.load(Ordering::Relaxed);
            descriptor
        })
    }

    /// List descriptors matching `filter`.
    pub fn list(&self, filter: &ToolFilter) -> Vec<ToolDescriptor> {
        let mut out: Vec<ToolDescriptor> = self
            .tools
            .iter()
            .filter_map(|entry| {
                let tool = entry.value();
                let enabled = tool.enabled.load(Ordering::Relaxed);
                if let Some(wanted) = filter.enabled {
                    if enabled != wanted {
                        return None;
                    }
                }
                if let Some(namespace) = &filter.namespace {
                    if tool.descriptor.namespace.as_deref() != Some(namespace.as_str()) {
                        return None;
                    }
                }
                if let Some(category) = &filter.category {
                    if tool.descriptor.category.as_deref() != Some(category.as_str()) {
                        return None;
                    }
                }
                if !filter
                    .tags
                    .iter()
                    .all(|tag| tool.descriptor.tags.iter().any(|t| t == tag))
                {
                    return None;
                }
                let mut descriptor = tool.descriptor.clone();
                descriptor.enabled = enabled;
                Some(descriptor)
            })
            .collect();
        out.sort_by(|a, b| (&a.name, &a.namespace).cmp(&(&b.name, &b.namespace)));
        out
    }

    pub fn set_enabled(&self, name: &str, namespace: Option<&str>, enabled: bool) -> ToolResult<()> {
        let tool = self
            .resolve(name, namespace)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.enabled.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    /// Execute a tool by name, validating arguments against its schema.
    pub async fn execute(
        &self,
        name: &str,
        namespace: Option<&str>,
        args: Value,
    ) -> ToolResult<Value> {
        let tool = self
            .resolve(name, namespace)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        if !tool.enabled.load(Ordering::Relaxed) {
            return Err(ToolError::ToolDisabled(name.to_string()));
        }
        if let Some(validator) = &tool.validator {
            if let Err(err) = validator.validate(&args) {
                return Err(ToolError::InvalidArguments {
                    tool: name.to_string(),
                    message: err.to_string(),
                    field: Some(err.instance_path.to_string()),
                });
            }
        }
        tool.handler.call(args).await
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns the exact `(name, namespace)` entry, or the first registered
    /// instance of `name` when no namespace is given.
    fn resolve(&self, name: &str, namespace: Option<&str>) -> Option<Arc<RegisteredTool>> {
        if namespace.is_some() {
            let key = ToolKey::new(name, namespace.map(str::to_string));
            return self.tools.get(&key).map(|t| Arc::clone(t.value()));
        }
        let keys = self.by_name.get(name)?;
        let key = keys.first()?.clone();
        drop(keys);
        self.tools.get(&key).map(|t| Arc::clone(t.value()))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn qualified_name(key: &ToolKey) -> String {
    match &key.namespace {
        Some(ns) => format!("{}:{}", ns, key.name),
        None => key.name.clone(),
    }
}
