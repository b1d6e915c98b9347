//! Shared test fixtures: an in-memory [`LocalStore`] and a scriptable
//! in-memory remote environment.
//!
//! Available to integration tests through the `test-utils` feature, the
//! same way unit tests use them internally.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::client::{ApiError, ListOptions, Page, RemoteClient, RemoteObject};
use crate::core::Result;
use crate::item::{MetadataItem, TypeName};
use crate::registry::TypeRegistry;
use crate::store::LocalStore;

/// In-memory [`LocalStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<(TypeName, String), Map<String, Value>>>,
    texts: Mutex<BTreeMap<(TypeName, String, String), String>>,
}

impl LocalStore for MemoryStore {
    fn read(&self, type_name: &TypeName, key: &str) -> Result<Option<MetadataItem>> {
        let items = self.items.lock().unwrap();
        Ok(items
            .get(&(type_name.clone(), key.to_string()))
            .map(|fields| MetadataItem::new(type_name.clone(), key, fields.clone())))
    }

    fn read_all(&self, type_name: &TypeName) -> Result<BTreeMap<String, MetadataItem>> {
        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .filter(|((t, _), _)| t == type_name)
            .map(|((_, key), fields)| {
                (key.clone(), MetadataItem::new(type_name.clone(), key.clone(), fields.clone()))
            })
            .collect())
    }

    fn write(&self, item: &MetadataItem) -> Result<()> {
        self.items
            .lock()
            .unwrap()
            .insert((item.type_name.clone(), item.key.clone()), item.fields.clone());
        Ok(())
    }

    fn write_text(
        &self,
        type_name: &TypeName,
        name: &str,
        ext: &str,
        content: &str,
    ) -> Result<()> {
        self.texts.lock().unwrap().insert(
            (type_name.clone(), name.to_string(), ext.to_string()),
            content.to_string(),
        );
        Ok(())
    }

    fn read_text(&self, type_name: &TypeName, name: &str, ext: &str) -> Result<Option<String>> {
        Ok(self
            .texts
            .lock()
            .unwrap()
            .get(&(type_name.clone(), name.to_string(), ext.to_string()))
            .cloned())
    }
}

/// Scriptable in-memory remote environment.
///
/// Holds remote objects per type, assigns sequential ids on create, and
/// supports failure injection: per-key validation failures, counted
/// transient failures, and type-level list failures. Every call is
/// appended to a log so tests can assert ordering.
pub struct MockClient {
    registry: TypeRegistry,
    objects: Mutex<BTreeMap<TypeName, Vec<RemoteObject>>>,
    next_id: Mutex<u64>,
    page_size: Option<usize>,
    fail_validation: Mutex<BTreeSet<String>>,
    fail_transient: Mutex<BTreeMap<String, usize>>,
    fail_list: Mutex<BTreeSet<TypeName>>,
    calls: Mutex<Vec<String>>,
}

impl MockClient {
    pub fn new(registry: TypeRegistry) -> Self {
        Self {
            registry,
            objects: Mutex::new(BTreeMap::new()),
            next_id: Mutex::new(1000),
            page_size: None,
            fail_validation: Mutex::new(BTreeSet::new()),
            fail_transient: Mutex::new(BTreeMap::new()),
            fail_list: Mutex::new(BTreeSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Page list responses at `size` items.
    #[must_use]
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Seed a remote object, assigning it a fresh id.
    pub fn seed(&self, type_name: &TypeName, mut obj: RemoteObject) -> String {
        let def = self.registry.get(type_name).expect("seeded type exists");
        let id = self.fresh_id(type_name.as_str());
        obj.insert(def.id_field.clone(), Value::String(id.clone()));
        self.objects.lock().unwrap().entry(type_name.clone()).or_default().push(obj);
        id
    }

    /// Every write against this key fails with a validation error.
    pub fn fail_validation_for(&self, key: &str) {
        self.fail_validation.lock().unwrap().insert(key.to_string());
    }

    /// The next `times` calls touching this key fail transiently.
    pub fn fail_transient_for(&self, key: &str, times: usize) {
        self.fail_transient.lock().unwrap().insert(key.to_string(), times);
    }

    /// Every list call for this type fails.
    pub fn fail_list_for(&self, type_name: &TypeName) {
        self.fail_list.lock().unwrap().insert(type_name.clone());
    }

    /// The call log, as `verb:type[:key]` entries in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Current remote objects of a type.
    pub fn remote_objects(&self, type_name: &TypeName) -> Vec<RemoteObject> {
        self.objects.lock().unwrap().get(type_name).cloned().unwrap_or_default()
    }

    /// The remote object with the given key, if present.
    pub fn remote_object(&self, type_name: &TypeName, key: &str) -> Option<RemoteObject> {
        let def = self.registry.get(type_name).ok()?;
        self.remote_objects(type_name).into_iter().find(|o| def.key_of(o).as_deref() == Some(key))
    }

    fn fresh_id(&self, prefix: &str) -> String {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        format!("{prefix}-{next}", next = *next)
    }

    fn log(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }

    fn take_transient(&self, key: &str) -> bool {
        let mut failures = self.fail_transient.lock().unwrap();
        match failures.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl RemoteClient for MockClient {
    async fn list(&self, type_name: &TypeName, options: &ListOptions) -> Result<Page, ApiError> {
        self.log(format!("list:{type_name}"));
        if self.fail_list.lock().unwrap().contains(type_name) {
            return Err(ApiError::Validation("list endpoint rejected the request".into()));
        }
        let all = self.remote_objects(type_name);
        let projected: Vec<RemoteObject> = all
            .into_iter()
            .map(|obj| match &options.fields {
                Some(fields) => obj
                    .into_iter()
                    .filter(|(name, _)| fields.iter().any(|f| f == name))
                    .collect(),
                None => obj,
            })
            .collect();

        let Some(size) = self.page_size else {
            return Ok(Page {
                items: projected,
                next: None,
            });
        };
        let offset: usize = options.page.as_deref().map_or(0, |p| p.parse().unwrap_or(0));
        let end = (offset + size).min(projected.len());
        let next = (end < projected.len()).then(|| end.to_string());
        Ok(Page {
            items: projected[offset..end].to_vec(),
            next,
        })
    }

    async fn get(&self, type_name: &TypeName, key: &str) -> Result<RemoteObject, ApiError> {
        self.log(format!("get:{type_name}:{key}"));
        if self.take_transient(key) {
            return Err(ApiError::Transient("injected".into()));
        }
        self.remote_object(type_name, key)
            .ok_or_else(|| ApiError::NotFound(key.to_string()))
    }

    async fn create(&self, type_name: &TypeName, body: &Value) -> Result<RemoteObject, ApiError> {
        let def = self
            .registry
            .get(type_name)
            .map_err(|e| ApiError::Validation(e.to_string()))?;
        let obj = body
            .as_object()
            .cloned()
            .ok_or_else(|| ApiError::Validation("body is not an object".into()))?;
        let key = def.key_of(&obj).unwrap_or_default();
        self.log(format!("create:{type_name}:{key}"));
        if self.take_transient(&key) {
            return Err(ApiError::Transient("injected".into()));
        }
        if self.fail_validation.lock().unwrap().contains(&key) {
            return Err(ApiError::Validation(format!("invalid payload for '{key}'")));
        }
        let mut created = obj;
        let id = self.fresh_id(type_name.as_str());
        created.insert(def.id_field.clone(), Value::String(id));
        self.objects.lock().unwrap().entry(type_name.clone()).or_default().push(created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        type_name: &TypeName,
        key: &str,
        body: &Value,
    ) -> Result<RemoteObject, ApiError> {
        self.log(format!("update:{type_name}:{key}"));
        if self.take_transient(key) {
            return Err(ApiError::Transient("injected".into()));
        }
        if self.fail_validation.lock().unwrap().contains(key) {
            return Err(ApiError::Validation(format!("invalid payload for '{key}'")));
        }
        let def = self
            .registry
            .get(type_name)
            .map_err(|e| ApiError::Validation(e.to_string()))?;
        let patch = body
            .as_object()
            .cloned()
            .ok_or_else(|| ApiError::Validation("body is not an object".into()))?;
        let mut objects = self.objects.lock().unwrap();
        let list = objects.entry(type_name.clone()).or_default();
        let existing = list
            .iter_mut()
            .find(|o| def.key_of(o).as_deref() == Some(key))
            .ok_or_else(|| ApiError::NotFound(key.to_string()))?;
        for (field, value) in patch {
            existing.insert(field, value);
        }
        Ok(existing.clone())
    }
}
