//! Shared helpers for the scenario tests.
#![allow(dead_code)]

use serde_json::{Map, Value, json};
use std::sync::Once;

use metasync::client::RemoteObject;
use metasync::hooks::HookRegistry;
use metasync::item::{MetadataItem, TypeName};
use metasync::registry::TypeRegistry;
use metasync::test_utils::{MemoryStore, MockClient};

static INIT_LOGGING: Once = Once::new();

/// Honors `RUST_LOG` when set; silent otherwise.
fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        }
    });
}

pub fn setup() -> (TypeRegistry, MemoryStore) {
    init_test_logging();
    (TypeRegistry::builtin(), MemoryStore::default())
}

pub fn hooks(registry: &TypeRegistry) -> HookRegistry {
    HookRegistry::builtin(registry)
}

pub fn client(registry: &TypeRegistry) -> MockClient {
    MockClient::new(registry.clone())
}

pub fn obj(pairs: &[(&str, Value)]) -> RemoteObject {
    let mut map = Map::new();
    for (field, value) in pairs {
        map.insert((*field).to_string(), value.clone());
    }
    map
}

pub fn item(type_name: &str, key: &str, pairs: &[(&str, Value)]) -> MetadataItem {
    MetadataItem::new(TypeName::from(type_name), key, obj(pairs))
}

/// A portable-form data extension with no references.
pub fn plain_data_extension(key: &str) -> MetadataItem {
    item(
        "dataExtension",
        key,
        &[("CustomerKey", json!(key)), ("Name", json!(key)), ("Description", json!("test"))],
    )
}

pub fn type_name(name: &str) -> TypeName {
    TypeName::from(name)
}
