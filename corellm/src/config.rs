use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use corellm_engine::GenerationParameters;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::chat::{ControllerSettings, SeedSource, DEFAULT_CACHE_LIMIT_BYTES, DEFAULT_SYSTEM_PROMPT};
use crate::models::DEFAULT_MODEL;

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "CORELLM_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no config directory available on this platform")]
    NoConfigDir,

    #[error("config file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type-safe configuration key that associates a key name with its value type
#[derive(Debug, Clone, Copy)]
pub struct ConfigKey<T> {
    name: &'static str,
    _phantom: PhantomData<T>,
}

impl<T> ConfigKey<T> {
    const fn new(name: &'static str) -> Self {
        Self {
            name,
            _phantom: PhantomData,
        }
    }

    pub fn key_name(&self) -> &'static str {
        self.name
    }
}

// ===== Chat Configuration =====

/// Chat configuration (stored locally)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatConfig {
    /// Catalog id of the model to load on startup
    pub selected_model: Option<String>,
    pub generation: GenerationParameters,
    pub cache_limit_bytes: usize,
    pub evict_on_background: bool,
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            selected_model: Some(DEFAULT_MODEL.to_string()),
            generation: GenerationParameters::default(),
            cache_limit_bytes: DEFAULT_CACHE_LIMIT_BYTES,
            evict_on_background: false,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl ConfigKey<ChatConfig> {
    pub const CHAT: Self = Self::new("chatConfig");
}

impl From<&ChatConfig> for ControllerSettings {
    fn from(config: &ChatConfig) -> Self {
        Self {
            generation: config.generation.clone(),
            system_prompt: config.system_prompt.clone(),
            cache_limit_bytes: config.cache_limit_bytes,
            evict_on_background: config.evict_on_background,
            seed: SeedSource::Clock,
        }
    }
}

// ===== Type-Safe Config Store =====

pub trait ConfigStore {
    fn get<T: DeserializeOwned>(&self, key: &ConfigKey<T>) -> Option<T>;
    fn set<T: Serialize>(&self, key: &ConfigKey<T>, value: T) -> Result<(), ConfigError>;
    fn delete<T>(&self, key: &ConfigKey<T>) -> Result<(), ConfigError>;
}

/// JSON file backed config store. Every write rewrites the whole file.
pub struct FileStore {
    path: PathBuf,
    data: Mutex<HashMap<String, serde_json::Value>>,
}

impl FileStore {
    /// Open the store at `path`. A missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => HashMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        log::debug!("Opened config store at {}", path.display());

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// `$CORELLM_CONFIG`, or `<config dir>/corellm/config.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        dirs::config_dir()
            .map(|dir| dir.join("corellm").join("config.json"))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, serde_json::Value>> {
        self.data
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn save(&self, data: &HashMap<String, serde_json::Value>) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(data)?)?;
        Ok(())
    }
}

impl ConfigStore for FileStore {
    fn get<T: DeserializeOwned>(&self, key: &ConfigKey<T>) -> Option<T> {
        self.lock()
            .get(key.key_name())
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    fn set<T: Serialize>(&self, key: &ConfigKey<T>, value: T) -> Result<(), ConfigError> {
        let val = serde_json::to_value(value)?;
        let mut data = self.lock();
        data.insert(key.key_name().to_string(), val);
        self.save(&data)
    }

    fn delete<T>(&self, key: &ConfigKey<T>) -> Result<(), ConfigError> {
        let mut data = self.lock();
        data.remove(key.key_name());
        self.save(&data)
    }
}

pub fn load_chat_config(store: &impl ConfigStore) -> ChatConfig {
    store.get(&ConfigKey::CHAT).unwrap_or_default()
}

pub fn save_chat_config(store: &impl ConfigStore, config: &ChatConfig) -> Result<(), ConfigError> {
    store.set(&ConfigKey::CHAT, config.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    // Simple in-memory mock store for testing
    struct MockConfigStore {
        data: RefCell<HashMap<String, serde_json::Value>>,
    }

    impl MockConfigStore {
        fn new() -> Self {
            Self {
                data: RefCell::new(HashMap::new()),
            }
        }
    }

    impl ConfigStore for MockConfigStore {
        fn get<T: DeserializeOwned>(&self, key: &ConfigKey<T>) -> Option<T> {
            self.data
                .borrow()
                .get(key.key_name())
                .and_then(|v| serde_json::from_value(v.clone()).ok())
        }

        fn set<T: Serialize>(&self, key: &ConfigKey<T>, value: T) -> Result<(), ConfigError> {
            let val = serde_json::to_value(value)?;
            self.data
                .borrow_mut()
                .insert(key.key_name().to_string(), val);
            Ok(())
        }

        fn delete<T>(&self, key: &ConfigKey<T>) -> Result<(), ConfigError> {
            self.data.borrow_mut().remove(key.key_name());
            Ok(())
        }
    }

    #[test]
    fn test_chat_config_store() {
        let test_cases = vec![
            ("ChatConfig with defaults", ChatConfig::default()),
            (
                "ChatConfig with no model",
                ChatConfig {
                    selected_model: None,
                    ..ChatConfig::default()
                },
            ),
            (
                "ChatConfig with custom generation",
                ChatConfig {
                    selected_model: Some("qwen2-0.5b-4bit".to_string()),
                    generation: GenerationParameters {
                        temperature: 0.2,
                        max_tokens: 64,
                        ..GenerationParameters::default()
                    },
                    cache_limit_bytes: 1024,
                    evict_on_background: true,
                    system_prompt: "Answer briefly.".to_string(),
                },
            ),
        ];

        for (description, config) in test_cases {
            let store = MockConfigStore::new();
            test_config_lifecycle(&store, &ConfigKey::CHAT, config, description);
        }
    }

    #[test]
    fn test_load_chat_config_falls_back_to_defaults() {
        let store = MockConfigStore::new();
        assert_eq!(load_chat_config(&store), ChatConfig::default());

        // Missing fields take their defaults
        store.data.borrow_mut().insert(
            "chatConfig".to_string(),
            serde_json::json!({ "selectedModel": "phi3.5-4bit" }),
        );
        let config = load_chat_config(&store);
        assert_eq!(config.selected_model.as_deref(), Some("phi3.5-4bit"));
        assert_eq!(config.cache_limit_bytes, DEFAULT_CACHE_LIMIT_BYTES);
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_settings_from_config() {
        let config = ChatConfig {
            evict_on_background: true,
            cache_limit_bytes: 4096,
            ..ChatConfig::default()
        };
        let settings = ControllerSettings::from(&config);
        assert!(settings.evict_on_background);
        assert_eq!(settings.cache_limit_bytes, 4096);
        assert_eq!(settings.seed, SeedSource::Clock);
    }

    #[test]
    fn test_file_store_persists() {
        let path = std::env::temp_dir()
            .join(format!("corellm-config-{}", uuid::Uuid::new_v4()))
            .join("config.json");

        let store = FileStore::open(&path).unwrap();
        assert!(store.get(&ConfigKey::CHAT).is_none());

        let config = ChatConfig {
            selected_model: Some("gemma-2b-quantized".to_string()),
            ..ChatConfig::default()
        };
        save_chat_config(&store, &config).unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(load_chat_config(&reopened), config);

        reopened.delete(&ConfigKey::CHAT).unwrap();
        assert!(FileStore::open(&path).unwrap().get(&ConfigKey::CHAT).is_none());

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    // Helper function to check if a string is in camelCase format
    fn is_camel_case(s: &str) -> bool {
        let mut chars = s.chars();
        match chars.next() {
            Some(first) if first.is_ascii_lowercase() => chars.all(|c| c.is_alphanumeric()),
            _ => false,
        }
    }

    // Helper function to verify camelCase format dynamically
    fn verify_camel_case<T>(store: &MockConfigStore, key: &ConfigKey<T>) {
        assert!(
            is_camel_case(key.key_name()),
            "Config key '{}' should be camelCase",
            key.key_name()
        );

        let stored_json = store.data.borrow().get(key.key_name()).cloned();
        if let Some(obj) = stored_json.as_ref().and_then(|v| v.as_object()) {
            for field_key in obj.keys() {
                assert!(
                    is_camel_case(field_key),
                    "Field '{}' in {} should be camelCase",
                    field_key,
                    key.key_name()
                );
            }
        }
    }

    // Helper function to test the full lifecycle of a config
    fn test_config_lifecycle<T>(
        store: &MockConfigStore,
        key: &ConfigKey<T>,
        test_config: T,
        description: &str,
    ) where
        T: Serialize + DeserializeOwned + PartialEq + std::fmt::Debug + Clone,
    {
        let result: Option<T> = store.get(key);
        assert!(
            result.is_none(),
            "{}: Get should return None before set",
            description
        );

        store
            .set(key, test_config.clone())
            .unwrap_or_else(|e| panic!("{}: Set should succeed: {}", description, e));

        let retrieved_config = store.get(key);
        assert_eq!(
            retrieved_config,
            Some(test_config),
            "{}: Retrieved config should match",
            description
        );

        verify_camel_case(store, key);

        store
            .delete(key)
            .unwrap_or_else(|e| panic!("{}: Delete should succeed: {}", description, e));

        let result: Option<T> = store.get(key);
        assert!(
            result.is_none(),
            "{}: Get should return None after delete",
            description
        );
    }
}
