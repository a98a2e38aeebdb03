use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
};

pub const SERVER_TOKEN_KEY: &str = "server_token";

/// Small JSON-backed store for the pairing client keys handed out by the TV
/// and the generated HTTP token.
#[derive(Debug)]
pub struct KeyStore {
    path: PathBuf,
    store: KeyStoreFile,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyStoreFile {
    entries: HashMap<String, String>,
}

pub fn client_key_name(host: &str) -> String {
    format!("client_key:{}", host)
}

impl KeyStore {
    pub fn open(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = match path {
            Some(p) => PathBuf::from(p),
            None => default_keystore_path(),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let store = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            KeyStoreFile::default()
        };

        Ok(Self { path, store })
    }

    pub fn store(&mut self, key: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.store.entries.insert(key.to_string(), value.to_string());
        self.persist()
    }

    pub fn retrieve(&self, key: &str) -> Option<&str> {
        self.store.entries.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Result<bool, Box<dyn std::error::Error>> {
        if self.store.entries.remove(key).is_none() {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    pub fn list_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.store.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn persist(&self) -> Result<(), Box<dyn std::error::Error>> {
        let data = serde_json::to_string_pretty(&self.store)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

fn default_keystore_path() -> PathBuf {
    crate::config::app_dir().join("keys.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("webos-bridge-{}", uuid::Uuid::new_v4()))
            .join("keys.json")
    }

    #[test]
    fn missing_file_opens_empty() {
        let path = temp_path();
        let store = KeyStore::open(path.to_str()).unwrap();
        assert!(store.list_keys().is_empty());
        assert!(store.retrieve("anything").is_none());
    }

    #[test]
    fn stored_keys_survive_reopen() {
        let path = temp_path();
        let mut store = KeyStore::open(path.to_str()).unwrap();
        store
            .store(&client_key_name("10.0.0.7"), "c0ffee")
            .unwrap();
        store.store(SERVER_TOKEN_KEY, "tok").unwrap();

        let reopened = KeyStore::open(path.to_str()).unwrap();
        assert_eq!(reopened.retrieve("client_key:10.0.0.7"), Some("c0ffee"));
        assert_eq!(
            reopened.list_keys(),
            vec!["client_key:10.0.0.7".to_string(), "server_token".to_string()]
        );
    }

    #[test]
    fn remove_reports_whether_key_existed() {
        let path = temp_path();
        let mut store = KeyStore::open(path.to_str()).unwrap();
        store.store("a", "1").unwrap();
        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert!(KeyStore::open(path.to_str()).unwrap().retrieve("a").is_none());
    }

    #[test]
    fn corrupt_file_falls_back_to_empty() {
        let path = temp_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();
        let store = KeyStore::open(path.to_str()).unwrap();
        assert!(store.list_keys().is_empty());
    }
}
