//! Backend filesystem del puerto `StorageBackend`.
//!
//! Layout: un archivo `<clave>.json` por registro bajo `base_dir`. Escritura
//! atómica: primero `<clave>.json.tmp`, luego rename (el rename dentro del
//! mismo directorio es atómico en los filesystems soportados). Los registros
//! expirados se reportan ausentes en `retrieve` y se barren con `cleanup`.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;

use flow_core::errors::FlowError;
use flow_core::suspend::{BackendHealth, ListCriteria, PersistedEnvelope, StorageBackend};

use crate::config::StorageConfig;
use crate::error::PersistenceError;

const BACKEND_NAME: &str = "fs";

pub struct FsBackend {
    base_dir: PathBuf,
}

impl FsBackend {
    /// Crea el backend asegurando el directorio base.
    pub async fn new(config: StorageConfig) -> Result<Self, FlowError> {
        fs::create_dir_all(&config.base_dir).await
                                            .map_err(|e| PersistenceError::from(e).into_flow(BACKEND_NAME, "init"))?;
        Ok(Self { base_dir: config.base_dir })
    }

    pub async fn from_env() -> Result<Self, FlowError> {
        Self::new(StorageConfig::from_env()).await
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // las claves son opacas pero generadas por el motor (susp_<uuid>);
        // se sanitiza por si un caller externo arma claves a mano
        let safe: String = key.chars()
                              .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
                              .collect();
        self.base_dir.join(format!("{safe}.json"))
    }

    async fn read_envelope(&self, path: &Path) -> Result<Option<PersistedEnvelope>, PersistenceError> {
        match fs::read(path).await {
            Ok(bytes) => {
                let env: PersistedEnvelope =
                    serde_json::from_slice(&bytes).map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
                Ok(Some(env))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn all_envelopes(&self) -> Result<Vec<PersistedEnvelope>, PersistenceError> {
        let mut out = Vec::new();
        let mut dir = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_envelope(&path).await {
                Ok(Some(env)) => out.push(env),
                Ok(None) => {}
                Err(PersistenceError::Corrupt(msg)) => {
                    // un archivo corrupto no debe romper el listado completo
                    log::warn!("skipping corrupt record {}: {msg}", path.display());
                }
                Err(e) => return Err(e),
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn store(&self, key: &str, envelope: &PersistedEnvelope) -> Result<(), FlowError> {
        let final_path = self.path_for(key);
        let tmp_path = final_path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(envelope).map_err(|e| {
                                                           PersistenceError::from(e).into_flow(BACKEND_NAME, "store")
                                                       })?;
        fs::write(&tmp_path, &bytes).await
                                    .map_err(|e| PersistenceError::from(e).into_flow(BACKEND_NAME, "store"))?;
        // el rename publica el registro completo o nada
        fs::rename(&tmp_path, &final_path).await
                                          .map_err(|e| PersistenceError::from(e).into_flow(BACKEND_NAME, "store"))?;
        log::debug!("stored suspension record {key} at {}", final_path.display());
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<PersistedEnvelope>, FlowError> {
        let env = self.read_envelope(&self.path_for(key))
                      .await
                      .map_err(|e| e.into_flow(BACKEND_NAME, "retrieve"))?;
        match env {
            Some(env) if env.is_expired(Utc::now()) => Ok(None),
            other => Ok(other),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, FlowError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PersistenceError::from(e).into_flow(BACKEND_NAME, "delete")),
        }
    }

    async fn list(&self, criteria: &ListCriteria) -> Result<Vec<PersistedEnvelope>, FlowError> {
        let now = Utc::now();
        let all = self.all_envelopes().await.map_err(|e| e.into_flow(BACKEND_NAME, "list"))?;
        let filtered: Vec<PersistedEnvelope> = all.into_iter()
                                                  .filter(|e| criteria.matches(e, now))
                                                  .skip(criteria.offset.unwrap_or(0))
                                                  .take(criteria.limit.unwrap_or(usize::MAX))
                                                  .collect();
        Ok(filtered)
    }

    async fn cleanup(&self, criteria: &ListCriteria) -> Result<u64, FlowError> {
        let now = Utc::now();
        let all = self.all_envelopes().await.map_err(|e| e.into_flow(BACKEND_NAME, "cleanup"))?;
        let mut count = 0u64;
        for env in all.into_iter().filter(|e| criteria.matches(e, now)) {
            if self.delete(&env.key).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn health(&self) -> BackendHealth {
        let started = Instant::now();
        let probe = self.base_dir.join(".health_probe");
        let result: Result<(), std::io::Error> = async {
            fs::write(&probe, b"ok").await?;
            fs::remove_file(&probe).await?;
            Ok(())
        }.await;
        match result {
            Ok(()) => BackendHealth { healthy: true,
                                      latency_ms: started.elapsed().as_millis() as u64,
                                      error: None },
            Err(e) => BackendHealth { healthy: false,
                                      latency_ms: started.elapsed().as_millis() as u64,
                                      error: Some(e.to_string()) },
        }
    }
}
