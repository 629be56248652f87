//! Carga de configuración de almacenamiento desde variables de entorno.
//! Convención: `DYNAFLOW_STORE_DIR` y parámetros opcionales.

use once_cell::sync::Lazy;
use std::env;
use std::path::PathBuf;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenvy::dotenv(); // ignora error si no existe .env
});

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directorio base donde vive un archivo por registro.
    pub base_dir: PathBuf,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let base_dir = env::var("DYNAFLOW_STORE_DIR").map(PathBuf::from)
                                                     .unwrap_or_else(|_| {
                                                         std::env::temp_dir().join("dynaflow-suspensions")
                                                     });
        Self { base_dir }
    }
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
