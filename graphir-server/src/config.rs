use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration loaded from YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub graph: GraphSettings,
    pub storage: StorageSettings,
    pub fhir: FhirSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Connection settings for a remote graph endpoint.
///
/// The bundled engine runs embedded (see [`StorageSettings`]) and reads none
/// of these at runtime; they describe the endpoint a remote `GraphStore`
/// implementation would dial behind the same trait.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    pub host: String,
    pub port: u16,
    pub enable_ssl: bool,
    pub username: String,
    pub password: String,
    pub pool_size: u32,
    pub max_in_process_per_connection: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub graph_db: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FhirSettings {
    /// Path to the FHIR JSON Schema document.
    pub schema_path: PathBuf,
    /// Advertised in the CapabilityStatement.
    pub fhir_version: String,
    /// Mount point of the FHIR endpoints.
    pub base_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
        }
    }
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8182,
            enable_ssl: false,
            username: String::new(),
            password: String::new(),
            pool_size: 16,
            max_in_process_per_connection: 64,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            graph_db: "graph.sqlite".to_string(),
        }
    }
}

impl Default for FhirSettings {
    fn default() -> Self {
        Self {
            schema_path: PathBuf::from("schema/fhir.schema.json"),
            fhir_version: "6.0.0-ballot3".to_string(),
            base_path: "/api/fhir/r6".to_string(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = if let Some(path) = config_path {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };

        if let Ok(port) = std::env::var("GRAPHIR_PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }
        if let Ok(host) = std::env::var("GRAPHIR_HOST") {
            config.server.host = host;
        }
        if let Ok(data_dir) = std::env::var("GRAPHIR_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(schema_path) = std::env::var("GRAPHIR_SCHEMA_PATH") {
            config.fhir.schema_path = PathBuf::from(schema_path);
        }

        Ok(config)
    }

    /// Get the full path to the graph database
    pub fn graph_db_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.graph_db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server.port, 8090);
        assert_eq!(config.graph.host, "localhost");
        assert_eq!(config.graph.port, 8182);
        assert!(!config.graph.enable_ssl);
        assert_eq!(config.graph.pool_size, 16);
        assert_eq!(config.graph.max_in_process_per_connection, 64);
        assert_eq!(config.fhir.fhir_version, "6.0.0-ballot3");
        assert_eq!(config.fhir.base_path, "/api/fhir/r6");
    }

    #[test]
    fn test_graph_db_path() {
        let config = ServerConfig::default();
        assert_eq!(config.graph_db_path(), PathBuf::from("data/graph.sqlite"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "server:\n  port: 9999\nfhir:\n  fhir_version: 6.0.0\n";
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.fhir.fhir_version, "6.0.0");
        assert_eq!(config.graph.pool_size, 16);
    }
}
