use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "eventroll", about = "Self-hosted photo sharing for events")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub upload: UploadConfig,
    pub gallery: GalleryConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally visible origin, e.g. `https://photos.example.com`.
    pub public_url: Option<String>,
    /// Browser origins allowed to call the API with credentials.
    pub cors_origins: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub session_days: u64,
    pub bcrypt_cost: u32,
    pub secure_cookie: bool,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct UploadConfig {
    pub max_photo_bytes: usize,
    pub max_request_bytes: usize,
    pub max_chunk_bytes: usize,
    pub timeout_secs: u64,
    pub session_ttl_secs: u64,
    pub max_dimension: u32,
    pub medium_dimension: u32,
    pub thumbnail_dimension: u32,
    pub cover_dimension: u32,
    pub jpeg_quality: u8,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GalleryConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub invalidation_debounce_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            public_url: None,
            cors_origins: Vec::new(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "token".to_string(),
            session_days: 5,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            secure_cookie: false,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_photo_bytes: 25 * 1024 * 1024,
            max_request_bytes: 100 * 1024 * 1024,
            max_chunk_bytes: 8 * 1024 * 1024,
            timeout_secs: 120,
            session_ttl_secs: 3600,
            max_dimension: 2048,
            medium_dimension: 1024,
            thumbnail_dimension: 400,
            cover_dimension: 1600,
            jpeg_quality: 85,
        }
    }
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            default_page_size: 24,
            max_page_size: 100,
            invalidation_debounce_ms: 500,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        config.resolve_paths(&data_dir);
        Ok(config)
    }

    /// Fill in unset paths relative to the data directory.
    pub fn resolve_paths(&mut self, data_dir: &std::path::Path) {
        if self.database.path.is_none() {
            self.database.path = Some(data_dir.join("eventroll.db"));
        }
        if self.storage.path.is_none() {
            self.storage.path = Some(data_dir.join("blobs"));
        }
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".eventroll")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("eventroll.db"))
    }

    pub fn blobs_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("blobs"))
    }

    /// Scratch space for resumable uploads, beside (not inside) the blob root.
    pub fn upload_tmp_path(&self) -> PathBuf {
        self.blobs_path().with_file_name("upload-sessions")
    }

    /// Origin used for links that leave the server (invite links).
    pub fn base_url(&self) -> String {
        match &self.server.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.server.host, self.server.port),
        }
    }

    /// URL a client uses to fetch a blob.
    pub fn media_url(&self, blob_path: &str) -> String {
        let prefix = self
            .server
            .public_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .unwrap_or("");
        format!("{}/media/{}", prefix, blob_path)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload.timeout_secs)
    }

    pub fn invalidation_debounce(&self) -> Duration {
        Duration::from_millis(self.gallery.invalidation_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_for(dir: &std::path::Path) -> Cli {
        Cli {
            config: None,
            host: None,
            port: None,
            data_dir: Some(dir.to_path_buf()),
        }
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.auth.cookie_name, "token");
        assert_eq!(config.auth.session_days, 5);
        assert_eq!(config.upload.max_dimension, 2048);
        assert_eq!(config.gallery.default_page_size, 24);
        assert!(config.database.path.is_none());
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let cli = cli_for(std::path::Path::new("/tmp/test-eventroll"));
        assert_eq!(Config::data_dir(&cli), PathBuf::from("/tmp/test-eventroll"));
    }

    #[test]
    fn data_dir_defaults_to_home_dot_eventroll() {
        let cli = Cli {
            config: None,
            host: None,
            port: None,
            data_dir: None,
        };
        assert!(Config::data_dir(&cli).ends_with(".eventroll"));
    }

    #[test]
    fn load_with_no_config_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load(&cli_for(tmp.path())).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.db_path(), tmp.path().join("eventroll.db"));
        assert_eq!(config.blobs_path(), tmp.path().join("blobs"));
    }

    #[test]
    fn load_reads_toml_and_cli_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[server]
host = "192.168.1.1"
port = 9000
public_url = "https://photos.example.com/"
cors_origins = ["https://app.example.com"]

[upload]
max_dimension = 1024

[gallery]
max_page_size = 10
"#,
        )
        .unwrap();

        let cli = Cli {
            config: Some(config_path),
            host: None,
            port: Some(4000),
            data_dir: Some(tmp.path().to_path_buf()),
        };
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.host, "192.168.1.1");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.upload.max_dimension, 1024);
        assert_eq!(config.upload.medium_dimension, 1024);
        assert_eq!(config.gallery.max_page_size, 10);
        assert_eq!(config.base_url(), "https://photos.example.com");
        assert_eq!(config.server.cors_origins, vec!["https://app.example.com"]);
    }

    #[test]
    fn media_url_is_relative_without_public_url() {
        let config = Config::default();
        assert_eq!(
            config.media_url("events/e1/cover.webp"),
            "/media/events/e1/cover.webp"
        );
        assert_eq!(config.base_url(), "http://0.0.0.0:3000");
    }
}
