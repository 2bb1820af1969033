use std::collections::HashSet;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub dir: String,
    pub file_prefix: String,
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// JPEG quality used when encoding scanned pages (1-100).
    pub jpeg_quality: u8,
    /// Pages buffered between the capture thread and the job.
    pub page_buffer: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendDriver {
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimulatedDeviceConfig {
    pub name: String,
    pub vendor: String,
    pub model: String,
    pub device_type: String,
    #[serde(default)]
    pub feeder_pages: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub driver: BackendDriver,
    #[serde(default)]
    pub devices: Vec<SimulatedDeviceConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub capture: CaptureConfig,
    pub backend: BackendConfig,
    pub security: Option<SecurityConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        let defaults: &str = include_str!("../config/default.toml");
        match ::config::Config::builder()
            .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        // Mirror defaults from config/default.toml
        Self { jpeg_quality: 85, page_buffer: 4 }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let defaults: &str = include_str!("../config/default.toml");
    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
        // Optional local file: scour.toml (in CWD)
        .add_source(::config::File::with_name("scour").required(false));

    if let Ok(custom_path) = std::env::var("SCOUR_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(::config::Environment::with_prefix("SCOUR").separator("__"));

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub(crate) fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Server
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }

    // Capture
    if !(1..=100).contains(&cfg.capture.jpeg_quality) {
        return Err(anyhow::anyhow!("capture.jpeg_quality must be in 1..=100"));
    }
    if cfg.capture.page_buffer == 0 {
        return Err(anyhow::anyhow!("capture.page_buffer must be > 0"));
    }

    // Backend
    let mut seen = HashSet::new();
    for dev in &cfg.backend.devices {
        if dev.name.trim().is_empty() {
            return Err(anyhow::anyhow!("backend.devices: name must not be empty"));
        }
        if !seen.insert(dev.name.as_str()) {
            return Err(anyhow::anyhow!("backend.devices: duplicate device name {}", dev.name));
        }
    }

    Ok(())
}
