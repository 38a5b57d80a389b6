use anyhow::{Context, Result};
use endpoint::conf::{ClientConfig, ServerConfig};
use endpoint::ServiceUrl;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    File { path: String },
}

/// Services this process exposes and consumes
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Service URLs served locally; services on one host:port share a listener
    pub exports: Vec<String>,
    /// Remote service URLs; services on one host:port share a client
    pub references: Vec<String>,
}

impl ServicesConfig {
    pub fn export_urls(&self) -> Result<Vec<ServiceUrl>> {
        parse_urls(&self.exports, "services.exports")
    }

    pub fn reference_urls(&self) -> Result<Vec<ServiceUrl>> {
        parse_urls(&self.references, "services.references")
    }
}

fn parse_urls(raw: &[String], field: &str) -> Result<Vec<ServiceUrl>> {
    raw.iter()
        .map(|s| {
            s.parse::<ServiceUrl>()
                .with_context(|| format!("Invalid service url in {}: {}", field, s))
        })
        .collect()
}

impl HostConfig {
    /// Load configuration from host.toml and environment variables
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        // Compile-time defaults are the bottom layer, so any key missing from
        // files/env still resolves
        let defaults = config::Config::try_from(&HostConfig::default())
            .context("Failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        // 1. /etc/endpoint/host.toml (production)
        // 2. config/host.toml (local development)
        // 3. crates/host/config/host.toml (workspace root)
        let config_paths = vec![
            "/etc/endpoint/host",
            "config/host",
            "crates/host/config/host",
        ];

        for path in config_paths {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Double underscore for nested keys: ENDPOINT_CLIENT__MAX_CONNECTIONS
        builder = builder.add_source(
            config::Environment::with_prefix("ENDPOINT")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("services.exports")
                .with_list_parse_key("services.references")
                .try_parsing(true),
        );

        builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.server.validate().map_err(anyhow::Error::msg)?;
        self.client.validate().map_err(anyhow::Error::msg)?;
        self.services.export_urls()?;
        self.services.reference_urls()?;
        Ok(())
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            logging: LoggingConfig {
                level: "info,host=debug,endpoint=debug".to_string(),
                format: LogFormat::Pretty,
                output: LogOutput::Stdout,
            },
            services: ServicesConfig::default(),
        }
    }
}
