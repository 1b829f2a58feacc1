//! Settings service
//!
//! Manages backup settings persistence using JSON file storage.

use crate::config::{DEFAULT_RECEIPT_DOWNLOAD_INTERVAL, MIN_RECEIPT_DOWNLOAD_INTERVAL_MS, SETTINGS_FILE_NAME};
use crate::error::{AppError, Result};
use crate::remote::BackupConfiguration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use uuid::Uuid;

/// Remote backup provider selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncProvider {
    #[default]
    None,
    GoogleDrive,
    LocalDirectory,
}

impl FromStr for SyncProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "none" => Ok(SyncProvider::None),
            "google_drive" | "drive" => Ok(SyncProvider::GoogleDrive),
            "local_directory" | "directory" => Ok(SyncProvider::LocalDirectory),
            other => Err(format!(
                "Unknown sync provider '{}'. Use 'none', 'google_drive' or 'local_directory'",
                other
            )),
        }
    }
}

/// Interactive sign-in required before some providers can be used
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ProviderSignIn: Send + Sync {
    async fn sign_in(&self, provider: SyncProvider) -> Result<()>;
}

/// Backup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    #[serde(default)]
    pub provider: SyncProvider,
    /// Only run automatic backups on Wi-Fi
    #[serde(default)]
    pub wifi_only: bool,
    /// Display name attached to snapshots uploaded from this device
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Pause between receipt downloads during import
    #[serde(default = "default_download_interval_ms")]
    pub receipt_download_interval_ms: u64,
}

fn default_device_name() -> String {
    "This device".to_string()
}

fn default_download_interval_ms() -> u64 {
    DEFAULT_RECEIPT_DOWNLOAD_INTERVAL.as_millis() as u64
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            provider: SyncProvider::None,
            wifi_only: false,
            device_name: default_device_name(),
            receipt_download_interval_ms: default_download_interval_ms(),
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppSettings {
    /// Stable id of this installation; generated on first load
    #[serde(default)]
    pub device_sync_id: String,
    #[serde(default)]
    pub backup: BackupSettings,
}

/// Service for managing application settings
#[derive(Clone)]
pub struct SettingsService {
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new(app_data_dir: PathBuf) -> Self {
        Self {
            settings_path: app_data_dir.join(SETTINGS_FILE_NAME),
        }
    }

    /// Load settings from disk or create defaults if missing
    pub async fn load(&self) -> Result<AppSettings> {
        let mut settings = if self.settings_path.exists() {
            let content = fs::read_to_string(&self.settings_path).await?;
            serde_json::from_str::<AppSettings>(&content)
                .map_err(|e| AppError::Settings(format!("Failed to parse settings: {}", e)))?
        } else {
            tracing::info!("Settings file not found, creating default settings");
            AppSettings::default()
        };

        if settings.device_sync_id.is_empty() {
            settings.device_sync_id = Uuid::new_v4().to_string();
            tracing::info!("Generated device sync id {}", settings.device_sync_id);
            self.save(&settings).await?;
        }

        Ok(settings)
    }

    /// Save settings to disk
    pub async fn save(&self, settings: &AppSettings) -> Result<()> {
        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| AppError::Settings(format!("Failed to serialize settings: {}", e)))?;

        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.settings_path, content).await?;
        tracing::debug!("Settings saved to {:?}", self.settings_path);

        Ok(())
    }

    /// Id that identifies this installation's snapshots
    pub async fn device_sync_id(&self) -> Result<String> {
        Ok(self.load().await?.device_sync_id)
    }

    pub async fn get_backup(&self) -> Result<BackupSettings> {
        Ok(self.load().await?.backup)
    }

    pub async fn update_backup(&self, backup: BackupSettings) -> Result<()> {
        let mut settings = self.load().await?;
        settings.backup = backup;
        self.save(&settings).await
    }

    pub async fn set_provider(&self, provider: SyncProvider) -> Result<()> {
        let mut backup = self.get_backup().await?;
        backup.provider = provider;
        self.update_backup(backup).await?;
        tracing::info!("Sync provider set to {:?}", provider);
        Ok(())
    }

    /// Select a provider. Google Drive needs a successful sign-in first;
    /// a failed sign-in leaves no provider selected. Returns the provider
    /// that ended up saved.
    pub async fn save_current_provider(
        &self,
        provider: SyncProvider,
        sign_in: &dyn ProviderSignIn,
    ) -> Result<SyncProvider> {
        let selected = match provider {
            SyncProvider::GoogleDrive => match sign_in.sign_in(provider).await {
                Ok(()) => SyncProvider::GoogleDrive,
                Err(e) => {
                    tracing::warn!("Sign-in for {:?} failed: {}", provider, e);
                    SyncProvider::None
                }
            },
            other => other,
        };

        self.set_provider(selected).await?;
        Ok(selected)
    }

    pub async fn set_wifi_only(&self, enabled: bool) -> Result<()> {
        let mut backup = self.get_backup().await?;
        backup.wifi_only = enabled;
        self.update_backup(backup).await
    }

    /// Configured download interval, never below the minimum
    pub async fn receipt_download_interval(&self) -> Result<Duration> {
        let configured = self.get_backup().await?.receipt_download_interval_ms;
        Ok(Duration::from_millis(
            configured.max(MIN_RECEIPT_DOWNLOAD_INTERVAL_MS),
        ))
    }
}

#[async_trait::async_trait]
impl BackupConfiguration for SettingsService {
    async fn clear_current_backup_configuration(&self) -> Result<()> {
        self.set_provider(SyncProvider::None).await?;
        tracing::info!("Cleared backup configuration for this device");
        Ok(())
    }
}
