use std::env;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::util;

fn default_mongodb_uri() -> String {
    env::var("MONGODB_URI").unwrap_or("mongodb://localhost:27017".to_string())
}

fn default_mongodb_db() -> String {
    env::var("MONGODB_DB_NAME").unwrap_or("mentora".to_string())
}

fn default_admin_emails() -> Vec<String> {
    vec![String::from("admin@mentora.app")]
}

fn default_reapply_cooldown_hours() -> i64 {
    48
}

fn default_mongodb_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    file_path: PathBuf,

    #[serde(default = "default_mongodb_uri")]
    pub mongodb_uri: String,
    #[serde(default = "default_mongodb_db")]
    pub mongodb_db: String,
    /// Ceiling on server selection and connect time so a dead database
    /// fails requests instead of hanging them.
    #[serde(default = "default_mongodb_timeout_secs")]
    pub mongodb_timeout_secs: u64,

    /// Accounts created with one of these addresses are provisioned as
    /// admins. Checked once at signup, never per request.
    #[serde(default = "default_admin_emails")]
    pub admin_emails: Vec<String>,

    /// Hours a student waits after a rejection before reapplying.
    #[serde(default = "default_reapply_cooldown_hours")]
    pub reapply_cooldown_hours: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            file_path: config_dir().join("settings.yml"),
            mongodb_uri: default_mongodb_uri(),
            mongodb_db: default_mongodb_db(),
            mongodb_timeout_secs: default_mongodb_timeout_secs(),
            admin_emails: default_admin_emails(),
            reapply_cooldown_hours: default_reapply_cooldown_hours(),
        }
    }
}

#[inline]
fn config_dir() -> PathBuf {
    PathBuf::from(env::var("CONFIG_DIR").unwrap_or("./config".to_string()))
}

impl Config {
    pub fn load() -> Result<Config, ConfigurationError> {
        let config_file = util::find_first_subpath(
            config_dir(),
            &["settings.yml", "settings.yaml"],
            Path::exists,
        )
        .ok_or_else(|| ConfigurationError::NotFound(config_dir()))?;

        let file = File::open(config_file)?;
        let config = serde_yaml::from_reader(BufReader::new(file))?;

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigurationError> {
        let file = File::create(&self.file_path)?;
        let mut out = BufWriter::new(file);
        serde_yaml::to_writer(&mut out, self)?;
        out.flush()?;
        Ok(())
    }

    pub fn reapply_policy(&self) -> crate::enrollment::ReapplyPolicy {
        crate::enrollment::ReapplyPolicy::hours(self.reapply_cooldown_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_yaml::from_str("mongodb_db: custom\n").unwrap();
        assert_eq!(config.mongodb_db, "custom");
        assert_eq!(config.reapply_cooldown_hours, 48);
        assert_eq!(config.mongodb_timeout_secs, 10);
        assert!(!config.admin_emails.is_empty());
    }

    #[test]
    fn cooldown_setting_feeds_the_policy() {
        let config: Config = serde_yaml::from_str("reapply_cooldown_hours: 12\n").unwrap();
        assert_eq!(
            config.reapply_policy().cooldown,
            chrono::Duration::hours(12)
        );
    }
}
