use std::path::PathBuf;

use super::parsing::{
    env_optional, env_or_default, parse_base_url, parse_bool, parse_environment,
    parse_positive_u64,
};
use super::types::{
    ApiSettings, ConfigError, ExamSettings, RuntimeSettings, Settings, StorageSettings,
    TelemetrySettings,
};

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            parse_environment(env_optional("OBE_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("OBE_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let base_url =
            parse_base_url(env_or_default("OBE_API_BASE_URL", "http://localhost:8000/api/v1"))?;
        let token = env_or_default("OBE_API_TOKEN", "");
        let request_timeout_seconds = parse_positive_u64(
            "OBE_REQUEST_TIMEOUT_SECONDS",
            env_or_default("OBE_REQUEST_TIMEOUT_SECONDS", "30"),
        )?;
        let connect_timeout_seconds = parse_positive_u64(
            "OBE_CONNECT_TIMEOUT_SECONDS",
            env_or_default("OBE_CONNECT_TIMEOUT_SECONDS", "10"),
        )?;

        let autosave_interval_seconds = parse_positive_u64(
            "OBE_AUTOSAVE_INTERVAL_SECONDS",
            env_or_default("OBE_AUTOSAVE_INTERVAL_SECONDS", "30"),
        )?;
        let countdown_tick_millis = parse_positive_u64(
            "OBE_COUNTDOWN_TICK_MILLIS",
            env_or_default("OBE_COUNTDOWN_TICK_MILLIS", "1000"),
        )?;

        let session_store_dir =
            PathBuf::from(env_or_default("OBE_SESSION_STORE_DIR", ".obe-sessions"));

        let log_level = env_or_default("OBE_LOG_LEVEL", "info");
        let json = env_optional("OBE_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings {
                base_url,
                token,
                request_timeout_seconds,
                connect_timeout_seconds,
            },
            exam: ExamSettings { autosave_interval_seconds, countdown_tick_millis },
            storage: StorageSettings { session_store_dir },
            telemetry: TelemetrySettings { log_level, json },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub fn exam(&self) -> &ExamSettings {
        &self.exam
    }

    pub fn storage(&self) -> &StorageSettings {
        &self.storage
    }

    pub fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.session_store_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "OBE_SESSION_STORE_DIR",
                value: String::from("<empty>"),
            });
        }

        if !self.runtime.strict_config {
            return Ok(());
        }

        if self.api.token.is_empty() {
            return Err(ConfigError::MissingSecret("OBE_API_TOKEN"));
        }

        if !self.api.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidUrl(self.api.base_url.clone()));
        }

        Ok(())
    }
}
