use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment,
    parse_question_draw, parse_storage_backend, parse_u16, parse_u32, parse_u64,
    parse_validity_days,
};
use super::secret::load_or_create_secret_key;
use super::types::{
    ApiSettings, AssessmentSettings, ConfigError, CorsSettings, DatabaseSettings, Environment,
    RuntimeSettings, SecuritySettings, ServerHost, ServerPort, ServerSettings, Settings,
    StorageBackend, StorageSettings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("ASSESS_HOST", "0.0.0.0");
        let port = env_or_default("ASSESS_PORT", "8000");

        let environment =
            parse_environment(env_optional("ASSESS_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("ASSESS_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Course Assessments API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let secret_key = match env_optional("SECRET_KEY") {
            Some(value) => value,
            None if strict_config => return Err(ConfigError::MissingSecret("SECRET_KEY")),
            None => load_or_create_secret_key(),
        };
        let algorithm = env_or_default("ALGORITHM", "HS256");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "assessments");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "assessments");
        let database_url = env_optional("DATABASE_URL");
        let migrations_dir = env_or_default("ASSESS_MIGRATIONS_DIR", "migrations");
        let max_connections =
            parse_u32("DATABASE_MAX_CONNECTIONS", env_or_default("DATABASE_MAX_CONNECTIONS", "20"))?;

        let backend = parse_storage_backend(env_optional("ASSESS_STORAGE"))?;
        let seed_file = env_optional("ASSESS_SEED_FILE");

        let submit_grace_seconds =
            parse_u64("SUBMIT_GRACE_SECONDS", env_or_default("SUBMIT_GRACE_SECONDS", "30"))?;
        let expiry_sweep_interval_seconds = parse_u64(
            "EXPIRY_SWEEP_INTERVAL_SECONDS",
            env_or_default("EXPIRY_SWEEP_INTERVAL_SECONDS", "30"),
        )?;
        let question_draw = parse_question_draw(env_optional("QUESTION_DRAW"))?;
        let certificate_validity_days =
            parse_validity_days(env_optional("CERTIFICATE_VALIDITY_DAYS"))?;

        let log_level = env_or_default("ASSESS_LOG_LEVEL", "info");
        let json = env_optional("ASSESS_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            security: SecuritySettings { secret_key, algorithm },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                migrations_dir,
                max_connections,
            },
            storage: StorageSettings { backend, seed_file },
            assessment: AssessmentSettings {
                submit_grace_seconds,
                expiry_sweep_interval_seconds,
                question_draw,
                certificate_validity_days,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn security(&self) -> &SecuritySettings {
        &self.security
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn storage(&self) -> &StorageSettings {
        &self.storage
    }

    pub(crate) fn assessment(&self) -> &AssessmentSettings {
        &self.assessment
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    pub(crate) fn environment(&self) -> Environment {
        self.runtime.environment
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.assessment.expiry_sweep_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "EXPIRY_SWEEP_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.security.algorithm != "HS256" {
            return Err(ConfigError::InvalidValue {
                field: "ALGORITHM",
                value: self.security.algorithm.clone(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.storage.backend == StorageBackend::Memory {
            return Err(ConfigError::InvalidValue {
                field: "ASSESS_STORAGE",
                value: self.storage.backend.as_str().to_string(),
            });
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::QuestionDraw;
    use crate::test_support;

    #[tokio::test]
    async fn load_reads_assessment_section() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("SUBMIT_GRACE_SECONDS", "45");
        std::env::set_var("QUESTION_DRAW", "ordered");
        std::env::set_var("CERTIFICATE_VALIDITY_DAYS", "30");

        let settings = Settings::load().expect("settings");
        assert_eq!(settings.assessment().submit_grace_seconds, 45);
        assert_eq!(settings.assessment().question_draw, QuestionDraw::Ordered);
        assert_eq!(settings.assessment().certificate_validity_days, Some(30));
        assert_eq!(settings.storage().backend, StorageBackend::Memory);

        std::env::remove_var("SUBMIT_GRACE_SECONDS");
        std::env::remove_var("QUESTION_DRAW");
        std::env::remove_var("CERTIFICATE_VALIDITY_DAYS");
    }

    #[tokio::test]
    async fn strict_config_rejects_memory_storage() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("ASSESS_STRICT_CONFIG", "1");

        let error = Settings::load().expect_err("memory store is not allowed in strict mode");
        assert!(matches!(error, ConfigError::InvalidValue { field: "ASSESS_STORAGE", .. }));

        std::env::set_var("ASSESS_STRICT_CONFIG", "0");
    }

    #[tokio::test]
    async fn zero_sweep_interval_is_rejected() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("EXPIRY_SWEEP_INTERVAL_SECONDS", "0");

        let error = Settings::load().expect_err("zero interval");
        assert!(matches!(
            error,
            ConfigError::InvalidValue { field: "EXPIRY_SWEEP_INTERVAL_SECONDS", .. }
        ));

        std::env::remove_var("EXPIRY_SWEEP_INTERVAL_SECONDS");
    }
}
