use anyhow::{bail, Context};

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub api_key_prefix: String,
    pub rate_limit_per_min: i64,
    pub rate_limit_per_day: i64,
    pub cors_allowed_origins: Vec<String>,
    pub smtp: Option<SmtpConfig>,
    pub ai: AiConfig,
    pub ai_fallback: Option<AiConfig>,
    pub whatsapp_verify_token: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub env: String,
}

impl ServerConfig {
    pub fn is_development(&self) -> bool {
        self.env == "development"
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub sslmode: String,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    pub conn_max_lifetime_min: u64,
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.database, self.sslmode
        )
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub provider: String,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET es obligatorio")?;
        if jwt_secret.len() < 32 {
            bail!("JWT_SECRET debe tener al menos 32 caracteres");
        }

        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) if !host.is_empty() => Some(SmtpConfig {
                host,
                port: env_parse("SMTP_PORT", 587),
                user: env_str("SMTP_USER", ""),
                pass: env_str("SMTP_PASS", ""),
                from: env_str("SMTP_FROM", "no-reply@localhost"),
            }),
            _ => None,
        };

        let ai = AiConfig {
            provider: env_str("AI_PROVIDER", "ollama"),
            api_key: env_str("AI_API_KEY", ""),
            model: env_str("AI_MODEL", "llama3.1"),
            base_url: env_str("AI_BASE_URL", "http://localhost:11434"),
        };
        let ai_fallback = match std::env::var("AI_FALLBACK_PROVIDER") {
            Ok(provider) if !provider.is_empty() => Some(AiConfig {
                provider,
                api_key: env_str("AI_FALLBACK_API_KEY", ""),
                model: env_str("AI_FALLBACK_MODEL", ""),
                base_url: env_str("AI_FALLBACK_BASE_URL", ""),
            }),
            _ => None,
        };

        Ok(Self {
            server: ServerConfig {
                port: env_parse("SERVER_PORT", 8080),
                env: env_str("SERVER_ENV", "development"),
            },
            database: DatabaseConfig {
                host: env_str("CRDB_HOST", "localhost"),
                port: env_parse("CRDB_PORT", 26257),
                user: env_str("CRDB_USER", "root"),
                password: env_str("CRDB_PASSWORD", ""),
                database: env_str("CRDB_DATABASE", "reclamos"),
                sslmode: env_str("CRDB_SSLMODE", "disable"),
                max_open_conns: env_parse("CRDB_MAX_OPEN_CONNS", 25),
                max_idle_conns: env_parse("CRDB_MAX_IDLE_CONNS", 5),
                conn_max_lifetime_min: env_parse("CRDB_CONN_MAX_LIFETIME_MIN", 30),
            },
            jwt: JwtConfig {
                secret: jwt_secret,
                expiration_hours: env_parse("JWT_EXPIRATION_HOURS", 24),
            },
            api_key_prefix: env_str("API_KEY_PREFIX", "lrk"),
            rate_limit_per_min: env_parse("RATE_LIMIT_REQUESTS_PER_MIN", 60),
            rate_limit_per_day: env_parse("RATE_LIMIT_REQUESTS_PER_DAY", 10_000),
            cors_allowed_origins: env_str("CORS_ALLOWED_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            smtp,
            ai,
            ai_fallback,
            whatsapp_verify_token: env_str("WHATSAPP_VERIFY_TOKEN", ""),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them serialised in one test.
    #[test]
    fn from_env_valida_jwt_secret() {
        std::env::remove_var("JWT_SECRET");
        assert!(AppConfig::from_env().is_err());

        std::env::set_var("JWT_SECRET", "demasiado-corto");
        assert!(AppConfig::from_env().is_err());

        std::env::set_var("JWT_SECRET", "0123456789abcdef0123456789abcdef");
        let cfg = AppConfig::from_env().expect("config válida");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.database.port, 26257);
        assert!(cfg.server.is_development());
        assert!(cfg.database.url().starts_with("postgres://root:@localhost"));
    }
}
