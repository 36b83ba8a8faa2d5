/// Process configuration, drawn entirely from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. Required.
    pub database_url: String,
    /// HTTP listen port.
    pub http_port: u16,
    pub trap: TrapConfig,
}

/// Trap listener bind policy.
#[derive(Debug, Clone)]
pub struct TrapConfig {
    /// Primary bind port (162 needs CAP_NET_BIND_SERVICE or root).
    pub port: u16,
    /// Port tried when the primary bind is denied or busy.
    pub fallback_port: u16,
    /// When true, a failed privileged bind prompts the operator instead of
    /// silently falling back.
    pub require_privileged: bool,
    /// When true, skip the prompt and always fall back.
    pub auto_fallback: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let http_port = env_u16("PORT", 5000);

        let trap_port = std::env::var("SNMP_TRAP_PORT")
            .or_else(|_| std::env::var("TRAP_PORT"))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(162);

        let trap = TrapConfig {
            port: trap_port,
            fallback_port: env_u16("SNMP_TRAP_FALLBACK_PORT", 10162),
            require_privileged: env_bool("SNMP_TRAP_REQUIRE_PRIVILEGED", true),
            auto_fallback: env_bool("SNMP_TRAP_AUTO_FALLBACK", false),
        };

        Ok(Self {
            database_url,
            http_port,
            trap,
        })
    }
}

fn env_u16(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => v.eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}
