//! 환경 변수 기반 설정 관리

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// 서버 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
    pub matching: MatchConfig,
    pub room: RoomConfig,
    pub presence: PresenceConfig,
    pub turn: TurnConfig,
    pub log_level: String,
    /// 모더레이션 엔드포인트 토큰 (없으면 엔드포인트 비활성)
    pub admin_token: Option<String>,
}

/// 초대/쿨다운 정책
#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub min_seconds: u32,
    pub max_seconds: u32,
    pub invite_ttl_ms: u64,
    pub rescind_cooldown_ms: u64,
    pub decline_cooldown_ms: u64,
    pub session_cooldown_ms: u64,
    /// 무응답 자동 거절 쿨다운. 0이면 쿨다운 없음
    pub timeout_cooldown_ms: u64,
}

/// 방 설정
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub grace_period_ms: u64,
    pub min_credit_seconds: u64,
    pub connect_timeout_ms: u64,
    pub text_inactivity_ms: u64,
    pub max_buffered_candidates: usize,
}

/// 프레즌스 설정
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub idle_timeout_ms: u64,
    pub sweep_interval_ms: u64,
}

/// TURN 서버 설정
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub url: String,
    pub secret: String,
    pub enable_tls: bool,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub ports: TurnPorts,
    pub credential_ttl: u64,
    pub fallback_servers: Vec<String>,
}

/// TURN 포트 설정
#[derive(Debug, Clone)]
pub struct TurnPorts {
    pub udp: u16,
    pub tcp: u16,
    pub tls: u16,
}

impl MatchConfig {
    pub fn invite_ttl(&self) -> Duration {
        Duration::from_millis(self.invite_ttl_ms)
    }

    pub fn rescind_cooldown(&self) -> Duration {
        Duration::from_millis(self.rescind_cooldown_ms)
    }

    pub fn decline_cooldown(&self) -> Duration {
        Duration::from_millis(self.decline_cooldown_ms)
    }

    pub fn session_cooldown(&self) -> Duration {
        Duration::from_millis(self.session_cooldown_ms)
    }

    pub fn timeout_cooldown(&self) -> Option<Duration> {
        (self.timeout_cooldown_ms > 0).then(|| Duration::from_millis(self.timeout_cooldown_ms))
    }
}

impl RoomConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn text_inactivity(&self) -> Duration {
        Duration::from_millis(self.text_inactivity_ms)
    }
}

impl PresenceConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5502,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["http://localhost:3500".to_string()],
            matching: MatchConfig {
                min_seconds: 60,
                max_seconds: 500,
                invite_ttl_ms: 20_000,
                rescind_cooldown_ms: 3_600_000,
                decline_cooldown_ms: 86_400_000,
                session_cooldown_ms: 86_400_000,
                timeout_cooldown_ms: 300_000,
            },
            room: RoomConfig {
                grace_period_ms: 10_000,
                min_credit_seconds: 30,
                connect_timeout_ms: 30_000,
                text_inactivity_ms: 120_000,
                max_buffered_candidates: 64,
            },
            presence: PresenceConfig {
                idle_timeout_ms: 60_000,
                sweep_interval_ms: 15_000,
            },
            turn: TurnConfig {
                url: String::new(),
                secret: String::new(),
                enable_tls: false,
                enable_udp: true,
                enable_tcp: true,
                ports: TurnPorts {
                    udp: 3478,
                    tcp: 3478,
                    tls: 443,
                },
                credential_ttl: 3600,
                fallback_servers: Vec::new(),
            },
            log_level: "info".to_string(),
            admin_token: None,
        }
    }
}

impl Config {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            port: parse_var("PORT", defaults.port),
            host: env::var("HOST").unwrap_or(defaults.host),
            cors_origins: env::var("CORS_ORIGINS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.cors_origins),
            matching: MatchConfig {
                min_seconds: parse_var("MIN_CALL_SECONDS", defaults.matching.min_seconds),
                max_seconds: parse_var("MAX_CALL_SECONDS", defaults.matching.max_seconds),
                invite_ttl_ms: parse_var("INVITE_TTL_MS", defaults.matching.invite_ttl_ms),
                rescind_cooldown_ms: parse_var(
                    "RESCIND_COOLDOWN_MS",
                    defaults.matching.rescind_cooldown_ms,
                ),
                decline_cooldown_ms: parse_var(
                    "DECLINE_COOLDOWN_MS",
                    defaults.matching.decline_cooldown_ms,
                ),
                session_cooldown_ms: parse_var(
                    "SESSION_COOLDOWN_MS",
                    defaults.matching.session_cooldown_ms,
                ),
                timeout_cooldown_ms: parse_var(
                    "TIMEOUT_COOLDOWN_MS",
                    defaults.matching.timeout_cooldown_ms,
                ),
            },
            room: RoomConfig {
                grace_period_ms: parse_var("GRACE_PERIOD_MS", defaults.room.grace_period_ms),
                min_credit_seconds: parse_var(
                    "MIN_CREDIT_SECONDS",
                    defaults.room.min_credit_seconds,
                ),
                connect_timeout_ms: parse_var(
                    "CONNECT_TIMEOUT_MS",
                    defaults.room.connect_timeout_ms,
                ),
                text_inactivity_ms: parse_var(
                    "TEXT_INACTIVITY_MS",
                    defaults.room.text_inactivity_ms,
                ),
                max_buffered_candidates: parse_var(
                    "MAX_BUFFERED_CANDIDATES",
                    defaults.room.max_buffered_candidates,
                ),
            },
            presence: PresenceConfig {
                idle_timeout_ms: parse_var("IDLE_TIMEOUT_MS", defaults.presence.idle_timeout_ms),
                sweep_interval_ms: parse_var(
                    "SWEEP_INTERVAL_MS",
                    defaults.presence.sweep_interval_ms,
                ),
            },
            turn: TurnConfig {
                url: env::var("TURN_SERVER_URL").unwrap_or_default(),
                secret: env::var("TURN_SECRET").unwrap_or_default(),
                enable_tls: env::var("TURN_ENABLE_TLS")
                    .map(|v| v == "true")
                    .unwrap_or(defaults.turn.enable_tls),
                enable_udp: env::var("TURN_ENABLE_UDP")
                    .map(|v| v != "false")
                    .unwrap_or(defaults.turn.enable_udp),
                enable_tcp: env::var("TURN_ENABLE_TCP")
                    .map(|v| v != "false")
                    .unwrap_or(defaults.turn.enable_tcp),
                ports: TurnPorts {
                    udp: parse_var("TURN_PORT_UDP", defaults.turn.ports.udp),
                    tcp: parse_var("TURN_PORT_TCP", defaults.turn.ports.tcp),
                    tls: parse_var("TURN_PORT_TLS", defaults.turn.ports.tls),
                },
                credential_ttl: parse_var("TURN_CREDENTIAL_TTL", defaults.turn.credential_ttl),
                fallback_servers: env::var("TURN_FALLBACK_SERVERS")
                    .map(|v| split_list(&v))
                    .unwrap_or_default(),
            },
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            admin_token: env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_policy() {
        let config = Config::default();
        assert_eq!(config.matching.invite_ttl(), Duration::from_secs(20));
        assert_eq!(config.matching.rescind_cooldown(), Duration::from_secs(3600));
        assert_eq!(config.matching.decline_cooldown(), Duration::from_secs(86_400));
        assert_eq!(config.room.grace_period(), Duration::from_secs(10));
        assert_eq!(config.room.min_credit_seconds, 30);
    }

    #[test]
    fn zero_timeout_cooldown_disables_it() {
        let mut config = Config::default();
        config.matching.timeout_cooldown_ms = 0;
        assert!(config.matching.timeout_cooldown().is_none());
    }

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(split_list(" a, ,b ,"), vec!["a".to_string(), "b".to_string()]);
    }
}
