//! TURN 자격증명 핸들러

use crate::config::TurnConfig;
use crate::error::CallError;
use crate::protocol::{IceServer, ServerMessage, TurnConfigData};
use crate::state::AppState;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::UnboundedSender;

type HmacSha1 = Hmac<Sha1>;

/// TURN 설정 요청 처리. 방 참가자에게만 발급한다.
pub async fn handle_turn_config_request(
    state: &Arc<AppState>,
    user_id: &str,
    sender: &UnboundedSender<ServerMessage>,
    room_id: &str,
) -> Result<(), CallError> {
    let handle = state
        .rooms
        .get(room_id)
        .ok_or_else(|| CallError::RoomNotFound(room_id.to_string()))?;
    handle.lock().await.require_slot(user_id)?;

    let turn_config = &state.config.turn;
    if turn_config.url.is_empty() || turn_config.secret.is_empty() {
        let _ = sender.send(ServerMessage::TurnConfig {
            success: false,
            data: None,
            error: Some("TURN server not configured".to_string()),
        });
        return Ok(());
    }

    let now = unix_seconds();
    let ice_servers = match generate_credentials(turn_config, user_id, now) {
        Ok(servers) => servers,
        Err(err) => {
            tracing::error!(room_id = %room_id, error = %err, "Failed to sign TURN credentials");
            let _ = sender.send(ServerMessage::TurnConfig {
                success: false,
                data: None,
                error: Some("TURN credentials unavailable".to_string()),
            });
            return Ok(());
        }
    };

    let _ = sender.send(ServerMessage::TurnConfig {
        success: true,
        data: Some(TurnConfigData {
            ice_servers,
            ttl: turn_config.credential_ttl,
            timestamp: now,
            room_id: room_id.to_string(),
        }),
        error: None,
    });

    tracing::info!(room_id = %room_id, user_id = %user_id, "TURN config sent");
    Ok(())
}

/// TURN REST 자격증명 생성 (`<만료시각>:<사용자>` + HMAC-SHA1)
fn generate_credentials(
    config: &TurnConfig,
    user_id: &str,
    now: u64,
) -> Result<Vec<IceServer>, hmac::digest::InvalidLength> {
    let expiry_time = now + config.credential_ttl;
    let username = format!("{}:{}", expiry_time, user_id);
    let password = generate_hmac_hash(&username, &config.secret)?;
    Ok(build_ice_servers(config, &username, &password))
}

fn generate_hmac_hash(username: &str, secret: &str) -> Result<String, hmac::digest::InvalidLength> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())?;
    mac.update(username.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

fn build_ice_servers(config: &TurnConfig, username: &str, password: &str) -> Vec<IceServer> {
    let mut turn_urls = Vec::new();

    if config.enable_udp {
        turn_urls.push(format!("turn:{}:{}", config.url, config.ports.udp));
    }
    if config.enable_tcp {
        turn_urls.push(format!("turn:{}:{}?transport=tcp", config.url, config.ports.tcp));
    }
    if config.enable_tls {
        turn_urls.push(format!("turns:{}:{}?transport=tcp", config.url, config.ports.tls));
    }
    for fallback in &config.fallback_servers {
        if config.enable_tls {
            turn_urls.push(format!("turns:{}:{}?transport=tcp", fallback, config.ports.tls));
        } else {
            turn_urls.push(format!("turn:{}:{}", fallback, config.ports.udp));
        }
    }

    let mut servers: Vec<IceServer> = turn_urls
        .into_iter()
        .map(|url| IceServer {
            urls: vec![url],
            username: Some(username.to_string()),
            credential: Some(password.to_string()),
            credential_type: Some("password".to_string()),
        })
        .collect();

    // STUN (인증 불필요)
    if config.enable_udp {
        servers.push(IceServer {
            urls: vec![format!("stun:{}:{}", config.url, config.ports.udp)],
            username: None,
            credential: None,
            credential_type: None,
        });
    }

    servers
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn_config() -> TurnConfig {
        TurnConfig {
            url: "turn.example.net".to_string(),
            secret: "s3cret".to_string(),
            enable_tls: true,
            enable_udp: true,
            enable_tcp: false,
            ..crate::config::Config::default().turn
        }
    }

    #[test]
    fn username_embeds_expiry_and_user() {
        let config = turn_config();
        let servers = generate_credentials(&config, "alice", 1_000).unwrap();
        let username = servers[0].username.clone().unwrap();
        assert_eq!(username, format!("{}:alice", 1_000 + config.credential_ttl));
    }

    #[test]
    fn password_is_hmac_of_username() {
        let config = turn_config();
        let servers = generate_credentials(&config, "alice", 1_000).unwrap();
        let username = servers[0].username.clone().unwrap();
        let expected = generate_hmac_hash(&username, "s3cret").unwrap();
        assert_eq!(servers[0].credential.as_deref(), Some(expected.as_str()));
        assert_ne!(generate_hmac_hash(&username, "other").unwrap(), expected);
    }

    #[test]
    fn enabled_transports_shape_the_server_list() {
        let config = turn_config();
        let servers = build_ice_servers(&config, "u", "p");
        let urls: Vec<&str> = servers.iter().map(|s| s.urls[0].as_str()).collect();

        assert!(urls.iter().any(|u| u.starts_with("turn:turn.example.net")));
        assert!(urls.iter().any(|u| u.starts_with("turns:")));
        assert!(urls.iter().any(|u| u.starts_with("stun:")));
        assert_eq!(urls.len(), 3);

        let stun = servers.iter().find(|s| s.urls[0].starts_with("stun:")).unwrap();
        assert!(stun.username.is_none());
    }
}
