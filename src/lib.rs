//! Tandem 매칭/통화 시그널링
//!
//! 서버 측: 프레즌스, 초대 중개, 방 수명주기, SDP/ICE 릴레이.
//! 클라이언트 측: [`client`] 모듈의 통화 컨트롤러와 연결 품질 감시.

pub mod client;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod handlers;
pub mod invite;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod room;
pub mod state;
pub mod timer;
