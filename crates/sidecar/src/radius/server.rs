//! RADIUS 认证桥接服务
//!
//! ocserv 通过 RADIUS PAP 提交 (User-Name, User-Password)，
//! 这里把它们当作 (udid, token) 交给中心的设备认证接口。

use crate::error::{Result, SidecarError};
use crate::node::{Node, normalize_udid};
use ::radius::core::code::Code;
use ::radius::core::packet::Packet;
use ::radius::core::rfc2865;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// 默认共享密钥，仅用于本机回环
pub const DEFAULT_RADIUS_SECRET: &str = "localhost-radius";

/// RFC 2865 规定的最大报文长度
pub const MAX_PACKET_LEN: usize = 4096;

/// 设备认证
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// 认证通过返回 true；任何失败（包括网络错误）都返回 false
    async fn authenticate(&self, udid: &str, token: &str) -> bool;
}

#[async_trait]
impl Authenticator for Node {
    async fn authenticate(&self, udid: &str, token: &str) -> bool {
        self.check_auth(udid, token).await
    }
}

pub struct RadiusServer {
    socket: Arc<UdpSocket>,
    secret: Arc<Vec<u8>>,
    authenticator: Arc<dyn Authenticator>,
}

impl RadiusServer {
    pub async fn bind(
        addr: &str,
        secret: &str,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| SidecarError::radius(format!("failed to bind {addr}: {e}")))?;
        Ok(Self::from_socket(Arc::new(socket), secret, authenticator))
    }

    pub fn from_socket(
        socket: Arc<UdpSocket>,
        secret: &str,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            socket,
            secret: Arc::new(secret.as_bytes().to_vec()),
            authenticator,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 运行接收循环直到收到关闭信号
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("[RADIUS] Starting RADIUS proxy on {}", self.socket.local_addr()?);

        let mut buffer = vec![0u8; MAX_PACKET_LEN];
        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, src)) => {
                            let data = buffer[..len].to_vec();
                            let socket = self.socket.clone();
                            let secret = self.secret.clone();
                            let authenticator = self.authenticator.clone();

                            // 认证可能等待中心接口，放到后台处理
                            tokio::spawn(async move {
                                if let Err(e) = process_packet(&socket, &data, src, &secret, authenticator.as_ref()).await {
                                    warn!("[RADIUS] Failed to process packet from {}: {}", src, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("[RADIUS] Error receiving UDP packet: {}", e);
                            return Err(e.into());
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("[RADIUS] Received shutdown signal, stopping RADIUS proxy");
                    break;
                }
            }
        }

        info!("[RADIUS] RADIUS proxy has been shut down");
        Ok(())
    }
}

/// 处理单个报文，对 Access-Request 回复 Accept 或 Reject
pub async fn process_packet(
    socket: &UdpSocket,
    data: &[u8],
    src: SocketAddr,
    secret: &[u8],
    authenticator: &dyn Authenticator,
) -> Result<()> {
    let request = Packet::decode(data, secret)
        .map_err(|e| SidecarError::radius(format!("malformed packet: {e}")))?;
    if request.get_code() != Code::AccessRequest {
        debug!(
            "[RADIUS] Ignoring non Access-Request packet {:?} from {}",
            request.get_code(),
            src
        );
        return Ok(());
    }

    let code = decide(&request, authenticator).await;
    let reply = request
        .make_response_packet(code)
        .encode()
        .map_err(|e| SidecarError::radius(format!("failed to encode reply: {e}")))?;
    socket.send_to(&reply, src).await?;
    debug!(
        "[RADIUS] Sent {:?} to {} (id={})",
        code,
        src,
        request.get_identifier()
    );
    Ok(())
}

/// 由 User-Name / User-Password 得出 Accept 或 Reject
async fn decide(request: &Packet, authenticator: &dyn Authenticator) -> Code {
    let username = match rfc2865::lookup_user_name(request).transpose() {
        Ok(name) => name.unwrap_or_default(),
        Err(e) => {
            warn!("[RADIUS] Failed to decode User-Name: {}", e);
            return Code::AccessReject;
        }
    };
    let password = match rfc2865::lookup_user_password(request).transpose() {
        Ok(raw) => match String::from_utf8(raw.unwrap_or_default()) {
            Ok(p) => p,
            Err(_) => {
                warn!("[RADIUS] User-Password is not valid UTF-8");
                return Code::AccessReject;
            }
        },
        Err(e) => {
            warn!("[RADIUS] Failed to decode User-Password: {}", e);
            return Code::AccessReject;
        }
    };

    let udid = normalize_udid(&username);
    if udid.is_empty() || password.is_empty() {
        warn!("[RADIUS] Empty username or password");
        return Code::AccessReject;
    }

    debug!("[RADIUS] Auth request: udid={}", udid);
    if authenticator.authenticate(udid, &password).await {
        info!("[RADIUS] Auth success: udid={}", udid);
        Code::AccessAccept
    } else {
        info!("[RADIUS] Auth failed: udid={}", udid);
        Code::AccessReject
    }
}
