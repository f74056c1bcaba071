use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::protocol::{CommandMessage, Reply};

pub enum CommandEvent {
    Command(CommandMessage, SocketAddr),
}

pub struct CommandBridge {
    socket: Arc<UdpSocket>,
    buffer_size: usize,
    tx: mpsc::Sender<CommandEvent>,
}

// 聊天前端和播放核心通过本地UDP通信，端口在配置中指定
impl CommandBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<CommandEvent>) -> anyhow::Result<Self> {
        // 绑定本地UDP端口
        let socket = UdpSocket::bind(format!("0.0.0.0:{}", config.command_local_port)).await?;
        log::info!("Command bridge listening on {}", socket.local_addr()?);
        Ok(Self::from_socket(socket, config.command_buffer_size, tx))
    }

    pub fn from_socket(socket: UdpSocket, buffer_size: usize, tx: mpsc::Sender<CommandEvent>) -> Self {
        Self {
            socket: Arc::new(socket),
            buffer_size: buffer_size.max(512),
            tx,
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            // 通过UDP socket接收消息
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            let msg = match serde_json::from_slice::<CommandMessage>(&buf[..len]) {
                Ok(msg) => msg,
                Err(e) => {
                    log::warn!("Ignoring malformed command from {}: {}", from, e);
                    continue;
                }
            };
            if self.tx.send(CommandEvent::Command(msg, from)).await.is_err() {
                log::warn!("Command receiver gone, stopping bridge");
                break;
            }
        }
        Ok(())
    }

    pub async fn reply(&self, to: SocketAddr, reply: &Reply) -> anyhow::Result<()> {
        let text = serde_json::to_string(reply)?;
        self.socket.send_to(text.as_bytes(), to).await?;
        Ok(())
    }
}
