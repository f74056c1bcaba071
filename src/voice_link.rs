use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;
use uuid::Uuid;

use crate::audio::{Frame, FrameSink};
use crate::config::Config;
use crate::session::{Transport, VoiceConnection};

// 发送队列长度，写入方在队列满时等待
const LINK_QUEUE: usize = 32;

// 音频参数结构体
#[derive(Serialize, Clone, Debug)]
struct AudioParams {
    format: String,
    sample_rate: u32,
    channels: u8,
    frame_duration: u32,
}

// Hello Message，用于初始化连接
#[derive(Serialize)]
struct HelloMessage<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    version: u8,
    transport: &'static str,
    session_id: &'a str,
    audio_params: &'a AudioParams,
}

// 说话状态通知
#[derive(Serialize)]
struct SpeakingMessage<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    session_id: &'a str,
    state: &'static str,
}

impl<'a> SpeakingMessage<'a> {
    fn new(session_id: &'a str, speaking: bool) -> Self {
        Self {
            msg_type: "speaking",
            session_id,
            state: if speaking { "start" } else { "stop" },
        }
    }
}

enum LinkCommand {
    Frame(Bytes),
    Text(String),
    Close,
}

/// Joins voice sessions on the relay over websocket.
pub struct VoiceGateway {
    ws_url: String,
    token: String,
    audio: AudioParams,
}

impl VoiceGateway {
    pub fn new(config: &Config) -> Self {
        Self {
            ws_url: config.voice_ws_url.to_string(),
            token: config.voice_token.to_string(),
            audio: AudioParams {
                format: config.voice_format.to_string(),
                sample_rate: config.voice_sample_rate,
                channels: config.voice_channels,
                frame_duration: config.voice_frame_duration,
            },
        }
    }
}

#[async_trait]
impl Transport for VoiceGateway {
    async fn join(&self, session_key: &str, member_key: &str) -> Result<Arc<dyn VoiceConnection>> {
        // 根据配置构建WebSocket请求
        let url = Url::parse(&self.ws_url)?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("voice url {} has no host", self.ws_url))?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(self.ws_url.as_str())
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Session-Id", session_key)
            .header("Member-Id", member_key)
            .header("Connection-Id", Uuid::new_v4().to_string())
            .header("Protocol-Version", "1")
            .body(())?;

        log::info!("Connecting to {} for session {}", self.ws_url, session_key);
        let (ws_stream, _) = connect_async(request).await?;
        let (mut write, mut read) = ws_stream.split();

        // 发送Hello消息进行初始化链接
        let hello = serde_json::to_string(&HelloMessage {
            msg_type: "hello",
            version: 1,
            transport: "websocket",
            session_id: session_key,
            audio_params: &self.audio,
        })?;
        log::debug!("Sending Hello: {}", hello);
        write.send(Message::Text(hello.into())).await?;

        let (tx, mut rx) = mpsc::channel::<LinkCommand>(LINK_QUEUE);
        let session = session_key.to_string();

        // 单一写任务拥有socket，帧和信令按顺序发出
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => log::debug!("Voice server [{}]: {}", session, text),
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("Voice server closed session {}: {:?}", session, frame);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::warn!("Voice link error on {}: {}", session, e);
                            break;
                        }
                        None => break,
                    },
                    cmd = rx.recv() => {
                        let sent = match cmd {
                            Some(LinkCommand::Frame(data)) => write.send(Message::Binary(data)).await,
                            Some(LinkCommand::Text(text)) => write.send(Message::Text(text.into())).await,
                            Some(LinkCommand::Close) | None => {
                                let _ = write.send(Message::Close(None)).await;
                                break;
                            }
                        };
                        if let Err(e) = sent {
                            log::warn!("Voice link write failed on {}: {}", session, e);
                            break;
                        }
                    }
                }
            }
            log::debug!("Voice link for {} closed", session);
        });

        Ok(Arc::new(VoiceLink {
            session_id: session_key.to_string(),
            tx,
            task: Mutex::new(Some(task)),
        }))
    }
}

/// One joined session. Writes are forwarded to the link's writer task.
pub struct VoiceLink {
    session_id: String,
    tx: mpsc::Sender<LinkCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl VoiceLink {
    async fn send(&self, cmd: LinkCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| anyhow!("voice link for {} is closed", self.session_id))
    }
}

#[async_trait]
impl FrameSink for VoiceLink {
    async fn write(&self, frame: &Frame) -> Result<()> {
        self.send(LinkCommand::Frame(frame.clone())).await
    }

    async fn set_speaking(&self, speaking: bool) -> Result<()> {
        let text = serde_json::to_string(&SpeakingMessage::new(&self.session_id, speaking))?;
        self.send(LinkCommand::Text(text)).await
    }
}

#[async_trait]
impl VoiceConnection for VoiceLink {
    async fn leave(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        // 写任务可能已经退出，忽略发送失败
        let _ = self.tx.send(LinkCommand::Close).await;
        if let Err(e) = task.await {
            log::warn!("Voice link task for {} failed: {}", self.session_id, e);
        }
        log::info!("Left voice session {}", self.session_id);
    }
}
