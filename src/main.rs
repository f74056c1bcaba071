use std::sync::Arc;

use cakes::command_bridge::{CommandBridge, CommandEvent};
use cakes::config::Config;
use cakes::controller::Controller;
use cakes::fetch::{YtDlpResolver, YtDlpSearch};
use cakes::session::SessionManager;
use cakes::voice_link::VoiceGateway;
use tokio::signal;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().unwrap_or_default();
    log::info!("{} v{} starting", config.app_name, config.app_version);

    // 会话管理：语音中继 + yt-dlp 解析
    let sessions = Arc::new(SessionManager::new(
        Arc::new(VoiceGateway::new(&config)),
        Arc::new(YtDlpResolver::new(&config)),
        config.queue_options(),
        config.frame_duration(),
    ));
    let controller = Arc::new(Controller::new(
        sessions.clone(),
        Arc::new(YtDlpSearch::new(&config)),
    ));

    // 命令通道
    let (tx_cmd, mut rx_cmd) = mpsc::channel::<CommandEvent>(100);

    // 启动命令桥，接收聊天前端的命令
    let command_bridge = Arc::new(CommandBridge::new(&config, tx_cmd).await?);
    let command_bridge_clone = command_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = command_bridge_clone.run().await {
            log::error!("CommandBridge error: {}", e);
        }
    });

    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            // 每条命令单独处理，搜索和加入会话可能较慢
            Some(CommandEvent::Command(msg, from)) = rx_cmd.recv() => {
                let controller = controller.clone();
                let command_bridge = command_bridge.clone();
                tokio::spawn(async move {
                    let reply = controller.handle(msg).await;
                    if let Err(e) = command_bridge.reply(from, &reply).await {
                        log::warn!("Failed to reply to {}: {}", from, e);
                    }
                });
            }
        }
    }

    // 结束所有会话并释放语音连接
    sessions.shutdown().await;
    log::info!("Shutdown complete");
    Ok(())
}
