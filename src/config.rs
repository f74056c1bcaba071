use std::time::Duration;

use crate::queue::QueueOptions;

#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 命令桥配置
    pub command_local_port: u16,
    pub command_buffer_size: usize,

    // 语音中继配置
    pub voice_ws_url: &'static str,
    pub voice_token: &'static str,
    pub voice_format: &'static str,
    pub voice_sample_rate: u32,
    pub voice_channels: u8,
    pub voice_frame_duration: u32,

    // 播放配置
    pub idle_timeout_secs: u64,
    pub silence_frames: usize,

    // 外部工具路径
    pub ytdlp_path: &'static str,
    pub ffmpeg_path: &'static str,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            command_local_port: env!("COMMAND_LOCAL_PORT").parse()
                .map_err(|_| "Failed to parse COMMAND_LOCAL_PORT")?,
            command_buffer_size: env!("COMMAND_BUFFER_SIZE").parse()
                .map_err(|_| "Failed to parse COMMAND_BUFFER_SIZE")?,

            voice_ws_url: env!("VOICE_WS_URL"),
            voice_token: env!("VOICE_TOKEN"),
            voice_format: env!("VOICE_FORMAT"),
            voice_sample_rate: env!("VOICE_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse VOICE_SAMPLE_RATE")?,
            voice_channels: env!("VOICE_CHANNELS").parse()
                .map_err(|_| "Failed to parse VOICE_CHANNELS")?,
            voice_frame_duration: env!("VOICE_FRAME_DURATION").parse()
                .map_err(|_| "Failed to parse VOICE_FRAME_DURATION")?,

            idle_timeout_secs: env!("IDLE_TIMEOUT_SECS").parse()
                .map_err(|_| "Failed to parse IDLE_TIMEOUT_SECS")?,
            silence_frames: env!("SILENCE_FRAMES").parse()
                .map_err(|_| "Failed to parse SILENCE_FRAMES")?,

            ytdlp_path: env!("YTDLP_PATH"),
            ffmpeg_path: env!("FFMPEG_PATH"),
        })
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.voice_frame_duration))
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            silence_frames: self.silence_frames,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}
