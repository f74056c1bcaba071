use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    command: Command,
    voice: Voice,
    playback: Playback,
    tools: Tools,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Command {
    local_port: u16,
    buffer_size: usize,
}

#[derive(Deserialize)]
struct Voice {
    ws_url: String,
    token: String,
    format: String,
    sample_rate: u32,
    channels: u8,
    frame_duration: u32,
}

#[derive(Deserialize)]
struct Playback {
    idle_timeout_secs: u64,
    silence_frames: usize,
}

#[derive(Deserialize)]
struct Tools {
    ytdlp: String,
    ffmpeg: String,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 命令桥配置
    println!("cargo:rustc-env=COMMAND_LOCAL_PORT={}", config.command.local_port);
    println!("cargo:rustc-env=COMMAND_BUFFER_SIZE={}", config.command.buffer_size);

    // 语音中继配置
    println!("cargo:rustc-env=VOICE_WS_URL={}", config.voice.ws_url);
    println!("cargo:rustc-env=VOICE_TOKEN={}", config.voice.token);
    println!("cargo:rustc-env=VOICE_FORMAT={}", config.voice.format);
    println!("cargo:rustc-env=VOICE_SAMPLE_RATE={}", config.voice.sample_rate);
    println!("cargo:rustc-env=VOICE_CHANNELS={}", config.voice.channels);
    println!("cargo:rustc-env=VOICE_FRAME_DURATION={}", config.voice.frame_duration);

    // 播放配置
    println!("cargo:rustc-env=IDLE_TIMEOUT_SECS={}", config.playback.idle_timeout_secs);
    println!("cargo:rustc-env=SILENCE_FRAMES={}", config.playback.silence_frames);

    // 外部工具
    println!("cargo:rustc-env=YTDLP_PATH={}", config.tools.ytdlp);
    println!("cargo:rustc-env=FFMPEG_PATH={}", config.tools.ffmpeg);
}
