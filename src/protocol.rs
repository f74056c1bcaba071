use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Play,
    Skip,
    Pause,
    Unpause,
    Queue,
    Leave,
}

// 聊天前端发来的命令
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CommandMessage {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub session: String,
    #[serde(default)]
    pub member: String,
    pub query: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReplyKind {
    Reply,
    Error,
}

// 回复给命令发送方
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    #[serde(rename = "type")]
    pub kind: ReplyKind,
    pub session: String,
    pub text: String,
}

impl Reply {
    pub fn ok(session: &str, text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Reply,
            session: session.to_string(),
            text: text.into(),
        }
    }

    pub fn error(session: &str, text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Error,
            session: session.to_string(),
            text: text.into(),
        }
    }
}
