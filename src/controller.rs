use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::SessionError;
use crate::fetch::TrackSearch;
use crate::protocol::{CommandKind, CommandMessage, Reply};
use crate::session::SessionManager;

/// Maps chat commands onto session queues.
pub struct Controller {
    sessions: Arc<SessionManager>,
    search: Arc<dyn TrackSearch>,
}

impl Controller {
    pub fn new(sessions: Arc<SessionManager>, search: Arc<dyn TrackSearch>) -> Self {
        Self { sessions, search }
    }

    pub async fn handle(&self, msg: CommandMessage) -> Reply {
        log::debug!("Command {:?} for session {}", msg.kind, msg.session);
        match self.dispatch(&msg).await {
            Ok(text) => Reply::ok(&msg.session, text),
            Err(e) => {
                log::warn!("Command {:?} on {} failed: {}", msg.kind, msg.session, e);
                Reply::error(&msg.session, e.to_string())
            }
        }
    }

    async fn dispatch(&self, msg: &CommandMessage) -> Result<String, SessionError> {
        let session = msg.session.as_str();
        let member = msg.member.as_str();

        match msg.kind {
            CommandKind::Play => {
                // 先加入会话，不在语音中直接拒绝
                self.sessions.queue(session, member).await?;

                let query = msg.query.as_deref().map(str::trim).unwrap_or_default();
                if query.is_empty() {
                    return Err(SessionError::NoResults);
                }
                let track = self
                    .search
                    .search(query)
                    .await
                    .map_err(SessionError::Search)?
                    .into_iter()
                    .next()
                    .ok_or(SessionError::NoResults)?;

                let reply = format!("Playing {}", escape_markdown(&track.title));
                self.sessions.play(session, member, track).await?;
                Ok(reply)
            }
            CommandKind::Skip => {
                self.sessions.queue(session, member).await?.skip();
                Ok("Skipped".to_string())
            }
            CommandKind::Pause => {
                self.sessions.queue(session, member).await?.pause(true);
                Ok("Paused".to_string())
            }
            CommandKind::Unpause => {
                self.sessions.queue(session, member).await?.pause(false);
                Ok("Unpaused".to_string())
            }
            CommandKind::Queue => {
                let Some(queue) = self.sessions.get(session).await else {
                    return Ok("Nothing queued".to_string());
                };
                let current = queue.now_playing();
                let backlog = queue.backlog();
                if current.is_none() && backlog.is_empty() {
                    return Ok("Nothing queued".to_string());
                }

                let mut text = String::new();
                if let Some(track) = current {
                    let _ = writeln!(text, "Now playing: {}", escape_markdown(&track.title));
                }
                for (n, track) in backlog.iter().enumerate() {
                    let _ = writeln!(text, "{}. {}", n + 1, escape_markdown(&track.title));
                }
                Ok(text.trim_end().to_string())
            }
            CommandKind::Leave => {
                let queue = self.sessions.get(session).await.ok_or(SessionError::NotInVoice)?;
                queue.end();
                Ok("Left".to_string())
            }
        }
    }
}

/// Escapes a title for chat clients that render markdown.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            // 零宽空格，避免触发 @ 提及
            '@' => escaped.push_str("@\u{200b}"),
            '`' | '*' | '_' | '~' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}
