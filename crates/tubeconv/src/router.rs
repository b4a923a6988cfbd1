//! Dot-prefixed chat commands.

use std::sync::Arc;
use log::{debug, info, warn};

use crate::config::Limits;
use crate::dispatcher::{Dispatcher, JobHandle};
use crate::error::MediaError;
use crate::job::{JobKind, JobRequest};
use crate::message::InboundMessage;
use crate::transport::{ChatTransport, OutboundContent, ReplyTarget};

/// Commands understood by the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    YtMp3(Option<String>),
    YtMp4(Option<String>),
    ToMp3,
    ToMp4,
}

/// Split command text into a lower-cased keyword and its argument
///
/// Returns `None` unless the text starts with `.`. The argument is the
/// remaining words joined by single spaces.
pub fn split_command(text: &str) -> Option<(String, String)> {
    let text = text.trim();
    if !text.starts_with('.') {
        return None;
    }
    let mut words = text.split_whitespace();
    let keyword = words.next()?.to_lowercase();
    let argument = words.collect::<Vec<_>>().join(" ");
    Some((keyword, argument))
}

/// Parse command text; unknown keywords yield `None`
pub fn parse_command(text: &str) -> Option<Command> {
    let (keyword, argument) = split_command(text)?;
    let argument = (!argument.is_empty()).then_some(argument);
    match keyword.as_str() {
        ".help" | ".menu" => Some(Command::Help),
        ".ytmp3" => Some(Command::YtMp3(argument)),
        ".ytmp4" => Some(Command::YtMp4(argument)),
        ".to_mp3" => Some(Command::ToMp3),
        ".to_mp4" => Some(Command::ToMp4),
        _ => None,
    }
}

pub fn help_text(limits: &Limits) -> String {
    format!(
        "🤖 *Media Converter Bot*\n\n\
         Commands:\n\
         • *.ytmp3 <url>* – Download a video as MP3\n\
         • *.ytmp4 <url>* – Download a video as MP4\n\
         • Reply to a video with *.to_mp3* OR send a video with caption *.to_mp3*\n\
         • Reply to an audio with *.to_mp4* OR send an audio with caption *.to_mp4*\n\n\
         Limits: duration ≤ {:.1} min, size ≤ {} MB.",
        limits.max_duration_secs as f64 / 60.0,
        limits.max_file_mb
    )
}

/// What the router did with a message
#[derive(Debug)]
pub enum Routed {
    /// Not a command for us
    Ignored,
    /// Answered directly, no job admitted
    Replied,
    Queued(JobHandle),
}

/// Turns inbound messages into replies and jobs
pub struct Router {
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn ChatTransport>,
    limits: Limits,
}

impl Router {
    pub fn new(dispatcher: Arc<Dispatcher>, transport: Arc<dyn ChatTransport>, limits: Limits) -> Self {
        Router {
            dispatcher,
            transport,
            limits,
        }
    }

    pub async fn handle(&self, message: &InboundMessage) -> Routed {
        if message.sender_is_self() {
            return Routed::Ignored;
        }
        let text = message.text();
        let Some(command) = parse_command(&text) else {
            if text.starts_with('.') {
                debug!("Ignoring unknown command: {}", text);
            }
            return Routed::Ignored;
        };
        info!("💬 {:?} from {}", command, message.key.chat);

        let reply = ReplyTarget::for_message(message);
        let request = match command {
            Command::Help => {
                self.reply(&reply, help_text(&self.limits)).await;
                return Routed::Replied;
            }
            Command::YtMp3(None) => {
                self.reply(&reply, "Send: *.ytmp3 <video URL>*".to_string()).await;
                return Routed::Replied;
            }
            Command::YtMp4(None) => {
                self.reply(&reply, "Send: *.ytmp4 <video URL>*".to_string()).await;
                return Routed::Replied;
            }
            Command::YtMp3(Some(url)) => JobRequest::remote(JobKind::FetchAudio, url, message),
            Command::YtMp4(Some(url)) => JobRequest::remote(JobKind::FetchVideo, url, message),
            Command::ToMp3 => JobRequest::inbound(JobKind::ConvertToAudio, message),
            Command::ToMp4 => JobRequest::inbound(JobKind::ConvertToVideo, message),
        };

        // Conversions without any media are answered here, before admission
        if !request.kind.is_remote() && message.pick_media().is_none() {
            self.reply_error(&reply, &MediaError::NoMediaFound).await;
            return Routed::Replied;
        }

        match self.dispatcher.submit(request) {
            Ok(handle) => Routed::Queued(handle),
            Err(e) => {
                self.reply_error(&reply, &e).await;
                Routed::Replied
            }
        }
    }

    async fn reply_error(&self, target: &ReplyTarget, error: &MediaError) {
        self.reply(target, format!("❌ Failed: {}", error.user_message())).await;
    }

    async fn reply(&self, target: &ReplyTarget, text: String) {
        if let Err(e) = self.transport.send(target, OutboundContent::Text(text)).await {
            warn!("Failed to reply in {}: {:#}", target.chat, e);
        }
    }
}
