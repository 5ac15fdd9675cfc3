use presence_core::{Embed, PresenceError, WebhookClient, WebhookMessage};

#[derive(Debug, Default, Clone)]
pub struct WebhookArgs {
    pub url: Option<String>,
    pub content: Option<String>,
    pub username: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub color: Option<u32>,
}

/// Accepts `#RRGGBB`, `0xRRGGBB`, or a decimal value up to `0xFFFFFF`.
pub fn parse_color(raw: &str) -> Result<u32, String> {
    let raw = raw.trim();
    let parsed = if let Some(hex) = raw.strip_prefix('#').or_else(|| raw.strip_prefix("0x")) {
        u32::from_str_radix(hex, 16)
    } else {
        raw.parse::<u32>()
    };
    match parsed {
        Ok(color) if color <= 0xFF_FFFF => Ok(color),
        Ok(_) => Err(format!("color {} is wider than 24 bits", raw)),
        Err(_) => Err(format!("invalid color: {}", raw)),
    }
}

pub fn build_message(args: &WebhookArgs) -> WebhookMessage {
    let mut message = WebhookMessage::new();
    if let Some(content) = &args.content {
        message = message.content(content.clone());
    }
    if let Some(username) = &args.username {
        message = message.username(username.clone());
    }

    if args.title.is_some() || args.description.is_some() {
        let mut embed = Embed::new().timestamp_now();
        if let Some(title) = &args.title {
            embed = embed.title(title.clone());
        }
        if let Some(description) = &args.description {
            embed = embed.description(description.clone());
        }
        if let Some(color) = args.color {
            embed = embed.color(color);
        }
        message = message.embed(embed);
    }
    message
}

/// `fallback_url` comes from configuration and is used when `--url` is absent.
pub fn run(args: &WebhookArgs, fallback_url: Option<String>) -> Result<(), PresenceError> {
    let url = args
        .url
        .clone()
        .or(fallback_url)
        .ok_or(PresenceError::ConfigurationMissing("webhook_url"))?;
    let message = build_message(args);
    message.validate()?;
    WebhookClient::new(url)?.send(&message)?;
    tracing::info!("Webhook message sent");
    Ok(())
}
