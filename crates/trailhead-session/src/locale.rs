//! Localized server text.

use std::collections::HashMap;

/// Template keys the server formats.
pub mod keys {
    /// `{0}` = max players.
    pub const SERVER_FULL: &str = "server_full";
    pub const GAMEJOLT_ONLY: &str = "gamejolt_only";
    /// `{0}` = requested game mode.
    pub const WRONG_GAME_MODE: &str = "wrong_game_mode";
    pub const BANNED: &str = "banned";
    /// `{0}` = player name.
    pub const ALREADY_ONLINE: &str = "already_online";
    pub const PROFILE_UNAVAILABLE: &str = "profile_unavailable";
    /// `{0}` = player name.
    pub const PLAYER_JOINED: &str = "player_joined";
    /// `{0}` = player name.
    pub const PLAYER_LEFT: &str = "player_left";
    /// `{0}` = player name, `{1}` = reason.
    pub const PLAYER_KICKED: &str = "player_kicked";
    /// `{0}` = target name.
    pub const NOT_ONLINE: &str = "not_online";
    pub const SERVER_CLOSING: &str = "server_closing";
    /// `{0}` = server name, `{1}` = message of the day.
    pub const WELCOME: &str = "welcome";
}

/// Formats a template by key. Pure: no side effects, no I/O.
pub trait Localizer: Send + Sync + 'static {
    fn format(&self, key: &str, args: &[&str]) -> String;
}

/// English templates with positional `{0}`, `{1}`… placeholders.
#[derive(Debug, Clone)]
pub struct EnglishLocalizer {
    templates: HashMap<String, String>,
}

impl EnglishLocalizer {
    pub fn new() -> Self {
        let templates = [
            (keys::SERVER_FULL, "The server is full ({0} players)."),
            (keys::GAMEJOLT_ONLY, "This server only accepts GameJolt profiles."),
            (keys::WRONG_GAME_MODE, "This server does not allow the game mode \"{0}\"."),
            (keys::BANNED, "You are banned from this server."),
            (keys::ALREADY_ONLINE, "{0} is already online."),
            (keys::PROFILE_UNAVAILABLE, "Your profile could not be loaded. Try again later."),
            (keys::PLAYER_JOINED, "{0} joined the game."),
            (keys::PLAYER_LEFT, "{0} left the game."),
            (keys::PLAYER_KICKED, "{0} was kicked: {1}"),
            (keys::NOT_ONLINE, "{0} is not online."),
            (keys::SERVER_CLOSING, "The server is shutting down."),
            (keys::WELCOME, "Welcome to {0}! {1}"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { templates }
    }

    /// Overrides or adds a template.
    pub fn with_template(
        mut self,
        key: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        self.templates.insert(key.into(), template.into());
        self
    }
}

impl Default for EnglishLocalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Localizer for EnglishLocalizer {
    fn format(&self, key: &str, args: &[&str]) -> String {
        let Some(template) = self.templates.get(key) else {
            tracing::debug!(key, "missing template");
            return key.to_string();
        };
        fill(template, args)
    }
}

/// Replaces `{n}` with `args[n]`. Placeholders without an argument are
/// left as they are.
fn fill(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let arg = after.find('}').and_then(|close| {
            let index: usize = after[..close].parse().ok()?;
            Some((close, *args.get(index)?))
        });
        match arg {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_fills_positional_args() {
        let l = EnglishLocalizer::new();
        assert_eq!(
            l.format(keys::PLAYER_KICKED, &["Ash", "spam"]),
            "Ash was kicked: spam"
        );
    }

    #[test]
    fn test_format_server_full_mentions_capacity() {
        let l = EnglishLocalizer::new();
        assert_eq!(
            l.format(keys::SERVER_FULL, &["0"]),
            "The server is full (0 players)."
        );
    }

    #[test]
    fn test_format_unknown_key_returns_key() {
        let l = EnglishLocalizer::new();
        assert_eq!(l.format("nope", &[]), "nope");
    }

    #[test]
    fn test_format_missing_arg_keeps_placeholder() {
        let l = EnglishLocalizer::new();
        assert_eq!(l.format(keys::PLAYER_KICKED, &["Ash"]), "Ash was kicked: {1}");
    }

    #[test]
    fn test_with_template_overrides() {
        let l = EnglishLocalizer::new().with_template(keys::BANNED, "Go away, {0}.");
        assert_eq!(l.format(keys::BANNED, &["Gary"]), "Go away, Gary.");
    }

    #[test]
    fn test_fill_handles_literal_braces_and_multibyte() {
        assert_eq!(fill("{x} é {0}", &["ü"]), "{x} é ü");
        assert_eq!(fill("trailing {", &[]), "trailing {");
    }
}
