use serde::Serialize;

pub(crate) const OUTDATED_CLIENT: &str = "multiplayer.disconnect.outdated_client";
pub(crate) const OUTDATED_SERVER: &str = "multiplayer.disconnect.outdated_server";
pub(crate) const SERVER_FULL: &str = "multiplayer.disconnect.server_full";
pub(crate) const SERVER_SHUTDOWN: &str = "multiplayer.disconnect.server_shutdown";
pub(crate) const TIMEOUT: &str = "disconnect.timeout";
pub(crate) const CHAT_TEXT: &str = "chat.type.text";
pub(crate) const PLAYER_JOINED: &str = "multiplayer.player.joined";
pub(crate) const PLAYER_LEFT: &str = "multiplayer.player.left";

#[derive(Serialize, Debug, Clone, PartialEq)]
pub(crate) struct TextComponent {
    pub(crate) text: String,
}

/// A translatable chat component: the client looks up `translate` in its language file and
/// substitutes the `with` arguments.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub(crate) struct Translation {
    pub(crate) translate: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) with: Vec<TextComponent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) color: Option<&'static str>,
}

impl Translation {
    pub(crate) fn new(translate: &'static str) -> Self {
        Self {
            translate,
            with: vec![],
            color: None,
        }
    }

    pub(crate) fn with(mut self, text: impl Into<String>) -> Self {
        self.with.push(TextComponent { text: text.into() });
        self
    }

    pub(crate) fn color(mut self, color: &'static str) -> Self {
        self.color = Some(color);
        self
    }

    pub(crate) fn to_json(&self) -> Result<String, String> {
        serde_json::to_string(self).map_err(|e| format!("Could not serialize chat: {e}"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn translation_payload() {
        let json = Translation::new(PLAYER_JOINED)
            .with("Notch")
            .color("yellow")
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            r#"{"translate":"multiplayer.player.joined","with":[{"text":"Notch"}],"color":"yellow"}"#
        );
    }

    #[test]
    fn bare_translation_omits_optional_fields() {
        let json = Translation::new(SERVER_SHUTDOWN).to_json().unwrap();
        assert_eq!(json, r#"{"translate":"multiplayer.disconnect.server_shutdown"}"#);
    }
}
