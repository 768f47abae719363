//! External action verbs performed by output components.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use synapse_events::{Event, Payload};

use crate::error::{ComponentError, ComponentResult};

/// Seconds a subtitle stays visible when the payload does not say.
const DEFAULT_SHOW_SECS: f64 = 3.0;

/// A side effect requested by an output event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum OutputAction {
    /// Display text.
    Show {
        /// Text to show.
        text: String,
        /// Seconds to keep it visible.
        duration: f64,
        /// Renderer specific styling.
        #[serde(default)]
        style: Payload,
    },
    /// Remove whatever is displayed.
    Hide,
    /// Update display state without showing new text.
    Update {
        /// Fields to update.
        data: Payload,
    },
    /// Switch the avatar's expression.
    SetExpression {
        /// Expression name.
        expression: String,
        /// Seconds to hold it.
        duration: f64,
    },
    /// Play an avatar motion.
    PlayMotion {
        /// Motion name.
        motion: String,
    },
    /// Set an avatar model parameter.
    SetParameter {
        /// Parameter name.
        name: String,
        /// Parameter value.
        value: f64,
    },
}

impl OutputAction {
    /// Verb name.
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Show { .. } => "show",
            Self::Hide => "hide",
            Self::Update { .. } => "update",
            Self::SetExpression { .. } => "set_expression",
            Self::PlayMotion { .. } => "play_motion",
            Self::SetParameter { .. } => "set_parameter",
        }
    }

    /// Derive the actions requested by an event from its `action_type`.
    ///
    /// | `action_type` | actions |
    /// |---|---|
    /// | `subtitle` | `Show` (`text`, `duration`, `style`) |
    /// | `hide`, `clear` | `Hide` |
    /// | `update` | `Update` with the payload minus `action_type` |
    /// | `avatar` | `SetExpression` / `PlayMotion` / one `SetParameter` per entry of `parameters` |
    ///
    /// Events without an `action_type` request nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidPayload`] for an unknown action type or
    /// a malformed payload.
    pub fn from_event(event: &Event) -> ComponentResult<Vec<Self>> {
        let Some(action_type) = event.get_str("action_type") else {
            return Ok(Vec::new());
        };
        let payload = event.payload();
        match action_type {
            "subtitle" => {
                let text = event
                    .get_str("text")
                    .ok_or_else(|| invalid("subtitle without text"))?;
                Ok(vec![Self::Show {
                    text: text.to_string(),
                    duration: number(payload, "duration")?.unwrap_or(DEFAULT_SHOW_SECS),
                    style: match payload.get("style") {
                        Some(Value::Object(style)) => style.clone(),
                        _ => Payload::new(),
                    },
                }])
            },
            "hide" | "clear" => Ok(vec![Self::Hide]),
            "update" => {
                let mut data = payload.clone();
                data.remove("action_type");
                Ok(vec![Self::Update { data }])
            },
            "avatar" => avatar_actions(payload),
            other => Err(invalid(&format!("unknown action type '{other}'"))),
        }
    }
}

fn avatar_actions(payload: &Payload) -> ComponentResult<Vec<OutputAction>> {
    let mut actions = Vec::new();
    if let Some(expression) = payload.get("expression").and_then(Value::as_str) {
        actions.push(OutputAction::SetExpression {
            expression: expression.to_string(),
            duration: number(payload, "duration")?.unwrap_or(DEFAULT_SHOW_SECS),
        });
    }
    if let Some(motion) = payload.get("motion").and_then(Value::as_str) {
        actions.push(OutputAction::PlayMotion {
            motion: motion.to_string(),
        });
    }
    match payload.get("parameters") {
        None | Some(Value::Null) => {},
        Some(Value::Object(parameters)) => {
            for (name, value) in parameters {
                let value = value
                    .as_f64()
                    .ok_or_else(|| invalid(&format!("parameter '{name}' is not a number")))?;
                actions.push(OutputAction::SetParameter {
                    name: name.clone(),
                    value,
                });
            }
        },
        Some(_) => return Err(invalid("avatar parameters must be an object")),
    }
    Ok(actions)
}

fn number(payload: &Payload, key: &str) -> ComponentResult<Option<f64>> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid(&format!("'{key}' must be a number"))),
    }
}

fn invalid(message: &str) -> ComponentError {
    ComponentError::InvalidPayload(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use synapse_events::AvatarCue;

    fn event(value: Value) -> Event {
        match value {
            Value::Object(map) => Event::output("test", map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_subtitle_becomes_show() {
        let actions = OutputAction::from_event(&Event::subtitle("chat", "hello", 5.0)).unwrap();
        assert_eq!(
            actions,
            vec![OutputAction::Show {
                text: "hello".into(),
                duration: 5.0,
                style: Payload::new(),
            }]
        );
        assert_eq!(actions[0].verb(), "show");
    }

    #[test]
    fn test_avatar_cue_becomes_verbs() {
        let cue = AvatarCue {
            expression: Some("smile".into()),
            motion: Some("wave".into()),
            parameters: BTreeMap::from([("MouthOpen".to_string(), 0.5)]),
            duration: 2.0,
        };
        let actions = OutputAction::from_event(&Event::avatar("brain", &cue)).unwrap();
        let verbs: Vec<_> = actions.iter().map(OutputAction::verb).collect();
        assert_eq!(verbs, ["set_expression", "play_motion", "set_parameter"]);
        assert!(matches!(
            &actions[0],
            OutputAction::SetExpression { duration, .. } if (*duration - 2.0).abs() < f64::EPSILON
        ));
    }

    #[test]
    fn test_hide_update_and_plain_events() {
        assert_eq!(
            OutputAction::from_event(&event(json!({"action_type": "clear"}))).unwrap(),
            vec![OutputAction::Hide]
        );
        let update = OutputAction::from_event(&event(json!({"action_type": "update", "opacity": 0.5}))).unwrap();
        assert!(matches!(&update[0], OutputAction::Update { data } if data.len() == 1));
        assert!(OutputAction::from_event(&event(json!({"text": "x"}))).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_payloads() {
        for payload in [
            json!({"action_type": "subtitle"}),
            json!({"action_type": "subtitle", "text": "x", "duration": "long"}),
            json!({"action_type": "avatar", "parameters": [1, 2]}),
            json!({"action_type": "teleport"}),
        ] {
            assert!(matches!(
                OutputAction::from_event(&event(payload)),
                Err(ComponentError::InvalidPayload(_))
            ));
        }
    }

    #[test]
    fn test_serialized_form() {
        let value = serde_json::to_value(OutputAction::PlayMotion { motion: "nod".into() }).unwrap();
        assert_eq!(value, json!({"verb": "play_motion", "motion": "nod"}));
    }
}
