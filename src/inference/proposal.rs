//! Command proposals decoded from model replies

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::EXCERPT_CHARS;
use crate::{Error, Result};

/// Substrings that would turn one invocation into several
pub const SHELL_CHAIN_TOKENS: [&str; 7] = ["&&", "||", ";", "|", "`", "$(", "\n"];

/// Asked when the model wants clarification but gave no question
const DEFAULT_CLARIFICATION: &str = "Could you say more about what you want to do?";

/// Structured result of one inference
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandProposal {
    /// Single git invocation, e.g. `git diff`
    pub command: String,
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tags: Option<Vec<String>>,
    pub needs_clarification: bool,
    /// Present exactly when `needs_clarification` is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification_question: Option<String>,
}

impl CommandProposal {
    /// Validate a decoded reply
    ///
    /// Field names are accepted in snake_case or camelCase.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if `command` is not a string, `needsClarification`
    /// is not a boolean, or a runnable command chains several invocations
    pub fn from_value(value: &Value) -> Result<Self> {
        let Some(obj) = value.as_object() else {
            return Err(Error::Validation(format!(
                "expected a JSON object, got {}",
                excerpt(value)
            )));
        };

        let Some(command) = field(obj, "command", "command").and_then(Value::as_str) else {
            return Err(Error::Validation(format!(
                "missing or invalid 'command' field. Got: {}",
                excerpt(value)
            )));
        };

        let Some(needs_clarification) =
            field(obj, "needs_clarification", "needsClarification").and_then(Value::as_bool)
        else {
            return Err(Error::Validation(format!(
                "missing or invalid 'needs_clarification' field. Got: {}",
                excerpt(value)
            )));
        };

        let explanation = field(obj, "explanation", "explanation")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let reasoning_tags = field(obj, "reasoning_tags", "reasoningTags")
            .and_then(Value::as_array)
            .and_then(|tags| {
                tags.iter()
                    .map(|t| t.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
            });

        let question = field(obj, "clarification_question", "clarificationQuestion")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string);

        let command = command.trim().to_string();
        let clarification_question = if needs_clarification {
            Some(question.unwrap_or_else(|| DEFAULT_CLARIFICATION.to_string()))
        } else {
            if command.is_empty() {
                return Err(Error::Validation("empty 'command' field".to_string()));
            }
            if let Some(token) = SHELL_CHAIN_TOKENS.iter().find(|t| command.contains(*t)) {
                return Err(Error::Validation(format!(
                    "command must be a single invocation, found {token:?} in {command:?}"
                )));
            }
            None
        };

        Ok(Self {
            command,
            explanation,
            reasoning_tags,
            needs_clarification,
            clarification_question,
        })
    }
}

fn field<'a>(obj: &'a Map<String, Value>, snake: &str, camel: &str) -> Option<&'a Value> {
    obj.get(snake).or_else(|| obj.get(camel))
}

fn excerpt(value: &Value) -> String {
    value.to_string().chars().take(EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_camel_and_snake_case() {
        let camel = CommandProposal::from_value(&json!({
            "command": "git status",
            "needsClarification": false,
            "reasoningTags": ["read-only"]
        }))
        .unwrap();
        let snake = CommandProposal::from_value(&json!({
            "command": "git status",
            "needs_clarification": false,
            "reasoning_tags": ["read-only"]
        }))
        .unwrap();
        assert_eq!(camel, snake);
        assert_eq!(camel.reasoning_tags, Some(vec!["read-only".to_string()]));
        assert_eq!(camel.explanation, "");
    }

    #[test]
    fn missing_command_is_validation_error() {
        let err = CommandProposal::from_value(&json!({"needsClarification": false})).unwrap_err();
        assert!(matches!(err, Error::Validation(m) if m.contains("'command'")));
    }

    #[test]
    fn mistyped_flag_is_validation_error() {
        let err = CommandProposal::from_value(&json!({
            "command": "git status",
            "needsClarification": "no"
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Validation(m) if m.contains("needs_clarification")));
    }

    #[test]
    fn non_object_is_validation_error() {
        assert!(matches!(
            CommandProposal::from_value(&json!("git status")),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn mixed_tags_are_dropped() {
        let p = CommandProposal::from_value(&json!({
            "command": "git log",
            "needsClarification": false,
            "reasoningTags": ["history", 3]
        }))
        .unwrap();
        assert_eq!(p.reasoning_tags, None);
    }

    #[test]
    fn question_only_with_clarification() {
        let runnable = CommandProposal::from_value(&json!({
            "command": "git log",
            "needsClarification": false,
            "clarificationQuestion": "which branch?"
        }))
        .unwrap();
        assert_eq!(runnable.clarification_question, None);

        let unclear = CommandProposal::from_value(&json!({
            "command": "",
            "needsClarification": true,
            "clarificationQuestion": 42
        }))
        .unwrap();
        assert_eq!(
            unclear.clarification_question.as_deref(),
            Some(DEFAULT_CLARIFICATION)
        );
    }

    #[test]
    fn rejects_shell_chains() {
        for command in [
            "git add . && git commit",
            "git status; rm -rf /",
            "git log | head",
            "git checkout $(whoami)",
        ] {
            let err = CommandProposal::from_value(&json!({
                "command": command,
                "needsClarification": false
            }))
            .unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{command}");
        }
    }

    #[test]
    fn serializes_camel_case() {
        let p = CommandProposal::from_value(&json!({
            "command": "git diff",
            "needs_clarification": false
        }))
        .unwrap();
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["needsClarification"], false);
        assert!(v.get("reasoningTags").is_none());
    }
}
