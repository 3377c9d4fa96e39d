//! Chat-completions client that turns one row into one question
//!
//! The answer format is fixed when the client is built ([`ResponseMode`]):
//! structured models are asked for a JSON object, free-text models may wrap
//! their answer in a `<think>` block and surrounding prose.

use harvest_core::{Fetch, FetchError, Fetched, HttpClient};
use serde_json::{Value, json};

use crate::config::{LlmConfig, ResponseMode};
use crate::dataset::RowItem;

/// Characters of unparseable output kept in the error message.
const SNIPPET_LEN: usize = 160;

/// Sampling parameters actually sent to the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    /// Extended-thinking budget for models that take one.
    pub thinking_budget: Option<u32>,
}

impl Sampling {
    /// Reasoning models ignore the configured temperature.
    pub fn for_config(config: &LlmConfig) -> Self {
        if !config.is_reasoning {
            return Self {
                temperature: config.temperature,
                thinking_budget: None,
            };
        }
        if config.model.contains("claude-3-7") {
            Self {
                temperature: 1.0,
                thinking_budget: Some(config.max_completion_tokens.saturating_sub(64)),
            }
        } else {
            Self {
                temperature: 0.6,
                thinking_budget: None,
            }
        }
    }
}

/// Replace `{text}` in the template.
pub fn render_prompt(template: &str, text: &str) -> String {
    template.replace("{text}", text)
}

/// Split `<think>...</think> answer` into reasoning and answer.
pub fn split_reasoning(raw: &str) -> (Option<String>, &str) {
    let Some(open) = raw.find("<think>") else {
        return (None, raw.trim());
    };
    let body = &raw[open + "<think>".len()..];
    match body.find("</think>") {
        Some(close) => (
            Some(body[..close].trim().to_string()),
            body[close + "</think>".len()..].trim(),
        ),
        None => (None, raw.trim()),
    }
}

fn question_of(value: &Value) -> Option<String> {
    value.get("question")?.as_str().map(str::to_string)
}

/// Read `{"question": ...}` from model output.
///
/// Tries the whole text first, then the span from the first `{` to the last
/// `}` to get past surrounding prose or code fences.
pub fn parse_question(text: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return question_of(&value);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end])
        .ok()
        .as_ref()
        .and_then(question_of)
}

/// The parts of a chat-completions response we keep.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub content: String,
    /// Reasoning returned beside the content by some servers.
    pub reasoning: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Reply {
    pub fn from_response(resp: &Value) -> Result<Self, FetchError> {
        let message = resp
            .pointer("/choices/0/message")
            .ok_or_else(|| FetchError::Permanent("response has no choices".into()))?;
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| FetchError::Permanent("response message has no content".into()))?;
        let reasoning = message
            .get("reasoning_content")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        let usage = |name: &str| {
            resp.pointer(&format!("/usage/{name}"))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        Ok(Self {
            content: content.to_string(),
            reasoning,
            input_tokens: usage("prompt_tokens"),
            output_tokens: usage("completion_tokens"),
        })
    }

    /// Payload for the log, or a permanent failure when no question can be read.
    pub fn into_fetched(self, mode: ResponseMode) -> Result<Fetched, FetchError> {
        let (reasoning, question) = match mode {
            ResponseMode::Structured => (self.reasoning.clone(), parse_question(&self.content)),
            ResponseMode::FreeText => {
                let (think, answer) = split_reasoning(&self.content);
                (think.or_else(|| self.reasoning.clone()), parse_question(answer))
            }
        };
        let Some(question) = question else {
            let snippet: String = self.content.chars().take(SNIPPET_LEN).collect();
            return Err(FetchError::Permanent(format!(
                "unparseable model output: {snippet:?}"
            )));
        };
        Ok(Fetched::new(json!({
            "question": question,
            "raw_response": self.content,
            "reasoning": reasoning,
        }))
        .with_tokens(self.input_tokens, self.output_tokens))
    }
}

fn response_format() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "query_generation",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "question": {
                        "type": ["string", "null"],
                        "description": "A question generated from a paragraph."
                    }
                },
                "required": ["question"],
                "additionalProperties": false
            }
        }
    })
}

/// One model client. Build one per worker.
pub struct StructuredLlm {
    http: HttpClient,
    url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    sampling: Sampling,
    mode: ResponseMode,
    prompt_template: String,
    text_column: String,
}

impl StructuredLlm {
    pub fn new(
        config: &LlmConfig,
        prompt_template: &str,
        text_column: &str,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpClient::new(&config.http)?,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_completion_tokens,
            sampling: Sampling::for_config(config),
            mode: config.response_mode,
            prompt_template: prompt_template.to_string(),
            text_column: text_column.to_string(),
        })
    }

    pub fn request_body(&self, prompt: &str) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.max_tokens,
            "temperature": self.sampling.temperature,
        });
        if let Some(budget) = self.sampling.thinking_budget {
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
        }
        if self.mode == ResponseMode::Structured {
            body["response_format"] = response_format();
        }
        body
    }
}

impl Fetch for StructuredLlm {
    type Item = RowItem;

    fn fetch(&mut self, row: &RowItem) -> Result<Fetched, FetchError> {
        let prompt = render_prompt(&self.prompt_template, &row.text(&self.text_column));
        let headers: Vec<(&str, String)> = self
            .api_key
            .iter()
            .map(|key| ("authorization", format!("Bearer {key}")))
            .collect();
        let (resp, _) = self
            .http
            .post_json(&self.url, &headers, &self.request_body(&prompt))?;
        Reply::from_response(&resp)?.into_fetched(self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(model: &str, is_reasoning: bool) -> LlmConfig {
        LlmConfig {
            model: model.to_string(),
            temperature: 0.2,
            is_reasoning,
            ..Default::default()
        }
    }

    #[test]
    fn sampling_rules() {
        assert_eq!(Sampling::for_config(&config("gpt-4o-mini", false)).temperature, 0.2);
        let claude = Sampling::for_config(&config("us.anthropic.claude-3-7-sonnet", true));
        assert_eq!(claude.temperature, 1.0);
        assert_eq!(claude.thinking_budget, Some(960));
        let r1 = Sampling::for_config(&config("deepseek-r1", true));
        assert_eq!(r1.temperature, 0.6);
        assert_eq!(r1.thinking_budget, None);
    }

    #[test]
    fn think_block_is_split_off() {
        let (reasoning, answer) = split_reasoning("<think>\n hmm \n</think>\n{\"question\": \"Why?\"}");
        assert_eq!(reasoning.as_deref(), Some("hmm"));
        assert_eq!(answer, "{\"question\": \"Why?\"}");

        let (reasoning, answer) = split_reasoning("  plain  ");
        assert!(reasoning.is_none());
        assert_eq!(answer, "plain");
    }

    #[test]
    fn question_from_prose() {
        assert_eq!(parse_question("{\"question\": \"A?\"}").as_deref(), Some("A?"));
        assert_eq!(
            parse_question("Sure!\n```json\n{\"question\": \"B?\"}\n```").as_deref(),
            Some("B?")
        );
        assert_eq!(parse_question("no json here"), None);
        assert_eq!(parse_question("{\"question\": null}"), None);
        assert_eq!(parse_question("} {"), None);
    }

    #[test]
    fn reply_from_response() {
        let resp = json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"question\": \"Q?\"}"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 5}
        });
        let fetched = Reply::from_response(&resp)
            .unwrap()
            .into_fetched(ResponseMode::Structured)
            .unwrap();
        assert_eq!(fetched.payload["question"], "Q?");
        assert_eq!(fetched.input_tokens, Some(12));
        assert_eq!(fetched.output_tokens, Some(5));
    }

    #[test]
    fn free_text_reply_keeps_reasoning() {
        let reply = Reply {
            content: "<think>short</think> Here: {\"question\": \"Q?\"}".into(),
            reasoning: None,
            input_tokens: 1,
            output_tokens: 1,
        };
        let fetched = reply.into_fetched(ResponseMode::FreeText).unwrap();
        assert_eq!(fetched.payload["reasoning"], "short");
        assert_eq!(fetched.payload["question"], "Q?");
    }

    #[test]
    fn unparseable_reply_is_permanent() {
        let reply = Reply {
            content: "I cannot help with that.".into(),
            reasoning: None,
            input_tokens: 0,
            output_tokens: 0,
        };
        let err = reply.into_fetched(ResponseMode::Structured).unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.message().contains("I cannot help"));
    }

    #[test]
    fn missing_choices_is_permanent() {
        let err = Reply::from_response(&json!({"error": "x"})).unwrap_err();
        assert!(matches!(err, FetchError::Permanent(_)));
    }

    #[test]
    fn request_body_by_mode() {
        let mut cfg = config("us.anthropic.claude-3-7-sonnet", true);
        let llm = StructuredLlm::new(&cfg, "Q: {text}", "text").unwrap();
        let body = llm.request_body("Q: hi");
        assert_eq!(body["thinking"]["budget_tokens"], 960);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["messages"][0]["content"], "Q: hi");

        cfg.response_mode = ResponseMode::FreeText;
        cfg.is_reasoning = false;
        let body = StructuredLlm::new(&cfg, "{text}", "text").unwrap().request_body("x");
        assert!(body.get("response_format").is_none());
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn prompt_placeholder() {
        assert_eq!(render_prompt("Read: {text}\nAsk.", "abc"), "Read: abc\nAsk.");
    }
}
