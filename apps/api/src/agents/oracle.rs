// Reasoning oracle boundary
//
// The oracle is an external text-completion service. Every call site sends
// a rendered prompt and expects the reply to carry a JSON document,
// optionally fenced in a markdown code block.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::errors::{AgentError, AgentResult};

/// Text-completion service used for planning and recovery decisions
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    async fn complete(&self, prompt: &str, max_output: u32) -> AgentResult<String>;
}

/// Strip a surrounding ```` ```json ```` or ```` ``` ```` fence, if any
pub fn strip_fences(response: &str) -> &str {
    let (start, marker_len) = if let Some(pos) = response.find("```json") {
        (pos, "```json".len())
    } else if let Some(pos) = response.find("```") {
        (pos, "```".len())
    } else {
        return response.trim();
    };

    let body_start = start + marker_len;
    let rest = &response[body_start..];
    let body = match rest.find("```") {
        Some(end) => &rest[..end],
        None => rest,
    };
    body.trim()
}

/// Extract and parse the JSON document embedded in an oracle reply
///
/// # Example
/// ```
/// use crewline_api::agents::oracle::extract_json;
///
/// let value = extract_json("goal", "Sure!\n```json\n{\"ok\": true}\n```").unwrap();
/// assert_eq!(value["ok"], true);
/// ```
pub fn extract_json(context: &str, response: &str) -> AgentResult<serde_json::Value> {
    let body = strip_fences(response);
    serde_json::from_str(body).map_err(|e| {
        tracing::warn!(
            context,
            error = %e,
            preview = %body.chars().take(200).collect::<String>(),
            "Oracle reply is not valid JSON"
        );
        AgentError::malformed(context, e.to_string())
    })
}

/// Extract the embedded JSON and deserialize it into `T`
pub fn extract_typed<T: DeserializeOwned>(context: &str, response: &str) -> AgentResult<T> {
    let value = extract_json(context, response)?;
    serde_json::from_value(value).map_err(|e| AgentError::malformed(context, e.to_string()))
}

/// Ask the oracle and parse its reply as `T`
pub async fn ask_typed<T: DeserializeOwned>(
    oracle: &dyn ReasoningOracle,
    context: &str,
    prompt: &str,
    max_output: u32,
) -> AgentResult<T> {
    let reply = oracle.complete(prompt, max_output).await?;
    extract_typed(context, &reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Choice {
        strategy: String,
    }

    #[test]
    fn plain_json_is_parsed() {
        let value = extract_json("t", "  {\"a\": 1}  ").unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn json_fence_is_stripped() {
        let reply = "Here you go:\n```json\n[1, 2, 3]\n```\nAnything else?";
        let value = extract_json("t", reply).unwrap();
        assert_eq!(value, serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn bare_fence_is_stripped() {
        let reply = "```\n{\"severity\": \"high\"}\n```";
        assert_eq!(strip_fences(reply), "{\"severity\": \"high\"}");
    }

    #[test]
    fn unterminated_fence_uses_remainder() {
        assert_eq!(strip_fences("```json\n{\"a\": 2}"), "{\"a\": 2}");
    }

    #[test]
    fn invalid_json_is_malformed_response() {
        let err = extract_json("severity", "HIGH").unwrap_err();
        assert!(matches!(
            err,
            AgentError::MalformedResponse { ref context, .. } if context == "severity"
        ));
    }

    #[test]
    fn schema_mismatch_is_malformed_response() {
        let err = extract_typed::<Choice>("strategy", "{\"other\": 1}").unwrap_err();
        assert!(matches!(err, AgentError::MalformedResponse { .. }));

        let ok: Choice = extract_typed("strategy", "{\"strategy\": \"retry\"}").unwrap();
        assert_eq!(ok.strategy, "retry");
    }
}
