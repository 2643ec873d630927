//! Wire types for the Generative Language `generateContent` endpoint.

use crate::backend::{ContentPart, GenerationReply, GenerationRequest};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

/// Harm categories switched to `BLOCK_NONE` when permissive safety is on.
pub const HARM_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_CIVIC_INTEGRITY",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub safety_settings: Vec<SafetySetting>,
}

impl From<&GenerationRequest> for GenerateContentRequest {
    fn from(req: &GenerationRequest) -> Self {
        // Prompt first, then the content it refers to.
        let mut parts = Vec::with_capacity(req.content.len() + 1);
        parts.push(Part::text(req.prompt.clone()));
        parts.extend(req.content.iter().map(Part::from));

        let generation_config = if req.temperature.is_some() || req.max_output_tokens.is_some() {
            Some(GenerationConfig {
                temperature: req.temperature,
                max_output_tokens: req.max_output_tokens,
            })
        } else {
            None
        };

        let safety_settings = if req.permissive_safety {
            HARM_CATEGORIES
                .iter()
                .map(|c| SafetySetting {
                    category: c.to_string(),
                    threshold: "BLOCK_NONE".to_string(),
                })
                .collect()
        } else {
            Vec::new()
        };

        Self {
            system_instruction: req.system_instruction.as_ref().map(|s| Content {
                role: None,
                parts: vec![Part::text(s.clone())],
            }),
            contents: vec![Content {
                role: Some("user".into()),
                parts,
            }],
            generation_config,
            safety_settings,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
    /// Set on reasoning parts, which are not part of the answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Self::default()
        }
    }
}

impl From<&ContentPart> for Part {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::FileUri { media_type, uri } => Part {
                file_data: Some(FileData {
                    mime_type: media_type.clone(),
                    file_uri: uri.clone(),
                }),
                ..Part::default()
            },
            ContentPart::Inline { media_type, data } => Part {
                inline_data: Some(InlineData {
                    mime_type: media_type.clone(),
                    data: BASE64.encode(data),
                }),
                ..Part::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InlineData {
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

// ── Response ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    pub content: Option<Content>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptFeedback {
    pub block_reason: Option<String>,
}

impl From<GenerateContentResponse> for GenerationReply {
    fn from(resp: GenerateContentResponse) -> Self {
        let candidate_count = resp.candidates.len();
        let first = resp.candidates.into_iter().next();
        let finish_reason = first.as_ref().and_then(|c| c.finish_reason.clone());
        let text = first.and_then(|c| c.content).and_then(|content| {
            let chunks: Vec<String> = content
                .parts
                .into_iter()
                .filter(|p| p.thought != Some(true))
                .filter_map(|p| p.text)
                .collect();
            if chunks.is_empty() {
                None
            } else {
                Some(chunks.concat())
            }
        });

        GenerationReply {
            text,
            finish_reason,
            block_reason: resp.prompt_feedback.and_then(|f| f.block_reason),
            candidate_count,
        }
    }
}

/// `{"error": {"code": …, "message": …, "status": …}}`
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorDetail {
    pub message: Option<String>,
    pub status: Option<String>,
}

impl ApiErrorResponse {
    /// Best human-readable message in an error body, falling back to the
    /// raw body.
    pub fn message_from_body(body: &str) -> String {
        serde_json::from_str::<ApiErrorResponse>(body)
            .ok()
            .and_then(|r| r.error)
            .and_then(|e| e.message.or(e.status))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    "empty error body".to_string()
                } else {
                    trimmed.chars().take(500).collect()
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn request_serializes_prompt_then_content() {
        let req = GenerationRequest {
            system_instruction: Some("sys".into()),
            prompt: "transcribe".into(),
            content: vec![
                ContentPart::FileUri {
                    media_type: "application/pdf".into(),
                    uri: "https://files/abc".into(),
                },
                ContentPart::Inline {
                    media_type: "image/png".into(),
                    data: Arc::from(&b"hi"[..]),
                },
            ],
            permissive_safety: true,
            temperature: Some(0.1),
            max_output_tokens: None,
        };

        let value = serde_json::to_value(GenerateContentRequest::from(&req)).unwrap();

        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "sys");
        let parts = &value["contents"][0]["parts"];
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(parts[0]["text"], "transcribe");
        assert_eq!(parts[1]["fileData"]["fileUri"], "https://files/abc");
        assert_eq!(parts[1]["fileData"]["mimeType"], "application/pdf");
        assert_eq!(parts[2]["inlineData"]["data"], "aGk=");
        assert!(value["generationConfig"]["maxOutputTokens"].is_null());
        assert_eq!(value["safetySettings"].as_array().unwrap().len(), 5);
        assert_eq!(value["safetySettings"][0]["threshold"], "BLOCK_NONE");
    }

    #[test]
    fn strict_safety_sends_no_settings() {
        let value = serde_json::to_value(GenerateContentRequest::from(&GenerationRequest::text("t"))).unwrap();
        assert!(value.get("safetySettings").is_none());
        assert!(value.get("generationConfig").is_none());
        assert!(value.get("systemInstruction").is_none());
    }

    #[test]
    fn response_text_skips_thoughts() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking…", "thought": true},
                    {"text": "Line 1\n"},
                    {"text": "Line 2"}
                ]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();

        let reply = GenerationReply::from(resp);
        assert_eq!(reply.text.as_deref(), Some("Line 1\nLine 2"));
        assert_eq!(reply.candidate_count, 1);
        assert_eq!(reply.into_text().unwrap(), "Line 1\nLine 2");
    }

    #[test]
    fn prompt_block_is_carried_over() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "PROHIBITED_CONTENT"}
        }))
        .unwrap();
        let err = GenerationReply::from(resp).into_text().unwrap_err();
        assert_eq!(err.message, "Response was blocked due to PROHIBITED_CONTENT");
    }

    #[test]
    fn recitation_finish_without_content_is_blocked() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"finishReason": "RECITATION"}]
        }))
        .unwrap();
        let err = GenerationReply::from(resp).into_text().unwrap_err();
        assert!(err.message.contains("RECITATION"));
    }

    #[test]
    fn api_error_message_is_extracted() {
        let body = r#"{"error":{"code":503,"message":"The model is overloaded. Please try again later.","status":"UNAVAILABLE"}}"#;
        assert_eq!(
            ApiErrorResponse::message_from_body(body),
            "The model is overloaded. Please try again later."
        );
        assert_eq!(ApiErrorResponse::message_from_body("<html>bad gateway</html>"), "<html>bad gateway</html>");
        assert_eq!(ApiErrorResponse::message_from_body(""), "empty error body");
    }
}
