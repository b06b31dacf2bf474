//! Generative-AI event source backed by the Gemini `generateContent` API.
//! The model is asked for a JSON array of candidates; decoding failures are
//! errors, never an empty batch.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ingest::types::{EventSource, RawCandidate};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Thin HTTP client shared by the event source and the chat assistant.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateReq<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<Value>,
}

#[derive(Deserialize)]
struct GenerateResp {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<RespContent>,
}

#[derive(Deserialize)]
struct RespContent {
    #[serde(default)]
    parts: Vec<RespPart>,
}

#[derive(Deserialize)]
struct RespPart {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: Option<&str>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("event-sync/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            base_url: API_BASE.to_string(),
        })
    }

    /// Point the client at another endpoint (local stub servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One generateContent call; returns the text of the first candidate.
    pub async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        generation_config: Option<Value>,
    ) -> Result<String> {
        if self.api_key.is_empty() {
            bail!("GEMINI_API_KEY is not set");
        }
        let req = GenerateReq {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            system_instruction: system.map(|s| Content {
                parts: vec![Part { text: s }],
            }),
            generation_config,
        };
        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        let resp = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&req)
            .send()
            .await
            .context("gemini request")?
            .error_for_status()
            .context("gemini non-2xx")?;
        let body: GenerateResp = resp.json().await.context("gemini response body")?;
        let text = body
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(anyhow!("gemini returned no text"));
        }
        Ok(text)
    }
}

fn candidate_schema() -> Value {
    let s = json!({ "type": "STRING" });
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "title": s, "dateTime": s, "venueName": s, "venueAddress": s,
                "city": s, "description": s, "category": s, "imageUrl": s,
                "sourceName": s, "originalUrl": s
            },
            "required": ["title", "dateTime", "venueName", "city", "description", "originalUrl"]
        }
    })
}

fn candidates_prompt(city: &str) -> String {
    format!(
        "List 5 real, upcoming events in {city}, Australia. Return them as a JSON array. \
         Include fields: title, dateTime (ISO format), venueName, venueAddress, city, \
         description, category, imageUrl (use https://picsum.photos/seed/[random]/800/600), \
         sourceName, originalUrl."
    )
}

/// Decode the model's JSON text. Tolerates a fenced code block around it.
pub fn parse_candidates(text: &str) -> Result<Vec<RawCandidate>> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body).with_context(|| {
        let preview: String = body.chars().take(120).collect();
        format!("decoding candidates JSON, body starts: {preview}")
    })
}

pub struct GeminiSource {
    client: GeminiClient,
}

impl GeminiSource {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventSource for GeminiSource {
    async fn fetch_candidates(&self, city: &str) -> Result<Vec<RawCandidate>> {
        let config = json!({
            "responseMimeType": "application/json",
            "responseSchema": candidate_schema(),
        });
        let text = self
            .client
            .generate(&candidates_prompt(city), None, Some(config))
            .await?;
        parse_candidates(&text)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
