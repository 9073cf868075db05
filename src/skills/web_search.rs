//! Web search skill — queries the Tavily REST API.
//!
//! The api key never reaches the model: it is fetched from the secret
//! broker inside `execute`, so it appears in neither prompt text nor trace
//! output.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::Result;
use crate::policy::RiskLevel;
use crate::secrets;

use super::sanitize::{clip, scrub};
use super::{SearchHit, Skill, SkillContext, SkillMetadata, SkillResult, require_str};

const TAVILY_URL: &str = "https://api.tavily.com/search";
const MAX_RESULTS: usize = 5;
const MAX_QUERY_CHARS: usize = 500;
const SNIPPET_MAX_CHARS: usize = 1000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebSearchSkill {
    meta: SkillMetadata,
}

impl WebSearchSkill {
    pub fn new() -> Self {
        Self {
            meta: SkillMetadata {
                name: "web_search",
                description: "Search the web for real-time information. Call this tool when \
                              asked about: current events, breaking news, sports scores or \
                              results, stock prices, weather, recently released software or \
                              products, or any fact that may have changed since your training \
                              data was collected. Do not answer from training data for these \
                              topics — search instead.",
                risk_level: RiskLevel::Low,
                rate_limit: "web_search",
                requires_approval: false,
                max_calls_per_turn: 3,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The web search query.",
                        }
                    },
                    "required": ["query"],
                }),
            },
        }
    }
}

impl Default for WebSearchSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for WebSearchSkill {
    fn metadata(&self) -> &SkillMetadata {
        &self.meta
    }

    fn validate(&self, params: &Value) -> std::result::Result<(), String> {
        let query = require_str(params, "query")?;
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(format!(
                "Parameter 'query' must be under {MAX_QUERY_CHARS} characters"
            ));
        }
        Ok(())
    }

    async fn execute(&self, params: Value, ctx: &SkillContext) -> Result<SkillResult> {
        let query = params.get("query").and_then(|v| v.as_str()).unwrap_or("");
        let api_key = match secrets::get("TAVILY_API_KEY") {
            Ok(key) => key,
            Err(e) => return Ok(SkillResult::Error(e.to_string())),
        };

        let response = ctx
            .http
            .post(TAVILY_URL)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({
                "api_key": api_key,
                "query": query,
                "search_depth": "basic",
                "max_results": MAX_RESULTS,
            }))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Ok(SkillResult::Error("Web search timed out.".into()));
            }
            Err(e) => {
                return Ok(SkillResult::Error(format!("Web search request failed: {e}")));
            }
        };
        if !response.status().is_success() {
            return Ok(SkillResult::Error(format!(
                "Web search request failed: HTTP {}",
                response.status()
            )));
        }

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return Ok(SkillResult::Error(format!("Web search error: {e}"))),
        };
        let hits = body["results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .take(MAX_RESULTS)
                    .map(|item| SearchHit {
                        title: item["title"].as_str().unwrap_or("").trim().to_string(),
                        content: item["content"].as_str().unwrap_or("").trim().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(SkillResult::SearchHits(hits))
    }

    fn sanitize(&self, result: SkillResult) -> Result<String> {
        match result {
            SkillResult::Error(msg) => Ok(format!("Web search unavailable: {msg}")),
            SkillResult::SearchHits(hits) => {
                if hits.is_empty() {
                    return Ok("No search results found.".to_string());
                }
                let mut snippets = Vec::new();
                for hit in hits {
                    let title = scrub(&hit.title).trim().to_string();
                    let content = scrub(&hit.content).trim().to_string();
                    let snippet = if title.is_empty() {
                        content
                    } else {
                        format!("**{title}**\n{content}")
                    };
                    // Cap each result individually so one long page cannot
                    // crowd out the rest.
                    let (mut snippet, clipped) = clip(&snippet, SNIPPET_MAX_CHARS);
                    if clipped {
                        snippet.push_str(" [truncated]");
                    }
                    if !snippet.trim().is_empty() {
                        snippets.push(snippet);
                    }
                }
                if snippets.is_empty() {
                    return Ok("No usable search results found.".to_string());
                }
                Ok(snippets.join("\n\n---\n\n"))
            }
            other => Ok(other.fallback_text()),
        }
    }
}
