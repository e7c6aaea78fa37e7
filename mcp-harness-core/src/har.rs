//! HAR 1.2 export of captured network logs.

use crate::capture::artifacts::{write_json, RunLayout};
use crate::error::Result;
use crate::model::{Headers, NetworkLog};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Har {
    pub log: HarLog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarLog {
    pub version: String,
    pub creator: HarCreator,
    pub entries: Vec<HarEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarCreator {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    pub started_date_time: String,
    /// Total elapsed time in milliseconds.
    pub time: f64,
    pub request: HarRequest,
    pub response: HarResponse,
    pub cache: serde_json::Map<String, serde_json::Value>,
    pub timings: HarTimings,
    #[serde(rename = "_error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarNameValue {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    pub http_version: String,
    pub cookies: Vec<HarNameValue>,
    pub headers: Vec<HarNameValue>,
    pub query_string: Vec<HarNameValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<HarPostData>,
    pub headers_size: i64,
    pub body_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPostData {
    pub mime_type: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: u16,
    pub status_text: String,
    pub http_version: String,
    pub cookies: Vec<HarNameValue>,
    pub headers: Vec<HarNameValue>,
    pub content: HarContent,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    pub headers_size: i64,
    pub body_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    pub size: i64,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HarTimings {
    pub blocked: f64,
    pub dns: f64,
    pub connect: f64,
    pub ssl: f64,
    pub send: f64,
    pub wait: f64,
    pub receive: f64,
}

fn name_values(headers: &Headers) -> Vec<HarNameValue> {
    headers
        .iter()
        .map(|(name, value)| HarNameValue {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}

fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn query_string(raw: &str) -> Vec<HarNameValue> {
    url::Url::parse(raw)
        .map(|parsed| {
            parsed
                .query_pairs()
                .map(|(name, value)| HarNameValue {
                    name: name.into_owned(),
                    value: value.into_owned(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn body_text(body: &serde_json::Value) -> Option<String> {
    match body {
        serde_json::Value::Null => None,
        serde_json::Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn entry(log: &NetworkLog) -> HarEntry {
    let request = &log.request;
    let post_data = request.body.as_ref().and_then(body_text).map(|text| HarPostData {
        mime_type: header(&request.headers, "content-type")
            .unwrap_or("")
            .to_string(),
        text,
    });
    let request_body_size = post_data.as_ref().map(|p| p.text.len() as i64).unwrap_or(0);

    let (response, timings) = match &log.response {
        Some(response) => {
            let text = response.body.as_ref().and_then(body_text);
            let size = text.as_ref().map(|t| t.len() as i64).unwrap_or(-1);
            let timing = response.timing;
            (
                HarResponse {
                    status: response.status,
                    status_text: response.status_text.clone(),
                    http_version: "HTTP/1.1".to_string(),
                    cookies: Vec::new(),
                    headers: name_values(&response.headers),
                    content: HarContent {
                        size,
                        mime_type: response.mime_type.clone(),
                        text,
                    },
                    redirect_url: header(&response.headers, "location")
                        .unwrap_or("")
                        .to_string(),
                    headers_size: -1,
                    body_size: size,
                },
                HarTimings {
                    blocked: -1.0,
                    dns: timing.dns,
                    connect: timing.connect,
                    ssl: timing.ssl,
                    send: timing.send,
                    wait: timing.wait,
                    receive: timing.receive,
                },
            )
        }
        // Failed before a response arrived.
        None => (
            HarResponse {
                status: 0,
                status_text: String::new(),
                http_version: String::new(),
                cookies: Vec::new(),
                headers: Vec::new(),
                content: HarContent {
                    size: 0,
                    mime_type: String::new(),
                    text: None,
                },
                redirect_url: String::new(),
                headers_size: -1,
                body_size: -1,
            },
            HarTimings {
                blocked: -1.0,
                dns: -1.0,
                connect: -1.0,
                ssl: -1.0,
                send: 0.0,
                wait: 0.0,
                receive: 0.0,
            },
        ),
    };

    let time: f64 = [timings.dns, timings.connect, timings.send, timings.wait, timings.receive]
        .iter()
        .filter(|t| **t > 0.0)
        .sum();

    HarEntry {
        started_date_time: request.timestamp.to_rfc3339(),
        time,
        request: HarRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            http_version: "HTTP/1.1".to_string(),
            cookies: Vec::new(),
            headers: name_values(&request.headers),
            query_string: query_string(&request.url),
            post_data,
            headers_size: -1,
            body_size: request_body_size,
        },
        response,
        cache: serde_json::Map::new(),
        timings,
        error: log.error.clone(),
    }
}

pub fn to_har(logs: &[NetworkLog]) -> Har {
    Har {
        log: HarLog {
            version: "1.2".to_string(),
            creator: HarCreator {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            entries: logs.iter().map(entry).collect(),
        },
    }
}

/// Write `logs/network.har`.
pub async fn save_har(run_dir: &Path, logs: &[NetworkLog]) -> Result<PathBuf> {
    let path = RunLayout::at(run_dir).har_path();
    write_json(&path, &to_har(logs)).await?;
    Ok(path)
}
