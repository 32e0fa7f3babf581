//! Blocking HTTP implementation of [`InterviewApi`].
//!
//! One client per timeout class: response uploads carry whole video clips
//! and get the extended timeout, speech synthesis gets a short one so a
//! stalled fetch degrades to a silent auto-advance instead of blocking the
//! interview, and everything else uses the standard request timeout.

use super::{InterviewApi, SessionPayload, UploadAck, UploadRequest};
use crate::config::TransportConfig;
use crate::error::{
    ApiError, EngineError, IntegrityDeliveryError, PlaybackError, SubmissionError, UploadError,
};
use crate::integrity::IntegritySnapshot;
use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use reqwest::StatusCode;
use std::thread;
use std::time::Duration;

/// Teardown checkpoints must never hold up navigation; the beacon thread
/// gives up quickly and nobody waits for it.
const BEACON_TIMEOUT: Duration = Duration::from_secs(3);

pub struct HttpInterviewApi {
    base_url: String,
    public_id: String,
    bearer: Option<String>,
    client: Client,
    upload_client: Client,
    speech_client: Client,
    beacon_client: Client,
}

impl HttpInterviewApi {
    pub fn new(
        base_url: &str,
        public_id: &str,
        bearer: Option<String>,
        transport: &TransportConfig,
    ) -> Result<Self, EngineError> {
        let build = |timeout_ms: u64| {
            Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .map_err(|e| EngineError::Config(format!("http client: {e}")))
        };
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            public_id: public_id.to_string(),
            bearer,
            client: build(transport.request_timeout_ms)?,
            upload_client: build(transport.upload_timeout_ms)?,
            speech_client: build(transport.speech_timeout_ms)?,
            beacon_client: Client::builder()
                .timeout(BEACON_TIMEOUT)
                .build()
                .map_err(|e| EngineError::Config(format!("http client: {e}")))?,
        })
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/public/interviews/{}/{tail}", self.base_url, self.public_id)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.bearer {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Pull the most specific message out of an error body, the way the
/// original client walked `error`/`message`/`detail`.
fn error_message(response: Response) -> String {
    let status = response.status();
    let fallback = || format!("unexpected response ({status})");
    let Ok(body) = response.text() else {
        return fallback();
    };
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
        for key in ["error", "message", "detail"] {
            if let Some(message) = value.get(key).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }
    if body.trim().is_empty() {
        fallback()
    } else {
        body
    }
}

impl InterviewApi for HttpInterviewApi {
    fn fetch_session(&self) -> Result<SessionPayload, ApiError> {
        let response = self
            .authorize(self.client.get(self.url("")))
            .send()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ApiError::NotFound),
            StatusCode::GONE => Err(ApiError::Expired),
            status if status.is_success() => response
                .json::<SessionPayload>()
                .map_err(|e| ApiError::Decode(e.to_string())),
            _ => Err(ApiError::Network(error_message(response))),
        }
    }

    fn upload_response(&self, request: &UploadRequest) -> Result<UploadAck, UploadError> {
        let part = multipart::Part::bytes(request.blob.bytes.clone())
            .file_name(request.file_name.clone())
            .mime_str(&request.blob.mime)
            .map_err(|e| UploadError::Network(e.to_string()))?;
        let form = multipart::Form::new()
            .part("video_file_path", part)
            .text("question_id", request.question_id.to_string())
            .text("duration", request.duration.clone());

        let response = self
            .authorize(self.upload_client.post(self.url("video-response/")))
            .multipart(form)
            .send()
            .map_err(|e| UploadError::Network(e.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(UploadError::SessionGone),
            status if status.is_success() => Ok(response.json::<UploadAck>().unwrap_or_default()),
            _ => Err(UploadError::Rejected(error_message(response))),
        }
    }

    fn submit(&self, snapshot: &IntegritySnapshot) -> Result<(), SubmissionError> {
        let response = self
            .authorize(self.client.post(self.url("submit/")))
            .json(&serde_json::json!({ "integrity_metadata": snapshot }))
            .send()
            .map_err(|e| SubmissionError::Network(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SubmissionError::Rejected(error_message(response)))
        }
    }

    fn post_checkpoint(&self, snapshot: &IntegritySnapshot) -> Result<(), IntegrityDeliveryError> {
        let response = self
            .authorize(self.client.post(self.url("integrity-checkpoint/")))
            .json(snapshot)
            .send()
            .map_err(|e| IntegrityDeliveryError::Network(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(IntegrityDeliveryError::Network(error_message(response)))
        }
    }

    fn post_checkpoint_beacon(
        &self,
        snapshot: &IntegritySnapshot,
    ) -> Result<(), IntegrityDeliveryError> {
        let request = self
            .authorize(self.beacon_client.post(self.url("integrity-checkpoint/")))
            .json(snapshot);
        thread::Builder::new()
            .name("intervox-beacon".into())
            .spawn(move || {
                if let Err(err) = request.send() {
                    tracing::debug!("integrity_beacon_failed|{err}");
                }
            })
            .map(|_| ())
            .map_err(|_| IntegrityDeliveryError::BeaconUnavailable)
    }

    fn synthesize(&self, text: &str) -> Result<Vec<u8>, PlaybackError> {
        let response = self
            .authorize(self.speech_client.post(self.url("tts/")))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    PlaybackError::Timeout
                } else {
                    PlaybackError::Fetch(e.to_string())
                }
            })?;
        if !response.status().is_success() {
            return Err(PlaybackError::Fetch(error_message(response)));
        }
        let bytes = response
            .bytes()
            .map_err(|e| PlaybackError::Fetch(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
