use std::io::Cursor;
use std::time::Duration;

use ndarray::{Array0, Array2};
use ndarray_npy::NpzReader;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use tracing::warn;

use crate::configuration::BackendSettings;
use crate::domain::entities::chunk::{Modality, MultiVector};
use crate::helper::error_chain_fmt;

/// The wire formats spoken by the supported embedding backends.
///
/// A closed set: the variant is a pure function of the configured endpoint
/// domain, resolved once when the service is built, never re-evaluated per
/// call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendVariant {
    /// Flat `{input_type, inputs}` request, `{embeddings}` response.
    GenericRest,
    /// Queue-based endpoint (RunPod-style): request nested under `input`,
    /// response nested under `output`, and a queued status during cold start.
    QueueRest,
    /// Hosted inference endpoint (HuggingFace-style): request nested under
    /// `inputs`, response keys either top-level or bare.
    HostedEndpoint,
    /// The response is a compressed numeric archive (NPZ) instead of JSON.
    BinaryArchive,
}

impl BackendVariant {
    pub fn resolve(api_domain: &str) -> Self {
        if api_domain.contains("runpod.ai") {
            BackendVariant::QueueRest
        } else if api_domain.contains("huggingface") {
            BackendVariant::HostedEndpoint
        } else if api_domain.contains("modal.run") {
            BackendVariant::BinaryArchive
        } else {
            BackendVariant::GenericRest
        }
    }

    /// Public archive endpoints take no credential; every other variant
    /// requires a bearer key.
    fn requires_credential(&self) -> bool {
        !matches!(self, BackendVariant::BinaryArchive)
    }

    fn endpoint(&self, api_domain: &str) -> String {
        let domain = api_domain.trim_end_matches('/');
        match self {
            BackendVariant::QueueRest => format!("{domain}/runsync"),
            BackendVariant::HostedEndpoint => domain.to_string(),
            BackendVariant::GenericRest | BackendVariant::BinaryArchive => {
                format!("{domain}/embeddings")
            }
        }
    }
}

/// Outcome of one backend call.
///
/// `Busy` is the cold-start signal: the backend queued the request while it
/// warms up. It is a transient, non-error condition the dispatcher turns into
/// empty-but-successful results.
#[derive(Debug)]
pub enum BackendResponse {
    Embeddings(Vec<MultiVector>),
    Busy,
}

#[derive(thiserror::Error)]
pub enum BackendConfigurationError {
    #[error("An API key is required for the embedding backend at {0}")]
    MissingCredential(String),
    #[error("Failed to build the backend HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl std::fmt::Debug for BackendConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(thiserror::Error)]
pub enum EmbeddingApiError {
    #[error("Embedding backend returned {status}: {body}")]
    Backend { status: StatusCode, body: String },
    #[error("Failed to decode the embedding backend response: {0}")]
    Decode(String),
    #[error("The embedding backend returned no embeddings")]
    Empty,
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

impl std::fmt::Debug for EmbeddingApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(Serialize)]
struct FlatEmbeddingRequest<'a> {
    input_type: &'a str,
    inputs: &'a [String],
}

#[derive(Serialize)]
struct ContentsEnvelope<'a> {
    contents: &'a [String],
    content_types: Vec<&'a str>,
    batch_size: u32,
}

#[derive(Serialize)]
struct QueueEmbeddingRequest<'a> {
    input: ContentsEnvelope<'a>,
}

#[derive(Serialize)]
struct HostedEmbeddingRequest<'a> {
    inputs: ContentsEnvelope<'a>,
}

/// Client for one remote multi-vector embedding backend.
///
/// Hides the wire-format heterogeneity of the supported variants behind a
/// single order-preserving `embed` call. Cheap to share across concurrent
/// modality calls: the inner `reqwest::Client` and credential are read-only.
pub struct EmbeddingApiService {
    client: reqwest::Client,
    variant: BackendVariant,
    endpoint: String,
    api_key: Option<Secret<String>>,
    batch_size: u32,
}

impl EmbeddingApiService {
    /// Resolves the backend variant from the configured domain and validates
    /// the credential requirement. This is the only place a configuration
    /// mistake can surface; later calls never re-check.
    pub fn try_new(settings: &BackendSettings) -> Result<Self, BackendConfigurationError> {
        let variant = BackendVariant::resolve(&settings.api_domain);

        if variant.requires_credential() && settings.api_key.is_none() {
            return Err(BackendConfigurationError::MissingCredential(
                settings.api_domain.clone(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            variant,
            endpoint: variant.endpoint(&settings.api_domain),
            api_key: settings.api_key.clone(),
            batch_size: settings.batch_size,
        })
    }

    pub fn variant(&self) -> BackendVariant {
        self.variant
    }

    /// Embeds one modality-homogeneous batch of contents.
    ///
    /// The returned embeddings are in input order, one multi-vector per input.
    #[tracing::instrument(
        name = "Calling embedding backend",
        skip(self, inputs),
        fields(variant = ?self.variant, nb_inputs = inputs.len(), modality = modality.as_str())
    )]
    pub async fn embed(
        &self,
        inputs: &[String],
        modality: Modality,
    ) -> Result<BackendResponse, EmbeddingApiError> {
        let request = match self.variant {
            BackendVariant::GenericRest | BackendVariant::BinaryArchive => {
                self.client.post(&self.endpoint).json(&FlatEmbeddingRequest {
                    input_type: modality.as_str(),
                    inputs,
                })
            }
            BackendVariant::QueueRest => {
                self.client.post(&self.endpoint).json(&QueueEmbeddingRequest {
                    input: self.contents_envelope(inputs, modality),
                })
            }
            BackendVariant::HostedEndpoint => {
                self.client.post(&self.endpoint).json(&HostedEmbeddingRequest {
                    inputs: self.contents_envelope(inputs, modality),
                })
            }
        };

        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        };

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingApiError::Backend { status, body });
        }

        match self.variant {
            BackendVariant::BinaryArchive => {
                let bytes = response.bytes().await?;
                Ok(BackendResponse::Embeddings(decode_npz_archive(&bytes)?))
            }
            _ => {
                let body = response.text().await?;
                let payload: serde_json::Value = serde_json::from_str(&body)
                    .map_err(|e| EmbeddingApiError::Decode(format!("invalid JSON body: {e}")))?;
                decode_json_response(self.variant, &payload)
            }
        }
    }

    fn contents_envelope<'a>(
        &self,
        inputs: &'a [String],
        modality: Modality,
    ) -> ContentsEnvelope<'a> {
        ContentsEnvelope {
            contents: inputs,
            content_types: vec![modality.as_str(); inputs.len()],
            batch_size: self.batch_size,
        }
    }
}

/// Decodes a JSON response body into embeddings, per wire-format variant.
fn decode_json_response(
    variant: BackendVariant,
    payload: &serde_json::Value,
) -> Result<BackendResponse, EmbeddingApiError> {
    match variant {
        BackendVariant::GenericRest => {
            let embeddings = payload
                .get("embeddings")
                .ok_or_else(|| EmbeddingApiError::Decode("missing `embeddings` field".into()))?;
            Ok(BackendResponse::Embeddings(parse_multivectors(embeddings)?))
        }
        BackendVariant::QueueRest => {
            // A queued status means the backend is cold starting: transient,
            // not an error.
            if let Some(status) = payload.get("status").and_then(|s| s.as_str()) {
                if status == "IN_QUEUE" || status == "IN_PROGRESS" {
                    warn!(status, "Embedding backend is cold starting, no embeddings yet");
                    return Ok(BackendResponse::Busy);
                }
            }
            let output = payload
                .get("output")
                .ok_or_else(|| EmbeddingApiError::Decode("missing `output` envelope".into()))?;
            let embeddings = match output.get("embeddings") {
                Some(embeddings) => embeddings,
                // Some deployments return the embeddings directly as the output
                None => output,
            };
            Ok(BackendResponse::Embeddings(parse_multivectors(embeddings)?))
        }
        BackendVariant::HostedEndpoint => {
            // Response keys may be top-level or bare: probe both.
            let embeddings = payload.get("embeddings").unwrap_or(payload);
            Ok(BackendResponse::Embeddings(parse_multivectors(embeddings)?))
        }
        BackendVariant::BinaryArchive => {
            Err(EmbeddingApiError::Decode(
                "binary archive backend unexpectedly returned JSON".into(),
            ))
        }
    }
}

fn parse_multivectors(value: &serde_json::Value) -> Result<Vec<MultiVector>, EmbeddingApiError> {
    serde_json::from_value(value.clone())
        .map_err(|e| EmbeddingApiError::Decode(format!("unexpected embeddings shape: {e}")))
}

/// Decodes an NPZ archive response: a `count` field, then `emb_0..emb_{n-1}`
/// 2-d float arrays, one multi-vector per input, in archive order.
fn decode_npz_archive(bytes: &[u8]) -> Result<Vec<MultiVector>, EmbeddingApiError> {
    let mut npz = NpzReader::new(Cursor::new(bytes))
        .map_err(|e| EmbeddingApiError::Decode(format!("invalid npz archive: {e}")))?;

    let count = read_archive_count(&mut npz)?;

    let mut embeddings = Vec::with_capacity(count);
    for i in 0..count {
        let name = format!("emb_{i}");
        // Archive entries may or may not carry the `.npy` suffix.
        let array: Array2<f32> = npz
            .by_name(&name)
            .or_else(|_| npz.by_name(&format!("{name}.npy")))
            .map_err(|e| EmbeddingApiError::Decode(format!("missing archive entry {name}: {e}")))?;
        embeddings.push(array.outer_iter().map(|row| row.to_vec()).collect());
    }

    Ok(embeddings)
}

fn read_archive_count<R: std::io::Read + std::io::Seek>(
    npz: &mut NpzReader<R>,
) -> Result<usize, EmbeddingApiError> {
    let count: Array0<i64> = npz
        .by_name("count")
        .or_else(|_| npz.by_name("count.npy"))
        .map_err(|e| EmbeddingApiError::Decode(format!("missing archive `count` entry: {e}")))?;

    let count = count.into_scalar();
    usize::try_from(count)
        .map_err(|_| EmbeddingApiError::Decode(format!("invalid archive count {count}")))
}
