//! # Embeddings
//!
//! The boundary between Awful RAG and whatever turns text into vectors.
//!
//! Retrieval only ever talks to the [`EmbeddingProvider`] trait. Two providers
//! ship with the crate:
//!
//! - [`LocalEmbedder`]: `sentence-transformers/all-MiniLM-L6-v2` run in-process
//!   with Candle (pure Rust). 384-d, mean pooled, L2 normalized.
//! - [`HttpEmbedder`]: any OpenAI-compatible `POST /embeddings` endpoint
//!   (OpenAI, Ollama, LM Studio, llama.cpp server, ...).
//!
//! Providers never retry. A failure comes back as an [`EmbeddingError`] and the
//! caller decides whether to try again.

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokenizers::Tokenizer;
use tracing::debug;

use crate::error::EmbeddingError;
use crate::vector_index::Vector;

/// Output dimension of all-MiniLM-L6-v2.
pub const MINILM_DIMENSION: usize = 384;

/// Something that can embed text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dimension of every vector this provider returns.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vector, EmbeddingError>;

    /// Embed several texts; the output is in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>, EmbeddingError>;
}

/// Check that a provider answered with one finite vector of the right size
/// per input.
pub(crate) fn check_batch(
    vectors: &[Vector],
    expected_len: usize,
    dimension: usize,
) -> Result<(), EmbeddingError> {
    if vectors.len() != expected_len {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {expected_len} embeddings, got {}",
            vectors.len()
        )));
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {dimension}-d embeddings, got {}",
            v.len()
        )));
    }
    if let Some(i) = vectors.iter().position(|v| v.iter().any(|x| !x.is_finite())) {
        return Err(EmbeddingError::InvalidResponse(format!(
            "embedding {i} has a non-finite component"
        )));
    }
    Ok(())
}

/// Sentence embeddings model using Candle (pure Rust)
pub struct SentenceEmbeddingsModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl SentenceEmbeddingsModel {
    /// Load the model from Hugging Face Hub (cached after the first download).
    pub fn load(model_id: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let device = Device::Cpu;
        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
        let api = Api::new()?;
        let api_repo = api.repo(repo);

        let config_filename = api_repo.get("config.json")?;
        let tokenizer_filename = api_repo.get("tokenizer.json")?;
        let weights_filename = api_repo.get("model.safetensors")?;

        let config = std::fs::read_to_string(config_filename)?;
        let config: Config = serde_json::from_str(&config)?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| format!("Failed to load tokenizer: {e}"))?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)? };
        let model = BertModel::load(vb, &config)?;

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    /// Encode text into an embedding
    pub fn encode(&self, text: &str) -> Result<Vec<f32>, Box<dyn Error + Send + Sync>> {
        // the tokenizer truncates at 512 tokens
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| format!("Tokenization error: {e}"))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let output = self.model.forward(&token_ids, &token_type_ids, None)?;
        let embedding = self.mean_pooling(&output, tokens.get_attention_mask())?;
        let embedding = l2_normalize(&embedding)?;

        Ok(embedding.to_vec1::<f32>()?)
    }

    /// Mean pooling over token embeddings, considering attention mask
    fn mean_pooling(
        &self,
        embeddings: &Tensor,
        attention_mask: &[u32],
    ) -> Result<Tensor, Box<dyn Error + Send + Sync>> {
        // embeddings: [1, seq_len, hidden]; mask needs [1, seq_len, 1]
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        Ok(sum.broadcast_div(&count)?.squeeze(0)?)
    }
}

/// L2 normalize a vector. The norm is floored at `f32::EPSILON`, so an
/// all-zero input (e.g. from an empty mask) stays zero instead of turning NaN.
fn l2_normalize(tensor: &Tensor) -> candle_core::Result<Tensor> {
    let norm = tensor
        .sqr()?
        .sum_all()?
        .sqrt()?
        .clamp(f32::EPSILON, f32::INFINITY)?;
    tensor.broadcast_div(&norm)
}

/// In-process provider backed by [`SentenceEmbeddingsModel`].
///
/// Inference is CPU bound, so it runs on tokio's blocking pool.
#[derive(Clone)]
pub struct LocalEmbedder {
    model: Arc<SentenceEmbeddingsModel>,
}

impl LocalEmbedder {
    pub fn new(model: SentenceEmbeddingsModel) -> Self {
        Self {
            model: Arc::new(model),
        }
    }

    /// Load `model_id` from the Hugging Face cache, downloading it if needed.
    pub async fn load(model_id: &str) -> Result<Self, EmbeddingError> {
        let model_id = model_id.to_string();
        let model = tokio::task::spawn_blocking(move || SentenceEmbeddingsModel::load(&model_id))
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;
        Ok(Self::new(model))
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    fn dimension(&self) -> usize {
        MINILM_DIMENSION
    }

    async fn embed(&self, text: &str) -> Result<Vector, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("model returned no embedding".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>, EmbeddingError> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        let count = texts.len();
        let vectors = tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|t| model.encode(t))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?
        .map_err(EmbeddingError::Unavailable)?;

        check_batch(&vectors, count, MINILM_DIMENSION)?;
        debug!(count, "embedded batch locally");
        Ok(vectors)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Provider for OpenAI-compatible `/embeddings` endpoints.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    timeout: Duration,
}

impl HttpEmbedder {
    /// `api_base` is the URL prefix, e.g. `http://localhost:11434/v1`.
    pub fn new(
        api_base: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", api_base.trim_end_matches('/')),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
            dimension,
            timeout,
        })
    }

    fn classify(&self, err: reqwest::Error) -> EmbeddingError {
        if err.is_timeout() {
            EmbeddingError::Timeout(self.timeout)
        } else if err.is_decode() {
            EmbeddingError::InvalidResponse(err.to_string())
        } else {
            EmbeddingError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vector, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = texts.len(), endpoint = %self.endpoint, model = %self.model, "requesting embeddings");

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Unavailable(format!("HTTP {status}: {body}")));
        }

        let mut payload: EmbeddingResponse = response.json().await.map_err(|e| self.classify(e))?;
        payload.data.sort_by_key(|d| d.index);
        let vectors: Vec<Vector> = payload.data.into_iter().map(|d| d.embedding).collect();

        check_batch(&vectors, texts.len(), self.dimension)?;
        Ok(vectors)
    }
}
