//! CLIP ONNX embedding service
//!
//! Text and images go through the same exported CLIP graph, which yields
//! `text_embeds` and `image_embeds` in a shared space. The session and tokenizer
//! are loaded lazily on first use and shared by every clone of the service.

use crate::{normalize_vector, EmbeddingError, EmbeddingService};
use anyhow::{Context, Result};
use async_trait::async_trait;
use image::DynamicImage;
use ndarray::{Array2, Array4};
use once_cell::sync::OnceCell;
use ort::{
    session::Session,
    value::{TensorRef, Value},
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;
use tracing::{debug, info};

/// CLIP start/end of text token ids
const BOS_TOKEN: i64 = 49406;
const EOS_TOKEN: i64 = 49407;

/// CLIP model variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClipModel {
    /// ViT-B/32: 512-dim embeddings, 149M params
    VitB32,
    /// ViT-L/14: 768-dim embeddings, 428M params
    VitL14,
}

impl ClipModel {
    /// Get the embedding dimension for this model
    #[must_use]
    pub fn embedding_dim(&self) -> usize {
        match self {
            ClipModel::VitB32 => 512,
            ClipModel::VitL14 => 768,
        }
    }

    fn file_name(&self) -> &'static str {
        match self {
            ClipModel::VitB32 => "clip_vit_b32.onnx",
            ClipModel::VitL14 => "clip_vit_l14.onnx",
        }
    }
}

/// CLIP embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipConfig {
    /// Model variant to use
    pub model: ClipModel,
    /// Path to the ONNX model file
    pub model_path: String,
    /// Path to the CLIP `tokenizer.json`
    pub tokenizer_path: String,
    /// Whether to normalize embeddings to unit length
    pub normalize: bool,
    /// Input image size (default: 224x224 for CLIP)
    pub image_size: u32,
    /// Context length of the text encoder
    pub max_text_tokens: usize,
}

impl Default for ClipConfig {
    fn default() -> Self {
        let model_dir =
            std::env::var("MAGAZINE_MODEL_DIR").unwrap_or_else(|_| "models/embeddings".to_string());
        let model = ClipModel::VitB32;
        Self {
            model,
            model_path: format!("{model_dir}/{}", model.file_name()),
            tokenizer_path: format!("{model_dir}/clip_tokenizer/tokenizer.json"),
            normalize: true,
            image_size: 224,
            max_text_tokens: 77,
        }
    }
}

/// Process-wide CLIP service.
///
/// Cloning is cheap and every clone shares the same lazily loaded session.
#[derive(Clone)]
pub struct ClipEmbeddingService {
    config: Arc<ClipConfig>,
    session: Arc<OnceCell<Mutex<Session>>>,
    tokenizer: Arc<OnceCell<Tokenizer>>,
}

impl ClipEmbeddingService {
    /// Create the service. Nothing is loaded until the first embedding call.
    #[must_use]
    pub fn new(config: ClipConfig) -> Self {
        Self {
            config: Arc::new(config),
            session: Arc::new(OnceCell::new()),
            tokenizer: Arc::new(OnceCell::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClipConfig {
        &self.config
    }

    /// Get or load the ONNX session
    fn get_or_load_session<'a>(
        cell: &'a OnceCell<Mutex<Session>>,
        config: &ClipConfig,
    ) -> Result<&'a Mutex<Session>> {
        cell.get_or_try_init(|| {
            info!("Loading CLIP model from: {}", config.model_path);
            let session = Session::builder()
                .context("Failed to create session builder")?
                .commit_from_file(&config.model_path)
                .with_context(|| format!("Failed to load ONNX model from {}", config.model_path))?;
            Ok(Mutex::new(session))
        })
    }

    /// Get or load the tokenizer
    fn get_or_load_tokenizer<'a>(
        cell: &'a OnceCell<Tokenizer>,
        config: &ClipConfig,
    ) -> Result<&'a Tokenizer> {
        cell.get_or_try_init(|| {
            info!("Loading tokenizer from: {}", config.tokenizer_path);
            Tokenizer::from_file(&config.tokenizer_path)
                .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {e}"))
        })
    }

    /// Extract image embeddings using a pre-loaded session
    pub fn embed_images_with_session(
        session: &mut Session,
        config: &ClipConfig,
        images: &[DynamicImage],
    ) -> Result<Vec<Vec<f32>>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Extracting image embeddings for {} images using {:?}",
            images.len(),
            config.model
        );

        let input_tensor = Self::preprocess_images(config, images)?;
        let pixel_values = TensorRef::from_array_view(input_tensor.view())
            .context("Failed to convert input to ort::TensorRef")?;

        // The graph needs text inputs even for image-only inference.
        // Dummy prompt: [BOS, "a", "photo", "of", "a", "photo", EOS]
        let batch_size = images.len();
        let dummy_tokens = [BOS_TOKEN, 320, 2368, 539, 320, 2368, EOS_TOKEN];
        let mut input_ids_vec = Vec::with_capacity(batch_size * dummy_tokens.len());
        for _ in 0..batch_size {
            input_ids_vec.extend_from_slice(&dummy_tokens);
        }
        let dummy_input_ids =
            Array2::<i64>::from_shape_vec((batch_size, dummy_tokens.len()), input_ids_vec)
                .context("Failed to create dummy input_ids")?;
        let dummy_attention_mask = Array2::<i64>::ones((batch_size, dummy_tokens.len()));

        let input_ids = Value::from_array(dummy_input_ids)
            .context("Failed to convert input_ids to ort::Value")?;
        let attention_mask = Value::from_array(dummy_attention_mask)
            .context("Failed to convert attention_mask to ort::Value")?;

        let outputs = session
            .run(ort::inputs![
                "pixel_values" => pixel_values,
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
            ])
            .context("Failed to run ONNX inference")?;

        let (_shape, embeddings_data) = outputs
            .get("image_embeds")
            .context("Failed to get image_embeds from outputs")?
            .try_extract_tensor::<f32>()
            .context("Failed to extract embeddings tensor")?;

        Ok(Self::split_batch(embeddings_data, batch_size, config))
    }

    /// Extract a text embedding using a pre-loaded session and tokenizer
    pub fn embed_text_with_session(
        session: &mut Session,
        tokenizer: &Tokenizer,
        config: &ClipConfig,
        text: &str,
    ) -> Result<Vec<f32>> {
        let tokens = Self::encode_text(tokenizer, config, text)?;
        let seq_len = tokens.len();

        let input_ids = Array2::from_shape_vec((1, seq_len), tokens)
            .context("Failed to create input_ids array")?;
        let attention_mask = Array2::<i64>::ones((1, seq_len));

        // Blank image so the graph can run; only text_embeds is read back
        let size = config.image_size as usize;
        let dummy_pixels = Array4::<f32>::zeros((1, 3, size, size));

        let input_ids = Value::from_array(input_ids)
            .context("Failed to convert input_ids to ort::Value")?;
        let attention_mask = Value::from_array(attention_mask)
            .context("Failed to convert attention_mask to ort::Value")?;
        let pixel_values = Value::from_array(dummy_pixels)
            .context("Failed to convert pixel_values to ort::Value")?;

        let outputs = session
            .run(ort::inputs![
                "pixel_values" => pixel_values,
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
            ])
            .context("Failed to run ONNX inference")?;

        let (_shape, embeddings_data) = outputs
            .get("text_embeds")
            .context("Failed to get text_embeds from outputs")?
            .try_extract_tensor::<f32>()
            .context("Failed to extract embeddings tensor")?;

        Self::split_batch(embeddings_data, 1, config)
            .pop()
            .context("Empty text embedding output")
    }

    fn split_batch(data: &[f32], batch_size: usize, config: &ClipConfig) -> Vec<Vec<f32>> {
        let embedding_dim = config.model.embedding_dim();
        let mut embeddings = Vec::with_capacity(batch_size);
        for chunk in data.chunks(embedding_dim).take(batch_size) {
            let mut embedding = chunk.to_vec();
            if config.normalize {
                normalize_vector(&mut embedding);
            }
            embeddings.push(embedding);
        }
        embeddings
    }

    /// Tokenize and clamp to the text encoder's context length, keeping EOS last
    fn encode_text(tokenizer: &Tokenizer, config: &ClipConfig, text: &str) -> Result<Vec<i64>> {
        let encoding = tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {e}"))?;

        let mut tokens: Vec<i64> = encoding.get_ids().iter().map(|&t| i64::from(t)).collect();
        if tokens.first() != Some(&BOS_TOKEN) {
            tokens.insert(0, BOS_TOKEN);
        }
        if tokens.len() > config.max_text_tokens {
            tokens.truncate(config.max_text_tokens);
            if let Some(last) = tokens.last_mut() {
                *last = EOS_TOKEN;
            }
        } else if tokens.last() != Some(&EOS_TOKEN) {
            tokens.push(EOS_TOKEN);
        }
        Ok(tokens)
    }

    /// Resize to the model input and apply ImageNet normalization (NCHW)
    fn preprocess_images(config: &ClipConfig, images: &[DynamicImage]) -> Result<Array4<f32>> {
        let size = config.image_size;
        let batch_size = images.len();

        let mut tensor = Array4::<f32>::zeros((batch_size, 3, size as usize, size as usize));

        for (i, img) in images.iter().enumerate() {
            let img = img.resize_exact(size, size, image::imageops::FilterType::Lanczos3);
            let img = img.to_rgb8();

            // mean = [0.485, 0.456, 0.406], std = [0.229, 0.224, 0.225]
            for y in 0..size as usize {
                for x in 0..size as usize {
                    let pixel = img.get_pixel(x as u32, y as u32);
                    tensor[[i, 0, y, x]] = (f32::from(pixel[0]) / 255.0 - 0.485) / 0.229;
                    tensor[[i, 1, y, x]] = (f32::from(pixel[1]) / 255.0 - 0.456) / 0.224;
                    tensor[[i, 2, y, x]] = (f32::from(pixel[2]) / 255.0 - 0.406) / 0.225;
                }
            }
        }

        Ok(tensor)
    }
}

#[async_trait]
impl EmbeddingService for ClipEmbeddingService {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".to_string()));
        }

        let config = Arc::clone(&self.config);
        let session_cell = Arc::clone(&self.session);
        let tokenizer_cell = Arc::clone(&self.tokenizer);
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let tokenizer = Self::get_or_load_tokenizer(&tokenizer_cell, &config)
                .map_err(|e| EmbeddingError::ModelLoad(format!("{e:#}")))?;
            let session = Self::get_or_load_session(&session_cell, &config)
                .map_err(|e| EmbeddingError::ModelLoad(format!("{e:#}")))?;
            let mut session = session
                .lock()
                .map_err(|_| EmbeddingError::Inference("CLIP session lock poisoned".to_string()))?;
            Self::embed_text_with_session(&mut session, tokenizer, &config, &text)
                .map_err(|e| EmbeddingError::Inference(format!("{e:#}")))
        })
        .await
        .map_err(|e| EmbeddingError::Inference(format!("embedding task failed: {e}")))?
    }

    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        if bytes.is_empty() {
            return Err(EmbeddingError::InvalidInput("empty image".to_string()));
        }

        let config = Arc::clone(&self.config);
        let session_cell = Arc::clone(&self.session);
        let bytes = bytes.to_vec();

        tokio::task::spawn_blocking(move || {
            let image = image::load_from_memory(&bytes)
                .map_err(|e| EmbeddingError::Decode(e.to_string()))?;
            let session = Self::get_or_load_session(&session_cell, &config)
                .map_err(|e| EmbeddingError::ModelLoad(format!("{e:#}")))?;
            let mut session = session
                .lock()
                .map_err(|_| EmbeddingError::Inference("CLIP session lock poisoned".to_string()))?;
            Self::embed_images_with_session(&mut session, &config, &[image])
                .map_err(|e| EmbeddingError::Inference(format!("{e:#}")))?
                .pop()
                .ok_or_else(|| EmbeddingError::Inference("empty image embedding output".to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::Inference(format!("embedding task failed: {e}")))?
    }

    fn dimension(&self) -> usize {
        self.config.model.embedding_dim()
    }
}
