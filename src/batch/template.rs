//! Descriptor construction
//!
//! Pure, synchronous helpers that turn caller input into ordered
//! [`TaskDescriptor`]s for the batch executor:
//! - [`build_consistent_descriptors`] expands a base prompt over a list of
//!   variations with a shared style.
//! - [`build_profiled_consistent_descriptors`] does the same and then
//!   enhances each composed prompt with a [`GenerationProfile`].
//! - [`build_batch_descriptors`] validates a list of prompts and enhances
//!   each one with a [`GenerationProfile`].

use std::fmt;
use serde::{Deserialize, Serialize};

use crate::batch::error_handling::ConfigurationError;
use crate::batch::types::{BatchConfig, TaskDescriptor, DEFAULT_MAX_BATCH_SIZE};

/// Longest accepted prompt, in characters
pub const MAX_PROMPT_LENGTH: usize = 2000;

/// Generation model a batch targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationModel {
    /// Gemini 2.0 Flash image preview
    #[default]
    #[serde(rename = "gemini-2.0-flash-preview-image-generation")]
    GeminiFlashImage,
    /// Imagen 4
    #[serde(rename = "imagen-4")]
    Imagen4,
}

impl GenerationModel {
    /// Model identifier as sent to the provider
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationModel::GeminiFlashImage => "gemini-2.0-flash-preview-image-generation",
            GenerationModel::Imagen4 => "imagen-4",
        }
    }
}

impl fmt::Display for GenerationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// 256x256
    #[serde(rename = "256x256")]
    Square256,
    /// 512x512
    #[serde(rename = "512x512")]
    Square512,
    /// 1024x1024
    #[default]
    #[serde(rename = "1024x1024")]
    Square1024,
    /// 1024x1792
    #[serde(rename = "1024x1792")]
    Portrait,
    /// 1792x1024
    #[serde(rename = "1792x1024")]
    Landscape,
    /// 2048x2048
    #[serde(rename = "2048x2048")]
    Square2048,
}

impl Resolution {
    /// Width and height in pixels
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::Square256 => (256, 256),
            Resolution::Square512 => (512, 512),
            Resolution::Square1024 => (1024, 1024),
            Resolution::Portrait => (1024, 1792),
            Resolution::Landscape => (1792, 1024),
            Resolution::Square2048 => (2048, 2048),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.dimensions();
        write!(f, "{}x{}", width, height)
    }
}

/// Shared generation settings applied to every prompt in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationProfile {
    /// Target model
    pub model: GenerationModel,
    /// Output resolution
    pub resolution: Resolution,
    /// Art style shared across the batch
    pub style: Option<String>,
    /// Prefix every prompt with a consistency instruction when a style is set
    pub maintain_consistency: bool,
}

impl Default for GenerationProfile {
    fn default() -> Self {
        Self {
            model: GenerationModel::default(),
            resolution: Resolution::default(),
            style: None,
            maintain_consistency: true,
        }
    }
}

impl GenerationProfile {
    /// Set the shared style
    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    /// Set the output resolution
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Turn the consistency prefix on or off
    pub fn with_consistency(mut self, maintain_consistency: bool) -> Self {
        self.maintain_consistency = maintain_consistency;
        self
    }

    /// Consistency preamble shared by every prompt, empty when not requested
    pub fn consistency_prefix(&self) -> String {
        match self.style.as_deref().filter(|style| !style.is_empty()) {
            Some(style) if self.maintain_consistency => {
                format!("All images should maintain a consistent {} style. ", style)
            }
            _ => String::new(),
        }
    }

    /// Full provider input for one prompt
    pub fn enhance(&self, prompt: &str) -> String {
        format!(
            "{}{}. Generate at {} resolution.",
            self.consistency_prefix(),
            prompt,
            self.resolution
        )
    }
}

/// Expand a base prompt over a list of variations.
///
/// Each variation becomes one descriptor at its list position. The
/// descriptor's payload is the variation itself and its derived input is
/// `base, variation, style style`, skipping blank variations and an absent
/// style.
pub fn build_consistent_descriptors(
    base: &str,
    variations: &[String],
    style: Option<&str>,
) -> Result<Vec<TaskDescriptor>, ConfigurationError> {
    build_consistent_descriptors_with_limit(base, variations, style, DEFAULT_MAX_BATCH_SIZE)
}

/// [`build_consistent_descriptors`] with an explicit batch size limit
pub fn build_consistent_descriptors_with_limit(
    base: &str,
    variations: &[String],
    style: Option<&str>,
    max_batch_size: usize,
) -> Result<Vec<TaskDescriptor>, ConfigurationError> {
    check_count(variations.len(), max_batch_size)?;

    Ok(variations
        .iter()
        .enumerate()
        .map(|(index, variation)| {
            TaskDescriptor::new(index, variation.clone())
                .with_derived_input(compose_variation(base, variation, style))
        })
        .collect())
}

/// Expand a base prompt over variations and enhance each composed prompt
/// with `profile`.
///
/// The style comes from the profile and consistency is always on, so every
/// derived input reads `<consistency prefix><base, variation, style style>.
/// Generate at <resolution> resolution.`
pub fn build_profiled_consistent_descriptors(
    base: &str,
    variations: &[String],
    profile: &GenerationProfile,
    max_batch_size: usize,
) -> Result<Vec<TaskDescriptor>, ConfigurationError> {
    check_count(variations.len(), max_batch_size)?;

    let profile = profile.clone().with_consistency(true);
    let style = profile.style.as_deref();

    Ok(variations
        .iter()
        .enumerate()
        .map(|(index, variation)| {
            let composed = compose_variation(base, variation, style);
            TaskDescriptor::new(index, variation.clone()).with_derived_input(profile.enhance(&composed))
        })
        .collect())
}

fn compose_variation(base: &str, variation: &str, style: Option<&str>) -> String {
    let mut input = base.to_string();
    if !variation.trim().is_empty() {
        input.push_str(", ");
        input.push_str(variation);
    }
    if let Some(style) = style.map(str::trim).filter(|style| !style.is_empty()) {
        input.push_str(", ");
        input.push_str(style);
        input.push_str(" style");
    }
    input
}

/// Validate prompts and build enhanced descriptors for a plain batch
pub fn build_batch_descriptors(
    prompts: &[String],
    profile: &GenerationProfile,
    max_batch_size: usize,
) -> Result<Vec<TaskDescriptor>, ConfigurationError> {
    check_count(prompts.len(), max_batch_size)?;

    prompts
        .iter()
        .enumerate()
        .map(|(index, prompt)| -> Result<TaskDescriptor, ConfigurationError> {
            validate_prompt(index, prompt)?;
            Ok(TaskDescriptor::new(index, prompt.clone()).with_derived_input(profile.enhance(prompt)))
        })
        .collect()
}

fn check_count(count: usize, max_batch_size: usize) -> Result<(), ConfigurationError> {
    BatchConfig { max_batch_size, ..BatchConfig::default() }.check_batch_size(count)
}

fn validate_prompt(index: usize, prompt: &str) -> Result<(), ConfigurationError> {
    if prompt.trim().is_empty() {
        return Err(ConfigurationError::InvalidPrompt {
            index,
            reason: "prompt is empty".to_string(),
        });
    }
    let length = prompt.chars().count();
    if length > MAX_PROMPT_LENGTH {
        return Err(ConfigurationError::InvalidPrompt {
            index,
            reason: format!("prompt length {} exceeds {} characters", length, MAX_PROMPT_LENGTH),
        });
    }
    Ok(())
}
