//! Load-time session configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options applied when loading a model and building its context and
/// sampler chain. All fields are optional in serialized form; camelCase
/// keys so the same record can be fed from TOML or JSON hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelParams {
    /// Layers offloaded to the GPU; negative means "use the maximum available".
    pub gpu_layers: i32,
    /// Try to mmap the weights instead of reading them.
    pub use_memory_map: bool,
    /// Ask the OS to keep the weights resident in RAM.
    pub lock_in_memory: bool,
    /// Min-p sampling cutoff.
    pub min_p: f32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Seed the final distribution sampler with `seed` instead of the
    /// backend's default seed.
    pub use_fixed_seed: bool,
    pub seed: u32,
    /// Context window size in tokens.
    pub context_size: u32,
    /// Decode batch size in tokens.
    pub batch_size: u32,
    /// Optional system prompt file, submitted render-only right after a
    /// successful load.
    pub prompt_path: Option<PathBuf>,
    /// Optional chat template file; the model's embedded template is the
    /// fallback when the file is missing or unreadable.
    pub template_path: Option<PathBuf>,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            gpu_layers: -1,
            use_memory_map: false,
            lock_in_memory: false,
            min_p: 0.05,
            temperature: 0.6,
            use_fixed_seed: false,
            seed: 1,
            context_size: 4096,
            batch_size: 4096,
            prompt_path: None,
            template_path: None,
        }
    }
}

impl ModelParams {
    /// Seed for the distribution sampler, `None` meaning "backend default".
    pub fn sampler_seed(&self) -> Option<u32> {
        self.use_fixed_seed.then_some(self.seed)
    }
}
