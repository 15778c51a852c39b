use corellm_engine::{LoadError, ModelDescriptor};
use serde::{Deserialize, Serialize};

/// Model selected when nothing is configured.
pub const DEFAULT_MODEL: &str = "smollm-135m-4bit";

/// Static information about a selectable model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCatalogEntry {
    /// Unique identifier, no spaces (e.g., "smollm-135m-4bit")
    pub name: String,
    /// Human-readable name (e.g., "SmolLM 135M (4-bit)")
    pub display_name: String,
    /// Hub repository holding the quantized weights
    pub repo_id: String,
}

impl ModelCatalogEntry {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        repo_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            repo_id: repo_id.into(),
        }
    }

    pub fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor::new(&self.name, &self.repo_id)
    }
}

/// One row of [`ModelCatalog::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogListing {
    pub id: String,
    pub display_label: String,
}

// (name, display name, hub repository). Order is display order.
const BUILTIN_MODELS: &[(&str, &str, &str)] = &[
    ("codellama-13b-4bit", "CodeLlama 13B (4-bit)", "mlx-community/CodeLlama-13b-Instruct-hf-4bit-MLX"),
    ("deepseek-r1-7b-4bit", "DeepSeek R1 7B (4-bit)", "mlx-community/DeepSeek-R1-Distill-Qwen-7B-4bit"),
    ("gemma-2b-quantized", "Gemma 2B Quantized", "mlx-community/quantized-gemma-2b-it"),
    ("gemma-2-2b-it-4bit", "Gemma 2 2B IT (4-bit)", "mlx-community/gemma-2-2b-it-4bit"),
    ("gemma-2-9b-it-4bit", "Gemma 2 9B IT (4-bit)", "mlx-community/gemma-2-9b-it-4bit"),
    ("llama3.1-8b-4bit", "Llama 3 1.8B (4-bit)", "mlx-community/Meta-Llama-3.1-8B-Instruct-4bit"),
    ("llama3.2-1b-4bit", "Llama 3 2.1B (4-bit)", "mlx-community/Llama-3.2-1B-Instruct-4bit"),
    ("llama3.2-3b-4bit", "Llama 3 2.3B (4-bit)", "mlx-community/Llama-3.2-3B-Instruct-4bit"),
    ("llama3-8b-4bit", "Llama 3 8B (4-bit)", "mlx-community/Meta-Llama-3-8B-Instruct-4bit"),
    ("mistral-7b-4bit", "Mistral 7B (4-bit)", "mlx-community/Mistral-7B-Instruct-v0.3-4bit"),
    ("mistral-nemo-4bit", "Mistral NeMo (4-bit)", "mlx-community/Mistral-Nemo-Instruct-2407-4bit"),
    ("openelm-270m-4bit", "OpenELM 270M (4-bit)", "mlx-community/OpenELM-270M-Instruct"),
    ("phi3.5-moe", "Phi 3.5 MoE", "mlx-community/Phi-3.5-MoE-instruct-4bit"),
    ("phi3.5-4bit", "Phi 3.5 (4-bit)", "mlx-community/Phi-3.5-mini-instruct-4bit"),
    ("phi-4bit", "Phi (4-bit)", "mlx-community/phi-2-hf-4bit-mlx"),
    ("qwen2-0.5b-4bit", "Qwen 2 0.5B (4-bit)", "mlx-community/Qwen1.5-0.5B-Chat-4bit"),
    ("qwen2.5-7b", "Qwen 2 5.7B", "mlx-community/Qwen2.5-7B-Instruct-4bit"),
    ("qwen2.5-1.5b", "Qwen 2 5.1 5B", "mlx-community/Qwen2.5-1.5B-Instruct-4bit"),
    ("smollm-135m-4bit", "SmolLM 135M (4-bit)", "mlx-community/SmolLM-135M-Instruct-4bit"),
    ("gemma3-1b-4bit", "Gemma 3 1B (4-bit)", "mlx-community/gemma-3-1b-it-qat-4bit"),
];

/// Read-only table mapping model ids to descriptors and labels.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: Vec<ModelCatalogEntry>,
}

impl ModelCatalog {
    pub fn new(entries: Vec<ModelCatalogEntry>) -> Self {
        Self { entries }
    }

    /// The models the app ships with.
    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_MODELS
                .iter()
                .map(|(name, display_name, repo_id)| {
                    ModelCatalogEntry::new(*name, *display_name, *repo_id)
                })
                .collect(),
        )
    }

    pub fn entries(&self) -> &[ModelCatalogEntry] {
        &self.entries
    }

    pub fn list(&self) -> Vec<CatalogListing> {
        self.entries
            .iter()
            .map(|e| CatalogListing {
                id: e.name.clone(),
                display_label: e.display_name.clone(),
            })
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entry(id).is_some()
    }

    pub fn resolve(&self, id: &str) -> Result<ModelDescriptor, LoadError> {
        self.entry(id)
            .map(ModelCatalogEntry::descriptor)
            .ok_or_else(|| LoadError::UnknownModel(id.to_string()))
    }

    /// Display label for `id`, falling back to the id itself.
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.entry(id)
            .map(|e| e.display_name.as_str())
            .unwrap_or(id)
    }

    fn entry(&self, id: &str) -> Option<&ModelCatalogEntry> {
        self.entries.iter().find(|e| e.name == id)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
