//! Typesafe events for the models module.
//!
//! Uses discriminated unions (tagged enums) so a front-end can switch on
//! `state` without inspecting the payload.

use serde::{Deserialize, Serialize};

/// Model loading state change event - single event stream for all loading state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ModelLoadingStateChanged {
    /// Model loading has started
    #[serde(rename = "started")]
    Started {
        #[serde(rename = "modelName")]
        model_name: String,
    },
    /// Fetch/load progress
    #[serde(rename = "progress")]
    Progress {
        #[serde(rename = "modelName")]
        model_name: String,
        fraction: f64,
    },
    /// Model loaded successfully
    #[serde(rename = "complete")]
    Complete {
        #[serde(rename = "modelName")]
        model_name: String,
        #[serde(rename = "parameterCount")]
        parameter_count: u64,
    },
    /// Model loading failed with an error
    #[serde(rename = "error")]
    Error {
        #[serde(rename = "modelName")]
        model_name: String,
        error: String,
    },
    /// Resident model was released
    #[serde(rename = "unloaded")]
    Unloaded {
        #[serde(rename = "modelName")]
        model_name: String,
    },
}
