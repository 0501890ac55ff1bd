use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Authentication applied to every outbound request of a run.
///
/// Held in memory for the run's lifetime only; credentials are never written
/// to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthSpec {
    /// Bearer-token authentication (`Authorization: Bearer <token>`).
    Jwt {
        #[serde(default)]
        token: String,
    },

    /// HTTP Basic authentication.
    Basic {
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
    },

    /// A named header plus an optional auxiliary header map.
    Header {
        #[serde(default)]
        name: String,
        #[serde(default)]
        value: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}
