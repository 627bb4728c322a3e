use serde::{Deserialize, Serialize};

/// Tradable instrument listed by the trading API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub class: String,
    pub exchange: String,
    pub symbol: String,
    pub name: String,
    pub status: String,
    pub tradable: bool,
    pub attributes: Vec<String>,
}

impl Asset {
    pub fn is_options_enabled(&self) -> bool {
        self.attributes.iter().any(|a| a == "options_enabled")
    }
}
