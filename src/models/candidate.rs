use super::provider::Protocol;

/// Runtime derivative of a Binding+Provider pair. Created per request,
/// never persisted.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub binding_id: i64,
    pub provider_id: i64,
    pub provider_name: String,
    pub base_url: String,
    pub protocol: Protocol,
    pub api_key: Option<String>,
    pub target_model: String,
    pub priority: i32,
    pub weight: i64,
}
