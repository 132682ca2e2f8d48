pub mod schema;

#[allow(unused_imports)]
pub use schema::{
    resolve_path, Config, GatewayConfig, ObservabilityConfig, ProviderConfig, SessionsConfig,
    TemplatesConfig,
};
