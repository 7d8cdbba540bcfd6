pub mod authority;
pub mod factory;
pub mod identity;
pub mod key_source;
pub mod path;
pub mod pipeline;
pub mod policy;
pub mod token;

pub use factory::build_auth_pipeline;
pub use pipeline::AuthPipeline;
pub use token::{TokenVerifier, VerifierPolicy};
