pub mod credentials;
pub mod domain;
pub mod engine;
pub mod pipeline;
pub mod reporter;
pub mod source;
pub mod traits;
