pub mod classifier;
pub mod client;
pub mod credentials;
pub mod prompts;

pub use classifier::*;
pub use client::*;
pub use credentials::*;
pub use prompts::PromptTemplate;
