pub mod gemini_adapter;
pub mod openai_adapter;
pub mod relay;
pub mod rotation;
pub mod router;
pub mod sources;
pub mod sse;
pub mod types;

pub use gemini_adapter::{GeminiAdapter, GeminiConfig};
pub use openai_adapter::OpenAICompatAdapter;
pub use relay::StreamingRelay;
pub use rotation::Rotator;
pub use router::LLMRouter;
pub use types::{GenerationSettings, Message, ProviderAdapter, ProviderError, TokenSink};
