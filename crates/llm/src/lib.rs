pub mod gemini;
pub mod model;
pub mod retry;

pub use gemini::GeminiClient;
pub use model::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, LlmClient, LlmError,
    LlmRequest, LlmResponse, Part, Role, Usage,
};
pub use retry::{call_with_retry, RetryClassifier, RetryPolicy, RetryingLlm};
