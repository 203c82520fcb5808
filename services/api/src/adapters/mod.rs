pub mod db;
pub mod extraction_llm;
pub mod generation_llm;
pub mod llama_parse;
pub mod llm;
pub mod retry;

pub use db::DbAdapter;
pub use extraction_llm::OpenAiExtractionAdapter;
pub use generation_llm::OpenAiGenerationAdapter;
pub use llama_parse::LlamaParseAdapter;
pub use llm::JsonChat;
