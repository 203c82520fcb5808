//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use autorfp_core::ports::{
    DatabaseService, DocumentParsingService, QuestionExtractionService, ResponseGenerationService,
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub parser: Arc<dyn DocumentParsingService>,
    pub extractor: Arc<dyn QuestionExtractionService>,
    pub generator: Arc<dyn ResponseGenerationService>,
}
