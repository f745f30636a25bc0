use std::sync::Arc;

use crate::config::Config;
use crate::relay::MediaPlane;

/// Shared application state threaded through the signaling handlers
/// and the ingest task.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub media: Arc<MediaPlane>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let media = Arc::new(MediaPlane::new(config.rtp));
        Self { config, media }
    }
}
