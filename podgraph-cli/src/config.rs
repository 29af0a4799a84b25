use crate::error::CliResult;
use podgraph_change::PipelineConfig;
use std::path::Path;

/// Load the pipeline config from `path`, or the built-in defaults (one
/// catch-all in-memory backend named `default`).
pub fn load_pipeline_config(path: Option<&Path>) -> CliResult<PipelineConfig> {
    let config = match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading pipeline config");
            PipelineConfig::from_file(path)?
        }
        None => PipelineConfig::default(),
    };
    Ok(config)
}
