use crate::error::CliResult;
use colored::Colorize;
use podgraph_change::{ChangePipeline, FixtureQueryEngine, PipelineConfig};
use std::sync::Arc;

pub fn run(config: PipelineConfig) -> CliResult<()> {
    let pipeline = ChangePipeline::builder(config)
        .query_engine(Arc::new(FixtureQueryEngine::new()))
        .build()?;

    println!("{}", "pipeline config is valid".green().bold());
    for (position, name) in pipeline.stage_names().iter().enumerate() {
        println!("  {}. {name}", position + 1);
    }
    println!(
        "{} {}",
        "default backend:".bold(),
        pipeline.default_backend().id()
    );
    Ok(())
}
