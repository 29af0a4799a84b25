use crate::error::{CliError, CliResult};
use crate::input::{read_input, read_json};
use colored::Colorize;
use podgraph_change::{
    ChangePipeline, FileReferenceLoader, FixtureQueryEngine, MemorySliceSchemaSource,
    PipelineConfig, RecordsQuery, ReferenceLoaders, SliceSchema,
};
use podgraph_core::ChangeRequest;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct ApplyArgs<'a> {
    pub request: &'a Path,
    pub query_fixtures: Option<&'a Path>,
    pub refs_root: Option<&'a Path>,
    pub slice_schemas: &'a [PathBuf],
    pub show_records: bool,
}

pub async fn run(config: PipelineConfig, args: ApplyArgs<'_>) -> CliResult<()> {
    let content = read_input(args.request)?;
    let request: ChangeRequest = serde_json::from_str(&content)?;

    let query = match args.query_fixtures {
        Some(path) => FixtureQueryEngine::from_file(path)
            .await
            .map_err(|e| CliError::Input(e.to_string()))?,
        None => FixtureQueryEngine::new(),
    };

    let files = match args.refs_root {
        Some(root) => FileReferenceLoader::with_root(root),
        None => FileReferenceLoader::new(),
    };

    let schemas = MemorySliceSchemaSource::new();
    for path in args.slice_schemas {
        let schema: SliceSchema = read_json(path)?;
        schemas.insert(request.pod_id.clone(), schema);
    }

    let pipeline = ChangePipeline::builder(config)
        .query_engine(Arc::new(query))
        .reference_loaders(ReferenceLoaders::new().with(Arc::new(files)))
        .slice_schemas(Arc::new(schemas))
        .build()?;

    let request_id = request.id.clone();
    let pod_id = request.pod_id.clone();
    let report = pipeline.process(request).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if args.show_records {
        let backend = pipeline.default_backend();
        let page = backend
            .get(
                &RecordsQuery::new(&pod_id)
                    .with_change_request(&request_id)
                    .with_limit(usize::MAX),
            )
            .await?;
        eprintln!(
            "{} {} record(s) in backend '{}'",
            "stored:".green().bold(),
            page.items.len(),
            backend.id()
        );
        for record in &page.items {
            println!("{record}");
        }
    }

    if report.status().is_success() {
        return Ok(());
    }
    Err(CliError::RequestFailed(format!(
        "{} {}",
        report.status(),
        report.error_message.as_deref().unwrap_or_default()
    )))
}
