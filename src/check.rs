use anyhow::Context;

use crate::cli::CheckArgs;
use crate::dataset;
use crate::storage::DataPaths;

/// Load the sources once through the same path the server uses and log
/// a summary, so broken data is caught before a deploy.
pub fn run(args: CheckArgs) -> anyhow::Result<()> {
    let paths = DataPaths::new(&args.data_dir, &args.data_file, &args.geojson_file);
    let bundle = dataset::load_bundle(&paths).context("load data sources")?;

    tracing::info!("case rows: {}", bundle.records.len());
    tracing::info!("districts in boundary file: {}", bundle.code_to_name.len());
    tracing::info!("distinct diseases: {}", bundle.disease_pairs.len());
    match (bundle.years.first(), bundle.years.last()) {
        (Some(first), Some(last)) => tracing::info!("years: {first}..={last}"),
        _ => tracing::warn!("no valid years in case table"),
    }
    Ok(())
}
