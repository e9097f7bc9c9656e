use anyhow::Result;
use sonority_similarity::{Config, DistanceType, SimilarityService};

pub fn build_index(
    config: Config,
    metric: &str,
    distance: Option<DistanceType>,
    trees: Option<u32>,
) -> Result<()> {
    let service = SimilarityService::open(config)?;
    let summary = service.rebuild_index(metric, distance, trees)?;

    println!("\n✓ Built index {} over {} recordings", summary.key, summary.items);
    if let Some(path) = summary.path {
        println!("  Saved to {}", path.display());
    }
    Ok(())
}

pub fn remove_index(
    config: Config,
    metric: &str,
    distance: Option<DistanceType>,
    trees: Option<u32>,
) -> Result<()> {
    let service = SimilarityService::open(config)?;
    let key = service.index_config(metric, distance, trees)?.key();

    if service.remove_index(metric, distance, trees)? {
        println!("✓ Removed index {}", key);
    } else {
        println!("No index {} to remove", key);
    }
    Ok(())
}
