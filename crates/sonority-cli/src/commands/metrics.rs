use anyhow::Result;
use sonority_similarity::{Config, SimilarityService};

/// List catalog metrics grouped by category. Hidden metrics are only
/// listed with `all`.
pub fn list_metrics(config: Config, all: bool) -> Result<()> {
    let service = SimilarityService::open(config)?;
    let catalog = service.catalog();

    if all {
        for metric in catalog.iter() {
            let marker = if metric.visible { " " } else { "-" };
            println!(
                "{} {:<20} {:<10} {}",
                marker, metric.name, metric.category, metric.description
            );
        }
        return Ok(());
    }

    for (category, metrics) in catalog.by_category() {
        println!("{}", category);
        for (name, description) in metrics {
            println!("  {:<20} {}", name, description);
        }
    }
    Ok(())
}

pub fn add_metrics(config: Config, batch_size: Option<usize>, force: bool) -> Result<()> {
    let service = SimilarityService::open(config)?;
    let report = service.add_metrics(batch_size, force)?;

    if force {
        println!("\n✓ Recomputed metric vectors");
    } else {
        println!("\n✓ Computed metric vectors");
    }
    println!("  Processed: {}", report.processed);
    println!("  Inserted: {}", report.inserted);
    if report.failures > 0 {
        println!("  Failed: {} (see warnings above)", report.failures);
    }
    Ok(())
}

pub fn add_hybrid(config: Config, name: &str, category: &str, description: &str) -> Result<()> {
    let mut service = SimilarityService::open(config)?;
    let hybrid = service.add_hybrid(name, category, description)?;

    println!("✓ Added hybrid metric {}", hybrid.name);
    println!("  Source: {}", hybrid.source.describe());
    println!("  Dimensions: {}", hybrid.length());
    println!("  Run `sonority metrics add` to compute its vectors");
    Ok(())
}

pub fn set_visibility(config: Config, name: &str, visible: bool) -> Result<()> {
    let mut service = SimilarityService::open(config)?;
    service.set_metric_visibility(name, visible)?;

    if visible {
        println!("✓ {} is listed again", name);
    } else {
        println!("✓ {} is hidden from listings", name);
    }
    Ok(())
}

pub fn remove_metric(config: Config, name: &str, keep_stats: bool) -> Result<()> {
    let service = SimilarityService::open(config)?;
    let removed = service.remove_metric(name, keep_stats)?;

    println!("✓ Removed {} vectors for {}", removed.vectors, name);
    if removed.stats {
        println!("  Normalization stats deleted");
    }
    Ok(())
}
