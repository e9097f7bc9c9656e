use anyhow::Result;
use sonority_similarity::{Config, SimilarityService};

pub fn compute_stats(config: Config, sample_size: Option<u64>, force: bool) -> Result<()> {
    let service = SimilarityService::open(config)?;
    let report = service.compute_normalization_stats(sample_size, force)?;

    if report.computed.is_empty() && report.unusable.is_empty() {
        println!("Normalization stats already present for: {}", report.existing.join(", "));
        println!("\nUse --force to recompute them");
        return Ok(());
    }

    println!(
        "\n✓ Sampled {} of {} documents",
        report.sampled, report.population
    );
    for metric in &report.computed {
        println!("  ✓ {}", metric);
    }
    for metric in &report.unusable {
        println!("  ✗ {} (no usable documents in the sample)", metric);
    }
    Ok(())
}
