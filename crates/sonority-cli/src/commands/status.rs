use anyhow::Result;
use sonority_similarity::{Config, SimilarityService};

pub fn show_status(config: Config) -> Result<()> {
    let db_path = config.database_path.clone();
    let service = SimilarityService::open(config)?;
    let status = service.status()?;

    println!("\n📊 Sonority Status\n");
    println!("  Database: {}", db_path.display());
    println!("  Recordings: {}", status.recordings);
    println!("  Feature documents: {}", status.documents);

    println!("\n  {:<20} {:>10} {:>10} {:>9}  stats", "metric", "vectors", "pending", "failed");
    for metric in &status.metrics {
        let stats = match (metric.needs_stats, metric.has_stats) {
            (false, _) => "-",
            (true, true) => "✓",
            (true, false) => "missing",
        };
        let hidden = if metric.visible { "" } else { "  (hidden)" };
        println!(
            "  {:<20} {:>10} {:>10} {:>9}  {}{}",
            metric.name, metric.vectors, metric.pending, metric.failures, stats, hidden
        );
    }

    if status.indexes.is_empty() {
        println!("\n  No indexes built");
    } else {
        println!("\n  Indexes:");
        for key in &status.indexes {
            println!("    {}", key);
        }
    }

    if status.metrics.iter().any(|m| m.needs_stats && !m.has_stats) {
        println!("\n  Run `sonority stats compute` before computing vectors");
    } else if status.metrics.iter().any(|m| m.pending > 0) {
        println!("\n  Run `sonority metrics add` to compute pending vectors");
    }

    Ok(())
}
