use anyhow::{Context, Result};
use serde_json::json;
use sonority_core::model::{Mbid, Recording};
use sonority_similarity::{Config, DistanceType, SimilarityService};

#[derive(Debug)]
pub struct SimilarQuery {
    pub metric: String,
    pub mbid: Mbid,
    pub offset: u32,
    pub k: usize,
    pub distance: Option<DistanceType>,
    pub trees: Option<u32>,
}

pub fn similar(config: Config, query: &SimilarQuery, as_json: bool) -> Result<()> {
    let service = SimilarityService::open(config)?;
    let recording = Recording::new(query.mbid, query.offset);
    let results = service
        .get_similar(&query.metric, &recording, query.k, query.distance, query.trees)
        .with_context(|| format!("Similarity query for {} failed", recording))?;

    if as_json {
        let rows: Vec<_> = results
            .iter()
            .map(|(r, distance)| json!({"mbid": r.mbid, "offset": r.offset, "distance": distance}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Recordings similar to {} by {}:\n", recording, query.metric);
    for (i, (r, distance)) in results.iter().enumerate() {
        println!("  {:>3}. {}  {:.4}", i + 1, r, distance);
    }
    if results.is_empty() {
        println!("  (none)");
    }
    Ok(())
}

pub fn distance(config: Config, metric: &str, a: (Mbid, u32), b: (Mbid, u32)) -> Result<()> {
    let service = SimilarityService::open(config)?;
    let a = Recording::new(a.0, a.1);
    let b = Recording::new(b.0, b.1);

    match service.get_distance(metric, &a, &b)? {
        Some(distance) => println!("{:.6}", distance),
        None => println!("No distance: {} or {} is not in the {} index", a, b, metric),
    }
    Ok(())
}

pub fn path(
    config: Config,
    metric: &str,
    start: (Mbid, u32),
    end: (Mbid, u32),
    max_length: usize,
    as_json: bool,
) -> Result<()> {
    let service = SimilarityService::open(config)?;
    let start = Recording::new(start.0, start.1);
    let end = Recording::new(end.0, end.1);
    let steps = service
        .get_path(&start, &end, metric, max_length)
        .with_context(|| format!("No path from {} to {}", start, end))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&steps)?);
        return Ok(());
    }

    println!("Path from {} to {} by {}:\n", start, end, metric);
    for (i, step) in steps.iter().enumerate() {
        println!("  {:>3}. {}  {:.4}", i + 1, step.recording, step.distance);
    }
    Ok(())
}
