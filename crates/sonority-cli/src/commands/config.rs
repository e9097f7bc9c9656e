use anyhow::Result;
use sonority_similarity::{config, Config};

/// Show the current effective configuration.
pub fn show_config() -> Result<()> {
    let config = Config::load()?;

    println!("Current Configuration");
    println!("=====================\n");

    println!("Config file: {}", config::config_file_path().display());

    let exists = config::config_file_path().exists();
    println!("File exists: {}\n", if exists { "yes" } else { "no (using defaults)" });

    println!("Settings:");
    println!("  database_path: {}", config.database_path.display());
    println!("  index_dir: {}", config.index_dir.display());
    println!(
        "  catalog_path: {}",
        config
            .catalog_path
            .as_ref()
            .map_or_else(|| String::from("<built-in>"), |p| p.display().to_string())
    );
    println!("  batch_size: {}", config.batch_size);
    println!("  stats.sample_size: {}", config.stats.sample_size);
    println!("  stats.min_sample_fraction: {}", config.stats.min_sample_fraction);
    println!("  index.default_distance: {}", config.index.default_distance);
    println!("  index.default_trees: {}", config.index.default_trees);
    println!("  index.leaf_size: {}", config.index.leaf_size);
    println!("  path.initial_neighbours: {}", config.path.initial_neighbours);
    println!("  path.growth_factor: {}", config.path.growth_factor);
    println!("  path.max_stall_steps: {}", config.path.max_stall_steps);
    println!("  path.sample_fraction: {}", config.path.sample_fraction);

    println!("\nPriority: CLI args > ENV vars (SONORITY_*) > Config file > Defaults");

    Ok(())
}

/// Show the config file path.
pub fn show_path() -> Result<()> {
    println!("{}", config::config_file_path().display());
    Ok(())
}

/// Show example configuration.
pub fn show_example() -> Result<()> {
    print!("{}", config::example_config());
    Ok(())
}

/// Initialize config file with defaults.
pub fn init_config() -> Result<()> {
    let created = config::ensure_config_file()?;
    let config_path = config::config_file_path();

    if created {
        println!("✓ Created config file: {}", config_path.display());
        println!("\nEdit this file to configure sonority.");
    } else {
        println!("Config file already exists: {}", config_path.display());
    }

    Ok(())
}
