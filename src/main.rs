use anyhow::{bail, Result};
use std::env;
use std::path::PathBuf;

use finlink::Pipeline;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() > 1 && args[1] == "run" {
        run_pipeline(&args[2..])?;
    } else {
        print_usage();
    }

    Ok(())
}

fn print_usage() {
    println!("finlink {} - campaign finance standardization", finlink::VERSION);
    println!();
    println!("usage:");
    println!("  finlink run <schema.yaml> <config-dir> <raw-dir> <output-dir>");
    println!();
    println!("  schema.yaml  table definitions, relations and inheritance");
    println!("  config-dir   one source config YAML per jurisdiction");
    println!("  raw-dir      raw disclosure files, matched by path_pattern");
    println!("  output-dir   normalized CSVs, id_mapping.csv, run_report.json");
}

fn run_pipeline(args: &[String]) -> Result<()> {
    if args.len() != 4 {
        print_usage();
        bail!("run takes exactly 4 arguments");
    }

    let pipeline = Pipeline {
        schema_path: PathBuf::from(&args[0]),
        config_dir: PathBuf::from(&args[1]),
        raw_dir: PathBuf::from(&args[2]),
        output_dir: PathBuf::from(&args[3]),
    };

    println!("🗂️  Loading schema and source configs...");
    let report = pipeline.run()?;

    println!("✓ Pipeline complete");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    print!("{}", report.summary());

    if !report.failed_sources.is_empty() {
        println!("⚠️  failed sources: {}", report.failed_sources.join(", "));
    }
    for source in &report.sources {
        if !source.unmapped_enum_values.is_empty() {
            println!(
                "⚠️  {}: unmapped enum values in {} column(s)",
                source.source_key,
                source.unmapped_enum_values.len()
            );
        }
        if !source.out_of_enum_values.is_empty() {
            println!(
                "⚠️  {}: out-of-set enum values in {} column(s)",
                source.source_key,
                source.out_of_enum_values.len()
            );
        }
    }

    Ok(())
}
