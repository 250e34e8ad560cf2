use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::anyhow;
use clap::{Parser as ClapParser, ValueEnum};
use withy::lineage::{QueryLineage, extract_lineage};
use withy::mermaid::lineage_to_mermaid;
use withy::parser::{parse_serialized_sql, unwrap_fixture_format};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Mermaid,
}

#[derive(clap::Parser)]
#[command(name = "withy")]
#[command(about = "Table-level lineage from DuckDB json_serialize_sql() output", long_about = None)]
#[command(disable_version_flag = true)]
struct Cli {
    /// Path to the JSON file. Reads stdin when omitted.
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
    /// Print version.
    #[arg(short = 'v', long)]
    version: bool,
}

fn read_input(file: Option<&PathBuf>) -> anyhow::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|err| anyhow!("Error reading file: {}", err)),
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .map_err(|err| anyhow!("Error reading stdin: {}", err))?;
            Ok(input)
        }
    }
}

fn render(lineages: &[QueryLineage], format: OutputFormat) -> anyhow::Result<String> {
    let out = match format {
        OutputFormat::Json => serde_json::to_string_pretty(lineages)?,
        OutputFormat::Mermaid => lineages
            .iter()
            .enumerate()
            .map(|(idx, lineage)| {
                let diagram = lineage_to_mermaid(lineage);
                if lineages.len() > 1 {
                    format!("%% Statement {}\n{}", idx + 1, diagram)
                } else {
                    diagram
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n"),
    };
    Ok(out)
}

fn main() -> anyhow::Result<ExitCode> {
    let now = Instant::now();

    env_logger::init();
    let cli = Cli::parse();

    if cli.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    let input = match read_input(cli.file.as_ref()) {
        Ok(input) => input,
        Err(err) => {
            eprintln!("{}", err);
            return Ok(ExitCode::FAILURE);
        }
    };

    let serialized = match parse_serialized_sql(&unwrap_fixture_format(&input)) {
        Ok(serialized) => serialized,
        Err(err) => {
            eprintln!("{}", err);
            return Ok(ExitCode::FAILURE);
        }
    };

    let lineages = extract_lineage(&serialized.statements);
    println!("{}", render(&lineages, cli.format)?);

    let elapsed = now.elapsed();
    log::info!("Elapsed: {:.2?}", elapsed);

    Ok(ExitCode::SUCCESS)
}
