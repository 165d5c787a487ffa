//! CLI command definitions and dispatch.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::Value;

use crate::client::PzClient;
use crate::process::{ManagedProcess, PollOutcome, Selector};
use crate::upload::UploadRequest;

/// Client for the PZ Server photo-z catalog service.
#[derive(Parser)]
#[command(name = "pz")]
#[command(about = "Interact with the PZ Server: products, uploads and processes")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// API token generated on the PZ Server website.
    #[arg(long, global = true, env = "PZ_API_TOKEN")]
    pub token: Option<String>,

    /// Host alias (pz, pz-dev, localhost) or a full API root URL.
    #[arg(long, global = true, default_value = "pz", env = "PZ_API_HOST")]
    pub host: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// List the valid product types.
    Types,

    /// List the known data releases.
    Releases,

    /// List published products.
    Products(ProductsArgs),

    /// Show one product's metadata.
    Show(ShowArgs),

    /// Download a product archive.
    Download(DownloadArgs),

    /// Upload a new product.
    Upload(UploadArgs),

    /// Run the training-set-maker pipeline.
    Tsm(TsmArgs),

    /// Run the combine-specz pipeline.
    Csc(CscArgs),

    /// Check a process status by id.
    Status(StatusArgs),

    /// Ask the server to stop a process.
    Stop(StatusArgs),
}

#[derive(Parser)]
pub struct ProductsArgs {
    /// Filters as key=value pairs (e.g. release=lsst_dp1).
    #[arg(short, long)]
    pub filter: Vec<String>,
}

#[derive(Parser)]
pub struct ShowArgs {
    /// Product id or internal name.
    pub product: String,
}

#[derive(Parser)]
pub struct DownloadArgs {
    /// Product id or internal name.
    pub product: String,

    /// Directory the archive is written to.
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,
}

#[derive(Parser)]
pub struct UploadArgs {
    /// Display name for the new product.
    #[arg(long)]
    pub name: String,

    /// Product type name (e.g. redshift_catalog, training_set).
    #[arg(long = "type")]
    pub product_type: String,

    /// Main data file.
    #[arg(long)]
    pub main_file: PathBuf,

    /// Release name the product belongs to.
    #[arg(long)]
    pub release: Option<String>,

    /// Photo-z code tag.
    #[arg(long)]
    pub pz_code: Option<String>,

    /// Free-text description.
    #[arg(long)]
    pub description: Option<String>,

    /// Auxiliary files (repeatable).
    #[arg(long = "aux")]
    pub auxiliary: Vec<PathBuf>,

    /// Column associations as column=role pairs (roles: id, ra, dec, z,
    /// z_err, z_flag, survey).
    #[arg(short, long)]
    pub column: Vec<String>,

    /// Publish the product after associating columns.
    #[arg(long)]
    pub publish: bool,
}

#[derive(Parser)]
pub struct TsmArgs {
    /// Display name for the run.
    #[arg(long)]
    pub name: String,

    /// Spec-z catalog (product id or internal name).
    #[arg(long)]
    pub specz: String,

    /// Release (id or name).
    #[arg(long)]
    pub release: String,

    /// Block until the process reaches a terminal state.
    #[arg(long)]
    pub wait: bool,
}

#[derive(Parser)]
pub struct CscArgs {
    /// Display name for the run.
    #[arg(long)]
    pub name: String,

    /// Catalogs to combine, in order (product id or internal name,
    /// repeatable).
    #[arg(long = "catalog")]
    pub catalogs: Vec<String>,

    /// Block until the process reaches a terminal state.
    #[arg(long)]
    pub wait: bool,
}

#[derive(Parser)]
pub struct StatusArgs {
    /// Remote process id.
    pub process_id: i64,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}

fn parse_pair(raw: &str) -> anyhow::Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => bail!("expected key=value, got '{}'", raw),
    }
}

fn print_records(records: &[Value]) {
    for record in records {
        println!("{}", record);
    }
}

fn report_outcome(outcome: PollOutcome) -> anyhow::Result<()> {
    match outcome {
        PollOutcome::Successful { output } => {
            match output {
                Some(output) => println!(
                    "Done. Results registered as id={} (internal_name: {})",
                    output.id,
                    output.internal_name.as_deref().unwrap_or("-")
                ),
                None => println!("Done."),
            }
            Ok(())
        }
        PollOutcome::Failed { status, error } => {
            bail!(
                "process ended as {} ({})",
                status,
                error.map(|e| e.to_string()).unwrap_or_default()
            )
        }
        PollOutcome::TimedOut { status } => {
            bail!(
                "process still {} after the polling budget; keep monitoring it with `pz status`",
                status
            )
        }
    }
}

pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let token = cli
        .token
        .context("an API token is required (--token or PZ_API_TOKEN)")?;
    let client = PzClient::connect(&token, &cli.host).await?;

    match cli.command {
        Commands::Types => {
            print_records(&client.product_types().await?);
        }
        Commands::Releases => {
            print_records(&client.releases().await?);
        }
        Commands::Products(args) => {
            let filters = args
                .filter
                .iter()
                .map(|f| parse_pair(f))
                .collect::<anyhow::Result<Vec<_>>>()?;
            print_records(&client.products(&filters).await?);
        }
        Commands::Show(args) => {
            let product = client.product(&Selector::parse(&args.product)).await?;
            println!("{}", product.attributes());
        }
        Commands::Download(args) => {
            let product = client.product(&Selector::parse(&args.product)).await?;
            let path = product.download(&args.output).await?;
            println!("File saved as: {}", path.display());
        }
        Commands::Upload(args) => {
            let mut request =
                UploadRequest::new(&args.name, &args.product_type, &args.main_file)?;
            if let Some(release) = &args.release {
                request = request.with_release(release);
            }
            if let Some(pz_code) = &args.pz_code {
                request = request.with_pz_code(pz_code);
            }
            if let Some(description) = &args.description {
                request = request.with_description(description);
            }
            for aux in &args.auxiliary {
                request = request.with_auxiliary_file(aux)?;
            }

            let mut upload = client.upload(request).await?;
            println!("Registered product {}", upload.product_id());
            println!("Discovered columns: {}", upload.columns().join(", "));

            let associations = args
                .column
                .iter()
                .map(|c| parse_pair(c))
                .collect::<anyhow::Result<Vec<_>>>()?;
            if !associations.is_empty() {
                let pairs: Vec<(&str, &str)> = associations
                    .iter()
                    .map(|(column, role)| (column.as_str(), role.as_str()))
                    .collect();
                upload.make_columns_association(pairs).await?;
            }

            if args.publish {
                upload.save().await?;
                println!("Product {} published", upload.product_id());
            }
        }
        Commands::Tsm(args) => {
            let mut process = client.training_set_maker(&args.name).await?;
            process.set_specz(&Selector::parse(&args.specz)).await?;
            process.set_release(&Selector::parse(&args.release)).await?;
            if args.wait {
                let outcome = client.run_and_wait(&mut process).await?;
                report_outcome(outcome)?;
            } else {
                let info = process.run().await?;
                println!("Process {} submitted ({})", info.id, info.status);
            }
        }
        Commands::Csc(args) => {
            let mut process = client.combine_catalogs(&args.name).await?;
            for catalog in &args.catalogs {
                process.append_catalog(&Selector::parse(catalog)).await?;
            }
            if args.wait {
                let outcome = client.run_and_wait(&mut process).await?;
                report_outcome(outcome)?;
            } else {
                let info = process.run().await?;
                println!("Process {} submitted ({})", info.id, info.status);
            }
        }
        Commands::Status(args) => {
            println!("{}", client.process_status(args.process_id).await?);
        }
        Commands::Stop(args) => {
            client.stop_process(args.process_id).await?;
            println!("Stop requested for process {}", args.process_id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        assert_eq!(
            parse_pair("release=lsst_dp1").unwrap(),
            ("release".to_string(), "lsst_dp1".to_string())
        );
        assert!(parse_pair("no-separator").is_err());
    }
}
