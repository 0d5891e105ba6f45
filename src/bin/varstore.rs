//! varstore
//!
//! Inspect and edit a variable store image file

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use varstore::{
    Attributes, FileCounter, FileRegion, Guid, StoreConfig, VariableName, VariableService,
    VariableServiceBuilder, VariableServices,
};

#[derive(Parser, Debug)]
#[command(name = "varstore")]
#[command(about = "Inspect and edit a firmware variable store image")]
struct Args {
    /// Path to the store image (two banks back to back)
    #[arg(short = 'i', long)]
    image: PathBuf,

    /// Store configuration (TOML)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Integrity key for protected variables, hex encoded
    #[arg(short = 'k', long)]
    key: String,

    /// Trusted counter file [default: <image>.counter]
    #[arg(long)]
    counter: Option<PathBuf>,

    /// Policy entries to register (JSON array)
    #[arg(short = 'p', long)]
    policies: Option<PathBuf>,

    /// Reset protected variables if verification fails
    #[arg(long)]
    reset_on_violation: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty store image
    Format,

    /// List variables
    List,

    /// Print a variable's value
    Get {
        name: String,

        #[arg(short = 'n', long, default_value_t = Guid::GLOBAL_VARIABLE)]
        namespace: Guid,

        /// Print the value as hex
        #[arg(long)]
        hex: bool,
    },

    /// Create or replace a variable
    Set {
        name: String,

        value: String,

        #[arg(short = 'n', long, default_value_t = Guid::GLOBAL_VARIABLE)]
        namespace: Guid,

        /// Attribute mask, e.g. 0x7
        #[arg(short = 'a', long, default_value = "0x7", value_parser = parse_attributes)]
        attributes: Attributes,

        /// Interpret the value as hex
        #[arg(long)]
        hex: bool,

        /// Append to the existing value
        #[arg(long)]
        append: bool,
    },

    /// Delete a variable
    Delete {
        name: String,

        #[arg(short = 'n', long, default_value_t = Guid::GLOBAL_VARIABLE)]
        namespace: Guid,
    },

    /// Show space usage
    Info,

    /// Reclaim space held by deleted variables
    Compact,
}

fn parse_attributes(s: &str) -> Result<Attributes, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16)
        .map(Attributes::from_bits_retain)
        .map_err(|e| format!("Invalid attribute mask '{}': {}", s, e))
}

fn load_config(path: Option<&Path>) -> Result<StoreConfig> {
    match path {
        Some(path) => StoreConfig::from_file(path)
            .with_context(|| format!("Failed to load config {:?}", path)),
        None => Ok(StoreConfig::default()),
    }
}

fn open_service(args: &Args, config: StoreConfig) -> Result<VariableService<FileRegion>> {
    let key = hex::decode(&args.key).context("Integrity key must be hex")?;
    let banks = FileRegion::open_banks(&args.image)
        .with_context(|| format!("Failed to open store image {:?}", args.image))?;

    let mut builder = VariableServiceBuilder::new()
        .config(config)
        .counter(Box::new(FileCounter::new(counter_path(args))))
        .integrity_key(&key);
    if args.reset_on_violation {
        builder = builder.reset_on_violation();
    }
    let service = builder.build(banks)?;

    if let Some(path) = &args.policies {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read policies {:?}", path))?;
        let count = service.load_policies_json(&json)?;
        info!("Registered {} policies from {:?}", count, path);
    }

    Ok(service)
}

fn counter_path(args: &Args) -> PathBuf {
    args.counter
        .clone()
        .unwrap_or_else(|| args.image.with_extension("counter"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match &args.command {
        Command::Format => {
            FileRegion::create_banks(&args.image, config.bank_size)
                .with_context(|| format!("Failed to create store image {:?}", args.image))?;
            let counter = counter_path(&args);
            if counter.exists() {
                std::fs::remove_file(&counter)?;
            }
            open_service(&args, config)?;
            println!("Formatted {:?}", args.image);
        }

        Command::List => {
            let service = open_service(&args, config)?;
            for record in service.variables()? {
                println!(
                    "{}  {:<32} {:#06x} {:>6} bytes",
                    record.namespace,
                    record.name,
                    record.attributes.bits(),
                    record.data.len()
                );
            }
        }

        Command::Get {
            name,
            namespace,
            hex: as_hex,
        } => {
            let service = open_service(&args, config)?;
            let name = VariableName::new(name.as_str())?;
            let mut buffer = vec![0u8; service.config().max_variable_size];
            let (attributes, len) = service.get_variable(&name, namespace, &mut buffer)?;
            let data = &buffer[..len];

            println!("attributes: {:#06x}", attributes.bits());
            if *as_hex {
                println!("{}", hex::encode(data));
            } else {
                println!("{}", String::from_utf8_lossy(data));
            }
        }

        Command::Set {
            name,
            value,
            namespace,
            attributes,
            hex: as_hex,
            append,
        } => {
            let service = open_service(&args, config)?;
            let name = VariableName::new(name.as_str())?;
            let data = if *as_hex {
                hex::decode(value).context("Value is not valid hex")?
            } else {
                value.as_bytes().to_vec()
            };
            if data.is_empty() {
                bail!("Value is empty; use `delete` to remove a variable");
            }

            let mut attributes = *attributes;
            if *append {
                attributes |= Attributes::APPEND_WRITE;
            }
            service.set_variable(&name, namespace, attributes, &data)?;
            println!("Set {}:{} ({} bytes)", namespace, name, data.len());
        }

        Command::Delete { name, namespace } => {
            let service = open_service(&args, config)?;
            let name = VariableName::new(name.as_str())?;
            service.set_variable(&name, namespace, Attributes::empty(), &[])?;
            println!("Deleted {}:{}", namespace, name);
        }

        Command::Info => {
            let service = open_service(&args, config)?;
            let usage = service.nv_usage();
            let query = service.query_variable_info(Attributes::DEFAULT_NV)?;

            println!("Capacity:        {} bytes", usage.capacity);
            println!("Live:            {} bytes", usage.live_bytes);
            println!("Reclaimable:     {} bytes", usage.reclaimable_bytes);
            println!("Free:            {} bytes", usage.free_bytes);
            println!("Max variable:    {} bytes", query.maximum_variable_size);
            println!("Variables:       {}", service.variables()?.len());
        }

        Command::Compact => {
            let service = open_service(&args, config)?;
            let before = service.nv_usage();
            service.compact()?;
            let after = service.nv_usage();
            println!(
                "Compacted: {} -> {} bytes free",
                before.free_bytes, after.free_bytes
            );
        }
    }

    Ok(())
}
