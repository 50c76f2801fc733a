use std::fs::File;
use std::io::{copy, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::process;

use clap::Parser;
use flate2::write::{GzEncoder, ZlibEncoder};
use log::{debug, error, info, warn};
use serde_json::value::RawValue;
use tempfile::NamedTempFile;

use dstore::generate::Kind;
use dstore::hash::data_hash;
use dstore::metadata::MetadataError;
use dstore::remote::mem::MemoryLedger;
use dstore::{Bytes32, Compression, Error, EsKey, Format, Generator, Metadata};

mod cli;
use crate::cli::Cli;
use crate::cli::Commands;
use crate::cli::Config;

fn main() {
    env_logger::init();

    // Parse the cli
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let config = Config::load(cli.config.as_deref())?;
    debug!("config: {:?}", config);

    match cli.command {
        Commands::Generate {
            input,
            compress,
            namespace,
            metadata,
            dry_run,
        } => generate(&config, &input, compress, &namespace, metadata, dry_run),
        Commands::Info { chain_id } => {
            let ledger = MemoryLedger::new(Some(&config.ledger))?;
            let md = Metadata::lookup(&ledger, &Bytes32::from_hex(&chain_id)?)?;

            println!("Data hash: {}", md.data_hash);
            println!("{}", serde_json::to_string_pretty(&md)?);
            Ok(())
        }
        Commands::Fetch { chain_id, output } => {
            let ledger = MemoryLedger::new(Some(&config.ledger))?;
            let md = Metadata::lookup(&ledger, &Bytes32::from_hex(&chain_id)?)?;

            // Download next to the output so the rename stays on one filesystem,
            // the temp file is removed on any failure
            let dir = match output.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            let tmp = md.download_with(&ledger, NamedTempFile::new_in(dir)?, config.workers)?;
            tmp.persist(&output).map_err(|e| e.error)?;

            info!("wrote {} bytes to {:?}", md.size, output);
            Ok(())
        }
    }
}

fn compress<R: Read>(format: &Format, mut data: R) -> Result<Vec<u8>, Error> {
    let level = flate2::Compression::default();
    let compressed = match format {
        Format::Gzip => {
            let mut enc = GzEncoder::new(Vec::new(), level);
            copy(&mut data, &mut enc)?;
            enc.finish()?
        }
        Format::Zlib => {
            let mut enc = ZlibEncoder::new(Vec::new(), level);
            copy(&mut data, &mut enc)?;
            enc.finish()?
        }
        Format::Unsupported(x) => return Err(MetadataError::Format(x.clone()).into()),
    };
    Ok(compressed)
}

fn generate(
    config: &Config,
    input: &Path,
    format: Option<Format>,
    namespace: &[String],
    app_metadata: Option<String>,
    dry_run: bool,
) -> Result<(), Error> {
    let key = match &config.signing_key {
        Some(seed) => EsKey::from_hex(seed)?,
        None => {
            warn!("no signing_key configured, using a fresh key for this run");
            EsKey::new()
        }
    };

    let mut file = File::open(input)?;
    let size = file.metadata()?.len();
    let hash = data_hash(&mut BufReader::new(&mut file))?;
    file.seek(SeekFrom::Start(0))?;
    debug!("{:?}: {} bytes, data hash {}", input, size, hash);

    let mut generator = Generator::new(size, hash).namespace(namespace);
    if let Some(json) = app_metadata {
        generator = generator.app_metadata(RawValue::from_string(json)?);
    }

    let generated = match format {
        None => generator.generate(&key, BufReader::new(file))?,
        Some(format) => {
            let compressed = compress(&format, BufReader::new(file))?;
            info!("compressed {} bytes to {}", size, compressed.len());

            generator
                .compression(Compression::new(format, compressed.len() as u64))
                .generate(&key, &compressed[..])?
        }
    };

    println!("ChainID: {}", generated.chain_id);
    println!(
        "Entries: {} ({} index, {} data blocks)",
        generated.entries.len(),
        generated.count(Kind::Index),
        generated.count(Kind::DataBlock)
    );
    println!("Total cost: {} entry credits", generated.total_cost);

    if dry_run {
        return Ok(());
    }

    let ledger = MemoryLedger::new(Some(&config.ledger))?;
    generated.submit(&ledger)?;
    println!("Submitted to {:?}", config.ledger);
    Ok(())
}
