use clap::Parser;
use prjfasm::assemble::assemble;
use prjfasm_db::PartDatabase;
use prjfasm_xc7::packet::{build_configuration_package, type2_packet_data};
use prjfasm_xc7::writer::write_bitstream;
use prjfasm_xc7::Frames;
use simple_error::bail;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

const GENERATOR_NAME: &str = "fpga-assembler";

#[derive(Debug, Parser)]
#[command(
    name = "fasm2bit",
    about = "Assemble a sequence of FASM lines into a Xilinx 7-series bitstream.\n\
             Output is written to stdout."
)]
struct Args {
    /// Path to the root folder containing the prjxray database for the FPGA
    /// family. If not present, it must be provided via PRJXRAY_DB_PATH.
    #[arg(long = "prjxray_db_path")]
    prjxray_db_path: Option<PathBuf>,

    /// FPGA part name, e.g. "xc7a35tcsg324-1".
    #[arg(long)]
    part: String,

    /// Input FASM file; "-" or absent reads stdin.
    input: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let db_path = match args.prjxray_db_path {
        Some(path) => path,
        None => match std::env::var_os("PRJXRAY_DB_PATH") {
            Some(value) => PathBuf::from(value),
            None => bail!(
                "flag --prjxray_db_path not provided either via commandline or \
                 environment variable (PRJXRAY_DB_PATH)"
            ),
        },
    };
    if !db_path.exists() {
        bail!("invalid prjxray-db path: {}", db_path.display());
    }

    let mut db = PartDatabase::open(&db_path, &args.part)?;

    let input = args.input.filter(|path| path.as_os_str() != "-");
    let source_name = input
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "fasm".to_string());

    let mut frames = Frames::new();
    match input {
        Some(path) => assemble(BufReader::new(File::open(path)?), &mut db, &mut frames)?,
        None => assemble(io::stdin().lock(), &mut db, &mut frames)?,
    }

    log::info!("assembled {} frames for {}", frames.len(), args.part);
    let packets = build_configuration_package(db.part().idcode, type2_packet_data(&frames));
    write_bitstream(
        &mut io::stdout().lock(),
        &packets,
        &args.part,
        &source_name,
        GENERATOR_NAME,
    )?;
    Ok(())
}
