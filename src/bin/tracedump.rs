use clap::Parser;
use std::error::Error;
use std::process::exit;

use piotrace::trace_file::reader::TraceReader;

/// Program to print the contents of a waveform trace file
///
/// Dumps the header metadata, the variable directory and, unless
/// --header-only is given, every recorded value change in time
/// order. Refuses files that were never finalized.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to the trace file
    input: String,

    /// Only print the header and directory
    #[arg(long)]
    header_only: bool,
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let mut reader = TraceReader::open(&args.input)?;

    println!("comment:    {}", reader.comment());
    println!("timescale:  10^{} s", reader.timescale_exponent());
    println!("end time:   {}", reader.end_time());
    println!("blocks:     {}", reader.blocks().len());
    println!();
    println!("variables:");
    for variable in reader.directory() {
        println!(
            "  [{}] {} ({} bits, {:?})",
            variable.handle.raw(),
            variable.name,
            variable.bit_width,
            variable.direction
        );
    }

    if args.header_only {
        return Ok(());
    }

    let names: Vec<String> = reader
        .directory()
        .iter()
        .map(|variable| variable.name.clone())
        .collect();
    println!();
    println!("changes:");
    for event in reader.read_events()? {
        let name = names
            .get(event.handle.raw() as usize)
            .map(String::as_str)
            .unwrap_or("?");
        println!("  t={:<8} {}={:#x}", event.time, name, event.value);
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("tracedump: {e}");
        exit(1);
    }
}
