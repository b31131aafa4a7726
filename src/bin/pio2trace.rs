use clap::Parser;
use clap_num::maybe_hex;
use std::error::Error;
use std::process::exit;

use piotrace::emulator::{clock_cycles_reached, Emulation};
use piotrace::instr::decode::decode;
use piotrace::program::Program;
use piotrace::registry::Registry;
use piotrace::state::State;
use piotrace::trace_file::writer::Session;
use piotrace::trace_file::Compression;

/// Program to record an emulated PIO state machine into a waveform
/// trace file
///
/// The input is a program image file holding the assembled machine
/// words of a PIO program. Excess white space is ignored, and any
/// remaining part of a line starting from # is a comment. The file
/// contains sections, indicated by a label that begins with a dot;
/// the .program section holds INDEX WORD pairs in hexadecimal
/// (without an 0x prefix), one instruction per line. Omitted
/// indexes are filled with the all-zero word.
///
/// The state machine starts from the reset state and runs for the
/// requested number of clock cycles. Each cycle, the clock,
/// program counter, pin values and both scratch registers are
/// compared with the previous cycle and any changes are appended
/// to the output trace file, which can be inspected with
/// tracedump.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to the program image file
    #[arg(short, long)]
    input: String,

    /// Path to the output trace file
    #[arg(short, long, default_value = "out.trace")]
    output: String,

    /// Number of clock cycles to emulate (decimal, or hex with 0x)
    #[arg(short, long, value_parser = maybe_hex::<u32>)]
    samples: u32,

    /// Comment to embed in the trace file header
    #[arg(long)]
    comment: Option<String>,

    /// Store trace blocks uncompressed
    #[arg(long)]
    plain: bool,

    /// Print the program listing and each state transition
    #[arg(short, long)]
    debug: bool,
}

fn print_listing(program: &Program) {
    for (index, word) in program.words().iter().enumerate() {
        let asm = match decode(*word) {
            Ok(instr) => instr.to_string(),
            Err(_) => "unknown/not instruction".to_string(),
        };
        println!("{index:0>2x}  {word:0>4x}  # {asm}");
    }
}

fn print_transition(current: &State) {
    println!(
        "{:>8}  pc={:<2} gpio={:08x} x={:08x} y={:08x}",
        current.clock,
        current.program_counter,
        current.pin_values,
        current.x_register,
        current.y_register
    );
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let program = Program::from_image_file(&args.input)?;
    if args.debug {
        print_listing(&program);
    }

    let compression = if args.plain {
        Compression::None
    } else {
        Compression::Block
    };
    let mut session = Session::create(&args.output, compression)?;
    session.set_comment(
        args.comment
            .as_deref()
            .unwrap_or("PIO state machine trace emitted by pio2trace"),
    )?;
    let registry = Registry::pio_outputs(&mut session)?;

    let initial_state = State::default();
    registry.write_initial_values(&mut session, &initial_state)?;

    let emulation = Emulation::new(
        &program,
        initial_state,
        clock_cycles_reached(args.samples),
    );
    for transition in emulation {
        let (previous_state, current_state) = transition?;
        if args.debug {
            print_transition(&current_state);
        }
        registry.write_changed_values(&mut session, &previous_state, &current_state)?;
    }

    // An error above leaves the file unsealed, which readers
    // reject as incomplete
    session.finalize()?;
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("pio2trace: {e}");
        exit(1);
    }
}
