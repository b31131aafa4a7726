use std::fmt;

pub mod decode;
pub mod fields;

/// PIO Instructions
///
/// One variant per instruction class in the 16-bit machine-word
/// encoding. Operand names follow the assembly mnemonics. Every
/// variant executes in one clock cycle, unless it stalls (WAIT with
/// an unsatisfied condition, IRQ with the wait flag).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Conditional jump. If the condition holds, the program counter
    /// is set to address; otherwise execution falls through to the
    /// next instruction. The X-- and Y-- conditions test the
    /// register against zero and then decrement it whether or not
    /// the jump is taken.
    Jmp { condition: JmpCondition, address: u8 },
    /// Stall until the selected pin or interrupt flag matches
    /// polarity. The program counter stays on the wait instruction
    /// while it is stalled; the clock keeps counting.
    Wait {
        polarity: bool,
        source: WaitSource,
        index: u8,
    },
    /// Shift bit_count bits from the source into the input shift
    /// register. bit_count is 1 to 32.
    In { source: InSource, bit_count: u32 },
    /// Shift bit_count bits out of the output shift register into
    /// the destination. bit_count is 1 to 32.
    Out {
        destination: OutDestination,
        bit_count: u32,
    },
    /// Copy (optionally inverted or bit-reversed) source into
    /// destination. Moving to the program counter is a jump; moving
    /// to a shift register reloads it and clears its counter.
    Mov {
        destination: MovDestination,
        op: MovOp,
        source: MovSource,
    },
    /// Set or clear interrupt flag index. With the wait flag, stall
    /// after raising the interrupt until the flag is cleared.
    Irq { clear: bool, wait: bool, index: u8 },
    /// Write the 5-bit immediate to the destination
    Set { destination: SetDestination, data: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JmpCondition {
    /// Unconditional
    Always,
    /// Scratch X is zero
    XIsZero,
    /// Scratch X is non-zero, then decrement X
    XNonZeroPostDecrement,
    /// Scratch Y is zero
    YIsZero,
    /// Scratch Y is non-zero, then decrement Y
    YNonZeroPostDecrement,
    /// X differs from Y
    XNotEqualY,
    /// The jump pin (GPIO 0 in this single-machine model) is high
    Pin,
    /// The output shift register still holds unshifted bits
    OsrNotEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitSource {
    /// Absolute GPIO index
    Gpio,
    /// Input-mapped pin; the input mapping starts at GPIO 0 here,
    /// so this is equivalent to Gpio
    Pin,
    /// Interrupt flag. Waiting for polarity 1 clears the flag once
    /// it is seen set.
    Irq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InSource {
    Pins,
    X,
    Y,
    Null,
    Isr,
    Osr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutDestination {
    Pins,
    X,
    Y,
    Null,
    PinDirs,
    Pc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovDestination {
    Pins,
    X,
    Y,
    Pc,
    Isr,
    Osr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovOp {
    None,
    Invert,
    BitReverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovSource {
    Pins,
    X,
    Y,
    Null,
    Isr,
    Osr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetDestination {
    Pins,
    X,
    Y,
    PinDirs,
}

/// A decoded instruction: the operation plus the delay field
///
/// The delay is taken from bits 12:8 of the machine word and gives
/// the number of idle cycles inserted after the instruction
/// completes (after any stall resolves).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub delay: u8,
    pub operation: Operation,
}

impl fmt::Display for JmpCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            Self::Always => "",
            Self::XIsZero => "!x ",
            Self::XNonZeroPostDecrement => "x-- ",
            Self::YIsZero => "!y ",
            Self::YNonZeroPostDecrement => "y-- ",
            Self::XNotEqualY => "x!=y ",
            Self::Pin => "pin ",
            Self::OsrNotEmpty => "!osre ",
        };
        write!(f, "{text}")
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Jmp { condition, address } => {
                write!(f, "jmp {condition}{address}")
            }
            Self::Wait {
                polarity,
                source,
                index,
            } => {
                let source = match source {
                    WaitSource::Gpio => "gpio",
                    WaitSource::Pin => "pin",
                    WaitSource::Irq => "irq",
                };
                write!(f, "wait {} {source} {index}", u8::from(*polarity))
            }
            Self::In { source, bit_count } => {
                let source = match source {
                    InSource::Pins => "pins",
                    InSource::X => "x",
                    InSource::Y => "y",
                    InSource::Null => "null",
                    InSource::Isr => "isr",
                    InSource::Osr => "osr",
                };
                write!(f, "in {source}, {bit_count}")
            }
            Self::Out {
                destination,
                bit_count,
            } => {
                let destination = match destination {
                    OutDestination::Pins => "pins",
                    OutDestination::X => "x",
                    OutDestination::Y => "y",
                    OutDestination::Null => "null",
                    OutDestination::PinDirs => "pindirs",
                    OutDestination::Pc => "pc",
                };
                write!(f, "out {destination}, {bit_count}")
            }
            Self::Mov {
                destination,
                op,
                source,
            } => {
                let destination = match destination {
                    MovDestination::Pins => "pins",
                    MovDestination::X => "x",
                    MovDestination::Y => "y",
                    MovDestination::Pc => "pc",
                    MovDestination::Isr => "isr",
                    MovDestination::Osr => "osr",
                };
                let op = match op {
                    MovOp::None => "",
                    MovOp::Invert => "!",
                    MovOp::BitReverse => "::",
                };
                let source = match source {
                    MovSource::Pins => "pins",
                    MovSource::X => "x",
                    MovSource::Y => "y",
                    MovSource::Null => "null",
                    MovSource::Isr => "isr",
                    MovSource::Osr => "osr",
                };
                write!(f, "mov {destination}, {op}{source}")
            }
            Self::Irq { clear, wait, index } => {
                let mode = match (clear, wait) {
                    (true, _) => "clear",
                    (false, true) => "wait",
                    (false, false) => "set",
                };
                write!(f, "irq {mode} {index}")
            }
            Self::Set { destination, data } => {
                let destination = match destination {
                    SetDestination::Pins => "pins",
                    SetDestination::X => "x",
                    SetDestination::Y => "y",
                    SetDestination::PinDirs => "pindirs",
                };
                write!(f, "set {destination}, {data}")
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.delay > 0 {
            write!(f, "{} [{}]", self.operation, self.delay)
        } else {
            write!(f, "{}", self.operation)
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn check_display_formats() {
        let instr = Instruction {
            delay: 0,
            operation: Operation::Set {
                destination: SetDestination::Pins,
                data: 1,
            },
        };
        assert_eq!(instr.to_string(), "set pins, 1");

        let instr = Instruction {
            delay: 3,
            operation: Operation::Jmp {
                condition: JmpCondition::XNonZeroPostDecrement,
                address: 4,
            },
        };
        assert_eq!(instr.to_string(), "jmp x-- 4 [3]");

        let instr = Instruction {
            delay: 0,
            operation: Operation::Mov {
                destination: MovDestination::X,
                op: MovOp::Invert,
                source: MovSource::Y,
            },
        };
        assert_eq!(instr.to_string(), "mov x, !y");
    }
}
