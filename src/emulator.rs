//! State Machine Emulation
//!
//! The emulator advances a [`State`] one clock cycle at a time by
//! interpreting the program word at the current program counter.
//! [`step`] is a pure function of the program and the previous
//! state, so repeated runs from the same initial state produce
//! identical sequences. [`Emulation`] wraps `step` in an iterator
//! over (previous, current) transition pairs, ending the sequence
//! once a stop predicate holds.
//!
//! Unconfigurable mapping choices in this single-machine model:
//! the input and output pin mappings both start at GPIO 0, SET
//! drives pins 0-4, the jump pin is GPIO 0, and both shift
//! registers shift right (the reset direction).

use std::mem;
use thiserror::Error;

use crate::instr::decode::{decode, DecodeError};
use crate::instr::{
    InSource, JmpCondition, MovDestination, MovOp, MovSource, Operation, OutDestination,
    SetDestination, WaitSource,
};
use crate::program::Program;
use crate::state::{ShiftRegister, State};
use crate::utils::mask;

/// GPIO tested by the JMP PIN condition
const JMP_PIN: u8 = 0;

/// Number of pins driven by SET PINS / SET PINDIRS
const SET_PIN_COUNT: u32 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmulatorError {
    #[error("program counter 0x{0:x} is outside the loaded program")]
    InvalidProgramCounter(u32),
    #[error("instruction decode failed: {0}")]
    Decode(#[from] DecodeError),
}

/// What the executed instruction asks the sequencer to do next
enum Control {
    /// Move on to the following instruction
    Advance,
    /// Stay on this instruction (unsatisfied wait)
    Stall,
    /// Transfer control to the given instruction index, which has
    /// not yet been bounds-checked
    Jump(u32),
}

/// Mask covering the n least significant bits, valid up to n = 32
fn field_mask(n: u32) -> u32 {
    if n >= 32 {
        u32::MAX
    } else {
        mask(n)
    }
}

/// Replace the n least significant bits of current with value
fn write_low_bits(current: u32, value: u32, n: u32) -> u32 {
    (current & !field_mask(n)) | (value & field_mask(n))
}

fn pin_is_high(pin_values: u32, index: u8) -> bool {
    (pin_values >> index) & 1 == 1
}

/// Shift n bits of value into the register from the left (the
/// registers shift right in this model)
fn shift_in(register: ShiftRegister, value: u32, n: u32) -> ShiftRegister {
    let masked = value & field_mask(n);
    let contents = if n == 32 {
        masked
    } else {
        (register.contents >> n) | (masked << (32 - n))
    };
    ShiftRegister {
        contents,
        counter: (register.counter + n).min(32),
    }
}

/// Shift n bits out of the low end of the register, returning the
/// shifted-out value and the new register
fn shift_out(register: ShiftRegister, n: u32) -> (u32, ShiftRegister) {
    let value = register.contents & field_mask(n);
    let contents = if n == 32 { 0 } else { register.contents >> n };
    (
        value,
        ShiftRegister {
            contents,
            counter: (register.counter + n).min(32),
        },
    )
}

fn execute(operation: &Operation, current: &State, next: &mut State) -> Control {
    match *operation {
        Operation::Jmp { condition, address } => {
            let taken = match condition {
                JmpCondition::Always => true,
                JmpCondition::XIsZero => current.x_register == 0,
                JmpCondition::XNonZeroPostDecrement => {
                    next.x_register = current.x_register.wrapping_sub(1);
                    current.x_register != 0
                }
                JmpCondition::YIsZero => current.y_register == 0,
                JmpCondition::YNonZeroPostDecrement => {
                    next.y_register = current.y_register.wrapping_sub(1);
                    current.y_register != 0
                }
                JmpCondition::XNotEqualY => current.x_register != current.y_register,
                JmpCondition::Pin => pin_is_high(current.pin_values, JMP_PIN),
                JmpCondition::OsrNotEmpty => current.output_shift_register.counter < 32,
            };
            if taken {
                Control::Jump(address.into())
            } else {
                Control::Advance
            }
        }
        Operation::Wait {
            polarity,
            source,
            index,
        } => {
            let satisfied = match source {
                WaitSource::Gpio | WaitSource::Pin => {
                    pin_is_high(current.pin_values, index) == polarity
                }
                WaitSource::Irq => {
                    let bit = 1u8 << index;
                    let set = current.irq_flags & bit != 0;
                    if polarity {
                        // Waiting for the flag seen set also clears it
                        if set {
                            next.irq_flags &= !bit;
                        }
                        set
                    } else {
                        !set
                    }
                }
            };
            if satisfied {
                Control::Advance
            } else {
                Control::Stall
            }
        }
        Operation::In { source, bit_count } => {
            let value = match source {
                InSource::Pins => current.pin_values,
                InSource::X => current.x_register,
                InSource::Y => current.y_register,
                InSource::Null => 0,
                InSource::Isr => current.input_shift_register.contents,
                InSource::Osr => current.output_shift_register.contents,
            };
            next.input_shift_register = shift_in(current.input_shift_register, value, bit_count);
            Control::Advance
        }
        Operation::Out {
            destination,
            bit_count,
        } => {
            let (value, register) = shift_out(current.output_shift_register, bit_count);
            next.output_shift_register = register;
            match destination {
                OutDestination::Pins => {
                    next.pin_values = write_low_bits(current.pin_values, value, bit_count);
                }
                OutDestination::X => next.x_register = value,
                OutDestination::Y => next.y_register = value,
                OutDestination::Null => (),
                OutDestination::PinDirs => {
                    next.pin_directions = write_low_bits(current.pin_directions, value, bit_count);
                }
                OutDestination::Pc => return Control::Jump(value),
            }
            Control::Advance
        }
        Operation::Mov {
            destination,
            op,
            source,
        } => {
            let value = match source {
                MovSource::Pins => current.pin_values,
                MovSource::X => current.x_register,
                MovSource::Y => current.y_register,
                MovSource::Null => 0,
                MovSource::Isr => current.input_shift_register.contents,
                MovSource::Osr => current.output_shift_register.contents,
            };
            let value = match op {
                MovOp::None => value,
                MovOp::Invert => !value,
                MovOp::BitReverse => value.reverse_bits(),
            };
            match destination {
                MovDestination::Pins => next.pin_values = value,
                MovDestination::X => next.x_register = value,
                MovDestination::Y => next.y_register = value,
                MovDestination::Pc => return Control::Jump(value),
                MovDestination::Isr => {
                    next.input_shift_register = ShiftRegister {
                        contents: value,
                        counter: 0,
                    };
                }
                MovDestination::Osr => {
                    next.output_shift_register = ShiftRegister {
                        contents: value,
                        counter: 0,
                    };
                }
            }
            Control::Advance
        }
        Operation::Irq { clear, wait, index } => {
            let bit = 1u8 << index;
            if clear {
                next.irq_flags &= !bit;
                Control::Advance
            } else {
                next.irq_flags |= bit;
                // Nothing in a single-machine run clears the flag,
                // so the wait form stalls until the stop predicate
                // ends the sequence
                if wait {
                    Control::Stall
                } else {
                    Control::Advance
                }
            }
        }
        Operation::Set { destination, data } => {
            match destination {
                SetDestination::Pins => {
                    next.pin_values = write_low_bits(current.pin_values, data.into(), SET_PIN_COUNT);
                }
                SetDestination::X => next.x_register = data.into(),
                SetDestination::Y => next.y_register = data.into(),
                SetDestination::PinDirs => {
                    next.pin_directions =
                        write_low_bits(current.pin_directions, data.into(), SET_PIN_COUNT);
                }
            }
            Control::Advance
        }
    }
}

/// Program counter after falling through an instruction. Running
/// off the end of the program wraps back to the first instruction,
/// as the hardware does at the end of program memory.
fn wrap_increment(program_counter: u8, program_length: usize) -> u8 {
    let next = usize::from(program_counter) + 1;
    if next >= program_length {
        0
    } else {
        next as u8
    }
}

/// Advance the state machine by one clock cycle
///
/// Decodes the word at the current program counter, applies its
/// effect and returns the successor state with the clock
/// incremented by exactly 1. The given state is not modified. A
/// stalled instruction (or a pending delay) produces a state
/// identical to its predecessor apart from the clock and the
/// stall's own side effects.
pub fn step(program: &Program, state: &State) -> Result<State, EmulatorError> {
    let mut next = state.clone();
    next.clock = state.clock.wrapping_add(1);

    if state.delay_remaining > 0 {
        next.delay_remaining = state.delay_remaining - 1;
        return Ok(next);
    }

    let word = program.word(state.program_counter).ok_or(
        EmulatorError::InvalidProgramCounter(state.program_counter.into()),
    )?;
    let instr = decode(word)?;

    match execute(&instr.operation, state, &mut next) {
        Control::Stall => (),
        Control::Advance => {
            next.program_counter = wrap_increment(state.program_counter, program.len());
            next.delay_remaining = instr.delay;
        }
        Control::Jump(target) => {
            if target as usize >= program.len() {
                return Err(EmulatorError::InvalidProgramCounter(target));
            }
            next.program_counter = target as u8;
            next.delay_remaining = instr.delay;
        }
    }
    Ok(next)
}

/// Stop predicate satisfied once the clock reaches the given cycle
/// count (inclusive: the transition that reaches it is the last
/// one produced)
pub fn clock_cycles_reached(clock_cycles: u32) -> impl Fn(&State) -> bool {
    move |state: &State| state.clock >= clock_cycles
}

/// Cursor over the transitions of an emulation run
///
/// Yields (previous, current) state pairs until the stop predicate
/// holds of the current state, or an error ends the run. The
/// terminating transition is itself yielded; after it (or after an
/// error) the iterator is exhausted. A predicate already true of
/// the initial state produces an empty sequence.
pub struct Emulation<'a, F>
where
    F: Fn(&State) -> bool,
{
    program: &'a Program,
    state: State,
    stop_when: F,
    done: bool,
}

impl<'a, F> Emulation<'a, F>
where
    F: Fn(&State) -> bool,
{
    pub fn new(program: &'a Program, initial_state: State, stop_when: F) -> Self {
        let done = stop_when(&initial_state);
        Self {
            program,
            state: initial_state,
            stop_when,
            done,
        }
    }
}

impl<'a, F> Iterator for Emulation<'a, F>
where
    F: Fn(&State) -> bool,
{
    type Item = Result<(State, State), EmulatorError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match step(self.program, &self.state) {
            Ok(new_state) => {
                let previous = mem::replace(&mut self.state, new_state);
                if (self.stop_when)(&self.state) {
                    self.done = true;
                }
                Some(Ok((previous, self.state.clone())))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
