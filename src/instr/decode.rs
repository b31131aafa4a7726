//! Instruction Decoding
//!
//! This file is where a u16 machine word is converted into the
//! [`Instruction`] struct which holds the operation and its fields
//! in a more easily accessible format ready for execution.
//!
//! Decoding happens on every emulation step (the program is stored
//! as raw words), so a malformed word surfaces as an error at the
//! cycle that reaches it, not at load time.
//!
//! Words that select PUSH/PULL, the EXEC destinations, or the
//! STATUS source are rejected: those need FIFOs or instruction
//! injection, which this state model does not carry. Reserved
//! operand encodings are rejected rather than guessed at.

use thiserror::Error;

use super::fields;
use super::{
    InSource, Instruction, JmpCondition, MovDestination, MovOp, MovSource, Operation,
    OutDestination, SetDestination, WaitSource,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("got invalid or unimplemented opcode 0b{0:03b}")]
    InvalidOpcode(u16),
    #[error("got invalid or unimplemented instruction 0x{0:04x}")]
    InvalidInstruction(u16),
    #[error("interrupt index {0} exceeds 7")]
    InvalidIrqIndex(u8),
}

fn decode_jmp(word: u16) -> Result<Operation, DecodeError> {
    let condition = match fields::jmp_condition(word) {
        0b000 => JmpCondition::Always,
        0b001 => JmpCondition::XIsZero,
        0b010 => JmpCondition::XNonZeroPostDecrement,
        0b011 => JmpCondition::YIsZero,
        0b100 => JmpCondition::YNonZeroPostDecrement,
        0b101 => JmpCondition::XNotEqualY,
        0b110 => JmpCondition::Pin,
        _ => JmpCondition::OsrNotEmpty,
    };
    Ok(Operation::Jmp {
        condition,
        address: fields::jmp_address(word),
    })
}

fn decode_wait(word: u16) -> Result<Operation, DecodeError> {
    let source = match fields::wait_source(word) {
        0b00 => WaitSource::Gpio,
        0b01 => WaitSource::Pin,
        0b10 => WaitSource::Irq,
        _ => return Err(DecodeError::InvalidInstruction(word)),
    };
    let index = fields::index(word);
    if source == WaitSource::Irq && index > 7 {
        return Err(DecodeError::InvalidIrqIndex(index));
    }
    Ok(Operation::Wait {
        polarity: fields::wait_polarity(word),
        source,
        index,
    })
}

fn decode_in(word: u16) -> Result<Operation, DecodeError> {
    let source = match fields::destination(word) {
        0b000 => InSource::Pins,
        0b001 => InSource::X,
        0b010 => InSource::Y,
        0b011 => InSource::Null,
        0b110 => InSource::Isr,
        0b111 => InSource::Osr,
        _ => return Err(DecodeError::InvalidInstruction(word)),
    };
    Ok(Operation::In {
        source,
        bit_count: fields::bit_count(word),
    })
}

fn decode_out(word: u16) -> Result<Operation, DecodeError> {
    let destination = match fields::destination(word) {
        0b000 => OutDestination::Pins,
        0b001 => OutDestination::X,
        0b010 => OutDestination::Y,
        0b011 => OutDestination::Null,
        0b100 => OutDestination::PinDirs,
        0b101 => OutDestination::Pc,
        _ => return Err(DecodeError::InvalidInstruction(word)),
    };
    Ok(Operation::Out {
        destination,
        bit_count: fields::bit_count(word),
    })
}

fn decode_mov(word: u16) -> Result<Operation, DecodeError> {
    let destination = match fields::destination(word) {
        0b000 => MovDestination::Pins,
        0b001 => MovDestination::X,
        0b010 => MovDestination::Y,
        0b101 => MovDestination::Pc,
        0b110 => MovDestination::Isr,
        0b111 => MovDestination::Osr,
        _ => return Err(DecodeError::InvalidInstruction(word)),
    };
    let op = match fields::mov_op(word) {
        0b00 => MovOp::None,
        0b01 => MovOp::Invert,
        0b10 => MovOp::BitReverse,
        _ => return Err(DecodeError::InvalidInstruction(word)),
    };
    let source = match fields::mov_source(word) {
        0b000 => MovSource::Pins,
        0b001 => MovSource::X,
        0b010 => MovSource::Y,
        0b011 => MovSource::Null,
        0b110 => MovSource::Isr,
        0b111 => MovSource::Osr,
        _ => return Err(DecodeError::InvalidInstruction(word)),
    };
    Ok(Operation::Mov {
        destination,
        op,
        source,
    })
}

fn decode_irq(word: u16) -> Result<Operation, DecodeError> {
    if fields::wait_polarity(word) {
        // Bit 7 is reserved for IRQ instructions
        return Err(DecodeError::InvalidInstruction(word));
    }
    let index = fields::index(word);
    if index > 7 {
        return Err(DecodeError::InvalidIrqIndex(index));
    }
    Ok(Operation::Irq {
        clear: fields::irq_clear(word),
        wait: fields::irq_wait(word),
        index,
    })
}

fn decode_set(word: u16) -> Result<Operation, DecodeError> {
    let destination = match fields::destination(word) {
        0b000 => SetDestination::Pins,
        0b001 => SetDestination::X,
        0b010 => SetDestination::Y,
        0b100 => SetDestination::PinDirs,
        _ => return Err(DecodeError::InvalidInstruction(word)),
    };
    Ok(Operation::Set {
        destination,
        data: fields::set_data(word),
    })
}

/// Decode one 16-bit machine word
pub fn decode(word: u16) -> Result<Instruction, DecodeError> {
    let opcode = fields::opcode(word);
    let operation = match opcode {
        0b000 => decode_jmp(word)?,
        0b001 => decode_wait(word)?,
        0b010 => decode_in(word)?,
        0b011 => decode_out(word)?,
        0b101 => decode_mov(word)?,
        0b110 => decode_irq(word)?,
        0b111 => decode_set(word)?,
        // 0b100 is PUSH/PULL, which needs the FIFOs
        _ => return Err(DecodeError::InvalidOpcode(opcode)),
    };
    Ok(Instruction {
        delay: fields::delay(word),
        operation,
    })
}
