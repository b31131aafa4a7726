//! Output Variable Registry
//!
//! Maps fields of the emulator [`State`] to named signals in the
//! trace file. Each [`OutputVariable`] pairs a declared trace
//! variable with a [`FieldSelector`], a small enumeration resolved
//! to a typed getter, so no name-based field lookup happens while
//! tracing.
//!
//! The registry also owns the two writing passes the driver runs:
//! an unconditional emit of every variable at the first state's
//! timestamp, and a changed-fields-only emit per transition.

use std::io::{Seek, Write};

use crate::state::State;
use crate::trace_file::writer::Session;
use crate::trace_file::{Direction, TraceFileError, VarHandle};

/// Which field of the emulator state a signal mirrors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSelector {
    Clock,
    ProgramCounter,
    PinValues,
    PinDirections,
    XRegister,
    YRegister,
}

impl FieldSelector {
    /// Read the selected field out of a state
    pub fn read(&self, state: &State) -> u32 {
        match self {
            Self::Clock => state.clock,
            Self::ProgramCounter => state.program_counter.into(),
            Self::PinValues => state.pin_values,
            Self::PinDirections => state.pin_directions,
            Self::XRegister => state.x_register,
            Self::YRegister => state.y_register,
        }
    }
}

/// A registered output signal
#[derive(Debug, Clone)]
pub struct OutputVariable {
    pub name: String,
    pub bit_width: u32,
    pub selector: FieldSelector,
    /// Assigned by the session at registration, write-once
    pub handle: VarHandle,
}

/// The set of signals written to the trace file
#[derive(Debug, Default)]
pub struct Registry {
    variables: Vec<OutputVariable>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable on the session and record the selector
    /// it mirrors. Must be called before any value is emitted for
    /// the returned handle.
    pub fn register<W: Write + Seek>(
        &mut self,
        session: &mut Session<W>,
        name: &str,
        bit_width: u32,
        direction: Direction,
        selector: FieldSelector,
    ) -> Result<VarHandle, TraceFileError> {
        let handle = session.declare_variable(name, bit_width, direction)?;
        self.variables.push(OutputVariable {
            name: name.to_string(),
            bit_width,
            selector,
            handle,
        });
        Ok(handle)
    }

    /// The standard signal set for the I/O state machine: clock,
    /// program counter, pins and both scratch registers
    pub fn pio_outputs<W: Write + Seek>(
        session: &mut Session<W>,
    ) -> Result<Self, TraceFileError> {
        let mut registry = Self::new();
        let output = Direction::Output;
        registry.register(session, "CLK", 32, output, FieldSelector::Clock)?;
        registry.register(session, "PC", 5, output, FieldSelector::ProgramCounter)?;
        registry.register(session, "GPIO", 32, output, FieldSelector::PinValues)?;
        registry.register(session, "X", 32, output, FieldSelector::XRegister)?;
        registry.register(session, "Y", 32, output, FieldSelector::YRegister)?;
        Ok(registry)
    }

    pub fn variables(&self) -> &[OutputVariable] {
        &self.variables
    }

    /// Emit every registered variable at the initial state's
    /// timestamp, whether or not it differs from zero
    pub fn write_initial_values<W: Write + Seek>(
        &self,
        session: &mut Session<W>,
        initial_state: &State,
    ) -> Result<(), TraceFileError> {
        session.emit_time(initial_state.clock.into())?;
        for variable in &self.variables {
            session.emit_value(
                variable.handle,
                variable.bit_width,
                variable.selector.read(initial_state),
            )?;
        }
        Ok(())
    }

    /// Emit the variables whose mirrored field changed across one
    /// transition
    pub fn write_changed_values<W: Write + Seek>(
        &self,
        session: &mut Session<W>,
        previous_state: &State,
        current_state: &State,
    ) -> Result<(), TraceFileError> {
        session.emit_time(current_state.clock.into())?;
        for variable in &self.variables {
            let current_value = variable.selector.read(current_state);
            let previous_value = variable.selector.read(previous_state);
            if current_value != previous_value {
                session.emit_value(variable.handle, variable.bit_width, current_value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::trace_file::reader::TraceReader;
    use crate::trace_file::Compression;
    use std::io::Cursor;

    fn session() -> Session<Cursor<Vec<u8>>> {
        Session::new(Cursor::new(Vec::new()), Compression::Block).unwrap()
    }

    #[test]
    fn check_standard_outputs() {
        let mut session = session();
        let registry = Registry::pio_outputs(&mut session).unwrap();
        let names: Vec<&str> = registry
            .variables()
            .iter()
            .map(|variable| variable.name.as_str())
            .collect();
        assert_eq!(names, vec!["CLK", "PC", "GPIO", "X", "Y"]);
        assert_eq!(registry.variables()[1].bit_width, 5);
    }

    #[test]
    fn check_duplicate_registration_rejected() {
        let mut session = session();
        let mut registry = Registry::new();
        registry
            .register(&mut session, "X", 32, Direction::Output, FieldSelector::XRegister)
            .unwrap();
        let result = registry.register(
            &mut session,
            "X",
            32,
            Direction::Output,
            FieldSelector::YRegister,
        );
        assert_eq!(
            result,
            Err(TraceFileError::DuplicateVariable("X".to_string()))
        );
    }

    #[test]
    fn check_initial_values_written_unconditionally() {
        let mut session = session();
        let registry = Registry::pio_outputs(&mut session).unwrap();
        registry
            .write_initial_values(&mut session, &State::default())
            .unwrap();
        session.finalize().unwrap();

        let mut reader = TraceReader::new(session.into_inner()).unwrap();
        let events = reader.read_events().unwrap();
        // All five variables appear at timestamp 0 even though
        // every field is zero
        assert_eq!(events.len(), 5);
        for event in &events {
            assert_eq!(event.time, 0);
            assert_eq!(event.value, 0);
        }
    }

    #[test]
    fn check_full_trace_pipeline() {
        use crate::emulator::{clock_cycles_reached, Emulation};
        use crate::program::Program;

        // set pins, 1 then jump-to-self, traced for 3 cycles
        let program = Program::new(vec![0xe001, 0x0001]).unwrap();
        let mut session = session();
        let registry = Registry::pio_outputs(&mut session).unwrap();

        let initial_state = State::default();
        registry
            .write_initial_values(&mut session, &initial_state)
            .unwrap();
        for transition in Emulation::new(&program, initial_state, clock_cycles_reached(3)) {
            let (previous_state, current_state) = transition.unwrap();
            registry
                .write_changed_values(&mut session, &previous_state, &current_state)
                .unwrap();
        }
        session.finalize().unwrap();

        let mut reader = TraceReader::new(session.into_inner()).unwrap();
        assert_eq!(reader.end_time(), 3);
        let events = reader.read_events().unwrap();

        let clk = registry.variables()[0].handle;
        let gpio = registry.variables()[2].handle;
        let clk_values: Vec<u32> = events
            .iter()
            .filter(|event| event.handle == clk)
            .map(|event| event.value)
            .collect();
        assert_eq!(clk_values, vec![0, 1, 2, 3]);

        // GPIO changes once, at cycle 1, and stays high
        let gpio_events: Vec<_> = events.iter().filter(|event| event.handle == gpio).collect();
        assert_eq!(gpio_events.len(), 2);
        assert_eq!(gpio_events[0].value, 0);
        assert_eq!(gpio_events[1].time, 1);
        assert_eq!(gpio_events[1].value, 1);
    }

    #[test]
    fn check_changed_values_only() {
        let mut session = session();
        let registry = Registry::pio_outputs(&mut session).unwrap();
        let initial = State::default();
        registry.write_initial_values(&mut session, &initial).unwrap();

        let mut current = initial.clone();
        current.clock = 1;
        current.program_counter = 1;
        current.pin_values = 1;
        registry
            .write_changed_values(&mut session, &initial, &current)
            .unwrap();
        session.finalize().unwrap();

        let mut reader = TraceReader::new(session.into_inner()).unwrap();
        let events = reader.read_events().unwrap();
        let at_time_1: Vec<_> = events.iter().filter(|event| event.time == 1).collect();
        // CLK, PC and GPIO changed; X and Y did not
        assert_eq!(at_time_1.len(), 3);
    }
}
