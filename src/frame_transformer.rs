use crate::register::{Register, TOTAL_ENERGY_CODE};

/// A register that carries a unit, together with its scaled reading.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledRegister {
    pub code: String,
    pub value: f64,
}

/// Everything extracted from one decoded frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sample {
    /// Time of the cumulative-energy register, `None` when the frame has none.
    pub sample_time: Option<i64>,
    pub total_consumption: Option<f64>,
    /// Unit-bearing registers, in frame order
    pub readings: Vec<ScaledRegister>,
}

/// Turns the raw register list of one frame into a [`Sample`].
///
/// Registers without a unit are status or metadata slots and are dropped here,
/// so nothing downstream ever publishes them. A frame without a `1.8.0`
/// register yields a sample with no timestamp and no total.
pub fn transform(registers: &[Register]) -> Sample {
    let readings = registers
        .iter()
        .filter_map(|register| {
            register.scaled_value().map(|value| ScaledRegister {
                code: register.code.clone(),
                value,
            })
        })
        .collect();

    let total_register = registers
        .iter()
        .find(|register| register.code == TOTAL_ENERGY_CODE);

    Sample {
        sample_time: total_register.and_then(|register| register.sample_time),
        total_consumption: total_register.and_then(Register::scaled_value),
        readings,
    }
}
