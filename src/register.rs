use std::fmt;

/// OBIS short code of the cumulative active energy import register.
pub const TOTAL_ENERGY_CODE: &str = "1.8.0";

/// DLMS unit code as carried in an SML list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unit(pub u8);

impl Unit {
    pub const WATT: Unit = Unit(27);
    pub const WATT_HOUR: Unit = Unit(30);

    /// Human readable symbol, where the code is one a household meter reports.
    pub fn symbol(&self) -> Option<&'static str> {
        match self.0 {
            8 => Some("°"),
            27 => Some("W"),
            28 => Some("VA"),
            29 => Some("var"),
            30 => Some("Wh"),
            31 => Some("VAh"),
            32 => Some("varh"),
            33 => Some("A"),
            35 => Some("V"),
            44 => Some("Hz"),
            _ => None,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.symbol() {
            Some(symbol) => f.write_str(symbol),
            None => write!(f, "unit({})", self.0),
        }
    }
}

/// One decoded measurement slot of an SML frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    /// OBIS short code, e.g. `1.8.0`
    pub code: String,
    pub raw_value: i64,
    pub scale_exponent: i8,
    pub unit: Option<Unit>,
    /// Meter time (seconds index or epoch, depending on the meter)
    pub sample_time: Option<i64>,
}

impl Register {
    pub fn new(code: impl Into<String>, raw_value: i64, scale_exponent: i8) -> Self {
        Self {
            code: code.into(),
            raw_value,
            scale_exponent,
            unit: None,
            sample_time: None,
        }
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn with_sample_time(mut self, sample_time: i64) -> Self {
        self.sample_time = Some(sample_time);
        self
    }

    pub fn has_unit(&self) -> bool {
        self.unit.is_some()
    }

    /// Scaled reading, only defined for registers that carry a unit.
    /// Status and metadata registers return `None`.
    pub fn scaled_value(&self) -> Option<f64> {
        if self.has_unit() {
            Some(scale(self.raw_value, self.scale_exponent))
        } else {
            None
        }
    }
}

/// `raw * 10^exponent`, rounded to one decimal place.
pub fn scale(raw: i64, exponent: i8) -> f64 {
    let factor = 10f64.powi(i32::from(exponent).abs());
    let value = if exponent < 0 {
        raw as f64 / factor
    } else {
        raw as f64 * factor
    };
    round_one_decimal(value)
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
