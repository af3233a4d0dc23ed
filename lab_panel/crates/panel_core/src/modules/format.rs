use crate::modules::history::ExperimentKind;
use chrono::NaiveDate;

const LDR_MIN_OHMS: f64 = 100.0;
const LDR_MAX_OHMS: f64 = 100_000.0;

pub fn format_resistance(ohms: f64) -> String {
    if ohms >= 1e6 {
        format!("{:.2} MΩ", ohms / 1e6)
    } else if ohms >= 1e3 {
        format!("{:.2} kΩ", ohms / 1e3)
    } else {
        format!("{ohms:.2} Ω")
    }
}

/// Absolute measurement uncertainty, in the same units as the reading.
pub fn format_uncertainty(ohms: f64) -> String {
    format!("± {}", format_resistance(ohms))
}

/// Coarser variant used next to the light reading.
pub fn format_ldr_resistance(ohms: f64) -> String {
    if ohms >= 1000.0 {
        format!("{:.1} kΩ", ohms / 1000.0)
    } else {
        format!("{} Ω", ohms.round())
    }
}

pub fn format_temperature(celsius: f64) -> String {
    format!("{celsius:.1} °C")
}

/// Light level in percent from the LDR resistance, on an inverted log scale
/// between 100 Ω (bright) and 100 kΩ (dark).
pub fn light_level_percent(ohms: f64) -> f64 {
    let r = ohms.clamp(LDR_MIN_OHMS, LDR_MAX_OHMS);
    let (lo, hi) = (LDR_MIN_OHMS.log10(), LDR_MAX_OHMS.log10());
    let pct = 100.0 * (1.0 - (r.log10() - lo) / (hi - lo));
    pct.clamp(0.0, 100.0)
}

pub fn format_reading(kind: ExperimentKind, value: f64) -> String {
    match kind {
        ExperimentKind::Resistor => format_resistance(value),
        ExperimentKind::Light => format_ldr_resistance(value),
        ExperimentKind::Temperature => format_temperature(value),
        ExperimentKind::Pwm => format!("{} %", value.round()),
    }
}

pub fn export_filename(kind: ExperimentKind, date: NaiveDate) -> String {
    format!("{}_data_{}.csv", kind.as_str(), date.format("%Y-%m-%d"))
}
