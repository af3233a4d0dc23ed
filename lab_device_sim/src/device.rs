use lab_protocol::{ClientCommand, DeviceMessage};
use panel_core::gates;
use rand::{thread_rng, Rng};
use std::time::{Duration, Instant};

pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(2);
pub const MIN_VALID_OHMS: f64 = 50.0;
pub const MAX_VALID_OHMS: f64 = 2_000_000.0;
pub const SAMPLES_PER_MEASUREMENT: u32 = 10;

const ADC_MAX: f64 = 4095.0;
const VREF: f64 = 3.3;
const LDR_DIVIDER_OHMS: f64 = 10_000.0;
const COMPONENT_TOLERANCE_PCT: f64 = 1.0;

/// The analog front end of the board.
pub trait Bench {
    fn resistance(&mut self) -> f64;
    fn temperature(&mut self) -> f64;
    /// LDR resistance in ohms.
    fn ldr_resistance(&mut self) -> f64;
}

/// Bench with fixed nominal values plus a little noise.
pub struct SimulatedBench {
    pub resistor_ohms: f64,
    pub ambient_c: f64,
    pub ldr_ohms: f64,
}

impl Default for SimulatedBench {
    fn default() -> Self {
        Self {
            resistor_ohms: 4_700.0,
            ambient_c: 22.5,
            ldr_ohms: 8_200.0,
        }
    }
}

impl Bench for SimulatedBench {
    fn resistance(&mut self) -> f64 {
        let noise = thread_rng().gen_range(-0.005..0.005);
        self.resistor_ohms * (1.0 + noise)
    }

    fn temperature(&mut self) -> f64 {
        self.ambient_c + thread_rng().gen_range(-0.25..0.25)
    }

    fn ldr_resistance(&mut self) -> f64 {
        self.ldr_ohms * (1.0 + thread_rng().gen_range(-0.02..0.02))
    }
}

pub fn is_valid_resistance(ohms: f64) -> bool {
    (MIN_VALID_OHMS..=MAX_VALID_OHMS).contains(&ohms)
}

/// Combined ADC and component uncertainty, in percent.
pub fn uncertainty_pct(ohms: f64) -> f64 {
    let adc = (VREF / ADC_MAX) * 100.0 / ohms;
    adc.hypot(COMPONENT_TOLERANCE_PCT)
}

pub fn pwm_value(brightness: u8) -> u32 {
    u32::from(brightness) * 255 / 100
}

/// Raw ADC count the light sensor divider would produce for `ldr_ohms`.
pub fn light_intensity(ldr_ohms: f64) -> f64 {
    (ADC_MAX * LDR_DIVIDER_OHMS / (ldr_ohms + LDR_DIVIDER_OHMS)).round()
}

/// Firmware side of the simulated board. Pure state; the server feeds it
/// commands and polls it for monitoring readings.
pub struct MockDevice {
    attached: bool,
    led_brightness: u8,
    monitoring: bool,
    monitor_interval: Duration,
    next_reading: Instant,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            attached: false,
            led_brightness: 0,
            monitoring: false,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            next_reading: Instant::now(),
        }
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn led_brightness(&self) -> u8 {
        self.led_brightness
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    /// A panel attached; returns the greeting.
    pub fn attach(&mut self) -> DeviceMessage {
        self.attached = true;
        DeviceMessage::Status {
            message: "Remote lab ready".to_string(),
        }
    }

    /// Monitoring does not outlive the panel that started it.
    pub fn detach(&mut self) {
        self.attached = false;
        self.monitoring = false;
    }

    /// Next monitoring reading, if one is due at `now`.
    pub fn poll(&mut self, now: Instant, bench: &mut dyn Bench) -> Option<DeviceMessage> {
        if !(self.monitoring && self.attached) || now < self.next_reading {
            return None;
        }
        self.next_reading = now + self.monitor_interval;
        Some(temperature_reading(bench))
    }

    /// Every command gets exactly one reply.
    pub fn handle(&mut self, cmd: ClientCommand, bench: &mut dyn Bench) -> DeviceMessage {
        tracing::debug!("command {}", cmd.name());
        match cmd {
            ClientCommand::MeasureResistor => {
                let ohms = bench.resistance();
                let valid = is_valid_resistance(ohms);
                let pct = uncertainty_pct(ohms);
                DeviceMessage::ResistanceMeasurement {
                    resistance: ohms,
                    valid: Some(valid),
                    uncertainty: Some(ohms * pct / 100.0),
                    quality: Some(quality(valid, pct).to_string()),
                    samples: Some(if valid { SAMPLES_PER_MEASUREMENT } else { 0 }),
                    total_samples: Some(SAMPLES_PER_MEASUREMENT),
                }
            }
            ClientCommand::SetLed { brightness } => {
                self.led_brightness = brightness.min(100);
                DeviceMessage::LedStatus {
                    brightness: self.led_brightness,
                    pwm_value: Some(pwm_value(self.led_brightness)),
                }
            }
            ClientCommand::ReadTemperature => temperature_reading(bench),
            ClientCommand::StartTemperatureMonitoring => {
                self.monitoring = true;
                self.next_reading = Instant::now() + self.monitor_interval;
                DeviceMessage::Status {
                    message: "Temperature monitoring started".to_string(),
                }
            }
            ClientCommand::StopTemperatureMonitoring => {
                self.monitoring = false;
                DeviceMessage::Status {
                    message: "Temperature monitoring stopped".to_string(),
                }
            }
            ClientCommand::ReadLight => {
                let ohms = bench.ldr_resistance();
                DeviceMessage::LightReading {
                    light_intensity: light_intensity(ohms),
                    resistance: ohms,
                    valid: Some(ohms.is_finite() && ohms > 0.0),
                }
            }
            ClientCommand::SetLogicGate {
                gate_type,
                input_a,
                input_b,
            } => DeviceMessage::LogicGateResult {
                output: gates::evaluate(gate_type, input_a != 0, input_b != 0),
            },
            ClientCommand::Ping => DeviceMessage::Pong,
        }
    }
}

fn temperature_reading(bench: &mut dyn Bench) -> DeviceMessage {
    let celsius = bench.temperature();
    // DS18B20 operating range; -127 is its "no sensor" value.
    let valid = (-55.0..=125.0).contains(&celsius);
    DeviceMessage::TemperatureReading {
        temperature: celsius,
        valid: Some(valid),
    }
}

fn quality(valid: bool, pct: f64) -> &'static str {
    match (valid, pct) {
        (false, _) => "poor",
        (true, p) if p <= 2.0 => "good",
        _ => "fair",
    }
}
