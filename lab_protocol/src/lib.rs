use serde::{Deserialize, Deserializer, Serialize};

/// TCP port the device's websocket server listens on.
pub const DEVICE_PORT: u16 = 81;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateType {
    And,
    Or,
    Not,
    Nand,
    Nor,
    Xor,
}

impl GateType {
    pub const ALL: [GateType; 6] = [
        GateType::And,
        GateType::Or,
        GateType::Not,
        GateType::Nand,
        GateType::Nor,
        GateType::Xor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GateType::And => "AND",
            GateType::Or => "OR",
            GateType::Not => "NOT",
            GateType::Nand => "NAND",
            GateType::Nor => "NOR",
            GateType::Xor => "XOR",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "command")]
pub enum ClientCommand {
    MeasureResistor,
    SetLed { brightness: u8 },
    ReadTemperature,
    StartTemperatureMonitoring,
    StopTemperatureMonitoring,
    ReadLight,
    SetLogicGate {
        gate_type: GateType,
        input_a: u8,
        input_b: u8,
    },
    Ping,
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::MeasureResistor => "measure_resistor",
            ClientCommand::SetLed { .. } => "set_led",
            ClientCommand::ReadTemperature => "read_temperature",
            ClientCommand::StartTemperatureMonitoring => "start_temperature_monitoring",
            ClientCommand::StopTemperatureMonitoring => "stop_temperature_monitoring",
            ClientCommand::ReadLight => "read_light",
            ClientCommand::SetLogicGate { .. } => "set_logic_gate",
            ClientCommand::Ping => "ping",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DeviceMessage {
    ResistanceMeasurement {
        resistance: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        valid: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uncertainty: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quality: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        samples: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_samples: Option<u32>,
    },
    TemperatureReading {
        temperature: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        valid: Option<bool>,
    },
    LightReading {
        light_intensity: f64,
        resistance: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        valid: Option<bool>,
    },
    LedStatus {
        brightness: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pwm_value: Option<u32>,
    },
    LogicGateResult {
        #[serde(deserialize_with = "bool_or_bit")]
        output: bool,
    },
    Status { message: String },
    Error { message: String },
    Pong,
    #[serde(other)]
    Unknown,
}

impl DeviceMessage {
    /// A missing `valid` flag means the device did not qualify the reading.
    pub fn is_valid(&self) -> bool {
        match self {
            DeviceMessage::ResistanceMeasurement { valid, .. }
            | DeviceMessage::TemperatureReading { valid, .. }
            | DeviceMessage::LightReading { valid, .. } => valid.unwrap_or(true),
            _ => true,
        }
    }
}

fn bool_or_bit<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Bit(u8),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Bit(n) => n != 0,
    })
}
