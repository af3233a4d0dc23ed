mod device;
mod server;

pub use device::{
    is_valid_resistance, light_intensity, pwm_value, uncertainty_pct, Bench, MockDevice,
    SimulatedBench, DEFAULT_MONITOR_INTERVAL, MAX_VALID_OHMS, MIN_VALID_OHMS,
};
pub use server::{DeviceServer, ServerHandle, HANDSHAKE_TIMEOUT};
