use crate::modules::error::LabError;
use crate::modules::store::{KvStore, HISTORY_KEY};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Readings kept per experiment; the oldest entry is evicted first.
pub const HISTORY_CAPACITY: usize = 50;
pub const CHART_WINDOW: usize = 20;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentKind {
    Resistor,
    Temperature,
    Light,
    Pwm,
}

impl ExperimentKind {
    pub const ALL: [ExperimentKind; 4] = [
        ExperimentKind::Resistor,
        ExperimentKind::Temperature,
        ExperimentKind::Light,
        ExperimentKind::Pwm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExperimentKind::Resistor => "resistor",
            ExperimentKind::Temperature => "temperature",
            ExperimentKind::Light => "light",
            ExperimentKind::Pwm => "pwm",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            ExperimentKind::Resistor | ExperimentKind::Light => "Ω",
            ExperimentKind::Temperature => "°C",
            ExperimentKind::Pwm => "%",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let wanted = name.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(wanted))
    }
}

impl std::fmt::Display for ExperimentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timestamped value. The light experiment charts the LDR resistance as `value`
/// and keeps the raw intensity alongside it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Reading {
    pub experiment: ExperimentKind,
    pub value: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light_intensity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resistance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(experiment: ExperimentKind, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            experiment,
            value,
            unit: experiment.unit().to_string(),
            light_intensity: None,
            resistance: None,
            uncertainty: None,
            timestamp,
        }
    }

    pub fn now(experiment: ExperimentKind, value: f64) -> Self {
        Self::new(experiment, value, Utc::now())
    }

    pub fn with_light(mut self, light_intensity: f64, resistance: f64) -> Self {
        self.light_intensity = Some(light_intensity);
        self.resistance = Some(resistance);
        self
    }

    pub fn with_uncertainty(mut self, uncertainty: Option<f64>) -> Self {
        self.uncertainty = uncertainty;
        self
    }
}

type Snapshot = BTreeMap<ExperimentKind, Vec<Reading>>;

pub struct HistoryStore {
    buffers: BTreeMap<ExperimentKind, VecDeque<Reading>>,
    store: Arc<dyn KvStore>,
}

impl HistoryStore {
    /// Rebuilds history from the persisted snapshot. Anything unreadable resets
    /// every experiment to empty.
    pub fn load(store: Arc<dyn KvStore>) -> Self {
        let mut history = Self {
            buffers: empty_buffers(),
            store,
        };

        let raw = match history.store.get(HISTORY_KEY) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("history load failed, starting empty: {e}");
                return history;
            }
        };
        let Some(raw) = raw else { return history };

        match serde_json::from_str::<Snapshot>(&raw) {
            Ok(snapshot) => {
                for (kind, readings) in snapshot {
                    let buf: VecDeque<Reading> = readings
                        .into_iter()
                        .filter(|r| r.experiment == kind)
                        .take(HISTORY_CAPACITY)
                        .collect();
                    history.buffers.insert(kind, buf);
                }
                tracing::debug!("loaded experiment history");
            }
            Err(e) => {
                tracing::warn!("stored history is corrupt, resetting: {e}");
            }
        }
        history
    }

    pub fn append(&mut self, reading: Reading) {
        let buf = self.buffers.entry(reading.experiment).or_default();
        buf.push_front(reading);
        buf.truncate(HISTORY_CAPACITY);
        self.persist();
    }

    pub fn clear(&mut self, kind: ExperimentKind) {
        self.buffers.entry(kind).or_default().clear();
        self.persist();
    }

    /// Newest first.
    pub fn snapshot(&self, kind: ExperimentKind) -> Vec<Reading> {
        self.buffers
            .get(&kind)
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, kind: ExperimentKind) -> usize {
        self.buffers.get(&kind).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, kind: ExperimentKind) -> bool {
        self.len(kind) == 0
    }

    /// The most recent `CHART_WINDOW` readings, oldest first.
    pub fn chart_window(&self, kind: ExperimentKind) -> Vec<Reading> {
        let mut recent: Vec<Reading> = self
            .buffers
            .get(&kind)
            .map(|b| b.iter().take(CHART_WINDOW).cloned().collect())
            .unwrap_or_default();
        recent.reverse();
        recent
    }

    /// CSV with a `Timestamp,Value` header, rows in `snapshot` order.
    pub fn export(&self, kind: ExperimentKind) -> Result<String, LabError> {
        let Some(buf) = self.buffers.get(&kind).filter(|b| !b.is_empty()) else {
            return Err(LabError::EmptyHistory(kind.as_str()));
        };

        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(["Timestamp", "Value"])?;
        for r in buf {
            wtr.write_record([
                r.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                r.value.to_string(),
            ])?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| LabError::Csv(csv::Error::from(e.into_error())))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn persist(&self) {
        let snapshot: Snapshot = self
            .buffers
            .iter()
            .map(|(k, b)| (*k, b.iter().cloned().collect()))
            .collect();
        let payload = match serde_json::to_string(&snapshot) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("history serialize failed: {e}");
                return;
            }
        };
        if let Err(e) = self.store.set(HISTORY_KEY, &payload) {
            tracing::warn!("history persist failed: {e}");
        }
    }
}

fn empty_buffers() -> BTreeMap<ExperimentKind, VecDeque<Reading>> {
    ExperimentKind::ALL
        .into_iter()
        .map(|k| (k, VecDeque::new()))
        .collect()
}
