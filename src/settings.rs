use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::SystemTime,
};
use tokio::sync::watch;

/// Admission window for status-change logs. Both ends are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkingHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl WorkingHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self> {
        if start >= end {
            bail!("working hours start {start} must be before end {end}");
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

mod hour_minute {
    use chrono::NaiveTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(value: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSettings {
    pub is_enabled: bool,
    #[serde(with = "hour_minute")]
    pub working_hours_start: NaiveTime,
    #[serde(with = "hour_minute")]
    pub working_hours_end: NaiveTime,
    pub last_updated: DateTime<Utc>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        let hours = WorkingHours::default();
        Self {
            is_enabled: false,
            working_hours_start: hours.start,
            working_hours_end: hours.end,
            last_updated: Utc::now(),
        }
    }
}

impl SimulationSettings {
    pub fn working_hours(&self) -> WorkingHours {
        WorkingHours::new(self.working_hours_start, self.working_hours_end).unwrap_or_else(|err| {
            warn!("Invalid working hours in settings ({err}); using defaults");
            WorkingHours::default()
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserSettings {
    simulation: SimulationSettings,
}

/// Identity of the settings file as last seen by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    fn of(path: &Path) -> Option<Self> {
        let metadata = fs::metadata(path).ok()?;
        Some(Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }
}

/// Simulation settings backed by a JSON file. Other processes may rewrite the
/// file; reads pick that up and subscribers are notified.
pub struct SettingsStore {
    path: Option<PathBuf>,
    data: RwLock<UserSettings>,
    stamp: Mutex<Option<FileStamp>>,
    changes: watch::Sender<SimulationSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let existed = path.exists();
        let data = if existed {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring unreadable settings at {}: {err}", path.display());
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        let store = Self::from_data(Some(path), data);
        if existed {
            store.record_stamp();
        } else {
            store.persist(&store.read())?;
        }
        Ok(store)
    }

    /// Settings held in memory only.
    pub fn ephemeral(simulation: SimulationSettings) -> Self {
        Self::from_data(None, UserSettings { simulation })
    }

    fn from_data(path: Option<PathBuf>, data: UserSettings) -> Self {
        let (changes, _) = watch::channel(data.simulation.clone());
        Self {
            path,
            data: RwLock::new(data),
            stamp: Mutex::new(None),
            changes,
        }
    }

    pub fn simulation(&self) -> SimulationSettings {
        self.refresh();
        self.read().simulation.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.refresh();
        self.read().simulation.is_enabled
    }

    pub fn working_hours(&self) -> WorkingHours {
        self.refresh();
        self.read().simulation.working_hours()
    }

    /// Reload the file if it changed on disk since this store last read or
    /// wrote it. Returns `true` when the settings changed; subscribers are
    /// notified in that case.
    pub fn refresh(&self) -> bool {
        let Some(path) = &self.path else {
            return false;
        };
        let current = FileStamp::of(path);
        {
            let mut stamp = self.lock_stamp();
            if current.is_none() || *stamp == current {
                return false;
            }
            *stamp = current;
        }

        let loaded = match fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|contents| Ok(serde_json::from_str::<UserSettings>(&contents)?))
        {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!("Keeping previous settings; reload of {} failed: {err}", path.display());
                return false;
            }
        };

        {
            let mut guard = self.write();
            if guard.simulation == loaded.simulation {
                return false;
            }
            *guard = loaded.clone();
        }
        info!(
            "Settings reloaded from {} (enabled={})",
            path.display(),
            loaded.simulation.is_enabled
        );
        self.changes.send_replace(loaded.simulation);
        true
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<SimulationSettings> {
        self.update(|simulation| {
            simulation.is_enabled = enabled;
            Ok(())
        })
    }

    pub fn set_working_hours(&self, start: NaiveTime, end: NaiveTime) -> Result<SimulationSettings> {
        let hours = WorkingHours::new(start, end)?;
        self.update(|simulation| {
            simulation.working_hours_start = hours.start;
            simulation.working_hours_end = hours.end;
            Ok(())
        })
    }

    /// Observe every settings change. The receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<SimulationSettings> {
        self.changes.subscribe()
    }

    fn update<F>(&self, apply: F) -> Result<SimulationSettings>
    where
        F: FnOnce(&mut SimulationSettings) -> Result<()>,
    {
        self.refresh();
        let updated = {
            let mut guard = self.write();
            let mut next = guard.simulation.clone();
            apply(&mut next)?;
            next.last_updated = Utc::now();
            let candidate = UserSettings {
                simulation: next.clone(),
            };
            self.persist(&candidate)?;
            *guard = candidate;
            next
        };

        self.changes.send_replace(updated.clone());
        Ok(updated)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        self.record_stamp();
        Ok(())
    }

    fn record_stamp(&self) {
        if let Some(path) = &self.path {
            *self.lock_stamp() = FileStamp::of(path);
        }
    }

    fn lock_stamp(&self) -> std::sync::MutexGuard<'_, Option<FileStamp>> {
        match self.stamp.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
