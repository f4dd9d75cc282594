//! Persisted irrigation settings on top of a byte-addressable store.
//!
//! Every numeric setting owns a value slot and a validity slot; the validity
//! slot holds [`VALID_SENTINEL`] once the value has been written on purpose.
//! Anything else (erased flash, a fresh file) means "never set".

use std::collections::HashMap;

use crate::{config::IrrigationConfig, error::StoreError};

pub const VALID_SENTINEL: u8 = 1;

/// Byte-addressable non-volatile storage. `write_u8` must be durable before it
/// returns.
pub trait ByteStore {
    fn read_u8(&self, key: &str) -> Result<Option<u8>, StoreError>;

    fn write_u8(&mut self, key: &str, value: u8) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    IrrigationInterval,
    IrrigationDuration,
    AutoIrrigate,
}

impl Setting {
    pub const ALL: [Setting; 3] = [
        Self::IrrigationInterval,
        Self::IrrigationDuration,
        Self::AutoIrrigate,
    ];

    pub fn value_key(self) -> &'static str {
        match self {
            Self::IrrigationInterval => "irr_int",
            Self::IrrigationDuration => "irr_dur",
            Self::AutoIrrigate => "irr_auto",
        }
    }

    /// The auto-irrigate flag has no separate validity slot; its value byte
    /// is valid when it is a boolean.
    pub fn valid_key(self) -> Option<&'static str> {
        match self {
            Self::IrrigationInterval => Some("irr_int_ok"),
            Self::IrrigationDuration => Some("irr_dur_ok"),
            Self::AutoIrrigate => None,
        }
    }

    pub fn default_value(self) -> u8 {
        let defaults = IrrigationConfig::default();
        match self {
            Self::IrrigationInterval => defaults.interval_days,
            Self::IrrigationDuration => defaults.duration_seconds,
            Self::AutoIrrigate => u8::from(defaults.auto_irrigate),
        }
    }
}

pub struct SettingsStore<S> {
    backend: S,
}

impl<S: ByteStore> SettingsStore<S> {
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut S {
        &mut self.backend
    }

    pub fn into_inner(self) -> S {
        self.backend
    }

    /// Returns the stored byte (0 when absent) and whether it was explicitly set.
    pub fn read(&self, setting: Setting) -> Result<(u8, bool), StoreError> {
        let value = self.backend.read_u8(setting.value_key())?;
        let valid = match setting.valid_key() {
            Some(key) => self.backend.read_u8(key)? == Some(VALID_SENTINEL),
            None => matches!(value, Some(0 | 1)),
        };
        Ok((value.unwrap_or(0), valid))
    }

    /// Either the new value is stored and marked valid, or the setting keeps
    /// what it had before. A slot that is already valid only needs its value
    /// byte rewritten.
    pub fn write(&mut self, setting: Setting, value: u8) -> Result<(), StoreError> {
        let value_key = setting.value_key();
        let Some(valid_key) = setting.valid_key() else {
            return self.backend.write_u8(value_key, value);
        };

        if self.backend.read_u8(valid_key)? == Some(VALID_SENTINEL) {
            return self.backend.write_u8(value_key, value);
        }

        let previous = self.backend.read_u8(value_key)?;
        self.backend.write_u8(value_key, value)?;
        if let Err(err) = self.backend.write_u8(valid_key, VALID_SENTINEL) {
            // The slot is still unmarked, so a failed restore is ignored at load.
            let _ = self.backend.write_u8(value_key, previous.unwrap_or(0));
            return Err(err);
        }
        Ok(())
    }

    /// Boot-time self-heal: any setting not marked valid gets its default
    /// written, then the now-valid values are loaded.
    pub fn init_defaults(&mut self) -> Result<IrrigationConfig, StoreError> {
        for setting in Setting::ALL {
            let (_, valid) = self.read(setting)?;
            if !valid {
                self.write(setting, setting.default_value())?;
            }
        }
        self.load()
    }

    pub fn load(&self) -> Result<IrrigationConfig, StoreError> {
        let value_or_default = |setting: Setting| -> Result<u8, StoreError> {
            let (value, valid) = self.read(setting)?;
            Ok(if valid { value } else { setting.default_value() })
        };

        Ok(IrrigationConfig {
            interval_days: value_or_default(Setting::IrrigationInterval)?.max(1),
            duration_seconds: value_or_default(Setting::IrrigationDuration)?.max(1),
            auto_irrigate: value_or_default(Setting::AutoIrrigate)? == 1,
        })
    }
}

/// Volatile backend for tests and simulation.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    slots: HashMap<String, u8>,
    fail_writes: bool,
    fail_key: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following write fail, as a worn-out or full flash would.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Makes writes to one slot fail while every other slot keeps working.
    pub fn set_fail_key(&mut self, key: Option<&str>) {
        self.fail_key = key.map(str::to_string);
    }

    pub fn raw(&self, key: &str) -> Option<u8> {
        self.slots.get(key).copied()
    }
}

impl ByteStore for MemoryStore {
    fn read_u8(&self, key: &str) -> Result<Option<u8>, StoreError> {
        Ok(self.slots.get(key).copied())
    }

    fn write_u8(&mut self, key: &str, value: u8) -> Result<(), StoreError> {
        if self.fail_writes || self.fail_key.as_deref() == Some(key) {
            return Err(StoreError::Backend(format!("write to `{key}` rejected")));
        }
        self.slots.insert(key.to_string(), value);
        Ok(())
    }
}
