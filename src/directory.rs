//! Read-only vehicle and employee lookups.
//!
//! Both directories belong to external collaborators. The engine only reads
//! them, to snapshot attributes into bookings and to price reservations.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::model::{Amount, EmployeeId, VehicleId, VehicleSnapshot};

pub const DEFAULT_COLOR_A: &str = "#0ea5e9";
pub const DEFAULT_COLOR_B: &str = "#ef4444";

/// Lane A / lane B colour pairs handed out by directory position to vehicles
/// that do not carry their own.
pub const COLOR_PAIRS: [(&str, &str); 8] = [
    ("#0ea5e9", "#ef4444"),
    ("#22c55e", "#f59e0b"),
    ("#8b5cf6", "#06b6d4"),
    ("#f43f5e", "#10b981"),
    ("#60a5fa", "#fb7185"),
    ("#a855f7", "#f97316"),
    ("#14b8a6", "#eab308"),
    ("#3b82f6", "#ef4444"),
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    #[serde(default)]
    pub plate: String,
    #[serde(default)]
    pub make: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, deserialize_with = "year_as_string")]
    pub year: String,
    #[serde(default)]
    pub rate_single_day: Option<Amount>,
    #[serde(default)]
    pub rate_standard: Option<Amount>,
    #[serde(default)]
    pub rate_border: Option<Amount>,
    #[serde(default)]
    pub color_a: Option<String>,
    #[serde(default)]
    pub color_b: Option<String>,
}

impl Vehicle {
    pub fn snapshot(&self) -> VehicleSnapshot {
        VehicleSnapshot {
            make: self.make.trim().to_string(),
            model: self.model.trim().to_string(),
            year: self.year.trim().to_string(),
            plate: self.plate.trim().to_string(),
        }
    }

    pub fn lane_colors(&self) -> (&str, &str) {
        (
            self.color_a.as_deref().unwrap_or(DEFAULT_COLOR_A),
            self.color_b.as_deref().unwrap_or(DEFAULT_COLOR_B),
        )
    }
}

/// Years show up both as numbers and as strings in directory files.
fn year_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Year {
        Num(i64),
        Text(String),
    }
    Ok(match Option::<Year>::deserialize(deserializer)? {
        Some(Year::Num(n)) => n.to_string(),
        Some(Year::Text(s)) => s,
        None => String::new(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub surname: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Employee {
    /// `name surname`, or a placeholder when both are blank.
    pub fn full_name(&self) -> String {
        let full = format!("{} {}", self.name.trim(), self.surname.trim());
        let full = full.trim();
        if full.is_empty() {
            format!("Employee {}", self.id)
        } else {
            full.to_string()
        }
    }
}

pub trait VehicleDirectory: Send + Sync {
    /// All vehicles, colour pairs filled in.
    fn vehicles(&self) -> Vec<Vehicle>;

    fn vehicle(&self, id: VehicleId) -> Option<Vehicle> {
        self.vehicles().into_iter().find(|v| v.id == id)
    }
}

pub trait EmployeeDirectory: Send + Sync {
    /// Active employees only.
    fn employees(&self) -> Vec<Employee>;

    fn employee(&self, id: EmployeeId) -> Option<Employee> {
        self.employees().into_iter().find(|e| e.id == id)
    }
}

/// Give every vehicle lacking a full pair the palette entry for its position.
pub fn ensure_vehicle_colors(vehicles: &mut [Vehicle]) {
    for (idx, v) in vehicles.iter_mut().enumerate() {
        if v.color_a.is_none() || v.color_b.is_none() {
            let (a, b) = COLOR_PAIRS[idx % COLOR_PAIRS.len()];
            v.color_a = Some(a.to_string());
            v.color_b = Some(b.to_string());
        }
    }
}

fn normalize_vehicles(mut vehicles: Vec<Vehicle>) -> Vec<Vehicle> {
    vehicles.retain(|v| v.id > 0);
    ensure_vehicle_colors(&mut vehicles);
    vehicles
}

fn normalize_employees(mut employees: Vec<Employee>) -> Vec<Employee> {
    employees.retain(|e| e.id > 0 && e.active);
    employees
}

/// Reads a JSON array from disk on every lookup so edits made by the owning
/// collaborator are visible immediately. Unreadable files read as empty.
pub struct JsonFileDirectory {
    vehicles_path: PathBuf,
    employees_path: PathBuf,
}

impl JsonFileDirectory {
    pub fn new(vehicles_path: PathBuf, employees_path: PathBuf) -> Self {
        Self {
            vehicles_path,
            employees_path,
        }
    }

    fn read_list<T: for<'de> Deserialize<'de>>(path: &PathBuf) -> Vec<T> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!("cannot read {}: {e}", path.display());
                return Vec::new();
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!("malformed directory file {}: {e}", path.display());
                Vec::new()
            }
        }
    }
}

impl VehicleDirectory for JsonFileDirectory {
    fn vehicles(&self) -> Vec<Vehicle> {
        normalize_vehicles(Self::read_list(&self.vehicles_path))
    }
}

impl EmployeeDirectory for JsonFileDirectory {
    fn employees(&self) -> Vec<Employee> {
        normalize_employees(Self::read_list(&self.employees_path))
    }
}

/// Fixed in-memory directory.
#[derive(Default)]
pub struct StaticDirectory {
    vehicles: Vec<Vehicle>,
    employees: Vec<Employee>,
}

impl StaticDirectory {
    pub fn new(vehicles: Vec<Vehicle>, employees: Vec<Employee>) -> Self {
        Self {
            vehicles: normalize_vehicles(vehicles),
            employees: normalize_employees(employees),
        }
    }
}

impl VehicleDirectory for StaticDirectory {
    fn vehicles(&self) -> Vec<Vehicle> {
        self.vehicles.clone()
    }
}

impl EmployeeDirectory for StaticDirectory {
    fn employees(&self) -> Vec<Employee> {
        self.employees.clone()
    }
}

/// Vehicles keyed by id, for callers that look up many at once.
pub fn index_vehicles(vehicles: Vec<Vehicle>) -> HashMap<VehicleId, Vehicle> {
    vehicles.into_iter().map(|v| (v.id, v)).collect()
}
